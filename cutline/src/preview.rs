//! Dedicated preview worker.
//!
//! Compositing blocks on decoder I/O, so interactive callers hand frame
//! requests to a worker thread instead of compositing on their own thread.
//! Requests are latest-wins: when several frame requests are queued, only
//! the newest is rendered and the superseded callers observe a dropped
//! reply channel.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;

use crate::compose::compositor::Compositor;
use crate::export::cancel::CancelToken;
use crate::foundation::core::{FrameIndex, FrameRgba};
use crate::foundation::error::CutlineResult;
use crate::media::pool::DecoderPool;
use crate::project::Project;

enum PreviewRequest {
    Frame {
        frame: FrameIndex,
        reply: mpsc::Sender<CutlineResult<FrameRgba>>,
    },
    UpdateProject(Box<Project>),
    Shutdown,
}

/// Handle to a preview worker thread.
pub struct PreviewWorker {
    tx: mpsc::Sender<PreviewRequest>,
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl PreviewWorker {
    /// Spawn a worker over a snapshot of the project.
    pub fn spawn(project: Project, pool: Arc<DecoderPool>) -> Self {
        let (tx, rx) = mpsc::channel::<PreviewRequest>();
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();
        let handle = std::thread::spawn(move || worker_loop(project, pool, rx, worker_cancel));
        Self {
            tx,
            cancel,
            handle: Some(handle),
        }
    }

    /// Request one composited frame; the result arrives on the returned
    /// channel. A superseded request's channel disconnects without a value.
    pub fn request_frame(&self, frame: FrameIndex) -> mpsc::Receiver<CutlineResult<FrameRgba>> {
        let (reply, rx) = mpsc::channel();
        // A send failure means the worker is gone; the caller sees the
        // disconnect on `rx`.
        let _ = self.tx.send(PreviewRequest::Frame { frame, reply });
        rx
    }

    /// Replace the worker's project snapshot after an edit.
    pub fn update_project(&self, project: Project) {
        let _ = self.tx.send(PreviewRequest::UpdateProject(Box::new(project)));
    }

    /// Stop the worker and wait for it to exit.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        self.cancel.cancel();
        let _ = self.tx.send(PreviewRequest::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PreviewWorker {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

fn worker_loop(
    mut project: Project,
    pool: Arc<DecoderPool>,
    rx: mpsc::Receiver<PreviewRequest>,
    cancel: CancelToken,
) {
    let mut compositor = Compositor::new(pool);

    while let Ok(msg) = rx.recv() {
        let (mut frame, mut reply) = match msg {
            PreviewRequest::UpdateProject(next) => {
                project = *next;
                continue;
            }
            PreviewRequest::Shutdown => return,
            PreviewRequest::Frame { frame, reply } => (frame, reply),
        };

        // Drain the mailbox: newer frame requests supersede this one (the
        // superseded reply sender is dropped, disconnecting its receiver);
        // project updates apply immediately.
        loop {
            match rx.try_recv() {
                Ok(PreviewRequest::Frame {
                    frame: newer,
                    reply: newer_reply,
                }) => {
                    frame = newer;
                    reply = newer_reply;
                }
                Ok(PreviewRequest::UpdateProject(next)) => {
                    project = *next;
                }
                Ok(PreviewRequest::Shutdown) => return,
                Err(mpsc::TryRecvError::Empty) | Err(mpsc::TryRecvError::Disconnected) => break,
            }
        }

        if cancel.is_cancelled() {
            return;
        }
        let result = compositor
            .composite_at(&project, frame)
            .map(|out| out.frame);
        let _ = reply.send(result);
    }
}
