use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};

use rayon::prelude::*;

use crate::compose::audio::AudioBlock;
use crate::compose::compositor::{ClipFailure, Compositor};
use crate::export::cancel::CancelToken;
use crate::export::encoder::{AudioEncodeConfig, EncodeConfig, EncoderSink};
use crate::foundation::core::{FrameIndex, FrameRgba};
use crate::foundation::error::{CutlineError, CutlineResult};
use crate::media::pool::DecoderPool;
use crate::media::source::{MIX_CHANNELS, MIX_SAMPLE_RATE};
use crate::project::Project;

/// Options controlling an export run.
#[derive(Clone, Debug)]
pub struct ExportOpts {
    /// Enable frame-level parallelism (rayon) with a dedicated thread pool.
    pub parallel: bool,
    /// Override the number of worker threads. `None` uses rayon defaults.
    pub threads: Option<usize>,
    /// Frames rendered per parallel chunk; bounds the reorder buffer.
    pub chunk_size: usize,
    /// Bounded channel capacity between render workers and the encoder thread.
    pub channel_capacity: usize,
    /// Mix and encode audio when the timeline has audio clips.
    pub enable_audio: bool,
}

impl Default for ExportOpts {
    fn default() -> Self {
        Self {
            parallel: false,
            threads: None,
            chunk_size: 64,
            channel_capacity: 4,
            enable_audio: true,
        }
    }
}

/// How an export run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportStatus {
    Completed,
    /// The run observed a cancellation request; partial output was discarded.
    Cancelled,
}

/// Result of an export run.
#[derive(Clone, Debug)]
pub struct ExportReport {
    pub status: ExportStatus,
    /// Frames delivered to the encoder before the run ended.
    pub frames_written: u64,
    /// Clips whose decode failed (each reported once); their frames were
    /// substituted with blank layers.
    pub failures: Vec<ClipFailure>,
}

/// Drives the compositor across the timeline and feeds an encoder session in
/// strictly increasing frame order.
///
/// At most one export may run per `Exporter` at a time. Output is atomic:
/// the session is finalized only after every frame was written, and is
/// discarded on failure or cancellation.
pub struct Exporter {
    pool: Arc<DecoderPool>,
    busy: AtomicBool,
}

struct FrameMsg {
    idx: u64,
    frame: FrameRgba,
    audio: AudioBlock,
    failures: Vec<ClipFailure>,
}

impl Exporter {
    pub fn new(pool: Arc<DecoderPool>) -> Self {
        Self {
            pool,
            busy: AtomicBool::new(false),
        }
    }

    /// Render the whole timeline into `sink`.
    ///
    /// The cancellation token is checked at least once per output frame; a
    /// cancelled run discards the encoder session and reports
    /// [`ExportStatus::Cancelled`] instead of a partial success.
    #[tracing::instrument(skip_all, fields(frames = project.timeline.duration_frames()))]
    pub fn export(
        &self,
        project: &Project,
        sink: &mut dyn EncoderSink,
        opts: &ExportOpts,
        cancel: &CancelToken,
    ) -> CutlineResult<ExportReport> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CutlineError::validation(
                "an export is already running for this project",
            ));
        }
        let _busy = BusyGuard(&self.busy);

        project.validate()?;
        let frames = project.timeline.duration_frames();
        if frames == 0 {
            return Err(CutlineError::validation("timeline has no clips to export"));
        }

        let with_audio = opts.enable_audio && project.timeline.has_audio();
        let cfg = EncodeConfig {
            width: project.timeline.output.width,
            height: project.timeline.output.height,
            fps: project.timeline.output.fps,
            audio: with_audio.then_some(AudioEncodeConfig {
                sample_rate: MIX_SAMPLE_RATE,
                channels: MIX_CHANNELS,
            }),
        };

        let rayon_pool = if opts.parallel {
            Some(build_thread_pool(opts.threads)?)
        } else {
            None
        };
        let cap = opts.channel_capacity.max(1);
        let chunk_size = (opts.chunk_size.max(1) as u64).min(frames);

        let (produce_res, enc_res) = std::thread::scope(|scope| {
            let (tx, rx) = mpsc::sync_channel::<FrameMsg>(cap);
            // Reborrow so the sink is usable again once the scope ends.
            let sink_ref: &mut dyn EncoderSink = &mut *sink;
            let cfg_enc = cfg.clone();

            // The encoder thread owns the sink for the duration of the run
            // and restores frame order behind the parallel producers.
            let enc = scope.spawn(move || -> CutlineResult<(u64, Vec<ClipFailure>)> {
                sink_ref.begin(cfg_enc.clone())?;

                let mut written = 0u64;
                let mut failures = Vec::new();
                let mut seen_clips = HashSet::new();
                let mut pending = HashMap::<u64, FrameMsg>::new();
                let mut next = 0u64;

                'recv: while next < frames {
                    let msg = match pending.remove(&next) {
                        Some(msg) => msg,
                        None => match rx.recv() {
                            Ok(msg) => {
                                if msg.idx != next {
                                    pending.insert(msg.idx, msg);
                                    continue 'recv;
                                }
                                msg
                            }
                            // Producers stopped early (cancelled or failed);
                            // the partial session is resolved by the caller.
                            Err(_) => break 'recv,
                        },
                    };

                    sink_ref.write_frame(FrameIndex(msg.idx), &msg.frame)?;
                    if cfg_enc.audio.is_some() {
                        sink_ref.write_audio(FrameIndex(msg.idx), &msg.audio)?;
                    }
                    written += 1;
                    for failure in msg.failures {
                        if seen_clips.insert(failure.clip) {
                            failures.push(failure);
                        }
                    }
                    next += 1;
                }

                Ok((written, failures))
            });

            let produce_res = if let Some(pool) = rayon_pool.as_ref() {
                self.produce_parallel(project, pool, &tx, frames, chunk_size, cancel)
            } else {
                self.produce_sequential(project, &tx, frames, cancel)
            };

            drop(tx);
            let enc_res = enc
                .join()
                .unwrap_or_else(|_| Err(CutlineError::encode("encoder thread panicked")));
            (produce_res, enc_res)
        });

        // The sink borrow ends with the scope; resolve the session exactly
        // once: finalize on success, discard otherwise.
        let (frames_written, failures) = match enc_res {
            Ok(ok) => ok,
            Err(e) => {
                let _ = sink.discard();
                return Err(e);
            }
        };

        match produce_res {
            Ok(()) => {
                sink.finalize()?;
                tracing::info!(frames_written, "export completed");
                Ok(ExportReport {
                    status: ExportStatus::Completed,
                    frames_written,
                    failures,
                })
            }
            Err(e) if e.is_cancelled() => {
                sink.discard()?;
                tracing::info!(frames_written, "export cancelled");
                Ok(ExportReport {
                    status: ExportStatus::Cancelled,
                    frames_written,
                    failures,
                })
            }
            Err(e) => {
                let _ = sink.discard();
                Err(e)
            }
        }
    }

    fn produce_sequential(
        &self,
        project: &Project,
        tx: &mpsc::SyncSender<FrameMsg>,
        frames: u64,
        cancel: &CancelToken,
    ) -> CutlineResult<()> {
        let mut compositor = Compositor::new(self.pool.clone());
        for f in 0..frames {
            cancel.check()?;
            let out = compositor.composite_at(project, FrameIndex(f))?;
            tx.send(FrameMsg {
                idx: f,
                frame: out.frame,
                audio: out.audio,
                failures: out.failures,
            })
            .map_err(|_| CutlineError::encode("encoder thread is not accepting frames"))?;
        }
        Ok(())
    }

    fn produce_parallel(
        &self,
        project: &Project,
        pool: &rayon::ThreadPool,
        tx: &mpsc::SyncSender<FrameMsg>,
        frames: u64,
        chunk_size: u64,
        cancel: &CancelToken,
    ) -> CutlineResult<()> {
        let mut chunk_start = 0u64;
        while chunk_start < frames {
            let chunk_end = (chunk_start + chunk_size).min(frames);
            let tx = tx.clone();
            pool.install(|| {
                (chunk_start..chunk_end).into_par_iter().try_for_each_init(
                    || Compositor::new(self.pool.clone()),
                    |compositor, f| -> CutlineResult<()> {
                        cancel.check()?;
                        let out = compositor.composite_at(project, FrameIndex(f))?;
                        tx.send(FrameMsg {
                            idx: f,
                            frame: out.frame,
                            audio: out.audio,
                            failures: out.failures,
                        })
                        .map_err(|_| {
                            CutlineError::encode("encoder thread is not accepting frames")
                        })
                    },
                )
            })?;
            chunk_start = chunk_end;
        }
        Ok(())
    }
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn build_thread_pool(threads: Option<usize>) -> CutlineResult<rayon::ThreadPool> {
    if let Some(n) = threads
        && n == 0
    {
        return Err(CutlineError::validation(
            "export 'threads' must be >= 1 when set",
        ));
    }
    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| CutlineError::encode(format!("failed to build rayon thread pool: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::params::EffectParams;
    use crate::export::encoder::InMemorySink;
    use crate::foundation::core::Fps;
    use crate::media::source::{
        AudioChunk, DecodeRequest, Decoded, MediaSource, SourceOpener,
    };
    use crate::project::asset::{Asset, AssetId, MediaKind};
    use crate::project::clip::{Clip, ClipId};
    use crate::project::timeline::OutputSettings;
    use crate::project::track::TrackKind;

    struct SolidOpener;

    struct SolidSource;

    impl MediaSource for SolidSource {
        fn decode_at(&mut self, request: DecodeRequest) -> CutlineResult<Decoded> {
            match request {
                DecodeRequest::VideoFrame { .. } => Ok(Decoded::Frame(FrameRgba {
                    width: 4,
                    height: 4,
                    data: [200u8, 100, 50, 255].repeat(16),
                    premultiplied: true,
                })),
                DecodeRequest::AudioSpan { max_frames, .. } => Ok(Decoded::Audio(AudioChunk {
                    sample_rate: MIX_SAMPLE_RATE,
                    channels: 2,
                    start_frame: 0,
                    interleaved: vec![0.1; max_frames * 2],
                })),
            }
        }
    }

    impl SourceOpener for SolidOpener {
        fn open(&self, _asset: &Asset) -> CutlineResult<Box<dyn MediaSource>> {
            Ok(Box::new(SolidSource))
        }
    }

    fn project(duration_sec: f64) -> Project {
        let mut p = Project::new(
            "export",
            OutputSettings {
                width: 4,
                height: 4,
                fps: Fps { num: 30, den: 1 },
            },
        )
        .unwrap();
        p.import_asset(
            MediaKind::Video,
            Some("a.mp4".into()),
            Some(60.0),
            None,
            None,
        )
        .unwrap();
        let v = p.timeline.add_track(TrackKind::Video, "v0");
        p.timeline
            .add_clip(
                v,
                Clip::new(
                    ClipId(0),
                    AssetId(0),
                    0.0,
                    0.0,
                    duration_sec,
                    1.0,
                    EffectParams::default(),
                )
                .unwrap(),
                &p.assets,
            )
            .unwrap();
        p
    }

    fn exporter() -> Exporter {
        Exporter::new(Arc::new(DecoderPool::new(Arc::new(SolidOpener))))
    }

    #[test]
    fn sequential_export_completes_with_all_frames() {
        let p = project(1.0);
        let ex = exporter();
        let mut sink = InMemorySink::new();
        let report = ex
            .export(&p, &mut sink, &ExportOpts::default(), &CancelToken::new())
            .unwrap();
        assert_eq!(report.status, ExportStatus::Completed);
        assert_eq!(report.frames_written, 30);
        assert!(sink.finalized);
        assert_eq!(sink.frames.len(), 30);
        for (i, (idx, _)) in sink.frames.iter().enumerate() {
            assert_eq!(idx.0, i as u64);
        }
    }

    #[test]
    fn empty_timeline_is_rejected() {
        let mut p = project(1.0);
        p.timeline.remove_clip(0, ClipId(0)).unwrap();
        let ex = exporter();
        let mut sink = InMemorySink::new();
        assert!(
            ex.export(&p, &mut sink, &ExportOpts::default(), &CancelToken::new())
                .is_err()
        );
    }

    #[test]
    fn pre_cancelled_export_discards_and_reports_cancelled() {
        let p = project(1.0);
        let ex = exporter();
        let mut sink = InMemorySink::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = ex
            .export(&p, &mut sink, &ExportOpts::default(), &cancel)
            .unwrap();
        assert_eq!(report.status, ExportStatus::Cancelled);
        assert_eq!(report.frames_written, 0);
        assert!(sink.discarded);
        assert!(!sink.finalized);
    }

    #[test]
    fn concurrent_exports_are_mutually_exclusive() {
        let p = project(5.0);
        let ex = exporter();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        /// Sink that parks on the first frame until released.
        struct GatedSink {
            inner: InMemorySink,
            started: mpsc::Sender<()>,
            release: mpsc::Receiver<()>,
            gated: bool,
        }

        impl EncoderSink for GatedSink {
            fn begin(&mut self, cfg: EncodeConfig) -> CutlineResult<()> {
                self.inner.begin(cfg)
            }
            fn write_frame(&mut self, idx: FrameIndex, frame: &FrameRgba) -> CutlineResult<()> {
                if !self.gated {
                    self.gated = true;
                    let _ = self.started.send(());
                    let _ = self.release.recv();
                }
                self.inner.write_frame(idx, frame)
            }
            fn write_audio(&mut self, idx: FrameIndex, block: &AudioBlock) -> CutlineResult<()> {
                self.inner.write_audio(idx, block)
            }
            fn finalize(&mut self) -> CutlineResult<()> {
                self.inner.finalize()
            }
            fn discard(&mut self) -> CutlineResult<()> {
                self.inner.discard()
            }
        }

        std::thread::scope(|scope| {
            let first = scope.spawn(|| {
                let mut sink = GatedSink {
                    inner: InMemorySink::new(),
                    started: started_tx,
                    release: release_rx,
                    gated: false,
                };
                ex.export(&p, &mut sink, &ExportOpts::default(), &CancelToken::new())
            });

            // Wait until the first export is demonstrably inside its run.
            started_rx.recv().unwrap();
            let mut second_sink = InMemorySink::new();
            let err = ex
                .export(
                    &p,
                    &mut second_sink,
                    &ExportOpts::default(),
                    &CancelToken::new(),
                )
                .unwrap_err();
            assert!(err.to_string().contains("already running"));

            release_tx.send(()).unwrap();
            let report = first.join().unwrap().unwrap();
            assert_eq!(report.status, ExportStatus::Completed);
        });

        // The busy flag resets once the run ends.
        let mut sink = InMemorySink::new();
        ex.export(&p, &mut sink, &ExportOpts::default(), &CancelToken::new())
            .unwrap();
    }

    #[test]
    fn encoder_failure_discards_the_session() {
        struct FailingSink {
            inner: InMemorySink,
        }

        impl EncoderSink for FailingSink {
            fn begin(&mut self, cfg: EncodeConfig) -> CutlineResult<()> {
                self.inner.begin(cfg)
            }
            fn write_frame(&mut self, idx: FrameIndex, frame: &FrameRgba) -> CutlineResult<()> {
                if idx.0 == 3 {
                    return Err(CutlineError::encode("synthetic write failure"));
                }
                self.inner.write_frame(idx, frame)
            }
            fn write_audio(&mut self, idx: FrameIndex, block: &AudioBlock) -> CutlineResult<()> {
                self.inner.write_audio(idx, block)
            }
            fn finalize(&mut self) -> CutlineResult<()> {
                self.inner.finalize()
            }
            fn discard(&mut self) -> CutlineResult<()> {
                self.inner.discard()
            }
        }

        let p = project(1.0);
        let ex = exporter();
        let mut sink = FailingSink {
            inner: InMemorySink::new(),
        };
        let err = ex
            .export(&p, &mut sink, &ExportOpts::default(), &CancelToken::new())
            .unwrap_err();
        assert!(err.to_string().contains("synthetic write failure"));
        assert!(sink.inner.discarded);
        assert!(!sink.inner.finalized);
    }
}
