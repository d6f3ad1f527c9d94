use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::foundation::error::{CutlineError, CutlineResult};

/// Cooperative cancellation flag shared between a caller and a running
/// export or preview render. Cloning shares the flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Short-circuit with `CutlineError::Cancelled` once cancelled.
    pub fn check(&self) -> CutlineResult<()> {
        if self.is_cancelled() {
            return Err(CutlineError::Cancelled);
        }
        Ok(())
    }
}
