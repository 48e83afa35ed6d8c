use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{IntegraError, Result};

/// Cooperative cancellation flag shared between the caller and the engine.
///
/// The engine polls it at strip and channel boundaries and returns
/// `IntegraError::Aborted` once it is set.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(IntegraError::Aborted)
        } else {
            Ok(())
        }
    }
}
