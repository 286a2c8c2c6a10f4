//! Cooperative cancellation, checked at entity boundaries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use habsync_core::{Error, Result};

/// Shared flag raised by the caller (e.g. on Ctrl+C).
///
/// Raising it stops further mutations; mutations already applied stay.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// # Errors
    ///
    /// Returns `Cancelled` once the flag is raised.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_flag() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(clone.check().is_ok());

        flag.cancel();

        assert_eq!(clone.check(), Err(Error::Cancelled));
    }
}
