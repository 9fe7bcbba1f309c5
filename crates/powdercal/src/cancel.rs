use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::CalibrationError;

/// Shared flag that aborts a running calibration between stages.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// A flag that is not raised.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; every clone observes it.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// `Err(Cancelled)` when `flag` is raised.
pub(crate) fn check(flag: Option<&CancelFlag>) -> Result<(), CalibrationError> {
    match flag {
        Some(f) if f.is_cancelled() => Err(CalibrationError::Cancelled),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let a = CancelFlag::new();
        let b = a.clone();
        assert!(check(Some(&b)).is_ok());
        a.cancel();
        assert_eq!(check(Some(&b)), Err(CalibrationError::Cancelled));
        assert!(check(None).is_ok());
    }
}
