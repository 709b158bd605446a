//! Cooperative cancellation flags.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A shareable "abort requested" flag.
///
/// Raising the flag never interrupts an in-flight service call; loops check it before
/// starting the next unit of work.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    requested: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }
}

/// Handle that aborts a run from another task.
///
/// A coordinator run borrows the coordinator mutably for its whole duration, so
/// cancellation goes through a cloned handle instead.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    signals: Vec<AbortSignal>,
}

impl AbortHandle {
    pub(crate) fn new(signals: Vec<AbortSignal>) -> Self {
        Self { signals }
    }

    /// Raise every flag this handle controls.
    pub fn abort(&self) {
        for signal in &self.signals {
            signal.request();
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.signals.iter().any(AbortSignal::is_requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_is_shared_between_clones() {
        let signal = AbortSignal::new();
        let clone = signal.clone();
        clone.request();
        assert!(signal.is_requested());
        signal.clear();
        assert!(!clone.is_requested());
    }

    #[test]
    fn test_handle_raises_all_signals() {
        let a = AbortSignal::new();
        let b = AbortSignal::new();
        let handle = AbortHandle::new(vec![a.clone(), b.clone()]);
        assert!(!handle.is_aborted());
        handle.abort();
        assert!(a.is_requested() && b.is_requested());
    }
}
