//! Process-wide "exiting" flag polled by long-running loops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cloneable handle to a shared exiting flag.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder of this handle to stop at its next loop boundary.
    pub fn signal(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_exiting(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_is_shared_between_clones() {
        let a = Shutdown::new();
        let b = a.clone();
        assert!(!b.is_exiting());
        a.signal();
        assert!(b.is_exiting());
    }
}
