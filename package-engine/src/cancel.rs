use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag handed to the engine by the runtime.
///
/// The engine consults it once, before any state-mutating work; installer
/// hooks always run to completion.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag {
    shutdown: Arc<AtomicBool>,
    canceled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn request_cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_start_clear() {
        let flag = CancelFlag::new();
        assert!(!flag.shutdown());
        assert!(!flag.canceled());
    }

    #[test]
    fn flags_are_shared_between_clones() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        flag.request_cancel();
        clone.request_shutdown();
        assert!(flag.shutdown());
        assert!(clone.canceled());
    }
}
