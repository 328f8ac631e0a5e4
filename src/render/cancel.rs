//! Cooperative cancellation flag shared between the caller and a render worker

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Set-once cancellation flag. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent; the flag is never cleared.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// True when both tokens share one flag, i.e. one is a clone of the other
    pub(crate) fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let token = CancellationToken::new();
        let worker = token.clone();
        assert!(!worker.is_cancelled());

        token.cancel();
        token.cancel();
        assert!(worker.is_cancelled());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_identity_follows_clones() {
        let token = CancellationToken::new();
        assert!(token.same_as(&token.clone()));
        assert!(!token.same_as(&CancellationToken::new()));
    }

    #[test]
    fn test_visible_across_threads() {
        let token = CancellationToken::new();
        let remote = token.clone();
        std::thread::spawn(move || remote.cancel()).join().unwrap();
        assert!(token.is_cancelled());
    }
}
