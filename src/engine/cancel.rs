//! Cancellation tokens for running executions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

/// Cancellation signals keyed by execution id.
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    tokens: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an execution and return its cancellation token.
    pub fn register(&self, execution_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.lock()
            .insert(execution_id.to_string(), token.clone());
        token
    }

    /// Request cancellation for a specific execution. Returns false if the
    /// execution is not running.
    pub fn cancel(&self, execution_id: &str) -> bool {
        match self.lock().get(execution_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every registered execution and return how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let tokens = self.lock();
        for token in tokens.values() {
            token.cancel();
        }
        tokens.len()
    }

    /// Unregister an execution (called when execution completes).
    pub fn unregister(&self, execution_id: &str) {
        self.lock().remove(execution_id);
    }

    /// Ids of the registered executions, sorted.
    pub fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_registered_execution() {
        let registry = CancellationRegistry::new();
        let token = registry.register("exec-1");

        assert!(registry.cancel("exec-1"));
        assert!(token.is_cancelled());
        assert!(!registry.cancel("exec-2"));
    }

    #[test]
    fn test_cancel_all_and_unregister() {
        let registry = CancellationRegistry::new();
        let a = registry.register("a");
        let b = registry.register("b");
        assert_eq!(registry.running(), vec!["a", "b"]);

        assert_eq!(registry.cancel_all(), 2);
        assert!(a.is_cancelled() && b.is_cancelled());

        registry.unregister("a");
        assert_eq!(registry.running(), vec!["b"]);
    }
}
