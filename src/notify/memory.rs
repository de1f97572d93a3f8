use std::sync::{
    Mutex,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;

use super::{Notifier, NotifyError, NotifyResult};
use crate::reconciler::PassResult;

/// Keeps every published summary in memory (for testing only).
#[derive(Default)]
pub struct MemoryNotifier {
    published: Mutex<Vec<PassResult>>,
    fail: AtomicBool,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<PassResult> {
        self.published
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    fn name(&self) -> &str {
        "memory"
    }

    async fn publish(&self, summary: &PassResult) -> NotifyResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Unavailable("injected fault".to_string()));
        }
        self.published
            .lock()
            .map_err(|_| NotifyError::Unavailable("notifier lock poisoned".to_string()))?
            .push(summary.clone());
        Ok(())
    }
}
