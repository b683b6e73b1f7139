use std::sync::Arc;
use tokio::sync::Notify;

/// Single-slot wake condition that wakes the poller and restarts its interval.
///
/// Raising the signal while it is already raised is a no-op; a waiter that
/// observes it clears it.
#[derive(Debug, Clone, Default)]
pub struct RefreshSignal {
    inner: Arc<Notify>,
}

impl RefreshSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        // `notify_one` stores at most one permit when nobody is waiting.
        self.inner.notify_one();
    }

    /// Waits until the signal is raised and clears it.
    pub async fn wait(&self) {
        self.inner.notified().await;
    }
}
