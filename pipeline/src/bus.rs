use tokio::sync::broadcast;

use corelib::error::EngineError;

/// Process-wide channel for SYSTEM-kind failures.
///
/// The worker publishes every system error it settles; operators subscribe
/// (the backend runs a logging monitor). Events are advisory, so publishing
/// with no subscribers is fine.
#[derive(Clone)]
pub struct CriticalBus {
    tx: broadcast::Sender<EngineError>,
}

impl CriticalBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, err: EngineError) {
        let _ = self.tx.send(err);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineError> {
        self.tx.subscribe()
    }
}

impl Default for CriticalBus {
    fn default() -> Self {
        Self::new(64)
    }
}
