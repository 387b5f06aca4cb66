use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Connection-request wake-up shared between the listener and one engine.
///
/// The flag is sticky: a request that arrives mid-session stays raised until
/// the engine takes it when the session closes.
#[derive(Debug, Default)]
pub struct ConnectionRequestSignal {
    requested: AtomicBool,
    notify: Notify,
}

impl ConnectionRequestSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Clears the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.requested.swap(false, Ordering::SeqCst)
    }

    pub fn is_raised(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}
