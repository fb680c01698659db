//! Catalog refresh notifications.
//!
//! Screens that show catalog-derived data subscribe and reload when the
//! version moves. Triggered after a completed checkout, any item
//! create/update/delete and a committed quick-stock adjustment.

use tokio::sync::watch;
use tracing::debug;

pub struct RefreshSignal {
    tx: watch::Sender<u64>,
}

impl RefreshSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx }
    }

    /// Bump the version and wake every subscriber.
    pub fn trigger(&self) {
        self.tx.send_modify(|v| *v = v.wrapping_add(1));
        debug!(version = *self.tx.borrow(), "Refresh triggered");
    }

    pub fn version(&self) -> u64 {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }
}

impl Default for RefreshSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_monotonic() {
        let signal = RefreshSignal::new();
        assert_eq!(signal.version(), 0);
        signal.trigger();
        signal.trigger();
        assert_eq!(signal.version(), 2);
    }

    #[tokio::test]
    async fn test_subscriber_sees_trigger() {
        let signal = RefreshSignal::new();
        let mut rx = signal.subscribe();
        assert!(!rx.has_changed().unwrap());

        signal.trigger();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 1);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_trigger_without_subscribers_still_counts() {
        let signal = RefreshSignal::default();
        signal.trigger();
        assert_eq!(signal.version(), 1);
    }
}
