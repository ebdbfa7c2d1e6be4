// "App is active" flag shared by every gated background loop.
//
// One owner writes it (the foreground/background setter); the keep-alive
// loop and the schedulers only read it. Backed by a `watch` channel so
// readers can also await a change instead of polling.

use std::sync::Arc;

use tokio::sync::watch;

/// Cheaply cloneable handle to the shared activity flag.
#[derive(Debug, Clone)]
pub struct ActivityFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl ActivityFlag {
    pub fn new(active: bool) -> Self {
        let (tx, _) = watch::channel(active);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_active(&self) -> bool {
        *self.tx.borrow()
    }

    /// Set the flag. Subscribers are only woken on an actual change.
    pub fn set_active(&self, active: bool) {
        self.tx.send_if_modified(|current| {
            if *current == active {
                false
            } else {
                *current = active;
                true
            }
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ActivityFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let flag = ActivityFlag::default();
        let reader = flag.clone();
        assert!(reader.is_active());
        flag.set_active(false);
        assert!(!reader.is_active());
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let flag = ActivityFlag::new(false);
        let mut rx = flag.subscribe();
        flag.set_active(true);
        rx.changed().await.unwrap_or_default();
        assert!(*rx.borrow());
    }
}
