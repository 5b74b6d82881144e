//! Cooperative shutdown signal shared by the Scheduler's loop and its
//! workers, grounded in the `watch`-channel stopper pattern used
//! elsewhere in this codebase's lineage for graceful task teardown.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Clone)]
pub struct Stopper {
    state: Arc<watch::Sender<bool>>,
}

impl Default for Stopper {
    fn default() -> Self {
        Self::new()
    }
}

impl Stopper {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Stopper {
            state: Arc::new(state),
        }
    }

    pub fn stop(&self) {
        self.state.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.state.borrow()
    }

    pub async fn stopped(&self) {
        let mut r = self.state.subscribe();
        if !*r.borrow_and_update() {
            let _ = r.changed().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn stopped_resolves_after_stop_is_called() {
        let stopper = Stopper::new();
        assert!(!stopper.is_stopped());
        assert!(tokio::time::timeout(Duration::from_millis(50), stopper.stopped())
            .await
            .is_err());

        let other = stopper.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            other.stop();
        });
        assert!(tokio::time::timeout(Duration::from_millis(500), stopper.stopped())
            .await
            .is_ok());
        assert!(stopper.is_stopped());
    }
}
