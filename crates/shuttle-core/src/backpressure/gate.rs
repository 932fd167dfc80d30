use std::sync::Arc;

use tokio::sync::watch;

/// Pause flag shared by the monitor (writer) and the processor (reader).
///
/// Backed by a `watch` channel so a paused reader parks until the flag flips
/// instead of polling. Clones share the same flag.
#[derive(Clone)]
pub struct PauseGate {
    tx: Arc<watch::Sender<bool>>,
}

impl PauseGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Returns `true` if the gate was open before this call.
    pub fn pause(&self) -> bool {
        self.tx.send_if_modified(|paused| !std::mem::replace(paused, true))
    }

    /// Returns `true` if the gate was closed before this call.
    pub fn resume(&self) -> bool {
        self.tx.send_if_modified(|paused| std::mem::replace(paused, false))
    }

    pub fn is_paused(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the gate is open. Returns immediately if it already is.
    pub async fn wait_resumed(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives in `self`, so this cannot observe a closed channel
        let _ = rx.wait_for(|paused| !*paused).await;
    }
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PauseGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PauseGate")
            .field("paused", &self.is_paused())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn pause_and_resume_report_transitions() {
        let gate = PauseGate::new();
        assert!(!gate.is_paused());

        assert!(gate.pause());
        assert!(!gate.pause());
        assert!(gate.is_paused());

        assert!(gate.resume());
        assert!(!gate.resume());
        assert!(!gate.is_paused());
    }

    #[test]
    fn clones_share_the_flag() {
        let gate = PauseGate::new();
        let other = gate.clone();
        gate.pause();
        assert!(other.is_paused());
    }

    #[tokio::test]
    async fn wait_resumed_returns_immediately_when_open() {
        let gate = PauseGate::new();
        tokio::time::timeout(Duration::from_millis(100), gate.wait_resumed())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_resumed_parks_until_resume() {
        let gate = PauseGate::new();
        gate.pause();

        let waiter = tokio::spawn({
            let gate = gate.clone();
            async move { gate.wait_resumed().await }
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!waiter.is_finished());

        gate.resume();
        waiter.await.unwrap();
    }
}
