//! Cooperative abort signalling between callers and a running sequence

use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable trigger that stops a running sequence at its next checkpoint
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request an abort; idempotent
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receiver side, checked by the runner and the polling loop
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Clear a previous abort before a new drive
    pub(crate) fn reset(&self) {
        self.tx.send_replace(false);
    }
}

/// Observer of an `AbortHandle`
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once an abort has been requested
    pub async fn aborted(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Sender gone: nobody can abort anymore
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_abort_is_visible_to_existing_signals() {
        let handle = AbortHandle::new();
        let signal = handle.signal();
        assert!(!signal.is_aborted());

        handle.clone().abort();
        assert!(signal.is_aborted());
        assert!(handle.is_aborted());

        handle.reset();
        assert!(!signal.is_aborted());
    }

    #[tokio::test]
    async fn test_aborted_wakes_waiter() {
        let handle = AbortHandle::new();
        let mut signal = handle.signal();

        let waiter = tokio::spawn(async move {
            signal.aborted().await;
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        handle.abort();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_aborted_returns_immediately_when_already_set() {
        let handle = AbortHandle::new();
        handle.abort();
        let mut signal = handle.signal();
        tokio::time::timeout(Duration::from_millis(100), signal.aborted())
            .await
            .expect("already aborted");
    }
}
