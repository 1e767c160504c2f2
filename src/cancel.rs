use std::{future::Future, sync::Arc, time::Duration};

use tokio::sync::watch;

use crate::error::{Error, Result};

/// Cooperative cancellation of an in-flight order.
///
/// Clones share the same state. Once [`cancel`](Self::cancel) is called, every poll, propagation
/// check and proof-provider call waiting on this token returns [`Error::Cancelled`]. Proofs that
/// were already presented are still cleaned up.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives as long as `self`, so this can't fail
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Runs `fut` to completion unless the token is cancelled first.
    pub(crate) async fn run<F: Future>(&self, fut: F) -> Result<F::Output> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Error::Cancelled),
            out = fut => Ok(out),
        }
    }

    pub(crate) async fn sleep(&self, delay: Duration) -> Result<()> {
        self.run(tokio::time::sleep(delay)).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_sleep() {
        let token = CancelToken::new();

        let sleeper = {
            let token = token.clone();
            tokio::spawn(async move { token.sleep(Duration::from_secs(3600)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        let res = sleeper.await.unwrap();
        assert!(matches!(res, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn already_cancelled_does_not_run() {
        let token = CancelToken::new();
        token.cancel();

        let res = token.run(async { 1 }).await;
        assert!(matches!(res, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn completes_without_cancel() {
        let token = CancelToken::new();
        assert_eq!(token.run(async { 7 }).await.unwrap(), 7);
    }
}
