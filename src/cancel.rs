use anyhow::{Result, anyhow};
use std::future::Future;
use tokio::sync::watch;

/// Caller side of a cancellation pair.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

/// Cancellation signal observed by a pipeline run.
#[derive(Debug, Clone)]
pub struct Cancellation {
    receiver: watch::Receiver<bool>,
}

impl Cancellation {
    pub fn new() -> (CancelHandle, Cancellation) {
        let (sender, receiver) = watch::channel(false);
        (CancelHandle { sender }, Cancellation { receiver })
    }

    /// A signal that never fires.
    pub fn never() -> Cancellation {
        Self::new().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    pub fn check(&self, stage: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(anyhow!("cancelled before {}", stage));
        }
        Ok(())
    }

    /// Resolves once cancellation is requested. Stays pending if the handle is dropped
    /// without cancelling.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        let closed = receiver.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }

    /// Runs `future` unless cancellation fires first.
    pub async fn guard<T, F>(&self, stage: &str, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check(stage)?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(anyhow!("cancelled during {}", stage)),
            result = future => result,
        }
    }
}
