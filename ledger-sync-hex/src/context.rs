//! Per-operation deadline and cancellation.
//!
//! Every store and port call a service makes goes through
//! [`OperationContext::run`], so a caller can bound each call with a timeout
//! and stop a running batch from outside. The one exception is saving a
//! submission the destination already accepted: that save only times out.

use std::future::Future;
use std::time::Duration;

use ledger_sync_types::Interrupted;
use tokio::sync::watch;

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout and cancellation signal for one logical operation.
#[derive(Debug, Clone)]
pub struct OperationContext {
    timeout: Duration,
    cancel: watch::Receiver<bool>,
}

/// Cancels every context cloned from the one it was created with.
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

impl OperationContext {
    /// A cancellable context.
    pub fn new(timeout: Duration) -> (Self, CancelHandle) {
        let (sender, cancel) = watch::channel(false);
        (Self { timeout, cancel }, CancelHandle { sender })
    }

    /// A context that can only time out.
    pub fn with_timeout(timeout: Duration) -> Self {
        // With the sender gone the receiver keeps reporting `false`.
        let (_, cancel) = watch::channel(false);
        Self { timeout, cancel }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once the operation is cancelled; never if it cannot be.
    pub async fn cancelled(&self) {
        let mut cancel = self.cancel.clone();
        loop {
            if *cancel.borrow_and_update() {
                return;
            }
            if cancel.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Runs `fut` under this context's timeout and cancellation signal.
    ///
    /// Cancellation wins over completion when both are ready.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, Interrupted>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Interrupted::Cancelled),
            res = tokio::time::timeout(self.timeout, fut) => {
                res.map_err(|_| Interrupted::TimedOut(self.timeout))
            }
        }
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }
}
