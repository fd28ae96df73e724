//! Shared cancellation for a whole deploy or test run.
//!
//! One token is created by the composition root and cancelled either by the
//! deadline task or by the signal watcher. Every blocking step (approval
//! wait, connect, script execution) races its work against [`CancelToken::cancelled`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Interrupted,
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Interrupted => write!(f, "interrupted by signal"),
            CancelReason::DeadlineExceeded => write!(f, "timeout exceeded"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CancelToken {
    state: Arc<watch::Sender<Option<CancelReason>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            state: Arc::new(tx),
        }
    }

    /// First reason wins; later calls are ignored.
    pub fn cancel(&self, reason: CancelReason) {
        let changed = self.state.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
        if changed {
            debug!("Cancellation requested: {}", reason);
        }
    }

    pub fn reason(&self) -> Option<CancelReason> {
        *self.state.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) -> CancelReason {
        let mut rx = self.state.subscribe();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            if rx.changed().await.is_err() {
                // The sender lives as long as `self`, so this cannot happen while awaited.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Returns the error for the current cancellation, if any.
    pub fn check(&self) -> Result<(), Error> {
        match self.reason() {
            Some(reason) => Err(cancelled_error(reason)),
            None => Ok(()),
        }
    }

    /// Runs `work` unless the token fires first.
    pub async fn run<F, T>(&self, work: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        tokio::select! {
            biased;
            reason = self.cancelled() => Err(cancelled_error(reason)),
            result = work => result,
        }
    }

    /// Spawns the deadline task. Abort the handle once the run is over.
    pub fn spawn_deadline(&self, timeout: Duration) -> JoinHandle<()> {
        let token = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            token.cancel(CancelReason::DeadlineExceeded);
        })
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

pub fn cancelled_error(reason: CancelReason) -> Error {
    match reason {
        CancelReason::Interrupted => Error::Cancelled("operation interrupted by signal".into()),
        CancelReason::DeadlineExceeded => Error::Cancelled(
            "timeout exceeded; raise --timeout if the deployment legitimately needs longer".into(),
        ),
    }
}
