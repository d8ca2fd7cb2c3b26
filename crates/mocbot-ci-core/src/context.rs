//! Run context and cancellation.

use std::future::Future;
use tokio::sync::watch;
use tracing::{Instrument, info_span, warn};

use crate::delegate::Step;
use crate::{Error, Result, RunId};

/// Per-invocation context passed to pipeline operations.
///
/// Cloning shares the cancellation signal.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: RunId,
    cancelled: watch::Receiver<bool>,
}

/// Cancels every [`RunContext`] created alongside it.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl RunContext {
    /// A new context and the handle that cancels it.
    pub fn new() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let ctx = Self {
            run_id: RunId::new(),
            cancelled: rx,
        };
        (ctx, CancelHandle { tx })
    }

    /// A context that can never be cancelled.
    pub fn background() -> Self {
        Self::new().0
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Run one delegate step, aborting it if the context is cancelled.
    ///
    /// The step's own result is returned untouched. A cancelled context
    /// yields [`Error::Cancelled`] and the step future is dropped.
    pub async fn run<T, F>(&self, step: Step, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let span = info_span!("step", run_id = %self.run_id, %step);
        let mut cancelled = self.cancelled.clone();
        tokio::select! {
            res = fut.instrument(span) => res,
            _ = wait_cancelled(&mut cancelled) => {
                warn!(run_id = %self.run_id, %step, "Step cancelled");
                Err(Error::Cancelled)
            }
        }
    }
}

async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        // Sender dropped without cancelling.
        std::future::pending::<()>().await;
    }
}
