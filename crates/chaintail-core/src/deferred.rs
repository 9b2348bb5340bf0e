//! One-shot result cell used to pipeline concurrent fetches.
//!
//! A [`Deferred`] spawns its producer immediately and exposes two single-slot
//! receivers: one for the value, one for the error. Exactly one of them ever
//! receives something, and the producer never waits on the consumer.
//!
//! ```rust,no_run
//! # use chaintail_core::deferred::Deferred;
//! # async fn example() -> Result<(), chaintail_core::TailError> {
//! let cell = Deferred::spawn(|| async { Ok::<_, chaintail_core::TailError>(21 * 2) });
//! assert_eq!(cell.recv().await?, 42);
//! # Ok(())
//! # }
//! ```

use std::future::Future;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::TailError;

/// A value (or error) being produced by a background task.
pub struct Deferred<T> {
    result: oneshot::Receiver<T>,
    error: oneshot::Receiver<TailError>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> Deferred<T> {
    /// Spawn `producer` on the Tokio runtime and return the cell that will
    /// hold its outcome.
    pub fn spawn<F, Fut>(producer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TailError>> + Send + 'static,
    {
        let (result_tx, result) = oneshot::channel();
        let (error_tx, error) = oneshot::channel();

        let task = tokio::spawn(async move {
            // A failed send only means the consumer closed the cell already.
            match producer().await {
                Ok(value) => {
                    let _ = result_tx.send(value);
                }
                Err(err) => {
                    let _ = error_tx.send(err);
                }
            }
        });

        Self { result, error, task }
    }
}

impl<T> Deferred<T> {
    /// The value side of the cell.
    pub fn result(&mut self) -> &mut oneshot::Receiver<T> {
        &mut self.result
    }

    /// The error side of the cell.
    pub fn error(&mut self) -> &mut oneshot::Receiver<TailError> {
        &mut self.error
    }

    /// Wait for whichever side delivers, then close the cell.
    pub async fn recv(mut self) -> Result<T, TailError> {
        let outcome = tokio::select! {
            res = &mut self.result => match res {
                Ok(value) => Ok(value),
                // The value sender is gone: the producer either failed or died.
                Err(_) => Err((&mut self.error).await.unwrap_or(TailError::DeferredDropped)),
            },
            err = &mut self.error => match err {
                Ok(err) => Err(err),
                Err(_) => (&mut self.result).await.map_err(|_| TailError::DeferredDropped),
            },
        };
        self.close();
        outcome
    }

    /// Release the cell. A producer that is still running is aborted.
    pub fn close(self) {
        drop(self);
    }

    /// Returns `true` once the producer task has finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<T> Drop for Deferred<T> {
    fn drop(&mut self) {
        self.result.close();
        self.error.close();
        self.task.abort();
    }
}
