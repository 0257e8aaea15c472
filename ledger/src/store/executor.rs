//! Unit-of-work executor.

use std::time::Duration;

use futures::future::BoxFuture;
use moneta_common::{LedgerError, Result};
use tracing::{debug, error, instrument, warn};

use super::{LedgerStore, LedgerTx};

/// Future returned by a unit of work, borrowing the transaction handle.
pub type UnitOfWork<'t, T> = BoxFuture<'t, Result<T>>;

/// Run `unit` inside one transaction of `store`.
///
/// The unit is invoked exactly once. On success the transaction commits; a
/// commit failure is reported as [`LedgerError::CommitFailed`]. On failure,
/// or when `timeout` elapses first, the transaction rolls back and the
/// original error is returned; if the rollback fails too, both errors come
/// back as [`LedgerError::RollbackFailed`].
///
/// Dropping the returned future before it resolves drops the open
/// transaction, which the backends treat as rollback.
///
/// ```ignore
/// let account = execute_atomically(&store, timeout, move |tx| {
///     Box::pin(async move { tx.add_account_balance(params).await })
/// })
/// .await?;
/// ```
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64))]
pub async fn execute_atomically<S, T, F>(store: &S, timeout: Duration, unit: F) -> Result<T>
where
    S: LedgerStore,
    T: Send,
    F: for<'t> FnOnce(&'t mut S::Tx) -> UnitOfWork<'t, T> + Send,
{
    let mut tx = store.begin().await?;

    let outcome = match tokio::time::timeout(timeout, unit(&mut tx)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!("Unit of work exceeded its deadline, cancelling");
            Err(LedgerError::Timeout(format!(
                "unit of work exceeded {}ms",
                timeout.as_millis()
            )))
        }
    };

    match outcome {
        Ok(value) => {
            if let Err(err) = tx.commit().await {
                error!(error = %err, "Commit failed");
                return Err(LedgerError::commit_failed(err));
            }
            debug!("Unit of work committed");
            Ok(value)
        }
        Err(err) => match tx.rollback().await {
            Ok(()) => {
                debug!(error = %err, "Unit of work rolled back");
                Err(err)
            }
            Err(rollback_err) => {
                error!(
                    error = %err,
                    rollback_error = %rollback_err,
                    "Rollback failed after unit of work failure"
                );
                Err(LedgerError::rollback_failed(err, rollback_err))
            }
        },
    }
}
