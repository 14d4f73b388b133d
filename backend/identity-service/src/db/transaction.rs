/// Transaction coordinator
use super::{Database, StoreTx};
use crate::error::{IdentityError, Result};
use futures_util::future::BoxFuture;
use tracing::{error, warn};

/// Run `work` inside one transaction.
///
/// Commits when `work` returns `Ok`. On `Err` the transaction is rolled back
/// and the error from `work` is returned as is; a failing rollback is only
/// logged. `work` receives the transaction handle and must use it for every
/// repository call that belongs to the unit of work.
pub async fn with_transaction<T, F>(db: &dyn Database, work: F) -> Result<T>
where
    T: Send,
    F: for<'t> FnOnce(&'t mut dyn StoreTx) -> BoxFuture<'t, Result<T>> + Send,
{
    let mut tx = db
        .begin()
        .await
        .map_err(|e| IdentityError::from(e).context("begin transaction"))?;

    let outcome = work(tx.as_mut()).await;

    match outcome {
        Ok(value) => {
            tx.commit().await.map_err(|e| {
                error!(error = %e, "transaction commit failed");
                IdentityError::from(e).context("commit transaction")
            })?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(
                    error = %rollback_err,
                    cause = %err,
                    "transaction rollback failed"
                );
            }
            Err(err)
        }
    }
}
