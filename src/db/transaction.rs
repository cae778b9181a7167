//! Scoped transactions on the ambient connection.
//!
//! The outermost [`TransactionManager::run`] checks out a connection, opens a
//! transaction and installs it as the ambient connection for the body. Nested
//! calls join that transaction instead of opening another one; there are no
//! savepoints. The outermost scope commits when the body succeeds and nobody
//! asked for a rollback, and rolls back otherwise.

use crate::db::ambient::{self, AmbientConnection, current_connection};
use crate::db::handle::DatabaseHandle;
use crate::db::registry::ConnectionRegistry;
use crate::db::reporter::ExceptionReporter;
use crate::error::{DbError, DbResult};
use std::future::Future;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct TransactionManager {
    registry: ConnectionRegistry,
}

impl TransactionManager {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Run `body` in a transaction on the default database.
    pub async fn run<T, F>(&self, body: F) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        self.run_on(None, body).await
    }

    /// Run `body` in a transaction on `handle` (or the default database).
    ///
    /// Joins the ambient transaction when there is one on the same handle. An
    /// explicit handle for a different database opens its own transaction,
    /// which is ambient only inside `body`.
    pub async fn run_on<T, F>(&self, handle: Option<&DatabaseHandle>, body: F) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        if let Some(current) = current_connection() {
            if current.is_transactional() && handle.is_none_or(|h| h.same_as(current.handle())) {
                debug!(scope_id = %current.scope_id(), "Joining ambient transaction");
                return body.await;
            }
        }

        let (handle, mut conn) = self
            .registry
            .resolve_connection(handle)
            .await
            .map_err(|e| ExceptionReporter::reported(e, "", &[]))?;
        conn.begin()
            .await
            .map_err(|e| ExceptionReporter::reported(e, "BEGIN", &[]))?;

        let conn_id = conn.id();
        let scope = AmbientConnection::new(handle, conn, true);
        info!(scope_id = %scope.scope_id(), conn_id = %conn_id, "Transaction started");

        let result = ambient::scope(scope.clone(), body).await;
        let commit = result.is_ok() && !scope.is_rollback_only();
        let finished = scope.finish(commit).await;
        let end = if commit { "COMMIT" } else { "ROLLBACK" };

        match (result, finished) {
            (Ok(value), Ok(())) => {
                info!(scope_id = %scope.scope_id(), outcome = end, "Transaction finished");
                Ok(value)
            }
            (Ok(_), Err(e)) => Err(ExceptionReporter::reported(e, end, &[])),
            (Err(e), Ok(())) => {
                info!(scope_id = %scope.scope_id(), outcome = end, error = %e, "Transaction finished");
                Err(e)
            }
            (Err(e), Err(rollback_err)) => {
                ExceptionReporter::report(&rollback_err, end, &[]);
                Err(e.with_cause(rollback_err))
            }
        }
    }
}

fn transaction_scope() -> DbResult<AmbientConnection> {
    current_connection()
        .filter(AmbientConnection::is_transactional)
        .ok_or_else(|| ExceptionReporter::reported(DbError::no_active_transaction(), "", &[]))
}

/// Mark the ambient transaction for rollback. Takes effect when the outermost
/// scope ends, not immediately.
pub fn rollback() -> DbResult<()> {
    let scope = transaction_scope()?;
    scope.set_rollback_only();
    debug!(scope_id = %scope.scope_id(), "Transaction marked rollback-only");
    Ok(())
}

/// Whether the ambient transaction is marked for rollback.
pub fn is_rollback_only() -> DbResult<bool> {
    Ok(transaction_scope()?.is_rollback_only())
}
