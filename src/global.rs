//! Process-wide entry points.
//!
//! Thin wrappers over [`ConnectionRegistry::global`] for callers that want a
//! single default database per process instead of passing a registry around.

use crate::db::{
    AmbientConnection, ConnectionRegistry, DatabaseHandle, LazyResultStreamer, QueryExecutor,
    RowCursor, TransactionManager, transaction,
};
use crate::error::DbResult;
use crate::models::{DatabaseSpec, QueryDescriptor, QueryOutcome};
use std::future::Future;

fn registry() -> ConnectionRegistry {
    ConnectionRegistry::global().clone()
}

/// Create a handle for `spec`, merged with the process-wide default options.
pub fn create_handle(spec: DatabaseSpec) -> DatabaseHandle {
    ConnectionRegistry::global().create_handle(spec)
}

/// Make `handle` the process-wide default database.
pub fn set_default(handle: DatabaseHandle) {
    ConnectionRegistry::global().set_default(handle);
}

/// Run `body` in a transaction on the default database, joining the ambient
/// transaction if there is one.
pub async fn transaction<T, F>(body: F) -> DbResult<T>
where
    F: Future<Output = DbResult<T>>,
{
    TransactionManager::new(registry()).run(body).await
}

/// Mark the ambient transaction for rollback.
pub fn rollback() -> DbResult<()> {
    transaction::rollback()
}

pub fn is_rollback_only() -> DbResult<bool> {
    transaction::is_rollback_only()
}

pub async fn execute(descriptor: &QueryDescriptor) -> DbResult<QueryOutcome> {
    QueryExecutor::new(registry()).execute(descriptor).await
}

/// Stream the rows of `descriptor` through `consumer`, `chunk_size` rows per
/// fetch.
pub async fn stream<T, C>(chunk_size: usize, descriptor: &QueryDescriptor, consumer: C) -> DbResult<T>
where
    C: AsyncFnOnce(&mut RowCursor<'_>) -> DbResult<T>,
{
    LazyResultStreamer::new(registry())
        .stream(chunk_size, descriptor, consumer)
        .await
}

pub fn current_connection() -> Option<AmbientConnection> {
    crate::db::current_connection()
}
