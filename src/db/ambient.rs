//! The ambient connection: the connection currently open for this task.
//!
//! A scope is installed with [`scope`] around a future. Code running inside that
//! future (but not tasks it spawns) sees the scope through
//! [`current_connection`]. The scope ends when the future completes, and the
//! owner calls [`AmbientConnection::finish`] to commit or roll back and release
//! the connection. After that, clones that escaped the scope can no longer
//! reach the connection.

use crate::db::connection::DbConnection;
use crate::db::handle::DatabaseHandle;
use crate::error::{DbError, DbResult};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

tokio::task_local! {
    static AMBIENT: AmbientConnection;
}

/// Shared view of one ambient scope.
#[derive(Clone)]
pub struct AmbientConnection {
    inner: Arc<Scope>,
}

struct Scope {
    id: Uuid,
    started_at: DateTime<Utc>,
    handle: DatabaseHandle,
    transactional: bool,
    rollback_only: AtomicBool,
    conn: Mutex<Option<DbConnection>>,
}

impl AmbientConnection {
    pub(crate) fn new(handle: DatabaseHandle, conn: DbConnection, transactional: bool) -> Self {
        Self {
            inner: Arc::new(Scope {
                id: Uuid::new_v4(),
                started_at: Utc::now(),
                handle,
                transactional,
                rollback_only: AtomicBool::new(false),
                conn: Mutex::new(Some(conn)),
            }),
        }
    }

    pub fn scope_id(&self) -> Uuid {
        self.inner.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// The handle the connection was acquired from.
    pub fn handle(&self) -> &DatabaseHandle {
        &self.inner.handle
    }

    /// True for transaction scopes, false for a single auto-managed query.
    pub fn is_transactional(&self) -> bool {
        self.inner.transactional
    }

    pub(crate) fn set_rollback_only(&self) {
        self.inner.rollback_only.store(true, Ordering::SeqCst);
    }

    pub fn is_rollback_only(&self) -> bool {
        self.inner.rollback_only.load(Ordering::SeqCst)
    }

    /// Lock the scope's connection. Statements on one scope run one at a time.
    pub async fn lock(&self) -> DbResult<MappedMutexGuard<'_, DbConnection>> {
        MutexGuard::try_map(self.inner.conn.lock().await, Option::as_mut)
            .map_err(|_| DbError::no_active_transaction())
    }

    /// Identity of the underlying connection.
    pub async fn connection_id(&self) -> DbResult<Uuid> {
        Ok(self.lock().await?.id())
    }

    /// End the scope: commit or roll back, then release the connection.
    pub(crate) async fn finish(&self, commit: bool) -> DbResult<()> {
        let Some(mut conn) = self.inner.conn.lock().await.take() else {
            return Ok(());
        };
        let result = if commit {
            conn.commit().await
        } else {
            conn.rollback().await
        };
        debug!(
            scope_id = %self.inner.id,
            conn_id = %conn.id(),
            commit,
            elapsed_ms = (Utc::now() - self.inner.started_at).num_milliseconds(),
            "Ambient scope finished"
        );
        result
    }
}

impl std::fmt::Debug for AmbientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmbientConnection")
            .field("scope_id", &self.inner.id)
            .field("started_at", &self.inner.started_at)
            .field("transactional", &self.inner.transactional)
            .field("rollback_only", &self.is_rollback_only())
            .finish_non_exhaustive()
    }
}

/// The ambient connection of the current task, if any.
pub fn current_connection() -> Option<AmbientConnection> {
    AMBIENT.try_with(Clone::clone).ok()
}

/// Run `fut` with `conn` installed as the ambient connection.
pub(crate) async fn scope<F: Future>(conn: AmbientConnection, fut: F) -> F::Output {
    AMBIENT.scope(conn, fut).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DatabaseSpec, DbOptions};

    #[tokio::test]
    async fn test_scope_visibility() {
        assert!(current_connection().is_none());

        let handle = DatabaseHandle::new(DatabaseSpec::sqlite_memory(), DbOptions::default());
        let conn = handle.acquire().await.unwrap();
        let conn_id = conn.id();
        let ambient = AmbientConnection::new(handle, conn, true);
        let scope_id = ambient.scope_id();

        let seen = scope(ambient.clone(), async {
            let inner = current_connection().unwrap();
            let spawned = tokio::spawn(async { current_connection().is_none() })
                .await
                .unwrap();
            (inner.scope_id(), inner.connection_id().await.unwrap(), spawned)
        })
        .await;

        assert_eq!(seen, (scope_id, conn_id, true));
        assert!(current_connection().is_none());
    }

    #[tokio::test]
    async fn test_finish_releases_connection() {
        let handle = DatabaseHandle::new(DatabaseSpec::sqlite_memory(), DbOptions::default());
        let mut conn = handle.acquire().await.unwrap();
        conn.begin().await.unwrap();
        let ambient = AmbientConnection::new(handle, conn, true);

        ambient.finish(true).await.unwrap();
        assert!(matches!(
            ambient.lock().await,
            Err(DbError::NoActiveTransaction)
        ));
        // A second finish is a no-op
        ambient.finish(false).await.unwrap();
    }
}
