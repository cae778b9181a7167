//! Database handles.

use crate::db::connection::DbConnection;
use crate::db::pool::ConnectionPool;
use crate::error::DbResult;
use crate::models::{DatabaseSpec, DbOptions, IdentifierMapper};
use std::fmt;
use std::sync::Arc;

/// The unit registered as "the database": a lazily built pool plus the options
/// resolved when the handle was created.
///
/// Cloning is cheap and every clone shares the same pool.
#[derive(Clone)]
pub struct DatabaseHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    pool: ConnectionPool,
    options: DbOptions,
}

impl DatabaseHandle {
    /// Build a handle whose options are already resolved. Use
    /// [`ConnectionRegistry::create_handle`](crate::ConnectionRegistry::create_handle)
    /// to merge in process-wide defaults.
    pub fn new(spec: DatabaseSpec, options: DbOptions) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                pool: ConnectionPool::new(spec),
                options,
            }),
        }
    }

    pub fn spec(&self) -> &DatabaseSpec {
        self.inner.pool.spec()
    }

    pub fn options(&self) -> &DbOptions {
        &self.inner.options
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    /// True if both handles share one pool.
    pub fn same_as(&self, other: &DatabaseHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Check out a connection, building the pool on first use.
    pub async fn acquire(&self) -> DbResult<DbConnection> {
        self.inner.pool.acquire().await
    }

    /// Identifier mapping for already-resolved `options` and this database's
    /// delimiter style.
    pub fn mapper(&self, options: &DbOptions) -> IdentifierMapper {
        IdentifierMapper::new(options, self.spec().delimiter)
    }

    pub async fn close(&self) {
        self.inner.pool.close().await;
    }
}

impl fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("db", &self.spec().masked_url())
            .field("options", &self.inner.options)
            .field("built", &self.inner.pool.is_built())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_identity() {
        let a = DatabaseHandle::new(DatabaseSpec::sqlite_memory(), DbOptions::default());
        let b = a.clone();
        let c = DatabaseHandle::new(DatabaseSpec::sqlite_memory(), DbOptions::default());
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
        assert!(!a.pool().is_built());
    }

    #[test]
    fn test_debug_masks_password() {
        let spec = DatabaseSpec::postgres("localhost", "app").with_credentials("app", "hunter2");
        let handle = DatabaseHandle::new(spec, DbOptions::default());
        let rendered = format!("{handle:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("****"));
    }
}
