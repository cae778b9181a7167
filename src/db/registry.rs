//! Connection registry.
//!
//! Holds the default [`DatabaseHandle`] and the process-wide default options,
//! and decides which connection a query or transaction runs on. A registry can
//! be created per test or per component; [`ConnectionRegistry::global`] is the
//! process-wide instance.

use crate::db::connection::DbConnection;
use crate::db::handle::DatabaseHandle;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseSpec, DbOptions};
use std::sync::{Arc, LazyLock, PoisonError, RwLock};
use tracing::info;

static GLOBAL: LazyLock<ConnectionRegistry> = LazyLock::new(ConnectionRegistry::new);

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    default_handle: RwLock<Option<DatabaseHandle>>,
    default_options: RwLock<DbOptions>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry. It lives for the whole process; there is no
    /// teardown.
    pub fn global() -> &'static ConnectionRegistry {
        &GLOBAL
    }

    /// Create a handle for `spec`. Its options are the registry defaults with
    /// the spec's own options layered on top, fixed at creation time.
    pub fn create_handle(&self, spec: DatabaseSpec) -> DatabaseHandle {
        let options = self.default_options().merge(&spec.options);
        DatabaseHandle::new(spec, options)
    }

    /// Replace the default handle and merge its options into the process-wide
    /// defaults (last writer wins).
    pub fn set_default(&self, handle: DatabaseHandle) {
        {
            let mut defaults = self
                .inner
                .default_options
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            *defaults = defaults.merge(handle.options());
        }
        info!(db = %handle.spec().masked_url(), "Default database set");
        *self
            .inner
            .default_handle
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    pub fn default_handle(&self) -> Option<DatabaseHandle> {
        self.inner
            .default_handle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn default_options(&self) -> DbOptions {
        self.inner
            .default_options
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the process-wide default options. Existing handles keep the
    /// options they were created with.
    pub fn set_default_options(&self, options: DbOptions) {
        *self
            .inner
            .default_options
            .write()
            .unwrap_or_else(PoisonError::into_inner) = options;
    }

    /// The explicit handle if given, else the default handle.
    pub fn resolve_handle(&self, explicit: Option<&DatabaseHandle>) -> DbResult<DatabaseHandle> {
        match explicit {
            Some(handle) => Ok(handle.clone()),
            None => self
                .default_handle()
                .ok_or_else(DbError::no_connection_configured),
        }
    }

    /// Resolve a handle and check out a fresh connection from it.
    pub async fn resolve_connection(
        &self,
        explicit: Option<&DatabaseHandle>,
    ) -> DbResult<(DatabaseHandle, DbConnection)> {
        let handle = self.resolve_handle(explicit)?;
        let conn = handle.acquire().await?;
        Ok((handle, conn))
    }

    /// Options for one query: the handle's options with the per-query override
    /// layered on top.
    pub fn effective_options(
        &self,
        handle: &DatabaseHandle,
        override_options: Option<&DbOptions>,
    ) -> DbOptions {
        match override_options {
            Some(over) => handle.options().merge(over),
            None => handle.options().clone(),
        }
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("default_handle", &self.default_handle())
            .field("default_options", &self.default_options())
            .finish()
    }
}
