//! Query execution.
//!
//! Runs a [`QueryDescriptor`] on the right connection and dispatches on its
//! result mode. Connection resolution:
//!
//! 1. the ambient connection, unless the descriptor names a different database
//! 2. otherwise the descriptor's database or the default database, on a fresh
//!    connection that is ambient for the duration of this call only
//!
//! Failures are logged through [`ExceptionReporter`] and returned unchanged.

use crate::db::ambient::{self, AmbientConnection, current_connection};
use crate::db::connection::DbConnection;
use crate::db::handle::DatabaseHandle;
use crate::db::registry::ConnectionRegistry;
use crate::db::reporter::ExceptionReporter;
use crate::error::DbResult;
use crate::models::{QueryDescriptor, QueryOutcome, ResultMode};
use std::time::Instant;
use tracing::debug;

/// Query executor that handles database query execution.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    registry: ConnectionRegistry,
}

impl QueryExecutor {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    pub async fn execute(&self, descriptor: &QueryDescriptor) -> DbResult<QueryOutcome> {
        let start = Instant::now();
        debug!(
            sql = %descriptor.sql,
            params = ?descriptor.params.len(),
            mode = ?descriptor.mode,
            "Executing query"
        );

        match self.resolve_and_run(descriptor).await {
            Ok(outcome) => {
                debug!(
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Query finished"
                );
                Ok(outcome)
            }
            Err(e) => Err(ExceptionReporter::reported(
                e,
                &descriptor.sql,
                &descriptor.params,
            )),
        }
    }

    async fn resolve_and_run(&self, descriptor: &QueryDescriptor) -> DbResult<QueryOutcome> {
        if let Some(current) = current_connection() {
            let joins = descriptor
                .database
                .as_ref()
                .is_none_or(|h| h.same_as(current.handle()));
            if joins {
                let mut conn = current.lock().await?;
                return self.run(&mut conn, current.handle(), descriptor).await;
            }
        }

        let (handle, conn) = self
            .registry
            .resolve_connection(descriptor.database.as_ref())
            .await?;
        let scope = AmbientConnection::new(handle, conn, false);
        let result = ambient::scope(scope.clone(), async {
            let mut conn = scope.lock().await?;
            self.run(&mut conn, scope.handle(), descriptor).await
        })
        .await;
        let finished = scope.finish(result.is_ok()).await;
        match (result, finished) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => Err(e.with_cause(release_err)),
        }
    }

    async fn run(
        &self,
        conn: &mut DbConnection,
        handle: &DatabaseHandle,
        descriptor: &QueryDescriptor,
    ) -> DbResult<QueryOutcome> {
        let options = self
            .registry
            .effective_options(handle, descriptor.options.as_ref());
        let mapper = handle.mapper(&options);
        let (sql, params) = (descriptor.sql.as_str(), descriptor.params.as_slice());

        match descriptor.mode {
            ResultMode::RowSet => conn
                .fetch_records(sql, params, &mapper)
                .await
                .map(QueryOutcome::Rows),
            ResultMode::GeneratedKeys => conn
                .insert_returning_keys(sql, params, &mapper)
                .await
                .map(QueryOutcome::GeneratedKeys),
            ResultMode::AffectedCount => conn
                .execute_update(sql, params)
                .await
                .map(QueryOutcome::AffectedCount),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TransactionManager;
    use crate::error::DbError;
    use crate::models::{DatabaseSpec, DbOptions, NamingStrategy, ResultStrategy};
    use serde_json::json;

    fn registry() -> ConnectionRegistry {
        let registry = ConnectionRegistry::new();
        registry.set_default(registry.create_handle(DatabaseSpec::sqlite_memory()));
        registry
    }

    #[tokio::test]
    async fn test_select_one() {
        let executor = QueryExecutor::new(registry());
        let outcome = executor
            .execute(&QueryDescriptor::rows("SELECT 1 AS one"))
            .await
            .unwrap();
        assert_eq!(outcome, QueryOutcome::Rows(vec![json!({"one": 1})]));
        assert!(current_connection().is_none());
    }

    #[tokio::test]
    async fn test_no_default_configured() {
        let executor = QueryExecutor::new(ConnectionRegistry::new());
        let err = executor
            .execute(&QueryDescriptor::rows("SELECT 1"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NoConnectionConfigured));
    }

    #[tokio::test]
    async fn test_modes_and_options() {
        let executor = QueryExecutor::new(registry());
        executor
            .execute(&QueryDescriptor::count(
                "CREATE TABLE people (id INTEGER PRIMARY KEY, full_name TEXT)",
            ))
            .await
            .unwrap();

        let key = executor
            .execute(
                &QueryDescriptor::keys("INSERT INTO people (full_name) VALUES (?)")
                    .with_param("Ada"),
            )
            .await
            .unwrap();
        assert_eq!(key.generated_key(), Some(&json!(1)));

        let kebab = DbOptions::default().with_naming(NamingStrategy::kebab_case());
        let rows = executor
            .execute(&QueryDescriptor::rows("SELECT full_name FROM people").with_options(kebab))
            .await
            .unwrap();
        assert_eq!(rows.rows().unwrap(), &[json!({"full-name": "Ada"})]);

        let arrays = DbOptions::default().with_result(ResultStrategy::Arrays);
        let rows = executor
            .execute(
                &QueryDescriptor::rows("SELECT id, full_name FROM people").with_options(arrays),
            )
            .await
            .unwrap();
        assert_eq!(rows.rows().unwrap(), &[json!([1, "Ada"])]);

        let updated = executor
            .execute(
                &QueryDescriptor::count("UPDATE people SET full_name = ? WHERE id = ?")
                    .with_param("Grace")
                    .with_param(1),
            )
            .await
            .unwrap();
        assert_eq!(updated.affected(), Some(1));
    }

    #[tokio::test]
    async fn test_inside_transaction_reuses_ambient() {
        let registry = registry();
        let executor = QueryExecutor::new(registry.clone());
        let tx = TransactionManager::new(registry.clone());

        tx.run(async {
            executor
                .execute(&QueryDescriptor::count("CREATE TABLE t (v INTEGER)"))
                .await?;
            executor
                .execute(&QueryDescriptor::count("INSERT INTO t VALUES (1)"))
                .await?;
            Ok(())
        })
        .await
        .unwrap();

        let handle = registry.default_handle().unwrap();
        assert_eq!(handle.pool().acquisitions(), 1);
    }
}
