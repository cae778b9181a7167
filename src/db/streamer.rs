//! Lazy, chunked result streaming.
//!
//! [`LazyResultStreamer::stream`] runs a query on a dedicated connection and
//! hands the consumer a [`RowCursor`] that pulls rows from the database one
//! chunk at a time. The connection is switched out of autocommit for the
//! duration (PostgreSQL only honors cursor fetch sizes inside a transaction) and
//! its original autocommit state is restored afterwards, whether the consumer
//! succeeds or fails.

use crate::db::connection::DbConnection;
use crate::db::registry::ConnectionRegistry;
use crate::db::reporter::ExceptionReporter;
use crate::error::{DbError, DbResult};
use crate::models::{IdentifierMapper, QueryDescriptor, QueryParam, Record};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct LazyResultStreamer {
    registry: ConnectionRegistry,
}

impl LazyResultStreamer {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Stream the rows of `descriptor` through `consumer`, fetching at most
    /// `chunk_size` rows per round trip.
    ///
    /// The descriptor's result mode is ignored; streaming always yields rows.
    /// The connection is never the ambient one, so queries issued by the
    /// consumer run elsewhere.
    ///
    /// Called inside a transaction on the same database, this needs a second
    /// pooled connection. With a single-connection pool (the SQLite default)
    /// it waits out the acquire timeout and fails with [`DbError::Acquire`].
    pub async fn stream<T, C>(
        &self,
        chunk_size: usize,
        descriptor: &QueryDescriptor,
        consumer: C,
    ) -> DbResult<T>
    where
        C: AsyncFnOnce(&mut RowCursor<'_>) -> DbResult<T>,
    {
        let (sql, params) = (descriptor.sql.as_str(), descriptor.params.as_slice());
        if chunk_size == 0 {
            return Err(ExceptionReporter::reported(
                DbError::invalid_input("chunk size must be greater than 0"),
                sql,
                params,
            ));
        }

        let (handle, mut conn) = self
            .registry
            .resolve_connection(descriptor.database.as_ref())
            .await
            .map_err(|e| ExceptionReporter::reported(e, sql, params))?;
        let options = self
            .registry
            .effective_options(&handle, descriptor.options.as_ref());
        let mapper = handle.mapper(&options);

        stream_on(&mut conn, chunk_size, sql, params, &mapper, consumer).await
    }
}

/// Stream on a connection the caller already holds.
pub(crate) async fn stream_on<T, C>(
    conn: &mut DbConnection,
    chunk_size: usize,
    sql: &str,
    params: &[QueryParam],
    mapper: &IdentifierMapper,
    consumer: C,
) -> DbResult<T>
where
    C: AsyncFnOnce(&mut RowCursor<'_>) -> DbResult<T>,
{
    let original_autocommit = conn.autocommit();
    conn.begin()
        .await
        .map_err(|e| ExceptionReporter::reported(e, sql, params))?;
    let conn_id = conn.id();
    info!(conn_id = %conn_id, chunk_size, sql = %sql, "Streaming query");

    let outcome = match conn.stream_chunks(sql, params, chunk_size, mapper).await {
        Ok(chunks) => {
            let mut cursor = RowCursor::new(chunks, conn_id, sql, params);
            let outcome = consumer(&mut cursor).await;
            debug!(
                rows = cursor.rows_fetched(),
                chunks = cursor.chunks_fetched(),
                "Stream consumer returned"
            );
            outcome
        }
        Err(e) => Err(ExceptionReporter::reported(e, sql, params)),
    };

    if !original_autocommit {
        return outcome;
    }
    let restore = if outcome.is_ok() {
        conn.commit().await
    } else {
        conn.rollback().await
    };
    match (outcome, restore) {
        (outcome, Ok(())) => outcome,
        (Ok(_), Err(e)) => Err(ExceptionReporter::reported(e, sql, params)),
        (Err(e), Err(restore_err)) => {
            ExceptionReporter::report(&restore_err, sql, params);
            Err(e.with_cause(restore_err))
        }
    }
}

/// Forward-only, single-use view over a streaming query.
pub struct RowCursor<'c> {
    chunks: Option<BoxStream<'c, DbResult<Vec<Record>>>>,
    buffer: std::vec::IntoIter<Record>,
    conn_id: Uuid,
    sql: &'c str,
    params: &'c [QueryParam],
    rows_fetched: usize,
    chunks_fetched: usize,
    closed: bool,
    failed: bool,
}

impl<'c> RowCursor<'c> {
    fn new(
        chunks: BoxStream<'c, DbResult<Vec<Record>>>,
        conn_id: Uuid,
        sql: &'c str,
        params: &'c [QueryParam],
    ) -> Self {
        Self {
            chunks: Some(chunks),
            buffer: Vec::new().into_iter(),
            conn_id,
            sql,
            params,
            rows_fetched: 0,
            chunks_fetched: 0,
            closed: false,
            failed: false,
        }
    }

    /// The next row, or `None` once the result is exhausted. A new chunk is
    /// fetched only when the previous one has been consumed.
    ///
    /// After a fetch error every further call fails too, so an ignored error
    /// never reads as a clean end of results.
    pub async fn next(&mut self) -> DbResult<Option<Record>> {
        let misuse = if self.closed {
            Some("cursor used after close")
        } else if self.failed {
            Some("cursor used after a failed fetch")
        } else {
            None
        };
        if let Some(message) = misuse {
            return Err(ExceptionReporter::reported(
                DbError::streaming_protocol_violation(message),
                self.sql,
                self.params,
            ));
        }
        loop {
            if let Some(record) = self.buffer.next() {
                self.rows_fetched += 1;
                return Ok(Some(record));
            }
            let Some(chunks) = self.chunks.as_mut() else {
                return Ok(None);
            };
            match chunks.next().await {
                Some(Ok(chunk)) => {
                    self.chunks_fetched += 1;
                    debug!(chunk = self.chunks_fetched, rows = chunk.len(), "Fetched chunk");
                    self.buffer = chunk.into_iter();
                }
                Some(Err(e)) => {
                    self.chunks = None;
                    self.failed = true;
                    return Err(ExceptionReporter::reported(e, self.sql, self.params));
                }
                None => {
                    self.chunks = None;
                    return Ok(None);
                }
            }
        }
    }

    /// Stop reading. Buffered rows are discarded and further reads fail.
    pub fn close(&mut self) {
        self.closed = true;
        self.chunks = None;
        self.buffer = Vec::new().into_iter();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Id of the connection the rows come from.
    pub fn connection_id(&self) -> Uuid {
        self.conn_id
    }

    /// Rows handed out so far.
    pub fn rows_fetched(&self) -> usize {
        self.rows_fetched
    }

    pub fn chunks_fetched(&self) -> usize {
        self.chunks_fetched
    }
}

impl std::fmt::Debug for RowCursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowCursor")
            .field("conn_id", &self.conn_id)
            .field("sql", &self.sql)
            .field("rows_fetched", &self.rows_fetched)
            .field("chunks_fetched", &self.chunks_fetched)
            .field("closed", &self.closed)
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ConnectionPool;
    use crate::models::DatabaseSpec;
    use serde_json::json;
    use tempfile::TempDir;

    async fn seeded() -> (TempDir, ConnectionPool) {
        let dir = tempfile::tempdir().unwrap();
        let spec = DatabaseSpec::sqlite(dir.path().join("stream.db").to_string_lossy());
        let pool = ConnectionPool::new(spec);
        let mut conn = pool.acquire().await.unwrap();
        conn.execute_update(
            "CREATE TABLE n (v INTEGER);
             INSERT INTO n VALUES (1), (2), (3), (4), (5);",
            &[],
        )
        .await
        .unwrap();
        drop(conn);
        (dir, pool)
    }

    #[tokio::test]
    async fn test_cursor_reads_every_row() {
        let (_dir, pool) = seeded().await;
        let mut conn = pool.acquire().await.unwrap();
        let mapper = IdentifierMapper::default();

        let (rows, chunks) = stream_on(
            &mut conn,
            2,
            "SELECT v FROM n ORDER BY v",
            &[],
            &mapper,
            async |cursor| {
                let mut rows = Vec::new();
                while let Some(row) = cursor.next().await? {
                    rows.push(row);
                }
                // Exhausted cursors stay exhausted
                assert!(cursor.next().await?.is_none());
                Ok((rows, cursor.chunks_fetched()))
            },
        )
        .await
        .unwrap();

        assert_eq!(rows.len(), 5);
        assert_eq!(rows[4], json!({"v": 5}));
        assert_eq!(chunks, 3);
        assert!(conn.autocommit());
    }

    #[tokio::test]
    async fn test_autocommit_restored_after_consumer_error() {
        let (_dir, pool) = seeded().await;
        let mut conn = pool.acquire().await.unwrap();
        let mapper = IdentifierMapper::default();

        let result: DbResult<()> = stream_on(
            &mut conn,
            2,
            "SELECT v FROM n",
            &[],
            &mapper,
            async |cursor| {
                cursor.next().await?;
                Err(DbError::invalid_input("consumer gave up"))
            },
        )
        .await;

        assert!(matches!(result, Err(DbError::InvalidInput { .. })));
        assert!(conn.autocommit());
    }

    #[tokio::test]
    async fn test_open_transaction_left_open() {
        let (_dir, pool) = seeded().await;
        let mut conn = pool.acquire().await.unwrap();
        conn.begin().await.unwrap();

        let count = stream_on(
            &mut conn,
            10,
            "SELECT v FROM n",
            &[],
            &IdentifierMapper::default(),
            async |cursor| {
                let mut n = 0;
                while cursor.next().await?.is_some() {
                    n += 1;
                }
                Ok(n)
            },
        )
        .await
        .unwrap();

        assert_eq!(count, 5);
        assert!(!conn.autocommit());
        conn.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_next_after_close_is_violation() {
        let (_dir, pool) = seeded().await;
        let mut conn = pool.acquire().await.unwrap();

        let result: DbResult<()> = stream_on(
            &mut conn,
            1,
            "SELECT v FROM n",
            &[],
            &IdentifierMapper::default(),
            async |cursor| {
                cursor.next().await?;
                cursor.close();
                assert!(cursor.is_closed());
                cursor.next().await.map(|_| ())
            },
        )
        .await;

        assert!(matches!(
            result,
            Err(DbError::StreamingProtocolViolation { .. })
        ));
        assert!(conn.autocommit());
    }

    #[tokio::test]
    async fn test_next_after_failed_fetch_is_violation() {
        let (_dir, pool) = seeded().await;
        let mut conn = pool.acquire().await.unwrap();

        let (first, second) = stream_on(
            &mut conn,
            2,
            "SELECT * FROM missing",
            &[],
            &IdentifierMapper::default(),
            async |cursor| {
                let first = cursor.next().await;
                let second = cursor.next().await;
                Ok((first, second))
            },
        )
        .await
        .unwrap();

        assert!(matches!(first, Err(DbError::Execution { .. })));
        assert!(matches!(
            second,
            Err(DbError::StreamingProtocolViolation { .. })
        ));
        assert!(conn.autocommit());
    }

    #[tokio::test]
    async fn test_zero_chunk_size_rejected() {
        let registry = ConnectionRegistry::new();
        registry.set_default(registry.create_handle(DatabaseSpec::sqlite_memory()));
        let streamer = LazyResultStreamer::new(registry);

        let result: DbResult<usize> = streamer
            .stream(0, &QueryDescriptor::rows("SELECT 1"), async |cursor| {
                Ok(cursor.rows_fetched())
            })
            .await;
        assert!(matches!(result, Err(DbError::InvalidInput { .. })));
    }
}
