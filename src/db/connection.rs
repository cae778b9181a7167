//! Pooled connections with explicit transaction control.
//!
//! Transactions are driven with plain `BEGIN`/`COMMIT`/`ROLLBACK` so a connection
//! can be parked in an ambient scope without borrowing from anything. The
//! `autocommit` flag mirrors the server-side state; a connection dropped while a
//! transaction is open is closed instead of going back to the pool.

use crate::db::params::{bind_mysql, bind_postgres, bind_sqlite};
use crate::db::types::RowToRecord;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, IdentifierMapper, QueryParam, Record, ResultStrategy};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use serde_json::Value as JsonValue;
use sqlx::pool::PoolConnection;
use sqlx::{MySql, Postgres, Sqlite};
use tracing::{debug, warn};
use uuid::Uuid;

/// Column label used for generated keys reported by the driver.
pub const GENERATED_KEY_LABEL: &str = "generated_key";

#[derive(Debug)]
pub enum DriverConnection {
    MySql(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
    SQLite(PoolConnection<Sqlite>),
}

/// A checked-out connection.
#[derive(Debug)]
pub struct DbConnection {
    inner: DriverConnection,
    autocommit: bool,
    id: Uuid,
}

impl DbConnection {
    pub(crate) fn new(inner: DriverConnection) -> Self {
        Self {
            inner,
            autocommit: true,
            id: Uuid::new_v4(),
        }
    }

    /// Identity of this checkout. Two scopes sharing a connection see the same id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// False while a transaction is open.
    pub fn autocommit(&self) -> bool {
        self.autocommit
    }

    pub fn db_type(&self) -> DatabaseType {
        match self.inner {
            DriverConnection::MySql(_) => DatabaseType::MySQL,
            DriverConnection::Postgres(_) => DatabaseType::PostgreSQL,
            DriverConnection::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Open a transaction (autocommit off). A no-op if one is already open.
    pub async fn begin(&mut self) -> DbResult<()> {
        if !self.autocommit {
            return Ok(());
        }
        self.raw("BEGIN").await?;
        self.autocommit = false;
        debug!(conn_id = %self.id, "Transaction started");
        Ok(())
    }

    /// Commit the open transaction and restore autocommit.
    pub async fn commit(&mut self) -> DbResult<()> {
        if self.autocommit {
            return Ok(());
        }
        self.raw("COMMIT").await?;
        self.autocommit = true;
        debug!(conn_id = %self.id, "Transaction committed");
        Ok(())
    }

    /// Roll back the open transaction and restore autocommit.
    pub async fn rollback(&mut self) -> DbResult<()> {
        if self.autocommit {
            return Ok(());
        }
        self.raw("ROLLBACK").await?;
        self.autocommit = true;
        debug!(conn_id = %self.id, "Transaction rolled back");
        Ok(())
    }

    async fn raw(&mut self, sql: &str) -> DbResult<()> {
        let result = impl_db_dispatch!(@conn &mut self.inner, {
            MySql(c) => sqlx::raw_sql(sql).execute(&mut **c).await.map(|_| ()),
            Postgres(c) => sqlx::raw_sql(sql).execute(&mut **c).await.map(|_| ()),
            SQLite(c) => sqlx::raw_sql(sql).execute(&mut **c).await.map(|_| ()),
        });
        result.map_err(|e| DbError::statement(e, sql, &[]))
    }

    /// Run a query and materialize every row.
    pub async fn fetch_records(
        &mut self,
        sql: &str,
        params: &[QueryParam],
        mapper: &IdentifierMapper,
    ) -> DbResult<Vec<Record>> {
        let records = impl_db_dispatch!(@conn &mut self.inner, {
            MySql(c) => bind_mysql(sql, params)
                .fetch_all(&mut **c)
                .await
                .map(|rows| rows.iter().map(|r| r.to_record(mapper)).collect()),
            Postgres(c) => bind_postgres(sql, params)
                .fetch_all(&mut **c)
                .await
                .map(|rows| rows.iter().map(|r| r.to_record(mapper)).collect()),
            SQLite(c) => bind_sqlite(sql, params)
                .fetch_all(&mut **c)
                .await
                .map(|rows| rows.iter().map(|r| r.to_record(mapper)).collect()),
        });
        records.map_err(|e| DbError::statement(e, sql, params))
    }

    /// Run a write statement and return the affected-row count.
    ///
    /// Statements without parameters run unprepared, so multi-statement scripts
    /// and DDL work too.
    pub async fn execute_update(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let affected = if params.is_empty() {
            impl_db_dispatch!(@conn &mut self.inner, {
                MySql(c) => sqlx::raw_sql(sql).execute(&mut **c).await.map(|r| r.rows_affected()),
                Postgres(c) => sqlx::raw_sql(sql).execute(&mut **c).await.map(|r| r.rows_affected()),
                SQLite(c) => sqlx::raw_sql(sql).execute(&mut **c).await.map(|r| r.rows_affected()),
            })
        } else {
            impl_db_dispatch!(@conn &mut self.inner, {
                MySql(c) => bind_mysql(sql, params).execute(&mut **c).await.map(|r| r.rows_affected()),
                Postgres(c) => bind_postgres(sql, params).execute(&mut **c).await.map(|r| r.rows_affected()),
                SQLite(c) => bind_sqlite(sql, params).execute(&mut **c).await.map(|r| r.rows_affected()),
            })
        };
        affected.map_err(|e| DbError::statement(e, sql, params))
    }

    /// Run an insert and return the generated key(s).
    ///
    /// Statements with a `RETURNING` clause yield the returned rows. Otherwise
    /// PostgreSQL gets `RETURNING *` appended, while SQLite and MySQL report the
    /// driver's last insert id as a single `generated_key` record.
    pub async fn insert_returning_keys(
        &mut self,
        sql: &str,
        params: &[QueryParam],
        mapper: &IdentifierMapper,
    ) -> DbResult<Vec<Record>> {
        if has_returning_clause(sql, self.db_type()) {
            return self.fetch_records(sql, params, mapper).await;
        }

        if self.db_type() == DatabaseType::PostgreSQL {
            // On its own line so a trailing `--` comment cannot swallow it
            let returning = format!("{}\nRETURNING *", sql.trim_end().trim_end_matches(';'));
            return self.fetch_records(&returning, params, mapper).await;
        }

        let key = match &mut self.inner {
            DriverConnection::MySql(c) => bind_mysql(sql, params)
                .execute(&mut **c)
                .await
                .map(|r| (r.rows_affected() > 0).then(|| JsonValue::from(r.last_insert_id()))),
            DriverConnection::SQLite(c) => bind_sqlite(sql, params)
                .execute(&mut **c)
                .await
                .map(|r| (r.rows_affected() > 0).then(|| JsonValue::from(r.last_insert_rowid()))),
            DriverConnection::Postgres(_) => Ok(None),
        }
        .map_err(|e| DbError::statement(e, sql, params))?;

        Ok(key
            .map(|value| key_record(mapper, value))
            .into_iter()
            .collect())
    }

    /// Run a query and yield its rows in chunks of at most `chunk_size`.
    ///
    /// PostgreSQL reads through a server-side cursor, which needs an open
    /// transaction; SQLite and MySQL read from the driver's row stream. The
    /// stream borrows this connection, so nothing else can run on it until the
    /// stream is dropped.
    pub async fn stream_chunks<'c>(
        &'c mut self,
        sql: &'c str,
        params: &'c [QueryParam],
        chunk_size: usize,
        mapper: &'c IdentifierMapper,
    ) -> DbResult<BoxStream<'c, DbResult<Vec<Record>>>> {
        if chunk_size == 0 {
            return Err(DbError::invalid_input("chunk size must be greater than 0"));
        }
        let id = self.id;
        let stream = match &mut self.inner {
            DriverConnection::Postgres(c) => {
                let cursor = format!("sqlscope_cursor_{}", Uuid::new_v4().simple());
                let declare = format!("DECLARE {cursor} NO SCROLL CURSOR FOR {sql}");
                bind_postgres(&declare, params)
                    .persistent(false)
                    .execute(&mut **c)
                    .await
                    .map_err(|e| DbError::statement(e, sql, params))?;
                debug!(conn_id = %id, cursor = %cursor, chunk_size, "Declared cursor");

                let fetch = format!("FETCH FORWARD {chunk_size} FROM {cursor}");
                stream::try_unfold((c, false), move |(c, exhausted)| {
                    let fetch = fetch.clone();
                    async move {
                        if exhausted {
                            return Ok(None);
                        }
                        let rows = match sqlx::query(&fetch)
                            .persistent(false)
                            .fetch_all(&mut **c)
                            .await
                        {
                            Ok(rows) => rows,
                            Err(e) => return Err(DbError::statement(e, sql, params)),
                        };
                        if rows.is_empty() {
                            return Ok(None);
                        }
                        let last = rows.len() < chunk_size;
                        let records: Vec<Record> = rows.iter().map(|r| r.to_record(mapper)).collect();
                        Ok(Some((records, (c, last))))
                    }
                })
                .boxed()
            }
            DriverConnection::MySql(c) => bind_mysql(sql, params)
                .fetch(&mut **c)
                .chunks(chunk_size)
                .map(move |rows| {
                    rows.into_iter()
                        .map(|row| {
                            row.map(|r| r.to_record(mapper))
                                .map_err(|e| DbError::statement(e, sql, params))
                        })
                        .collect::<DbResult<Vec<Record>>>()
                })
                .boxed(),
            DriverConnection::SQLite(c) => bind_sqlite(sql, params)
                .fetch(&mut **c)
                .chunks(chunk_size)
                .map(move |rows| {
                    rows.into_iter()
                        .map(|row| {
                            row.map(|r| r.to_record(mapper))
                                .map_err(|e| DbError::statement(e, sql, params))
                        })
                        .collect::<DbResult<Vec<Record>>>()
                })
                .boxed(),
        };
        Ok(stream)
    }
}

impl Drop for DbConnection {
    fn drop(&mut self) {
        if self.autocommit {
            return;
        }
        warn!(conn_id = %self.id, "Connection dropped inside a transaction, closing it");
        impl_db_dispatch!(@conn &mut self.inner, {
            MySql(c) => c.close_on_drop(),
            Postgres(c) => c.close_on_drop(),
            SQLite(c) => c.close_on_drop(),
        })
    }
}

/// True if `returning` appears as a bare keyword, outside string literals,
/// quoted identifiers and comments.
fn has_returning_clause(sql: &str, db_type: DatabaseType) -> bool {
    bare_words(sql, db_type)
        .iter()
        .any(|word| word.eq_ignore_ascii_case("returning"))
}

/// Unquoted words of `sql`. Skips `'...'`, `"..."` and `` `...` `` spans,
/// `--` and `/* */` comments, and PostgreSQL `$tag$...$tag$` bodies. MySQL
/// strings also honor backslash escapes.
fn bare_words(sql: &str, db_type: DatabaseType) -> Vec<&str> {
    let bytes = sql.as_bytes();
    let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80;
    let backslash_escapes = db_type == DatabaseType::MySQL;
    let mut words = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if backslash_escapes && quote != b'`' && bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = sql[i + 2..].find("*/").map_or(bytes.len(), |end| i + 2 + end + 2);
            }
            b'$' if db_type == DatabaseType::PostgreSQL => {
                let tag_end = bytes[i + 1..]
                    .iter()
                    .position(|&b| !(b.is_ascii_alphanumeric() || b == b'_'))
                    .map(|n| i + 1 + n);
                match tag_end {
                    Some(end) if bytes[end] == b'$' && !bytes[i + 1].is_ascii_digit() => {
                        let tag = &sql[i..=end];
                        i = sql[end + 1..]
                            .find(tag)
                            .map_or(bytes.len(), |close| end + 1 + close + tag.len());
                    }
                    _ => i += 1,
                }
            }
            b if is_word(b) => {
                let start = i;
                while i < bytes.len() && is_word(bytes[i]) {
                    i += 1;
                }
                words.push(&sql[start..i]);
            }
            _ => i += 1,
        }
    }
    words
}

fn key_record(mapper: &IdentifierMapper, value: JsonValue) -> Record {
    match mapper.result() {
        ResultStrategy::Maps => {
            let mut map = serde_json::Map::new();
            map.insert(mapper.column_key(GENERATED_KEY_LABEL), value);
            JsonValue::Object(map)
        }
        ResultStrategy::Arrays => JsonValue::Array(vec![value]),
    }
}
