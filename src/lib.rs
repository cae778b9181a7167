//! sqlscope Library
//!
//! Runtime data access for SQL databases (SQLite, PostgreSQL, MySQL): lazily
//! built connection pools, an ambient per-task connection, nested transactions
//! with rollback-only marking, query execution by result mode and chunked
//! streaming of large results.

pub mod config;
pub mod db;
pub mod error;
pub mod global;
pub mod models;

pub use config::Config;
pub use db::{
    ConnectionPool, ConnectionRegistry, DatabaseHandle, ExceptionReporter, LazyResultStreamer,
    QueryExecutor, RowCursor, TransactionManager,
};
pub use error::{DbError, DbResult};
pub use models::{
    DatabaseSpec, DatabaseType, DbOptions, NamingStrategy, QueryDescriptor, QueryOutcome,
    QueryParam, Record, ResultMode, ResultStrategy,
};
