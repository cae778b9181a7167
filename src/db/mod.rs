//! Database access layer.
//!
//! This module provides:
//! - Lazily built connection pools per database spec
//! - The ambient connection and scoped transactions
//! - Query execution and lazy chunked streaming
//! - Row decoding and parameter binding per driver
//! - Failure logging
//! - Database dispatch macros for reducing code duplication

#[macro_use]
pub mod macros;
pub mod ambient;
pub mod connection;
pub mod executor;
pub mod handle;
pub mod params;
pub mod pool;
pub mod registry;
pub mod reporter;
pub mod streamer;
pub mod transaction;
pub mod types;

pub use ambient::{AmbientConnection, current_connection};
pub use connection::DbConnection;
pub use executor::QueryExecutor;
pub use handle::DatabaseHandle;
pub use pool::{ConnectionPool, DbPool, PoolSettings};
pub use registry::ConnectionRegistry;
pub use reporter::ExceptionReporter;
pub use streamer::{LazyResultStreamer, RowCursor};
pub use transaction::TransactionManager;
