//! Database dispatch macros for reducing code duplication.
//!
//! The pool and the pooled connection are both closed enums over the three
//! drivers. These macros generate the per-driver match arms so each operation
//! reads as one linear block.

/// Macro for generating database dispatch match arms.
///
/// Dispatches over `DbPool` by default, or over `DriverConnection` with the
/// `@conn` prefix.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(pool, {
///     MySql(p) => do_mysql(p),
///     Postgres(p) => do_postgres(p),
///     SQLite(p) => do_sqlite(p),
/// });
///
/// impl_db_dispatch!(@conn &mut self.inner, {
///     MySql(c) => sqlx::raw_sql(sql).execute(&mut **c).await,
///     Postgres(c) => sqlx::raw_sql(sql).execute(&mut **c).await,
///     SQLite(c) => sqlx::raw_sql(sql).execute(&mut **c).await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    (@conn $conn:expr, { $($variant:ident($c:ident) => $body:expr),+ $(,)? }) => {
        match $conn {
            $(
                $crate::db::connection::DriverConnection::$variant($c) => $body,
            )+
        }
    };
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::pool::DbPool::$variant($p) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;
