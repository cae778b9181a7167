//! Failure logging.
//!
//! Every failure is logged where it happens and then handed back to the caller
//! untouched. Execution failures log one line per link of their chain, outer
//! link first, each with the SQL text and parameters. Anything else is logged
//! once with a captured backtrace.

use crate::error::DbError;
use crate::models::QueryParam;
use std::backtrace::Backtrace;
use tracing::error;

pub struct ExceptionReporter;

impl ExceptionReporter {
    /// Log `err`. `sql` and `params` are used when the error does not carry
    /// its own statement context.
    pub fn report(err: &DbError, sql: &str, params: &[QueryParam]) {
        match err {
            DbError::Execution {
                sql: failed_sql,
                params: failed_params,
                chain,
                ..
            } => {
                let (sql, params) = if failed_sql.is_empty() {
                    (sql, params)
                } else {
                    (failed_sql.as_str(), failed_params.as_slice())
                };
                for (depth, link) in chain.iter().enumerate() {
                    error!(
                        sql = %sql,
                        params = ?params,
                        depth,
                        sql_state = ?link.sql_state,
                        cause = %link.message,
                        "Statement failed"
                    );
                }
            }
            other => {
                error!(
                    sql = %sql,
                    params = ?params,
                    error = ?other,
                    backtrace = %Backtrace::force_capture(),
                    "Database operation failed"
                );
            }
        }
    }

    /// Log `err` and give it back.
    pub fn reported(err: DbError, sql: &str, params: &[QueryParam]) -> DbError {
        Self::report(&err, sql, params);
        err
    }
}
