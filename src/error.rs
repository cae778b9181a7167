//! Error types for sqlscope.
//!
//! All runtime failures are expressed as [`DbError`]. Statement failures keep the
//! SQL text and parameters that produced them, plus the chain of driver-level
//! links underneath, so a failure can be diagnosed without re-running it.

use crate::models::QueryParam;
use std::error::Error as _;
use thiserror::Error;

/// One driver-level link in an execution failure chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorLink {
    pub message: String,
    /// e.g., "42P01" for undefined table
    pub sql_state: Option<String>,
}

impl ErrorLink {
    pub fn new(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self {
            message: message.into(),
            sql_state,
        }
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("No connection configured: register a default database or pass an explicit handle")]
    NoConnectionConfigured,

    #[error("No active transaction: rollback control is only valid inside a transaction scope")]
    NoActiveTransaction,

    #[error("Pool construction failed: {message}")]
    PoolConstruction { message: String, suggestion: String },

    #[error("Connection acquire failed: {message}")]
    Acquire { message: String },

    #[error("Execution failed: {message}")]
    Execution {
        message: String,
        sql_state: Option<String>,
        sql: String,
        params: Vec<QueryParam>,
        /// Link 0 is the driver failure itself; later links are its causes.
        chain: Vec<ErrorLink>,
    },

    #[error("Streaming protocol violation: {message}")]
    StreamingProtocolViolation { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

impl DbError {
    pub fn no_connection_configured() -> Self {
        Self::NoConnectionConfigured
    }

    pub fn no_active_transaction() -> Self {
        Self::NoActiveTransaction
    }

    /// Create a pool construction error with a helpful suggestion.
    pub fn pool_construction(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::PoolConstruction {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn acquire(message: impl Into<String>) -> Self {
        Self::Acquire {
            message: message.into(),
        }
    }

    /// Create an execution error with a single link.
    pub fn execution(
        message: impl Into<String>,
        sql_state: Option<String>,
        sql: impl Into<String>,
        params: &[QueryParam],
    ) -> Self {
        let message = message.into();
        Self::Execution {
            chain: vec![ErrorLink::new(message.clone(), sql_state.clone())],
            message,
            sql_state,
            sql: sql.into(),
            params: params.to_vec(),
        }
    }

    /// Wrap a driver error raised while running `sql` with `params`.
    pub fn statement(err: sqlx::Error, sql: &str, params: &[QueryParam]) -> Self {
        match DbError::from(err) {
            Self::Execution {
                message,
                sql_state,
                chain,
                ..
            } => Self::Execution {
                message,
                sql_state,
                sql: sql.to_string(),
                params: params.to_vec(),
                chain,
            },
            other => other,
        }
    }

    pub fn streaming_protocol_violation(message: impl Into<String>) -> Self {
        Self::StreamingProtocolViolation {
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Append a follow-on failure (e.g. a failed rollback) to this error's chain.
    ///
    /// Only execution errors carry a chain; for any other variant the follow-on
    /// failure is logged and the original error is returned unchanged.
    pub fn with_cause(mut self, cause: DbError) -> Self {
        match &mut self {
            Self::Execution { chain, .. } => match cause {
                Self::Execution {
                    chain: cause_chain, ..
                } => chain.extend(cause_chain),
                other => chain.push(ErrorLink::new(other.to_string(), None)),
            },
            _ => {
                tracing::warn!(error = %self, cause = %cause, "Dropping follow-on failure");
            }
        }
        self
    }

    /// Driver-level chain of an execution error; empty for every other variant.
    pub fn chain(&self) -> &[ErrorLink] {
        match self {
            Self::Execution { chain, .. } => chain,
            _ => &[],
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::PoolConstruction { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolConstruction { .. } | Self::Acquire { .. })
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => {
                return DbError::acquire("Timed out waiting for a pooled connection");
            }
            sqlx::Error::PoolClosed => return DbError::acquire("Connection pool is closed"),
            sqlx::Error::Configuration(msg) => {
                return DbError::pool_construction(
                    msg.to_string(),
                    "Check the connection string format and credentials",
                );
            }
            _ => {}
        }

        let (message, sql_state) = match &err {
            sqlx::Error::Database(db_err) => (
                db_err.message().to_string(),
                db_err.code().map(|c| c.to_string()),
            ),
            _ => (err.to_string(), None),
        };

        let mut chain = vec![ErrorLink::new(message.clone(), sql_state.clone())];
        // The database variant's direct source is the link we already recorded.
        let mut source = match &err {
            sqlx::Error::Database(db_err) => db_err.source(),
            _ => err.source(),
        };
        while let Some(cause) = source {
            let text = cause.to_string();
            if chain.last().is_none_or(|last| last.message != text) {
                chain.push(ErrorLink::new(text, None));
            }
            source = cause.source();
        }

        DbError::Execution {
            message,
            sql_state,
            sql: String::new(),
            params: Vec::new(),
            chain,
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::pool_construction("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Pool construction failed"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::pool_construction("refused", "Check that the server is running");
        assert_eq!(err.suggestion(), Some("Check that the server is running"));
        assert_eq!(DbError::no_active_transaction().suggestion(), None);
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::acquire("timed out").is_retryable());
        assert!(DbError::pool_construction("err", "sugg").is_retryable());
        assert!(!DbError::no_connection_configured().is_retryable());
    }

    #[test]
    fn test_execution_keeps_sql_and_params() {
        let err = DbError::execution(
            "no such table: ghosts",
            None,
            "SELECT * FROM ghosts WHERE id = ?",
            &[QueryParam::Int(7)],
        );
        match &err {
            DbError::Execution { sql, params, .. } => {
                assert_eq!(sql, "SELECT * FROM ghosts WHERE id = ?");
                assert!(matches!(params.as_slice(), [QueryParam::Int(7)]));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
        assert_eq!(err.chain().len(), 1);
    }

    #[test]
    fn test_with_cause_extends_chain() {
        let err = DbError::execution("insert failed", Some("23505".into()), "INSERT", &[])
            .with_cause(DbError::execution("rollback failed", None, "ROLLBACK", &[]));
        let messages: Vec<_> = err.chain().iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, ["insert failed", "rollback failed"]);
    }

    #[test]
    fn test_with_cause_keeps_non_execution_error() {
        let err = DbError::no_connection_configured()
            .with_cause(DbError::acquire("pool closed"));
        assert!(matches!(err, DbError::NoConnectionConfigured));
    }

    #[test]
    fn test_from_sqlx_pool_timeout_is_acquire() {
        let err: DbError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, DbError::Acquire { .. }));
    }

    #[test]
    fn test_statement_attaches_context() {
        let err = DbError::statement(
            sqlx::Error::RowNotFound,
            "SELECT 1",
            &[QueryParam::Bool(true)],
        );
        match err {
            DbError::Execution { sql, params, chain, .. } => {
                assert_eq!(sql, "SELECT 1");
                assert_eq!(params.len(), 1);
                assert!(!chain.is_empty());
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
