//! Configuration handling for sqlscope.
//!
//! Pool tuning shared by every [`DatabaseSpec`](crate::DatabaseSpec), plus the
//! CLI configuration of the `sqlscope` binary (arguments and environment variables).

use clap::{Parser, ValueEnum};

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_SQLITE: u32 = 1;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
/// 3 hours
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 10_800;
/// 30 minutes
pub const DEFAULT_EXCESS_IDLE_TIMEOUT_SECS: u64 = 1_800;

pub const DEFAULT_CHUNK_SIZE: usize = 1_000;

/// Connection pool configuration options.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 10 for MySQL/PostgreSQL, 1 for SQLite)
    pub max_connections: Option<u32>,
    /// Minimum connections in pool (default: 1)
    pub min_connections: Option<u32>,
    /// Connection acquire timeout in seconds (default: 30)
    pub acquire_timeout_secs: Option<u64>,
    /// Whether to test connections before use (default: true)
    pub test_before_acquire: Option<bool>,
}

impl PoolOptions {
    /// Get max_connections with default value based on database type.
    pub fn max_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.max_connections.unwrap_or(if is_sqlite {
            DEFAULT_MAX_CONNECTIONS_SQLITE
        } else {
            DEFAULT_MAX_CONNECTIONS
        })
    }

    /// Get min_connections with default value, never above the maximum.
    pub fn min_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.min_connections
            .unwrap_or(DEFAULT_MIN_CONNECTIONS)
            .min(self.max_connections_or_default(is_sqlite))
    }

    /// Get acquire_timeout with default value.
    pub fn acquire_timeout_or_default(&self) -> u64 {
        self.acquire_timeout_secs
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS)
    }

    /// Get test_before_acquire with default value.
    pub fn test_before_acquire_or_default(&self) -> bool {
        self.test_before_acquire.unwrap_or(true)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err("max_connections must be greater than 0".to_string());
            }
        }
        if let Some(min) = self.min_connections {
            if min == 0 {
                return Err("min_connections must be greater than 0".to_string());
            }
            if let Some(max) = self.max_connections {
                if min > max {
                    return Err(format!(
                        "min_connections ({}) cannot exceed max_connections ({})",
                        min, max
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Result mode selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CliMode {
    /// Materialize every row
    #[default]
    Rows,
    /// Return generated keys
    Keys,
    /// Return the affected-row count
    Count,
}

impl std::fmt::Display for CliMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rows => write!(f, "rows"),
            Self::Keys => write!(f, "keys"),
            Self::Count => write!(f, "count"),
        }
    }
}

/// Configuration for the sqlscope CLI.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "sqlscope",
    about = "Run a SQL statement through a pooled, scoped connection and print the result as JSON",
    version,
    author
)]
pub struct Config {
    /// Database connection URL.
    /// Pool keys (idle_timeout, excess_idle_timeout, max_connections, ...) may be
    /// given as query parameters.
    #[arg(short = 'd', long = "database", value_name = "URL", env = "SQLSCOPE_DATABASE")]
    pub database: String,

    /// Result mode
    #[arg(short, long, value_enum, default_value = "rows", env = "SQLSCOPE_MODE")]
    pub mode: CliMode,

    /// Stream rows through a server-side cursor, one JSON record per line
    #[arg(long, env = "SQLSCOPE_STREAM")]
    pub stream: bool,

    /// Rows fetched per round trip when streaming
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, env = "SQLSCOPE_CHUNK_SIZE")]
    pub chunk_size: usize,

    /// Positional parameter as JSON (repeatable, in order)
    #[arg(short, long = "param", value_name = "JSON")]
    pub params: Vec<String>,

    /// Naming strategy for record keys (identity, kebab)
    #[arg(long, default_value = "identity", env = "SQLSCOPE_NAMING")]
    pub naming: String,

    /// Record shape (maps, arrays)
    #[arg(long, default_value = "maps", env = "SQLSCOPE_RESULT")]
    pub result: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "SQLSCOPE_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "SQLSCOPE_JSON_LOGS")]
    pub json_logs: bool,

    /// SQL statement to run
    #[arg(value_name = "SQL")]
    pub sql: String,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Parse `--param` values into query parameters.
    pub fn parse_params(&self) -> Result<Vec<crate::models::QueryParam>, String> {
        self.params
            .iter()
            .map(|raw| {
                serde_json::from_str(raw).map_err(|e| format!("Invalid --param {raw:?}: {e}"))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QueryParam;

    #[test]
    fn test_pool_options_defaults() {
        let opts = PoolOptions::default();
        assert_eq!(opts.max_connections_or_default(false), 10);
        assert_eq!(opts.max_connections_or_default(true), 1);
        assert_eq!(opts.min_connections_or_default(false), 1);
        assert_eq!(opts.acquire_timeout_or_default(), 30);
        assert!(opts.test_before_acquire_or_default());
    }

    #[test]
    fn test_pool_options_custom_values() {
        let opts = PoolOptions {
            max_connections: Some(20),
            min_connections: Some(5),
            acquire_timeout_secs: Some(60),
            test_before_acquire: Some(false),
        };
        assert_eq!(opts.max_connections_or_default(false), 20);
        assert_eq!(opts.max_connections_or_default(true), 20);
        assert_eq!(opts.min_connections_or_default(true), 5);
        assert_eq!(opts.acquire_timeout_or_default(), 60);
        assert!(!opts.test_before_acquire_or_default());
    }

    #[test]
    fn test_min_connections_capped_by_sqlite_default() {
        let opts = PoolOptions {
            min_connections: Some(3),
            ..Default::default()
        };
        assert_eq!(opts.min_connections_or_default(true), 1);
    }

    #[test]
    fn test_pool_options_validation() {
        let zero_max = PoolOptions {
            max_connections: Some(0),
            ..Default::default()
        };
        assert!(zero_max.validate().unwrap_err().contains("max_connections"));

        let inverted = PoolOptions {
            max_connections: Some(2),
            min_connections: Some(3),
            ..Default::default()
        };
        assert!(inverted.validate().unwrap_err().contains("cannot exceed"));
        assert!(PoolOptions::default().validate().is_ok());
    }

    #[test]
    fn test_cli_parsing() {
        let config = Config::try_parse_from([
            "sqlscope",
            "-d",
            "sqlite::memory:",
            "--mode",
            "count",
            "-p",
            "1",
            "-p",
            "\"x\"",
            "UPDATE t SET a = ? WHERE b = ?",
        ])
        .unwrap();
        assert_eq!(config.mode, CliMode::Count);
        assert!(!config.stream);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(
            config.parse_params().unwrap(),
            vec![QueryParam::Int(1), QueryParam::String("x".into())]
        );
    }

    #[test]
    fn test_invalid_param_rejected() {
        let config =
            Config::try_parse_from(["sqlscope", "-d", "sqlite::memory:", "-p", "{bad", "SELECT ?"])
                .unwrap();
        assert!(config.parse_params().unwrap_err().contains("--param"));
    }
}
