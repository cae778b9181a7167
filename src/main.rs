//! sqlscope - Main entry point.
//!
//! Runs one SQL statement against the database given on the command line and
//! prints the result as JSON on stdout. Logs go to stderr.

use sqlscope::config::{CliMode, Config};
use sqlscope::models::{
    DatabaseSpec, DbOptions, NamingStrategy, QueryDescriptor, ResultMode, ResultStrategy,
};
use sqlscope::global;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn options_from(config: &Config) -> Result<DbOptions, String> {
    let naming = NamingStrategy::from_name(&config.naming)
        .ok_or_else(|| format!("Unknown naming strategy: {}", config.naming))?;
    let result = ResultStrategy::from_name(&config.result)
        .ok_or_else(|| format!("Unknown result strategy: {}", config.result))?;
    Ok(DbOptions::default()
        .with_naming(naming)
        .with_result(result))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    let spec = DatabaseSpec::from_url(&config.database)?.with_options(options_from(&config)?);
    info!(
        db = %spec.masked_url(),
        mode = %config.mode,
        stream = config.stream,
        "Starting sqlscope v{}",
        env!("CARGO_PKG_VERSION")
    );

    let handle = global::create_handle(spec);
    global::set_default(handle.clone());

    let mode = match config.mode {
        CliMode::Rows => ResultMode::RowSet,
        CliMode::Keys => ResultMode::GeneratedKeys,
        CliMode::Count => ResultMode::AffectedCount,
    };
    let descriptor =
        QueryDescriptor::new(config.sql.as_str(), mode).with_params(config.parse_params()?);

    let result = if config.stream {
        global::stream(config.chunk_size, &descriptor, async |cursor| {
            while let Some(record) = cursor.next().await? {
                println!("{record}");
            }
            Ok(cursor.rows_fetched())
        })
        .await
        .map(|rows| info!(rows, "Stream finished"))
    } else {
        global::execute(&descriptor).await.and_then(|outcome| {
            let json = serde_json::to_string_pretty(&outcome)
                .map_err(|e| sqlscope::DbError::invalid_input(e.to_string()))?;
            println!("{json}");
            Ok(())
        })
    };

    handle.close().await;

    if let Err(e) = result {
        error!(error = %e, "Query failed");
        if let Some(suggestion) = e.suggestion() {
            eprintln!("{suggestion}");
        }
        return Err(e.into());
    }

    Ok(())
}
