pub mod bindings;
pub mod clock;
pub mod collector;
pub mod db;
pub mod host;
pub mod models;
pub mod settings;
pub mod transport;
mod utils;

#[cfg(test)]
mod testing;

use std::{env, path::PathBuf, sync::Arc};

use anyhow::Context;
use tokio::io::{self, BufReader};

pub use clock::{Clock, ManualClock, SystemClock};
pub use collector::{FlushOutcome, MetricsCollector, NavDirection};
pub use db::Database;
pub use models::{BatchPayload, Event, FlushReason, Session, VisitorStatus};
pub use settings::CollectorConfig;
pub use transport::{HttpTransport, Transport};

/// Path of the JSON collector config; `argv[1]` takes precedence.
pub const CONFIG_ENV: &str = "CARDAPIO_METRICS_CONFIG";
/// Path of the SQLite store holding the buffer and recurrence record.
pub const DB_ENV: &str = "CARDAPIO_METRICS_DB";
const DEFAULT_DB_FILE: &str = "cardapio-metrics.sqlite3";

/// Entry point of the host driver binary: build a collector from the
/// environment, feed it stdin notifications and shut it down on EOF.
pub async fn run() -> anyhow::Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let config = match env::args().nth(1).or_else(|| env::var(CONFIG_ENV).ok()) {
        Some(path) => CollectorConfig::load(&PathBuf::from(path))?,
        None => CollectorConfig::default(),
    };
    let db_path = env::var(DB_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_FILE));

    log::info!(
        "ARCardápio metrics starting up (env {}, tenant {})",
        config.env,
        config.tenant.as_deref().unwrap_or("default")
    );

    let database = Database::open(db_path).context("failed to open metrics database")?;
    let transport = Arc::new(HttpTransport::new(&config)?);
    if config.endpoint.is_none() {
        log::warn!("No ingestion endpoint configured; events will stay buffered on disk");
    }

    let collector = MetricsCollector::init(config, database, transport, Arc::new(SystemClock)).await;

    let result = host::run_lines(&collector, BufReader::new(io::stdin())).await;
    collector.shutdown().await;
    result
}
