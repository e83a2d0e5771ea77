use chrono::Utc;
use pdf_batch_convert::{config::AppConfig, services::sweeper::RetentionSweeper, store::JobStore};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Run a single retention sweep over the job store and exit.
/// Exits non-zero if any job could not be purged.
#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration");

    tracing::info!(
        data_dir = %config.data_dir.display(),
        retention_days = config.pdf_retention_days,
        "Running one-shot retention sweep"
    );

    let store = Arc::new(JobStore::new(&config.data_dir));
    let sweeper = RetentionSweeper::new(store, config.retention());
    let report = sweeper.sweep(Utc::now()).await;

    if report.failed > 0 {
        tracing::warn!(failed = report.failed, "Some jobs could not be purged");
        std::process::exit(1);
    }
}
