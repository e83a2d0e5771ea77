use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use pdf_batch_convert::{
    app_state::AppState,
    config::AppConfig,
    routes,
    services::{
        archive::ZipArchiveBuilder, converter::ImageMagickConverter,
        orchestrator::BatchOrchestrator, sweeper::RetentionSweeper,
    },
    store::JobStore,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing pdf-batch-convert server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    metrics::describe_histogram!(
        "conversion_batch_seconds",
        "Time to run one batch conversion job"
    );
    metrics::describe_counter!("conversion_jobs_submitted", "Total batches uploaded");
    metrics::describe_counter!("conversion_jobs_completed", "Total jobs completed");
    metrics::describe_counter!("conversion_jobs_failed", "Total jobs that ended in error");
    metrics::describe_counter!("conversion_files_converted", "Total files converted");
    metrics::describe_counter!("conversion_files_failed", "Total files that failed to convert");
    metrics::describe_counter!("retention_jobs_purged", "Total jobs purged by retention");
    metrics::describe_gauge!("conversion_jobs_active", "Batches currently running");

    // Initialize job store
    tracing::info!(data_dir = %config.data_dir.display(), "Opening job store");
    let store = Arc::new(JobStore::new(&config.data_dir));
    store.init().await.expect("Failed to create data directory");

    let converter = ImageMagickConverter::new(&config.imagemagick_binary, config.convert_timeout());
    let orchestrator = BatchOrchestrator::new(
        store.clone(),
        Arc::new(converter),
        Arc::new(ZipArchiveBuilder),
        config.conversion_defaults(),
    );

    // Jobs left processing by a previous run cannot resume
    match orchestrator.recover_interrupted(Utc::now()).await {
        Ok(0) => {}
        Ok(n) => tracing::warn!(jobs = n, "Marked interrupted jobs as failed"),
        Err(e) => tracing::error!(error = %e, "Failed to recover interrupted jobs"),
    }

    let sweeper = RetentionSweeper::new(store.clone(), config.retention());
    let state = AppState::new(store, orchestrator, sweeper);

    let sweeper_handle = if config.enable_cleanup {
        tracing::info!(
            retention_days = config.pdf_retention_days,
            interval_secs = config.cleanup_interval_secs,
            "Starting retention sweeper"
        );
        Some(state.sweeper.clone().spawn(config.cleanup_interval()))
    } else {
        None
    };

    let app = routes::router(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(move || std::future::ready(prometheus_handle.render())),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_upload_bytes));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    if let Some(handle) = sweeper_handle {
        handle.stop().await;
    }
    tracing::info!("Server stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
