use anyhow::Result;
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    config::Config,
    handlers::{
        self,
        querylogz::{PageSettings, QueryLogState},
    },
    metrics, producer,
    signals::setup_signal_handlers,
    stats::LogEntry,
    streamlog::EventLog,
};

/// Start the query log debug server
///
/// This function:
/// 1. Creates the query log that producers publish to
/// 2. Initializes metrics
/// 3. Sets up signal handlers for graceful shutdown
/// 4. Optionally starts the demo producer
/// 5. Serves the debug pages until shutdown, then closes the log
pub async fn start_server(config: Config) -> Result<()> {
    let log: EventLog<LogEntry> = EventLog::new(config.querylog.name.clone(), config.querylog.capacity)?;

    let metrics_handle = if config.metrics.enabled {
        info!("Initializing Prometheus metrics...");
        Some(Arc::new(metrics::init_metrics()?))
    } else {
        None
    };

    let (shutdown_tx, signal_handle) = setup_signal_handlers();
    let mut shutdown_rx = shutdown_tx.subscribe();

    let producer_handle = if config.demo.enabled {
        Some(producer::spawn_demo_producer(
            log.clone(),
            Duration::from_millis(config.demo.interval_ms),
            shutdown_tx.subscribe(),
        ))
    } else {
        None
    };

    let app = create_router(&config, log.clone(), metrics_handle);

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    info!("Starting querylogz on {}", addr);
    info!(
        "Query log '{}': capacity {}, default limit {}, default timeout {}s",
        config.querylog.name,
        config.querylog.capacity,
        config.querylog.default_limit,
        config.querylog.default_timeout_secs
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown_log = log.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("Shutdown signal received, closing stream log and draining connections...");
            // Ends live tails so their connections can drain
            shutdown_log.close();
        })
        .await?;

    // The signal task only exits after a shutdown signal; do not wait on it
    // when the server stopped for another reason.
    signal_handle.abort();
    if let Some(handle) = producer_handle {
        handle.abort();
    }
    log.close();
    info!("Server stopped gracefully");

    Ok(())
}

/// Create the Axum router for the query log pages
pub fn create_router(
    config: &Config,
    log: EventLog<LogEntry>,
    metrics_handle: Option<Arc<PrometheusHandle>>,
) -> Router {
    let base = format!("/{}", config.querylog.name);
    let state = QueryLogState::new(log, PageSettings::from(&config.querylog));

    let querylog_routes = Router::new()
        .route(&base, get(handlers::querylogz::querylogz))
        .route(&format!("{}/stream", base), get(handlers::querylogz::stream))
        .route(&format!("{}/stats", base), get(handlers::querylogz::stats))
        .with_state(state);

    let mut app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .merge(querylog_routes);

    if let Some(handle) = metrics_handle {
        app = app.merge(
            Router::new()
                .route(&config.metrics.endpoint, get(handlers::metrics_handler::metrics))
                .with_state(handle),
        );
    }

    app.layer(TraceLayer::new_for_http())
}
