use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tracing::{error, info};

use query_layer::api::handlers::AppState;
use query_layer::api::routes::create_router;
use query_layer::config::Config;
use query_layer::services::{PerformanceMonitor, PostgresExecutor, QueryService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    let executor = Arc::new(PostgresExecutor::new(&config.database.url).map_err(|e| {
        error!("Invalid database configuration: {}", e);
        e
    })?);
    info!("Using database {}", executor.masked_url());

    let service = QueryService::new(executor, config.pool.clone(), &config.cache, &config.slow_query);
    let warmed = service.warm_up().await;
    info!("Connection pool warmed with {} connections", warmed);

    let monitor = Arc::new(PerformanceMonitor::new(service.clone(), config.monitoring.clone()));
    let monitor_task = monitor.spawn();

    let state = AppState {
        config: config.clone(),
        service: service.clone(),
        monitor,
    };
    let app: Router = create_router(state);

    // Start server
    let addr: SocketAddr = config.server_address().parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    monitor_task.stop().await;
    service.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
