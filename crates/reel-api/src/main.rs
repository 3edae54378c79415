//! Axum API server binary with the embedded worker pool.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reel_api::{create_router, metrics, ApiConfig, AppState};
use reel_worker::{JobProcessor, WorkerPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,reel_api=info,reel_worker=info,reel_queue=info,reel_media=info")
    });

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting reel-api");

    let config = ApiConfig::from_env();
    info!("API config: host={}, port={}", config.host, config.port);

    let metrics_handle = if config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics().context("failed to install metrics recorder")?)
    } else {
        None
    };

    let state = AppState::new(config.clone()).await?;
    tokio::fs::create_dir_all(state.worker_config.incoming_dir()).await?;
    tokio::fs::create_dir_all(state.worker_config.processed_dir()).await?;

    let processor = Arc::new(JobProcessor::new(
        (*state.worker_config).clone(),
        Arc::clone(&state.videos),
        Arc::clone(&state.transcoder),
    ));
    let pool = Arc::new(WorkerPool::new(Arc::clone(&state.queue), processor));
    let pool_task = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            if let Err(e) = pool.run().await {
                error!("Worker pool exited with error: {}", e);
            }
        })
    };

    let queue = Arc::clone(&state.queue);
    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid bind address")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop intake first so nothing new lands while workers drain.
    queue.close();
    pool.shutdown();
    if let Err(e) = pool_task.await {
        error!("Worker pool task failed: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
