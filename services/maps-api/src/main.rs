//! GigaMaps tile API service.
//!
//! HTTP server computing data-layer vector tiles and info aggregates from
//! a PostGIS read replica, with a Redis-backed stale-while-revalidate
//! cache and a background refresh worker.

mod cached;
mod handlers;
mod metrics;
mod params;
mod refresh_worker;
mod state;

use anyhow::Result;
use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use clap::Parser;
use std::{env, net::SocketAddr, sync::Arc};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use refresh_worker::{HttpFetcher, RefreshWorkerConfig};
use state::AppState;

#[derive(Parser, Debug)]
#[command(name = "maps-api")]
#[command(about = "GigaMaps data-layer tile API server")]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    listen: String,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Number of tokio worker threads (default: number of CPU cores)
    #[arg(long)]
    worker_threads: Option<usize>,

    /// Apply the development schema before serving
    #[arg(long)]
    migrate: bool,
}

fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Build tokio runtime with configurable worker threads
    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();

    if let Some(threads) = args.worker_threads {
        runtime_builder.worker_threads(threads);
    } else if let Ok(threads_str) = env::var("TOKIO_WORKER_THREADS") {
        if let Ok(threads) = threads_str.parse::<usize>() {
            runtime_builder.worker_threads(threads);
        }
    }

    let runtime = runtime_builder.build()?;
    runtime.block_on(async_main(args))?;
    Ok(())
}

async fn async_main(args: Args) -> Result<()> {
    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Initialize Prometheus metrics exporter
    let prometheus_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    info!("Starting maps API server");

    // Initialize application state
    let state = Arc::new(AppState::new().await?);

    if args.migrate {
        state.replica.migrate().await?;
        info!("Development schema applied");
    }

    // Background refresh worker
    let worker_config = RefreshWorkerConfig::from_env();
    let fetcher = Arc::new(HttpFetcher::new(worker_config.base_url.clone()));
    tokio::spawn(refresh_worker::run(state.clone(), fetcher, worker_config));

    // Build router
    let app = Router::new()
        // Public tile/info endpoints
        .route(
            "/api/accounts/layers/:layer_id/map/",
            get(handlers::layer_map_handler),
        )
        .route(
            "/api/accounts/layers/:layer_id/info/",
            get(handlers::layer_info_handler),
        )
        .route(
            "/api/accounts/time-players/v2/",
            get(handlers::time_player_tile_handler),
        )
        .route(
            "/api/connection_statistics/time-players/",
            get(handlers::time_player_rows_handler),
        )
        // Admin endpoints
        .route(
            "/api/accounts/layers/:layer_id/publish",
            post(handlers::publish_layer_handler),
        )
        .route("/api/cache/invalidate", post(handlers::cache_invalidate_handler))
        // Health checks
        .route("/health", get(handlers::health_handler))
        .route("/ready", get(handlers::ready_handler))
        // Metrics
        .route("/metrics", get(handlers::metrics_handler))
        .route("/api/metrics", get(handlers::api_metrics_handler))
        // Layer extensions
        .layer(Extension(state))
        .layer(Extension(prometheus_handle))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive());

    // Parse listen address
    let addr: SocketAddr = args.listen.parse()?;
    info!(address = %addr, "Listening");

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
