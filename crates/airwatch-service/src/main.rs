//! Airwatch Service - Alert scheduler and HTTP API.
//!
//! Run with: `cargo run -p airwatch-service`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use airwatch_service::{AppState, Config, Scheduler, api, build_notifier, default_config_path};
use airwatch_store::Store;

/// Airwatch Service - Alert scheduler and HTTP REST API.
#[derive(Parser, Debug)]
#[command(name = "airwatch-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Database path (overrides config).
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Disable the background alert scheduler (API only mode).
    #[arg(long)]
    no_scheduler: bool,

    /// Write the effective configuration to the config path and exit.
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("airwatch_service=info".parse()?)
                .add_directive("airwatch_core=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(db_path) = args.database {
        config.storage.path = db_path;
    }
    config.validate()?;

    if args.init_config {
        let path = args.config.clone().unwrap_or_else(default_config_path);
        config.save(&path)?;
        info!("Wrote configuration to {}", path.display());
        return Ok(());
    }

    info!("Opening database at {:?}", config.storage.path);
    let store = Store::open(&config.storage.path)?.with_subscription_defaults(
        config.alerts.default_threshold,
        config.alerts.default_min_interval_hours,
    );

    let notifier = build_notifier(&config.notifier)?;
    info!("Delivering alerts via {}", notifier.name());

    let state = AppState::new(store, config.clone(), notifier);

    if !args.no_scheduler {
        Scheduler::new(Arc::clone(&state)).start();
    } else {
        info!("Background scheduler disabled");
    }

    let app = Router::new()
        .merge(api::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(Arc::clone(&state));

    let addr: SocketAddr = config.server.bind.parse()?;
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

/// Resolve on Ctrl+C and stop the scheduler.
async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
    state.scheduler.signal_stop();
}
