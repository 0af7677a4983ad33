//! tm-api - therapist matching marketplace HTTP service

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tm_ads::ConversionUploader;
use tm_api::calendar::PgCalendarSource;
use tm_api::notify::ResendNotifier;
use tm_api::{build_router, AppState};
use tm_common::config::AppConfig;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for tm-api
#[derive(Parser, Debug)]
#[command(name = "tm-api")]
#[command(about = "Therapist matching marketplace API")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = "TM_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on, overrides `server.port`
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// SQLite database file, overrides `database.path`
    #[arg(long, env = "DATABASE_PATH")]
    db_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tm_api=info,tm_common=info,tm_ads=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting tm-api v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(path) = args.db_path {
        config.database.path = path;
    }

    info!("Database path: {}", config.database.path.display());
    let pool = tm_common::db::init_database(&config.database.path, config.database.max_connections)
        .await
        .context("Failed to open database")?;

    let notifier = ResendNotifier::from_config(&config).context("Failed to build email client")?;

    let calendar = match config.cal.database_url.as_deref() {
        Some(url) => {
            info!("Cal.com availability enabled");
            Some(PgCalendarSource::connect_readonly(url).await?)
        }
        None => {
            warn!("CAL_DATABASE_URL not set: slot endpoints return null");
            None
        }
    };

    let conversions = if config.google_ads_enabled() {
        info!("Google Ads enhanced conversions enabled");
        Some(ConversionUploader::from_config(&config.google_ads).context("Invalid Google Ads configuration")?)
    } else {
        info!("Google Ads not configured: conversions are not uploaded");
        None
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid listen address")?;

    let mut state = AppState::new(pool, config, Arc::new(notifier));
    if let Some(calendar) = calendar {
        state = state.with_calendar(Arc::new(calendar));
    }
    if let Some(uploader) = conversions {
        state = state.with_conversions(Arc::new(uploader));
    }

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("tm-api listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
