use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use herald_client::{FetcherConfig, MarkdownParser, ResilientFetcher};
use herald_core::{EngineConfig, MaintenanceConfig, ResilientScraper, TracingMaintenanceReporter};
use herald_db::AnySourceStore;
use herald_server::routes;
use herald_server::state::AppState;

const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("herald=info".parse()?))
        .with_target(false)
        .init();

    let api_key =
        std::env::var("HERALD_SERVER_API_KEY").context("HERALD_SERVER_API_KEY must be set")?;
    let port = std::env::var("HERALD_SERVER_PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{port}");
    let maintenance_interval = match std::env::var("HERALD_MAINTENANCE_INTERVAL_SECS") {
        Ok(raw) => Duration::from_secs(
            raw.trim()
                .parse()
                .with_context(|| format!("Invalid HERALD_MAINTENANCE_INTERVAL_SECS '{raw}'"))?,
        ),
        Err(_) => MaintenanceConfig::default().interval,
    };

    let config = EngineConfig::from_env()?;
    let sources_file = std::env::var("HERALD_SOURCES_FILE").ok().map(PathBuf::from);
    let store = AnySourceStore::open(sources_file.as_deref()).await?;
    tracing::info!(backend = store.backend(), "Source store ready");

    let fetcher = ResilientFetcher::new(FetcherConfig::default().with_retry(config.retry.clone()))?;
    let scraper = ResilientScraper::new(fetcher, MarkdownParser::new(), store.clone(), &config);

    // Background cache sweep and pool refresh
    let cancel_token = CancellationToken::new();
    let maintenance = scraper.maintenance(MaintenanceConfig {
        interval: maintenance_interval,
    });
    let maintenance_handle = {
        let token = cancel_token.clone();
        tokio::spawn(async move { maintenance.run(token, &TracingMaintenanceReporter).await })
    };

    let state = Arc::new(AppState {
        scraper,
        store,
        api_key,
    });

    let app = routes::router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel_token.cancel();
    match maintenance_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Maintenance loop failed"),
        Err(e) => tracing::error!(error = %e, "Maintenance task panicked"),
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
