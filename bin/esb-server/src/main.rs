//! ESB Mediation Server
//!
//! Loads the engine configuration (path from `ESB_CONFIG`), deploys its
//! sequences, proxies, message stores and processors, and serves:
//!
//! - the ingress routes (`/mediate`, `/proxies/:name`)
//! - the management API (`/health`, `/processors`, `/dlc`)
//! - Prometheus metrics on `/metrics`
//!
//! Set `ESB_LOG_FORMAT=json` for structured log output.

mod wiring;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use esb_api::{create_ingress_router, create_router};
use esb_config::EngineConfig;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting ESB mediation server");

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("installing Prometheus recorder")?;

    let config = EngineConfig::from_env()?;
    let engine = wiring::build(&config).await?;

    for name in &engine.auto_start {
        if let Some(processor) = engine.processors.get(name) {
            processor.start().await;
        }
    }

    let app = create_router(engine.processors.clone())
        .merge(create_ingress_router(engine.engine.clone()))
        .route("/metrics", get(move || std::future::ready(prometheus.render())));

    let listener = TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("binding {}", config.server.bind_address))?;
    info!(address = %config.server.bind_address, "ESB server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown signal received, stopping processors...");
    engine.processors.stop_all().await;

    info!("ESB server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let json = std::env::var("ESB_LOG_FORMAT").map(|v| v == "json").unwrap_or(false);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
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
}
