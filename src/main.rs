mod api;
mod config;
mod error;
mod generation;
mod models;
mod polling;
mod routes;
mod session;
mod studio;
mod upload;

use anyhow::Context;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{CorsLayer, Any};
use tracing_subscriber::{fmt, EnvFilter};

use crate::{api::HttpStudioApi, config::Config, routes::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = Config::from_env();
    tracing::info!(
        "Image service at {} (poll every {:?}, give up after {} failed lookups)",
        config.api_base,
        config.studio.poll_interval,
        config.studio.poll_max_failures
    );

    let api = HttpStudioApi::new(&config).context("building HTTP client")?;
    let state = AppState::new(Arc::new(api), config.studio.clone());

    let app = routes::router(state).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!(%addr, "Starting server");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await
        .context("serving")?;
    Ok(())
}
