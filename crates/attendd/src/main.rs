use anyhow::{Context, Result};
use attend_core::EuclideanMatcher;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod http;
mod store;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("attendd starting");

    let config = config::Config::from_env();
    tracing::info!(
        bind = %config.bind_addr,
        db = %config.db_path.display(),
        tolerance = config.tolerance.value(),
        embedding_dim = config.embedding_dim,
        "configuration loaded"
    );

    let store = store::FaceStore::open(&config.db_path, config.byte_order)
        .await
        .with_context(|| format!("opening face database {}", config.db_path.display()))?;

    let matcher = EuclideanMatcher::new(config.tolerance).with_policy(config.mismatch_policy);
    let engine = Arc::new(
        engine::Engine::load(store, matcher, config.embedding_dim)
            .await
            .context("loading face gallery")?,
    );

    let app = http::router(engine, &config);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;

    tracing::info!(addr = %config.bind_addr, "attendd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
            }
        })
        .await
        .context("serving HTTP")?;

    tracing::info!("attendd shutting down");
    Ok(())
}
