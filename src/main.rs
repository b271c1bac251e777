use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;

use querynest_backend::core::config::{AppPaths, ConfigService};
use querynest_backend::core::logging;
use querynest_backend::server;
use querynest_backend::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let paths = Arc::new(AppPaths::new());
    let config = ConfigService::new(paths.clone());
    let settings = config
        .load_settings()
        .context("Failed to load configuration")?;

    logging::init(&paths, &settings.logging);

    let bind_addr = format!("{}:{}", settings.server.host, settings.server.port);
    let state = AppState::initialize(paths, config, settings).await?;

    let documents = state.documents.clone();
    tokio::spawn(async move {
        if let Err(err) = documents.ensure_index().await {
            tracing::warn!("Failed to ensure search index: {}", err);
        }
    });

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    let addr = listener.local_addr()?;
    tracing::info!("Listening on {}", addr);

    let app: Router = server::router::router(state);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
