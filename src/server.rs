use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::{router, AppState};
use crate::config::AppConfig;
use crate::seed::seed_all;
use crate::store;

/// Build the application state against the configured store.
pub async fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    config.validate().context("invalid configuration")?;
    let config = Arc::new(config);

    let store = store::connect(&config)
        .await
        .context("failed to connect to the object store")?;
    let state = AppState::new(config, store).context("invalid class schema")?;

    tokio::fs::create_dir_all(&state.config.files.directory)
        .await
        .with_context(|| format!("cannot create {}", state.config.files.directory.display()))?;
    Ok(state)
}

/// Seed, bind and serve until Ctrl-C.
pub async fn serve(config: AppConfig, seed: bool) -> anyhow::Result<()> {
    info!("Starting {} in {:?} mode", config.app.app_name, config.environment);
    let state = build_state(config).await?;

    if seed {
        seed_all(&state).await.context("seeding failed")?;
    } else {
        warn!("Seeding skipped");
    }

    let port = state.config.server.port;
    let mount = state.config.server.mount_path.clone();
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    info!(
        "{} functions registered, listening on http://{}{}",
        state.functions.len(),
        bind_addr,
        mount
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
