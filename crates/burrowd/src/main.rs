//! burrowd: rendezvous server for UDP hole punching.

use anyhow::{Context, Result};

use burrow_core::BurrowConfig;
use burrowd::rendezvous::{resolve, RendezvousServer};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = BurrowConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = BurrowConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        BurrowConfig::default()
    });

    // An explicit bind address on the command line wins over config.
    let bind = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config.server.bind.clone());
    tracing::info!(bind, "burrowd starting");

    let server = RendezvousServer::bind(&bind, config.timing.clone())
        .await
        .context("failed to start rendezvous server")?;

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let tasks = server.spawn(&shutdown_tx);

    let api_bind = resolve(&config.server.api_bind)
        .await
        .context("failed to resolve API address")?;
    let api_task = {
        let state = burrow_api::ApiState::new(
            server.directory(),
            config.server.api_max_connections,
        );
        tokio::spawn(async move {
            if let Err(e) = burrow_api::serve(state, api_bind).await {
                tracing::error!(error = %e, "API server failed");
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = tasks.receive      => tracing::error!("receive loop exited: {:?}", r),
        r = tasks.pong         => tracing::error!("pong loop exited: {:?}", r),
        r = tasks.expiry       => tracing::error!("expiry loop exited: {:?}", r),
        r = api_task           => tracing::error!("API task exited: {:?}", r),
    }

    Ok(())
}
