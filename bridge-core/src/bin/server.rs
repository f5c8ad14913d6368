//! Bridge node binary

use bridge_core::{
    bridge::bridge_account, spawn_bridge_actor, BlockEnv, Bridge, Config, MemoryRail, Metrics,
    Storage,
};
use std::error::Error;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        data_dir = %config.data_dir.display(),
        "Starting bridge node"
    );

    // Open storage and restore or create the bridge
    let storage = Arc::new(Storage::open(&config)?);
    let bridge: Bridge<MemoryRail> = storage.open_bridge(&config, || {
        Bridge::genesis(&config, MemoryRail::new(), BlockEnv::new(0, chrono::Utc::now()))
    })?;
    tracing::info!(
        block = bridge.env().number,
        events = bridge.events().len(),
        account = %bridge_account(),
        "Bridge opened"
    );

    let metrics = Metrics::new()?;
    let listener = tokio::net::TcpListener::bind(&config.metrics_listen_addr).await?;
    let app = bridge_core::metrics::router(metrics.clone());
    tracing::info!(addr = %config.metrics_listen_addr, "GET /metrics - Prometheus metrics");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server stopped: {}", e);
        }
    });

    let (handle, actor_task) = spawn_bridge_actor(
        bridge,
        storage.clone(),
        metrics,
        config.actor.mailbox_capacity,
    );

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down bridge node");
    handle.shutdown().await?;
    actor_task.await?;

    let stats = storage.get_stats()?;
    tracing::info!(
        events = stats.total_events,
        outbound = stats.total_outbound,
        "Bridge node stopped"
    );
    Ok(())
}
