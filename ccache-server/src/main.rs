//! CrystalCache server binary: wires config, logging, the cache core, and
//! the background tasks, then serves RESP2 until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ccache_common::{CoreConfig, ServerConfig};
use ccache_core::Db;
use ccache_server::{serve, AllowAll, Metrics, ServerState};

fn env_duration(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut core_config = CoreConfig::default();
    core_config.sweep_interval = env_duration("CCACHE_SWEEP_MS", core_config.sweep_interval);
    core_config.defrag_interval = env_duration("CCACHE_DEFRAG_MS", core_config.defrag_interval);
    if let Ok(limit) = std::env::var("CCACHE_MAX_MEMORY") {
        core_config.max_memory = limit.parse().ok();
    }

    let mut server_config = ServerConfig::default();
    if let Ok(addr) = std::env::var("CCACHE_ADDR") {
        server_config.addr = addr;
    }

    let db = Arc::new(Db::with_config(core_config.clone()));
    let _sweeper = db.start_sweeper(core_config.sweep_interval);
    let _defrag = db.start_defrag(core_config.defrag_interval);
    let _monitor = db.start_memory_monitor(core_config.sweep_interval);
    info!("background tasks started");

    let state = Arc::new(ServerState::new(
        db,
        Arc::new(Metrics::new()),
        Arc::new(AllowAll),
        server_config,
    ));
    serve(state).await?;
    Ok(())
}
