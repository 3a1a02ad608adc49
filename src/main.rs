use std::sync::Arc;

use bridge_core::config::ENV_CONFIG;
use bridge_core::{bridge, ProcessEngine, ServerConfig};
use bridge_pool::{PgPool, ResourcePool};
use bridge_transport::BridgeServer;

/// Usage: `effect-bridge [config.toml]`. The path may also come from
/// `BRIDGE_CONFIG`; without either, defaults are used.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = match std::env::args().nth(1).or_else(|| std::env::var(ENV_CONFIG).ok()) {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    }
    .apply_env(|key| std::env::var(key).ok())?;

    let pool: Arc<dyn ResourcePool> = Arc::new(PgPool::new(&config.database.pool_config())?);
    let (effect_side, engine_side) = bridge::channel(config.bridge_capacity);
    let engine = ProcessEngine::spawn(&config.engine.command, &config.engine_flags(), engine_side).await?;
    let server = BridgeServer::bind(config, pool).await?;

    tokio::select! {
        served = server.serve(effect_side) => served?,
        status = engine.wait() => {
            let status = status?;
            return Err(format!("decision engine exited: {status}").into());
        }
        _ = tokio::signal::ctrl_c() => tracing::info!("effect-bridge: shutting down"),
    }
    Ok(())
}
