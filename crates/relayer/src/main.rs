use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod assembler;
mod config;
mod error;
mod gasless;
mod keys;
mod server;

use config::RelayerConfig;
use server::RelayerState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mystify_relayer=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Mystify Relayer");

    dotenvy::dotenv().ok();
    let config = RelayerConfig::from_env()?;

    info!("RPC endpoint: {}", config.rpc_url);
    info!("Compression RPC endpoint: {}", config.compression_rpc_url);
    info!("Listening on: {}:{}", config.host, config.port);

    match keys::load_fee_payer(config.fee_payer_secret.as_deref()) {
        Ok(_) => info!("Fee payer configured"),
        Err(e) => warn!("{}; withdrawals will fail until PROXY_WALLET_PRIVATE_KEY is set", e),
    }
    if !config.extra_allowed_programs.is_empty() {
        info!(
            "Extra allowed programs: {:?}",
            config.extra_allowed_programs
        );
    }
    if config.gasless_enabled {
        warn!(
            "GASLESS_WITHDRAW_ENABLED is set: /withdraw/gasless receives note private keys. \
             Only run this on infrastructure users already trust with their notes."
        );
    }

    let state = Arc::new(RelayerState::new(config)?);
    server::run(state).await?;
    Ok(())
}
