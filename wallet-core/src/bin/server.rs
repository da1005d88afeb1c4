//! Wallet ledger server binary

use std::sync::Arc;
use wallet_core::{Config, Engine, Storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("starting wallet ledger server");

    // Load configuration
    let config = Config::from_env()?;

    // Open storage and build the engine
    let storage = Arc::new(Storage::open(&config)?);
    let _engine = Engine::new(storage);
    tracing::info!("ledger engine ready");

    // TODO: mount the request/session layer here once the transport lands
    tokio::signal::ctrl_c().await?;

    tracing::info!("shutting down wallet ledger server");
    Ok(())
}
