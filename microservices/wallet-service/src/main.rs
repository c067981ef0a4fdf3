//! Wallet Ledger Service binary

use std::sync::Arc;
use tracing::info;
use wallet_service::{WalletConfig, WalletLedgerService};
use zentra_core::{MicroserviceRuntime, Result, ZentraError};

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = zentra_telemetry::init("wallet-service")
        .map_err(|e| ZentraError::Config(e.to_string()))?;

    let config = WalletConfig::from_env()?;
    info!(
        journal = ?config.journal_backend,
        maturation_interval_secs = config.maturation_interval.as_secs(),
        "Starting Wallet Ledger Service"
    );

    let service = Arc::new(WalletLedgerService::new(config).await?);
    MicroserviceRuntime::run(service).await
}
