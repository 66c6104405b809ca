use anyhow::{Context, Result};
use ledgertap::{init_tracing, AsyncLedgerClient, CollectorConfig, Runner, TransferReporter};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = CollectorConfig::from_env().context("invalid collector configuration")?;
    let client =
        Arc::new(AsyncLedgerClient::from_config(&config).context("failed to build ledger client")?);

    let mut runner = Runner::new(config, client, TransferReporter::new());
    runner.run_until_ctrl_c().await
}
