//! Ledger client implementation and the `BlockSource` abstraction consumed by
//! the poller. Houses the `AsyncLedgerClient`, its typed fetch errors, and the
//! commit-status tracking spawned after a submission.

use crate::ledger::backoff::{self, Backoff, RetryDisposition};
use crate::ledger::options::LedgerClientOptions;
use crate::ledger::status::{self, StatusPublisher, StatusSubscription, TerminalStatus};
use crate::ledger::types::{AccountAsset, Block, SignedQuery, SignedTransaction};
use crate::runtime::config::CollectorConfig;
use anyhow::{anyhow, Context, Result};
use futures::future::BoxFuture;
use jsonrpsee::core::client::{ClientT, Error as JsonRpcError};
use jsonrpsee::core::traits::ToRpcParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, timeout};

/// JSON-RPC error code the ledger returns for a height above its current tip.
const HEIGHT_OUT_OF_RANGE_CODE: i32 = -8;

#[derive(Debug)]
pub enum FetchError {
    Timeout { method: &'static str },
    HeightOutOfRange { height: u64 },
    Malformed { method: &'static str },
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Timeout { method } => write!(f, "ledger method {method} timed out"),
            FetchError::HeightOutOfRange { height } => {
                write!(f, "requested height {height} is above the current tip")
            }
            FetchError::Malformed { method } => {
                write!(f, "ledger {method} response could not be parsed")
            }
        }
    }
}

impl std::error::Error for FetchError {}

/// Read-side contract the poller depends on.
pub trait BlockSource: Send + Sync {
    fn latest_height(&self) -> BoxFuture<'_, Result<u64>>;

    fn get_block(&self, height: u64) -> BoxFuture<'_, Result<Block>>;
}

#[derive(Debug, Clone)]
pub struct AsyncLedgerClient {
    url: Arc<String>,
    client: HttpClient,
    options: LedgerClientOptions,
}

impl BlockSource for AsyncLedgerClient {
    fn latest_height(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(self.latest_height())
    }

    fn get_block(&self, height: u64) -> BoxFuture<'_, Result<Block>> {
        Box::pin(self.get_block(height))
    }
}

impl AsyncLedgerClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_options(url, LedgerClientOptions::default())
    }

    pub fn with_options(url: impl Into<String>, options: LedgerClientOptions) -> Result<Self> {
        options.validate()?;

        let url = url.into();
        let client = HttpClientBuilder::default()
            .request_timeout(options.request_timeout)
            .max_concurrent_requests(options.max_concurrent_requests)
            .build(&url)
            .map_err(|err| anyhow!("failed to build ledger client: {err}"))?;

        Ok(Self {
            url: Arc::new(url),
            client,
            options,
        })
    }

    pub fn from_config(config: &CollectorConfig) -> Result<Self> {
        config.validate()?;
        let options = LedgerClientOptions {
            request_timeout: config.request_timeout(),
            ..LedgerClientOptions::default()
        };
        Self::with_options(config.ledger_url().to_owned(), options)
    }

    pub fn endpoint(&self) -> &str {
        &self.url
    }

    /// Height of the most recently committed block.
    pub async fn latest_height(&self) -> Result<u64> {
        self.retry_call("latest_height", || async move {
            self.call_once("latest_height", rpc_params![]).await
        })
        .await
    }

    /// Fetches one committed block. A height above the tip surfaces as
    /// [`FetchError::HeightOutOfRange`] and is not retried.
    pub async fn get_block(&self, height: u64) -> Result<Block> {
        self.retry_call("get_block", || async move {
            self.call_once("get_block", rpc_params![height])
                .await
                .map_err(|err| map_height_error(height, err))
        })
        .await
    }

    /// Submits a signed transaction and returns a subscription over its commit
    /// status. The submission itself is attempted once (resubmission is not
    /// idempotent); status lookups behind the subscription are retried.
    pub async fn submit_transaction(&self, tx: &SignedTransaction) -> Result<StatusSubscription> {
        let local_hash = tx
            .hash()
            .context("failed to hash transaction for submission")?;
        let accepted: String = self
            .call_once("submit_transaction", rpc_params![tx])
            .await
            .context("transaction submission failed")?;
        if !accepted.eq_ignore_ascii_case(&local_hash) {
            tracing::warn!(
                local = %local_hash,
                remote = %accepted,
                "ledger acknowledged a different transaction hash"
            );
        }

        let (publisher, subscription) = status::channel();
        let client = self.clone();
        tokio::spawn(client.drive_status(accepted, publisher));
        Ok(subscription)
    }

    /// Runs a signed account-assets query.
    pub async fn account_assets(&self, query: &SignedQuery) -> Result<Vec<AccountAsset>> {
        self.retry_call("account_assets", || async move {
            self.call_once("account_assets", rpc_params![query]).await
        })
        .await
    }

    async fn drive_status(self, tx_hash: String, publisher: StatusPublisher) {
        let mut polls = 0usize;
        let mut consecutive_failures = 0usize;

        loop {
            polls += 1;
            match self
                .call_once::<TxStatusWire, _>("transaction_status", rpc_params![&tx_hash])
                .await
            {
                Ok(wire) => {
                    consecutive_failures = 0;
                    if let Some(terminal) = wire.into_terminal() {
                        publisher.finish(terminal);
                        return;
                    }
                }
                Err(err) => {
                    consecutive_failures += 1;
                    if consecutive_failures >= self.options.max_attempts {
                        publisher.finish(TerminalStatus::Error(format!(
                            "commit status lookup failed: {err}"
                        )));
                        return;
                    }
                    tracing::warn!(
                        tx = %tx_hash,
                        error = %err,
                        "commit status lookup failed; retrying"
                    );
                }
            }

            if polls >= self.options.max_status_polls {
                publisher.finish(TerminalStatus::Error(format!(
                    "no terminal status after {polls} lookups"
                )));
                return;
            }
            sleep(self.options.status_poll_interval).await;
        }
    }

    async fn retry_call<T, F, Fut>(&self, method: &'static str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        backoff::retry(
            method,
            Backoff {
                initial_delay: self.options.initial_backoff,
                max_delay: self.options.max_backoff,
                max_attempts: self.options.max_attempts,
            },
            None,
            operation,
            |err| match err.downcast_ref::<FetchError>() {
                Some(FetchError::HeightOutOfRange { .. }) | Some(FetchError::Malformed { .. }) => {
                    RetryDisposition::Abort
                }
                _ => RetryDisposition::Retry,
            },
        )
        .await
    }

    async fn call_once<R, P>(&self, method: &'static str, params: P) -> Result<R>
    where
        R: DeserializeOwned,
        P: ToRpcParams + Send,
    {
        let response = timeout(
            self.options.request_timeout,
            self.client.request(method, params),
        )
        .await
        .map_err(|_| FetchError::Timeout { method })?;

        response.map_err(|err| map_rpc_error(method, err))
    }
}

#[derive(Debug, Deserialize)]
struct TxStatusWire {
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

impl TxStatusWire {
    fn into_terminal(self) -> Option<TerminalStatus> {
        match self.status.as_str() {
            "committed" => Some(TerminalStatus::Committed),
            "rejected" => Some(TerminalStatus::ValidationFailed(
                self.reason
                    .unwrap_or_else(|| "rejected by stateful validation".to_owned()),
            )),
            "pending" => None,
            other => Some(TerminalStatus::Error(format!(
                "unrecognized commit status {other:?}"
            ))),
        }
    }
}

fn map_rpc_error(method: &'static str, err: JsonRpcError) -> anyhow::Error {
    match err {
        JsonRpcError::ParseError(_) => FetchError::Malformed { method }.into(),
        JsonRpcError::RequestTimeout => FetchError::Timeout { method }.into(),
        other => anyhow::Error::new(other).context(format!("ledger {method} call failed")),
    }
}

fn map_height_error(height: u64, err: anyhow::Error) -> anyhow::Error {
    if let Some(JsonRpcError::Call(call_err)) = err.downcast_ref::<JsonRpcError>() {
        if call_err.code() == HEIGHT_OUT_OF_RANGE_CODE {
            return FetchError::HeightOutOfRange { height }.into();
        }
    }
    err
}
