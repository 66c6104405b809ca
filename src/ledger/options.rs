//! Configurable knobs for the ledger client along with validation helpers so
//! callers can reason about timeouts, concurrency, and retry/backoff limits.

use anyhow::{bail, Result};
use std::time::Duration;

const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 64;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_ATTEMPTS: usize = 5;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 200;
const DEFAULT_MAX_BACKOFF_MS: u64 = 2_000;
const DEFAULT_STATUS_POLL_INTERVAL_MS: u64 = 200;
const DEFAULT_MAX_STATUS_POLLS: usize = 600;

#[derive(Debug, Clone)]
pub struct LedgerClientOptions {
    pub request_timeout: Duration,
    pub max_concurrent_requests: usize,
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Delay between commit-status lookups after a submission.
    pub status_poll_interval: Duration,
    /// Upper bound on commit-status lookups before the stream reports an error.
    pub max_status_polls: usize,
}

impl Default for LedgerClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            status_poll_interval: Duration::from_millis(DEFAULT_STATUS_POLL_INTERVAL_MS),
            max_status_polls: DEFAULT_MAX_STATUS_POLLS,
        }
    }
}

impl LedgerClientOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }
        if self.max_concurrent_requests == 0 {
            bail!("max_concurrent_requests must be greater than 0");
        }
        if self.max_attempts == 0 {
            bail!("max_attempts must be greater than 0");
        }
        if self.initial_backoff.is_zero() {
            bail!("initial_backoff must be greater than 0");
        }
        if self.status_poll_interval.is_zero() {
            bail!("status_poll_interval must be greater than 0");
        }
        if self.max_status_polls == 0 {
            bail!("max_status_polls must be greater than 0");
        }
        Ok(())
    }
}
