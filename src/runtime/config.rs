use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

const DEFAULT_INITIAL_DELAY_SECS: u64 = 5;
const DEFAULT_START_HEIGHT: u64 = 1;
const DEFAULT_MAX_BLOCKS_PER_CYCLE: usize = 100;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Runtime configuration for the block collector.
///
/// All instances must be constructed via [`CollectorConfig::builder`] or
/// [`CollectorConfig::new`] so invariants are validated before any consumer
/// observes the values; in particular, no tick is ever scheduled from an
/// invalid interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    ledger_url: String,
    poll_interval: Duration,
    initial_delay: Duration,
    start_height: u64,
    max_blocks_per_cycle: usize,
    request_timeout: Duration,
    metrics_interval: Duration,
}

pub struct CollectorConfigParams {
    pub ledger_url: String,
    pub poll_interval: Duration,
    pub initial_delay: Duration,
    pub start_height: u64,
    pub max_blocks_per_cycle: usize,
    pub request_timeout: Duration,
    pub metrics_interval: Duration,
}

impl CollectorConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> CollectorConfigBuilder {
        CollectorConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    ///
    /// Prefer [`CollectorConfig::builder`] for ergonomics when many values use defaults.
    pub fn new(params: CollectorConfigParams) -> Result<Self> {
        let CollectorConfigParams {
            ledger_url,
            poll_interval,
            initial_delay,
            start_height,
            max_blocks_per_cycle,
            request_timeout,
            metrics_interval,
        } = params;

        let config = Self {
            ledger_url: ledger_url.trim().to_owned(),
            poll_interval,
            initial_delay,
            start_height,
            max_blocks_per_cycle,
            request_timeout,
            metrics_interval,
        };

        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from `LEDGERTAP_*` environment variables.
    ///
    /// `LEDGERTAP_URL` and `LEDGERTAP_POLL_INTERVAL_MS` are required; the
    /// remaining knobs fall back to their defaults.
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::builder()
            .ledger_url(require_env("LEDGERTAP_URL")?)
            .poll_interval(Duration::from_millis(
                require_env("LEDGERTAP_POLL_INTERVAL_MS")?
                    .parse()
                    .context("LEDGERTAP_POLL_INTERVAL_MS must be an integer")?,
            ));

        if let Some(millis) = optional_env_u64("LEDGERTAP_INITIAL_DELAY_MS")? {
            builder = builder.initial_delay(Duration::from_millis(millis));
        }
        if let Some(height) = optional_env_u64("LEDGERTAP_START_HEIGHT")? {
            builder = builder.start_height(height);
        }
        if let Some(cap) = optional_env_u64("LEDGERTAP_MAX_BLOCKS_PER_CYCLE")? {
            builder = builder.max_blocks_per_cycle(cap as usize);
        }
        if let Some(secs) = optional_env_u64("LEDGERTAP_REQUEST_TIMEOUT_SECS")? {
            builder = builder.request_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = optional_env_u64("LEDGERTAP_METRICS_INTERVAL_SECS")? {
            builder = builder.metrics_interval(Duration::from_secs(secs));
        }

        builder.build()
    }

    /// Full ledger URL (including scheme) the collector polls.
    pub fn ledger_url(&self) -> &str {
        &self.ledger_url
    }

    /// Delay between the end of one poll cycle and the start of the next.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Delay before the first poll cycle after start.
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// First block height requested when the collector boots.
    pub fn start_height(&self) -> u64 {
        self.start_height
    }

    /// Upper bound on blocks processed within a single poll cycle.
    pub fn max_blocks_per_cycle(&self) -> usize {
        self.max_blocks_per_cycle
    }

    /// Per-request timeout applied to the ledger client.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        let url = self.ledger_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("ledger_url must start with http:// or https://");
        }

        if self.poll_interval.is_zero() {
            bail!("poll_interval must be greater than 0");
        }

        if self.start_height == 0 {
            bail!("start_height must be greater than 0 (heights start at the genesis block)");
        }

        if self.max_blocks_per_cycle == 0 {
            bail!("max_blocks_per_cycle must be greater than 0");
        }

        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct CollectorConfigBuilder {
    ledger_url: Option<String>,
    poll_interval: Option<Duration>,
    initial_delay: Option<Duration>,
    start_height: Option<u64>,
    max_blocks_per_cycle: Option<usize>,
    request_timeout: Option<Duration>,
    metrics_interval: Option<Duration>,
}

impl CollectorConfigBuilder {
    pub fn ledger_url(mut self, url: impl Into<String>) -> Self {
        self.ledger_url = Some(url.into());
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    pub fn start_height(mut self, height: u64) -> Self {
        self.start_height = Some(height);
        self
    }

    pub fn max_blocks_per_cycle(mut self, cap: usize) -> Self {
        self.max_blocks_per_cycle = Some(cap);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<CollectorConfig> {
        let params = CollectorConfigParams {
            ledger_url: self.ledger_url.context("ledger_url is required")?,
            poll_interval: self.poll_interval.context("poll_interval is required")?,
            initial_delay: self
                .initial_delay
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_INITIAL_DELAY_SECS)),
            start_height: self.start_height.unwrap_or(DEFAULT_START_HEIGHT),
            max_blocks_per_cycle: self
                .max_blocks_per_cycle
                .unwrap_or(DEFAULT_MAX_BLOCKS_PER_CYCLE),
            request_timeout: self
                .request_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
        };

        CollectorConfig::new(params)
    }
}

fn require_env(name: &'static str) -> Result<String> {
    env::var(name).with_context(|| format!("{name} is not set"))
}

fn optional_env_u64(name: &'static str) -> Result<Option<u64>> {
    match env::var(name) {
        Ok(value) => {
            let parsed = value
                .trim()
                .parse()
                .with_context(|| format!("{name} must be an integer"))?;
            Ok(Some(parsed))
        }
        Err(_) => Ok(None),
    }
}
