use crate::{BlockProcessor, BlockSource, CollectorConfig, Poller};
use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Coordinates the poller lifecycle and handles OS signals for graceful shutdowns.
pub struct Runner<C: BlockSource + 'static, P: BlockProcessor> {
    poller: Poller<C, P>,
    shutdown: CancellationToken,
    started: bool,
}

impl<C: BlockSource + 'static, P: BlockProcessor> Runner<C, P> {
    /// Creates a new runner and wires a root [`CancellationToken`] that propagates
    /// through the poll loop and the metrics reporter.
    pub fn new(config: CollectorConfig, source: Arc<C>, processor: P) -> Self {
        let shutdown = CancellationToken::new();
        let poller = Poller::with_cancellation_token(config, source, processor, shutdown.clone());
        Self {
            poller,
            shutdown,
            started: false,
        }
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Returns a reference to the underlying poller.
    pub fn poller(&self) -> &Poller<C, P> {
        &self.poller
    }

    /// Starts the underlying poll loop.
    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }

        self.poller.start().await?;
        self.started = true;
        Ok(())
    }

    /// Stops the poll loop gracefully by cancelling the root token and delegating
    /// to the poller.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }

        self.shutdown.cancel();
        self.poller.stop().await?;
        self.started = false;
        self.reinitialize_shutdown_token();
        Ok(())
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the shutdown token is cancelled elsewhere.
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        self.start().await?;
        tracing::info!("runner started; waiting for Ctrl-C (SIGINT) to initiate shutdown");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down runner");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("runner shutdown token cancelled");
            }
        }

        self.shutdown.cancel();
        self.poller.stop().await?;
        self.started = false;
        self.reinitialize_shutdown_token();
        Ok(())
    }

    fn reinitialize_shutdown_token(&mut self) {
        self.shutdown = CancellationToken::new();
        self.poller.replace_shutdown_root(self.shutdown.clone());
    }
}
