//! Fixed-cadence polling of the ledger for newly committed blocks.
//!
//! The poll loop owns the cadence: each cycle fetches the ledger tip, walks
//! the unprocessed heights in order (bounded per cycle), and hands each block
//! to the processor. The interval is measured from the end of one cycle to
//! the start of the next, and a failing cycle never cancels future cycles.

use crate::collector::processor::BlockProcessor;
use crate::collector::progress::ProgressTracker;
use crate::ledger::client::{BlockSource, FetchError};
use crate::runtime::config::CollectorConfig;
use crate::runtime::telemetry::{self, Telemetry};
use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Outcome of one poll cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleSummary {
    pub blocks_processed: u64,
    /// Ledger tip observed this cycle, `None` when the tip fetch failed.
    pub tip: Option<u64>,
}

struct CycleHandles<C, P> {
    source: Arc<C>,
    processor: Arc<RwLock<P>>,
    progress: Arc<ProgressTracker>,
    telemetry: Arc<Telemetry>,
    max_blocks_per_cycle: u64,
}

impl<C, P> Clone for CycleHandles<C, P> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            processor: Arc::clone(&self.processor),
            progress: Arc::clone(&self.progress),
            telemetry: Arc::clone(&self.telemetry),
            max_blocks_per_cycle: self.max_blocks_per_cycle,
        }
    }
}

pub struct Poller<C: BlockSource + 'static, P: BlockProcessor> {
    config: CollectorConfig,
    handles: CycleHandles<C, P>,
    shutdown_root: CancellationToken,
    run_token: Option<CancellationToken>,
    loop_handle: Option<JoinHandle<()>>,
    metrics_handle: Option<JoinHandle<()>>,
    running: bool,
}

impl<C: BlockSource + 'static, P: BlockProcessor> Poller<C, P> {
    /// Creates a new poller with the given configuration, block source, and processor.
    ///
    /// The poller creates its own root cancellation token. Use
    /// [`Self::with_cancellation_token`] to integrate with an existing shutdown mechanism.
    pub fn new(config: CollectorConfig, source: Arc<C>, processor: P) -> Self {
        Self::with_cancellation_token(config, source, processor, CancellationToken::new())
    }

    pub fn with_cancellation_token(
        config: CollectorConfig,
        source: Arc<C>,
        processor: P,
        shutdown_token: CancellationToken,
    ) -> Self {
        let handles = CycleHandles {
            source,
            processor: Arc::new(RwLock::new(processor)),
            progress: Arc::new(ProgressTracker::new(config.start_height())),
            telemetry: Arc::new(Telemetry::default()),
            max_blocks_per_cycle: config.max_blocks_per_cycle() as u64,
        };
        Self {
            config,
            handles,
            shutdown_root: shutdown_token,
            run_token: None,
            loop_handle: None,
            metrics_handle: None,
            running: false,
        }
    }

    /// Returns a reference to the poller's configuration.
    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Returns a reference to the processor instance wrapped in an `RwLock`.
    pub fn processor(&self) -> &Arc<RwLock<P>> {
        &self.handles.processor
    }

    /// Returns a clone of the telemetry handle for observability.
    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.handles.telemetry.clone()
    }

    /// Returns the last height confirmed processed, or `None` if no blocks
    /// have been processed yet.
    pub fn last_processed_height(&self) -> Option<u64> {
        self.handles.progress.last_processed()
    }

    /// Replaces the root shutdown token used to derive per-run tokens.
    /// Must only be called while the poller is idle (between `stop` and `start`).
    pub fn replace_shutdown_root(&mut self, shutdown: CancellationToken) {
        debug_assert!(
            !self.running,
            "shutdown token should not change while the poller is running"
        );
        self.shutdown_root = shutdown;
    }

    /// Starts the poll loop from the configured start height.
    pub async fn start(&mut self) -> Result<()> {
        self.start_from(self.config.start_height()).await
    }

    /// Starts the poll loop from the specified height.
    ///
    /// Returns an error if the poller is already running.
    pub async fn start_from(&mut self, start_height: u64) -> Result<()> {
        if self.running {
            bail!("poller already running");
        }

        debug_assert!(
            self.config.validate().is_ok(),
            "CollectorConfig should have been validated at construction time"
        );

        tracing::info!(
            start_height,
            interval_ms = self.config.poll_interval().as_millis() as u64,
            "starting block poller"
        );

        self.handles.progress.reset(start_height);

        let run_token = self.shutdown_root.child_token();
        self.metrics_handle = Some(telemetry::spawn_metrics_reporter(
            self.handles.telemetry.clone(),
            self.handles.progress.clone(),
            run_token.clone(),
            self.config.metrics_interval(),
        ));
        self.loop_handle = Some(Self::spawn_poll_loop(
            self.handles.clone(),
            run_token.clone(),
            self.config.initial_delay(),
            self.config.poll_interval(),
        ));
        self.run_token = Some(run_token);
        self.running = true;

        Ok(())
    }

    /// Stops the poll loop gracefully and joins its background tasks.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }

        tracing::info!("stopping block poller");

        if let Some(token) = self.run_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.loop_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "poll loop task terminated unexpectedly");
            }
        }
        if let Some(handle) = self.metrics_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "metrics reporter task panicked");
            }
        }

        self.running = false;
        Ok(())
    }

    /// Runs exactly one poll cycle on the caller's task.
    ///
    /// This is the deterministic entry point: tests (and operators) can
    /// trigger ticks explicitly instead of waiting on the scheduled loop.
    pub async fn poll_once(&self) -> CycleSummary {
        Self::run_cycle(&self.handles, &self.shutdown_root).await
    }

    fn spawn_poll_loop(
        handles: CycleHandles<C, P>,
        run_token: CancellationToken,
        initial_delay: Duration,
        poll_interval: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            if !initial_delay.is_zero() {
                tokio::select! {
                    _ = run_token.cancelled() => {
                        tracing::debug!("poll loop cancelled before the first tick");
                        return;
                    }
                    _ = sleep(initial_delay) => {}
                }
            }

            loop {
                if run_token.is_cancelled() {
                    break;
                }

                let summary = Self::run_cycle(&handles, &run_token).await;
                tracing::debug!(
                    processed = summary.blocks_processed,
                    tip = ?summary.tip,
                    "poll cycle finished"
                );

                // The interval counts from the end of this cycle, not from
                // its scheduled start.
                tokio::select! {
                    _ = run_token.cancelled() => break,
                    _ = sleep(poll_interval) => {}
                }
            }

            tracing::info!("poll loop stopped");
        })
    }

    /// One cycle: fetch the tip, then process unprocessed heights in order.
    ///
    /// Errors never escape: a fetch failure ends the cycle and is retried at
    /// the next tick; a processing failure ends the cycle without advancing
    /// progress, so the same block is refetched and reprocessed next tick.
    async fn run_cycle(handles: &CycleHandles<C, P>, cancel: &CancellationToken) -> CycleSummary {
        handles.telemetry.record_cycle();
        let mut summary = CycleSummary::default();

        let tip = match handles.source.latest_height().await {
            Ok(tip) => tip,
            Err(err) => {
                handles.telemetry.record_fetch_error();
                tracing::warn!(error = %err, "failed to fetch ledger tip; skipping cycle");
                return summary;
            }
        };
        summary.tip = Some(tip);

        while summary.blocks_processed < handles.max_blocks_per_cycle {
            if cancel.is_cancelled() {
                break;
            }

            let next = handles.progress.next_height();
            if next > tip {
                break;
            }

            let block = match handles.source.get_block(next).await {
                Ok(block) => block,
                Err(err) => {
                    if matches!(
                        err.downcast_ref::<FetchError>(),
                        Some(FetchError::HeightOutOfRange { .. })
                    ) {
                        tracing::debug!(height = next, "ledger tip receded; ending cycle");
                    } else {
                        handles.telemetry.record_fetch_error();
                        tracing::warn!(
                            height = next,
                            error = %err,
                            "block fetch failed; retrying next tick"
                        );
                    }
                    break;
                }
            };

            if block.height != next {
                handles.telemetry.record_processing_error();
                tracing::error!(
                    requested = next,
                    received = block.height,
                    "ledger returned a block for the wrong height"
                );
                break;
            }

            let outcome = {
                let mut processor = handles.processor.write().await;
                processor.process(&block).await
            };
            match outcome {
                Ok(report) => {
                    handles.progress.mark_processed(next);
                    handles.telemetry.record_processed_block();
                    summary.blocks_processed += 1;
                    tracing::debug!(
                        height = next,
                        transfers = report.transfers.len(),
                        "block processed"
                    );
                }
                Err(err) => {
                    handles.telemetry.record_processing_error();
                    tracing::error!(
                        height = next,
                        error = %err,
                        "block processing failed; will retry next tick"
                    );
                    break;
                }
            }
        }

        summary
    }
}
