//! Commit-status delivery for submitted transactions.
//!
//! A submission yields the finite sequence `submitted` followed by exactly one
//! terminal status and a closing `complete`. The publisher half makes that
//! ordering impossible to violate: `submitted` is queued when the channel is
//! created, and delivering a terminal status consumes the publisher.

use anyhow::{bail, Result};
use tokio::sync::mpsc;

/// Terminal outcome of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalStatus {
    Committed,
    ValidationFailed(String),
    Error(String),
}

/// One event observed on a status subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Submitted,
    Terminal(TerminalStatus),
    Complete,
}

/// Creates a linked publisher/subscription pair with `Submitted` already queued.
pub fn channel() -> (StatusPublisher, StatusSubscription) {
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = tx.send(StatusEvent::Submitted);
    (StatusPublisher { tx: Some(tx) }, StatusSubscription { rx })
}

/// Write half held by whichever task tracks the transaction on the ledger.
pub struct StatusPublisher {
    tx: Option<mpsc::UnboundedSender<StatusEvent>>,
}

impl StatusPublisher {
    /// Delivers the terminal status followed by `Complete`, closing the stream.
    pub fn finish(mut self, status: TerminalStatus) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(StatusEvent::Terminal(status));
            let _ = tx.send(StatusEvent::Complete);
        }
    }
}

impl Drop for StatusPublisher {
    fn drop(&mut self) {
        // An abandoned publisher still owes the subscriber a terminal status.
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(StatusEvent::Terminal(TerminalStatus::Error(
                "status publisher dropped before a terminal status".to_owned(),
            )));
            let _ = tx.send(StatusEvent::Complete);
        }
    }
}

/// Read half returned to the transaction submitter.
pub struct StatusSubscription {
    rx: mpsc::UnboundedReceiver<StatusEvent>,
}

impl StatusSubscription {
    /// Next event in the sequence, or `None` once the stream is exhausted.
    pub async fn next(&mut self) -> Option<StatusEvent> {
        self.rx.recv().await
    }

    /// Waits until the terminal status arrives, skipping `Submitted`.
    pub async fn wait_terminal(&mut self) -> Result<TerminalStatus> {
        loop {
            match self.next().await {
                Some(StatusEvent::Submitted) => continue,
                Some(StatusEvent::Terminal(status)) => return Ok(status),
                Some(StatusEvent::Complete) => {
                    bail!("status stream completed without a terminal status")
                }
                None => bail!("status stream ended before a terminal status"),
            }
        }
    }
}
