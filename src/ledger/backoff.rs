use anyhow::{anyhow, Result};
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy)]
pub(crate) struct Backoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: usize,
}

pub(crate) enum RetryDisposition {
    Retry,
    Abort,
}

/// Runs `operation` until it succeeds, exhausts `max_attempts`, or the
/// classifier marks an error as non-retryable. Delays grow exponentially up to
/// `max_delay` and race the optional cancellation token.
pub(crate) async fn retry<T, F, Fut, C>(
    label: &'static str,
    policy: Backoff,
    cancellation: Option<&CancellationToken>,
    mut operation: F,
    mut classify_error: C,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    C: FnMut(&anyhow::Error) -> RetryDisposition,
{
    let mut attempt = 0;
    let mut backoff = policy.initial_delay;

    loop {
        attempt += 1;

        if let Some(token) = cancellation {
            if token.is_cancelled() {
                return Err(anyhow!("{label} retry cancelled"));
            }
        }

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(method = label, attempt, "call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => match classify_error(&err) {
                RetryDisposition::Abort => return Err(err),
                RetryDisposition::Retry => {
                    if attempt >= policy.max_attempts {
                        tracing::error!(
                            method = label,
                            attempt,
                            error = %err,
                            "call exhausted retries"
                        );
                        return Err(err);
                    }

                    tracing::warn!(
                        method = label,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "call failed; retrying"
                    );
                    sleep_with_cancellation(label, backoff, cancellation).await?;
                    backoff = next_backoff(backoff, policy.max_delay);
                }
            },
        }
    }
}

async fn sleep_with_cancellation(
    label: &'static str,
    delay: Duration,
    cancellation: Option<&CancellationToken>,
) -> Result<()> {
    if delay.is_zero() {
        yield_now().await;
        return Ok(());
    }

    if let Some(token) = cancellation {
        tokio::select! {
            _ = token.cancelled() => Err(anyhow!("{label} retry cancelled")),
            _ = sleep(delay) => Ok(()),
        }
    } else {
        sleep(delay).await;
        Ok(())
    }
}

fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }

    let mut next = current.saturating_mul(2);
    if next > max_backoff {
        next = max_backoff;
    }
    next
}
