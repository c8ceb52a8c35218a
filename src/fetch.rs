// src/fetch.rs
//! Fetch orchestration: hard timeout, bounded retries, and health bookkeeping.
//!
//! Retry delay grows linearly with the attempt number (`retry_delay × attempt`), no jitter.

use metrics::{counter, histogram};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info};

use crate::error::FetchError;
use crate::health::HealthRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retries: 2,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Outcome of one health-aware fetch.
#[derive(Debug)]
pub enum FetchOutcome<T> {
    Fetched { data: T, response_time_ms: u64 },
    Failed { error: FetchError },
}

impl<T> FetchOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Fetched { .. })
    }

    pub fn into_result(self) -> Result<T, FetchError> {
        match self {
            FetchOutcome::Fetched { data, .. } => Ok(data),
            FetchOutcome::Failed { error } => Err(error),
        }
    }
}

/// Run a future under a hard timeout; elapsed time maps to `FetchError::Timeout`.
pub async fn with_timeout<T, Fut>(fut: Fut, limit: Duration) -> Result<T, FetchError>
where
    Fut: Future<Output = anyhow::Result<T>>,
{
    match timeout(limit, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(FetchError::Source(e)),
        Err(_) => Err(FetchError::Timeout(limit)),
    }
}

/// Call `fetch_fn` up to `retries + 1` times. Returns the last error when all attempts fail.
pub async fn with_retry<T, F, Fut>(
    source_id: &str,
    mut fetch_fn: F,
    opts: &FetchOptions,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let attempts = opts.retries.saturating_add(1);
    let mut attempt = 1u32;
    loop {
        match with_timeout(fetch_fn(), opts.timeout).await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < attempts => {
                let delay = opts.retry_delay * attempt;
                info!(
                    source_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "fetch failed; retrying"
                );
                counter!("fetch_retries_total").increment(1);
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Fetch from one source with circuit breaking, timeout and retries.
///
/// A skipped source never invokes `fetch_fn` and does not touch its health record.
pub async fn fetch_with_health<T, F, Fut>(
    registry: &HealthRegistry,
    source_id: &str,
    fetch_fn: F,
    opts: &FetchOptions,
) -> FetchOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    if registry.should_skip(source_id) {
        debug!(source_id, "source in cooldown; skipping fetch");
        counter!("fetch_skipped_total").increment(1);
        return FetchOutcome::Failed {
            error: FetchError::Skipped {
                source_id: source_id.to_string(),
            },
        };
    }

    let started = Instant::now();
    match with_retry(source_id, fetch_fn, opts).await {
        Ok(data) => {
            let response_time_ms = started.elapsed().as_millis() as u64;
            registry.record_success(source_id, response_time_ms);
            histogram!("fetch_duration_ms").record(response_time_ms as f64);
            FetchOutcome::Fetched {
                data,
                response_time_ms,
            }
        }
        Err(error) => {
            registry.record_failure(source_id, &error.to_string());
            counter!("fetch_failures_total").increment(1);
            FetchOutcome::Failed { error }
        }
    }
}
