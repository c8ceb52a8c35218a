// src/scheduler.rs
//! Periodic runs plus the in-flight guard.
//!
//! A tick that finds a run still in progress is skipped, never queued.

use metrics::counter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::pipeline::{run_pipeline, PipelineDeps, PipelineOptions, PipelineResult};
use crate::telemetry::TriggerSource;

/// Refuses to hand out a second guard while one is alive.
#[derive(Debug, Default)]
pub struct RunLock {
    running: AtomicBool,
}

/// Releases the lock on drop.
#[derive(Debug)]
pub struct RunGuard<'a> {
    lock: &'a RunLock,
}

impl RunLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard { lock: self })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.lock.running.store(false, Ordering::Release);
    }
}

/// Run once unless another run holds `lock`; `None` means the run was refused.
pub async fn run_guarded(
    deps: &PipelineDeps,
    lock: &RunLock,
    opts: PipelineOptions,
) -> Option<PipelineResult> {
    let Some(_guard) = lock.try_acquire() else {
        warn!("pipeline already running; refusing to start another run");
        counter!("pipeline_runs_refused_total").increment(1);
        return None;
    };
    Some(run_pipeline(deps, opts).await)
}

#[derive(Clone, Debug)]
pub struct SchedulerCfg {
    pub interval: Duration,
    pub mode: Option<String>,
}

/// Spawn the interval loop. The first tick fires immediately.
pub fn spawn_scheduler(
    deps: Arc<PipelineDeps>,
    lock: Arc<RunLock>,
    cfg: SchedulerCfg,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cfg.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let opts = PipelineOptions {
                mode: cfg.mode.clone(),
                triggered_by: TriggerSource::Cron,
                now: None,
            };
            match run_guarded(&deps, &lock, opts).await {
                Some(result) => info!(
                    status = %result.status,
                    inserted = result.inserted,
                    errors = result.errors.len(),
                    "scheduled run finished"
                ),
                None => info!("scheduled tick skipped"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_releases_on_drop() {
        let lock = RunLock::new();
        let first = lock.try_acquire();
        assert!(first.is_some());
        assert!(lock.try_acquire().is_none());
        drop(first);
        assert!(!lock.is_running());
        assert!(lock.try_acquire().is_some());
    }
}
