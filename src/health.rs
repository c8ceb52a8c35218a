// src/health.rs
//! Per-source health statistics and circuit breaking.
//!
//! - A record is created lazily on the first attempt against a source.
//! - `UNHEALTHY_AFTER` consecutive failures mark the source unhealthy.
//! - An unhealthy source is skipped while its last failure is inside the cooldown.
//! - One success closes the circuit again.
//!
//! The registry is an explicit object shared through the pipeline dependencies.
//! The map sits behind a `Mutex` that is never held across an `.await`, which
//! serialises read-modify-write per source.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

/// Consecutive failures after which a source is marked unhealthy.
pub const UNHEALTHY_AFTER: u32 = 3;
/// How long an unhealthy source is skipped after its last failure.
pub const COOLDOWN_SECS: i64 = 5 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceHealthRecord {
    pub source_id: String,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    /// Rolling mean, updated on successful requests.
    pub average_response_time_ms: f64,
    pub is_healthy: bool,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl SourceHealthRecord {
    fn new(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            last_success: None,
            last_failure: None,
            consecutive_failures: 0,
            total_requests: 0,
            total_failures: 0,
            average_response_time_ms: 0.0,
            is_healthy: true,
            last_error: None,
        }
    }

    /// Success percentage over all recorded requests (0 when nothing recorded yet).
    pub fn success_rate(&self) -> u32 {
        if self.total_requests == 0 {
            return 0;
        }
        let ok = self.total_requests - self.total_failures;
        ((ok as f64 / self.total_requests as f64) * 100.0).round() as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    pub source_id: String,
    pub is_healthy: bool,
    pub consecutive_failures: u32,
    /// Percentage, 0 when nothing was recorded.
    pub success_rate: u32,
    pub average_response_time_ms: u64,
    pub last_error: Option<String>,
}

/// Registry of source health records keyed by source id.
#[derive(Debug)]
pub struct HealthRegistry {
    records: Mutex<HashMap<String, SourceHealthRecord>>,
    unhealthy_after: u32,
    cooldown: ChronoDuration,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::with_policy(UNHEALTHY_AFTER, COOLDOWN_SECS)
    }

    /// `unhealthy_after` of 0 is treated as 1; negative cooldown as 0.
    pub fn with_policy(unhealthy_after: u32, cooldown_secs: i64) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            unhealthy_after: unhealthy_after.max(1),
            cooldown: ChronoDuration::seconds(cooldown_secs.max(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SourceHealthRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Compact view of one source for status endpoints and logs.
    pub fn summary(&self, source_id: &str) -> Option<HealthSummary> {
        self.lock().get(source_id).map(|r| HealthSummary {
            source_id: r.source_id.clone(),
            is_healthy: r.is_healthy,
            consecutive_failures: r.consecutive_failures,
            success_rate: r.success_rate(),
            average_response_time_ms: r.average_response_time_ms.round() as u64,
            last_error: r.last_error.clone(),
        })
    }

    /// Current record for a source, if any attempt was recorded.
    pub fn get(&self, source_id: &str) -> Option<SourceHealthRecord> {
        self.lock().get(source_id).cloned()
    }

    pub fn should_skip(&self, source_id: &str) -> bool {
        self.should_skip_at(source_id, Utc::now())
    }

    /// True only while the source is unhealthy AND its last failure is inside the cooldown.
    /// Does NOT mutate state.
    pub fn should_skip_at(&self, source_id: &str, now: DateTime<Utc>) -> bool {
        let map = self.lock();
        match map.get(source_id) {
            Some(rec) if !rec.is_healthy => match rec.last_failure {
                Some(ts) => now.signed_duration_since(ts) < self.cooldown,
                None => false,
            },
            _ => false,
        }
    }

    pub fn record_success(&self, source_id: &str, response_time_ms: u64) {
        self.record_success_at(source_id, response_time_ms, Utc::now());
    }

    pub fn record_success_at(&self, source_id: &str, response_time_ms: u64, now: DateTime<Utc>) {
        let mut map = self.lock();
        let rec = map
            .entry(source_id.to_string())
            .or_insert_with(|| SourceHealthRecord::new(source_id));

        let recovered = !rec.is_healthy;
        rec.last_success = Some(now);
        rec.consecutive_failures = 0;
        rec.total_requests += 1;
        let n = rec.total_requests as f64;
        rec.average_response_time_ms =
            (rec.average_response_time_ms * (n - 1.0) + response_time_ms as f64) / n;
        rec.is_healthy = true;

        if recovered {
            info!(source_id, "source recovered; circuit closed");
        }
    }

    pub fn record_failure(&self, source_id: &str, error: &str) {
        self.record_failure_at(source_id, error, Utc::now());
    }

    /// Returns true when this failure opened the circuit.
    pub fn record_failure_at(&self, source_id: &str, error: &str, now: DateTime<Utc>) -> bool {
        let mut map = self.lock();
        let rec = map
            .entry(source_id.to_string())
            .or_insert_with(|| SourceHealthRecord::new(source_id));

        rec.last_failure = Some(now);
        rec.consecutive_failures += 1;
        rec.total_requests += 1;
        rec.total_failures += 1;
        rec.last_error = Some(error.to_string());

        let opened = rec.is_healthy && rec.consecutive_failures >= self.unhealthy_after;
        if rec.consecutive_failures >= self.unhealthy_after {
            rec.is_healthy = false;
        }
        if opened {
            warn!(
                source_id,
                consecutive_failures = rec.consecutive_failures,
                last_error = error,
                "source marked unhealthy; circuit open"
            );
            counter!("source_circuit_open_total").increment(1);
        }
        opened
    }

    /// Forget everything about a source (manual intervention). Returns whether a record existed.
    pub fn reset(&self, source_id: &str) -> bool {
        self.lock().remove(source_id).is_some()
    }

    /// All records, sorted by source id.
    pub fn snapshot(&self) -> Vec<SourceHealthRecord> {
        let mut out: Vec<_> = self.lock().values().cloned().collect();
        out.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        out
    }

    pub fn unhealthy_sources(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter(|r| !r.is_healthy)
            .map(|r| r.source_id)
            .collect()
    }
}
