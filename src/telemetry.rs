// src/telemetry.rs
//! Execution telemetry for one pipeline run.
//!
//! `ExecutionContext` accumulates monotonic counters while the run progresses,
//! `complete` freezes the end time and status, and `summary` yields the
//! immutable `ExecutionRecord` handed to a `TelemetrySink`. A failing sink is
//! logged and otherwise ignored.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{error, info, warn};

use crate::enrich::Enrichment;
use crate::error::PipelineError;

pub const PIPELINE_TYPE_NEWS_INGESTION: &str = "news_ingestion";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    #[default]
    Cron,
    Manual,
    Api,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Cron => "cron",
            TriggerSource::Manual => "manual",
            TriggerSource::Api => "api",
        }
    }
}

impl FromStr for TriggerSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cron" => Ok(TriggerSource::Cron),
            "manual" => Ok(TriggerSource::Manual),
            "api" => Ok(TriggerSource::Api),
            other => anyhow::bail!("unknown trigger source {other:?} (expected cron, manual or api)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success,
    PartialSuccess,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::PartialSuccess => "partial_success",
            ExecutionStatus::Failed => "failed",
        }
    }

    /// No errors → success; errors with at least one insert → partial; otherwise failed.
    pub fn from_outcome(error_count: usize, inserted: usize) -> Self {
        if error_count == 0 {
            ExecutionStatus::Success
        } else if inserted > 0 {
            ExecutionStatus::PartialSuccess
        } else {
            ExecutionStatus::Failed
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEventType {
    PipelineStart,
    SourceFetch,
    AgeFilter,
    AiProcess,
    ItemSave,
    PipelineComplete,
    Error,
}

impl LogEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogEventType::PipelineStart => "pipeline_start",
            LogEventType::SourceFetch => "source_fetch",
            LogEventType::AgeFilter => "age_filter",
            LogEventType::AiProcess => "ai_process",
            LogEventType::ItemSave => "item_save",
            LogEventType::PipelineComplete => "pipeline_complete",
            LogEventType::Error => "error",
        }
    }
}

/// One structured run event.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub event_type: LogEventType,
    pub level: LogLevel,
    pub message: String,
    pub data: Option<serde_json::Value>,
    /// Error payload; only error-level events carrying one land in the error list.
    pub error: Option<String>,
}

impl LogEvent {
    pub fn info(event_type: LogEventType, message: impl Into<String>) -> Self {
        Self {
            event_type,
            level: LogLevel::Info,
            message: message.into(),
            data: None,
            error: None,
        }
    }

    pub fn warn(event_type: LogEventType, message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Warn,
            ..Self::info(event_type, message)
        }
    }

    pub fn error(event_type: LogEventType, message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Error,
            error: Some(error.into()),
            ..Self::info(event_type, message)
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Which enrichment fields a saved item carried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemCoverage {
    pub has_summary: bool,
    pub has_regulation_tags: bool,
    pub has_gs1_impact_tags: bool,
    pub has_sector_tags: bool,
    pub has_recommendations: bool,
}

impl ItemCoverage {
    pub fn of(e: &Enrichment) -> Self {
        Self {
            has_summary: !e.summary.trim().is_empty(),
            has_regulation_tags: !e.regulation_tags.is_empty(),
            has_gs1_impact_tags: !e.gs1_impact_tags.is_empty(),
            has_sector_tags: !e.sector_tags.is_empty(),
            has_recommendations: !e.suggested_actions.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Immutable summary of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub pipeline_type: String,
    pub triggered_by: TriggerSource,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub status: ExecutionStatus,
    pub sources_attempted: u32,
    pub sources_succeeded: u32,
    pub sources_failed: u32,
    pub items_fetched: u32,
    pub items_deduplicated: u32,
    pub items_processed: u32,
    pub items_saved: u32,
    pub items_failed: u32,
    pub ai_calls_made: u32,
    pub ai_calls_succeeded: u32,
    pub ai_calls_failed: u32,
    pub ai_avg_quality_score: Option<f64>,
    pub items_with_summary: u32,
    pub items_with_regulation_tags: u32,
    pub items_with_gs1_impact_tags: u32,
    pub items_with_sector_tags: u32,
    pub items_with_recommendations: u32,
    pub error_count: u32,
    pub errors: Vec<ErrorEntry>,
    pub warnings: Vec<String>,
    pub config_snapshot: Option<serde_json::Value>,
}

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn save(&self, record: &ExecutionRecord) -> Result<()>;
}

/// Save `record`; a sink failure is logged and swallowed.
pub async fn persist(sink: &dyn TelemetrySink, record: &ExecutionRecord) -> bool {
    match sink.save(record).await {
        Ok(()) => {
            info!(execution_id = %record.execution_id, "execution log saved");
            true
        }
        Err(e) => {
            error!(execution_id = %record.execution_id, error = %e, "failed to save execution log");
            counter!("telemetry_write_failures_total").increment(1);
            false
        }
    }
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8_lossy(&buf).into_owned()
}

/// Base-36 millisecond timestamp, `-`, 8 random hex chars.
pub fn generate_execution_id(now: DateTime<Utc>) -> String {
    let millis = now.timestamp_millis().max(0) as u64;
    let random: [u8; 4] = rand::random();
    let hex: String = random.iter().map(|b| format!("{b:02x}")).collect();
    format!("{}-{hex}", to_base36(millis))
}

#[derive(Debug)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub pipeline_type: &'static str,
    pub triggered_by: TriggerSource,
    pub started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    status: ExecutionStatus,

    sources_attempted: u32,
    sources_succeeded: u32,
    sources_failed: u32,

    items_fetched: u32,
    items_deduplicated: u32,
    items_processed: u32,
    items_saved: u32,
    items_failed: u32,

    ai_calls_made: u32,
    ai_calls_succeeded: u32,
    ai_calls_failed: u32,
    quality_scores: Vec<f64>,

    coverage: [u32; 5],

    errors: Vec<ErrorEntry>,
    warnings: Vec<String>,
    config_snapshot: Option<serde_json::Value>,
}

impl ExecutionContext {
    pub fn new(triggered_by: TriggerSource) -> Self {
        let started_at = Utc::now();
        Self {
            execution_id: generate_execution_id(started_at),
            pipeline_type: PIPELINE_TYPE_NEWS_INGESTION,
            triggered_by,
            started_at,
            completed_at: None,
            status: ExecutionStatus::Running,
            sources_attempted: 0,
            sources_succeeded: 0,
            sources_failed: 0,
            items_fetched: 0,
            items_deduplicated: 0,
            items_processed: 0,
            items_saved: 0,
            items_failed: 0,
            ai_calls_made: 0,
            ai_calls_succeeded: 0,
            ai_calls_failed: 0,
            quality_scores: Vec::new(),
            coverage: [0; 5],
            errors: Vec::new(),
            warnings: Vec::new(),
            config_snapshot: None,
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn log(&mut self, event: LogEvent) {
        let data = event.data.as_ref().map(|d| d.to_string()).unwrap_or_default();
        let event_type = event.event_type.as_str();
        match event.level {
            LogLevel::Info => info!(
                execution_id = %self.execution_id,
                event_type,
                data = %data,
                "{}",
                event.message
            ),
            LogLevel::Warn => warn!(
                execution_id = %self.execution_id,
                event_type,
                data = %data,
                "{}",
                event.message
            ),
            LogLevel::Error => error!(
                execution_id = %self.execution_id,
                event_type,
                data = %data,
                error = event.error.as_deref().unwrap_or_default(),
                "{}",
                event.message
            ),
        }

        match (event.level, event.error) {
            (LogLevel::Error, Some(message)) => self.errors.push(ErrorEntry {
                message,
                timestamp: Utc::now(),
            }),
            (LogLevel::Warn, _) => self.warnings.push(event.message),
            _ => {}
        }
    }

    /// `error` is `None` for a successful fetch.
    pub fn record_source_attempt(
        &mut self,
        source_id: &str,
        item_count: usize,
        error: Option<&PipelineError>,
    ) {
        self.sources_attempted += 1;
        if let Some(error) = error {
            self.sources_failed += 1;
            self.log(
                LogEvent::warn(LogEventType::SourceFetch, error.to_string())
                    .with_data(serde_json::json!({ "source_id": source_id })),
            );
        } else {
            self.sources_succeeded += 1;
            self.items_fetched += item_count as u32;
            self.log(
                LogEvent::info(
                    LogEventType::SourceFetch,
                    format!("source {source_id} fetched successfully"),
                )
                .with_data(serde_json::json!({ "source_id": source_id, "item_count": item_count })),
            );
        }
    }

    pub fn record_ai_processing(&mut self, success: bool, quality_score: Option<f64>, error: Option<&str>) {
        self.ai_calls_made += 1;
        if success {
            self.ai_calls_succeeded += 1;
            if let Some(q) = quality_score {
                self.quality_scores.push(q);
                histogram!("ai_quality_score").record(q);
            }
        } else {
            self.ai_calls_failed += 1;
            // Without a payload the failure is only counted.
            if let Some(e) = error {
                self.log(LogEvent::error(LogEventType::AiProcess, "AI processing failed", e));
            }
        }
    }

    pub fn record_item_processed(&mut self, saved: bool, coverage: ItemCoverage) {
        self.items_processed += 1;
        if !saved {
            self.items_failed += 1;
            return;
        }
        self.items_saved += 1;
        let flags = [
            coverage.has_summary,
            coverage.has_regulation_tags,
            coverage.has_gs1_impact_tags,
            coverage.has_sector_tags,
            coverage.has_recommendations,
        ];
        for (slot, set) in self.coverage.iter_mut().zip(flags) {
            if set {
                *slot += 1;
            }
        }
    }

    pub fn record_deduplication(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        self.items_deduplicated += count as u32;
        self.log(
            LogEvent::info(LogEventType::PipelineComplete, format!("deduplicated {count} items"))
                .with_data(serde_json::json!({ "duplicate_count": count })),
        );
    }

    pub fn set_config_snapshot(&mut self, snapshot: serde_json::Value) {
        self.config_snapshot = Some(snapshot);
    }

    /// Freeze end time and status. Later calls are ignored.
    pub fn complete(&mut self, status: ExecutionStatus) {
        if self.completed_at.is_some() {
            return;
        }
        let completed_at = Utc::now();
        self.completed_at = Some(completed_at);
        self.status = status;
        let duration_ms = (completed_at - self.started_at).num_milliseconds();

        let message = format!("pipeline completed with status: {status}");
        let data = serde_json::json!({
            "duration_ms": duration_ms,
            "items_processed": self.items_processed,
            "items_saved": self.items_saved,
        });
        let event = match status {
            ExecutionStatus::Success | ExecutionStatus::Running => {
                LogEvent::info(LogEventType::PipelineComplete, message)
            }
            ExecutionStatus::PartialSuccess => LogEvent::warn(LogEventType::PipelineComplete, message),
            ExecutionStatus::Failed => LogEvent {
                level: LogLevel::Error,
                ..LogEvent::info(LogEventType::PipelineComplete, message)
            },
        };
        self.log(event.with_data(data));

        counter!("pipeline_runs_total", "status" => status.as_str()).increment(1);
        counter!("pipeline_items_saved_total").increment(self.items_saved as u64);
        counter!("pipeline_items_failed_total").increment(self.items_failed as u64);
        counter!("pipeline_items_deduplicated_total").increment(self.items_deduplicated as u64);
        counter!("pipeline_sources_failed_total").increment(self.sources_failed as u64);
        histogram!("pipeline_duration_ms").record(duration_ms.max(0) as f64);
        gauge!("pipeline_last_run_ts").set(completed_at.timestamp() as f64);
    }

    pub fn summary(&self) -> ExecutionRecord {
        let ai_avg_quality_score = if self.quality_scores.is_empty() {
            None
        } else {
            Some(self.quality_scores.iter().sum::<f64>() / self.quality_scores.len() as f64)
        };
        ExecutionRecord {
            execution_id: self.execution_id.clone(),
            pipeline_type: self.pipeline_type.to_string(),
            triggered_by: self.triggered_by,
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration_ms: self
                .completed_at
                .map(|c| (c - self.started_at).num_milliseconds()),
            status: self.status,
            sources_attempted: self.sources_attempted,
            sources_succeeded: self.sources_succeeded,
            sources_failed: self.sources_failed,
            items_fetched: self.items_fetched,
            items_deduplicated: self.items_deduplicated,
            items_processed: self.items_processed,
            items_saved: self.items_saved,
            items_failed: self.items_failed,
            ai_calls_made: self.ai_calls_made,
            ai_calls_succeeded: self.ai_calls_succeeded,
            ai_calls_failed: self.ai_calls_failed,
            ai_avg_quality_score,
            items_with_summary: self.coverage[0],
            items_with_regulation_tags: self.coverage[1],
            items_with_gs1_impact_tags: self.coverage[2],
            items_with_sector_tags: self.coverage[3],
            items_with_recommendations: self.coverage[4],
            error_count: self.errors.len() as u32,
            errors: self.errors.clone(),
            warnings: self.warnings.clone(),
            config_snapshot: self.config_snapshot.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn execution_id_shape() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let id = generate_execution_id(now);
        let (ts, rand_part) = id.split_once('-').unwrap();
        assert_eq!(u64::from_str_radix(ts, 36).unwrap(), 1_700_000_000_000);
        assert_eq!(rand_part.len(), 8);
        assert!(rand_part.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn status_rule() {
        assert_eq!(ExecutionStatus::from_outcome(0, 0), ExecutionStatus::Success);
        assert_eq!(ExecutionStatus::from_outcome(2, 1), ExecutionStatus::PartialSuccess);
        assert_eq!(ExecutionStatus::from_outcome(1, 0), ExecutionStatus::Failed);
    }

    #[test]
    fn only_error_payloads_become_errors() {
        let mut ctx = ExecutionContext::new(TriggerSource::Manual);
        ctx.log(LogEvent {
            level: LogLevel::Error,
            ..LogEvent::info(LogEventType::Error, "no payload")
        });
        ctx.log(LogEvent::error(LogEventType::ItemSave, "save failed", "db down"));
        ctx.log(LogEvent::warn(LogEventType::AgeFilter, "all items too old"));
        let rec = ctx.summary();
        assert_eq!(rec.error_count, 1);
        assert_eq!(rec.errors[0].message, "db down");
        assert_eq!(rec.warnings, vec!["all items too old"]);
        assert_eq!(rec.status, ExecutionStatus::Running);
        assert!(rec.completed_at.is_none());
    }
}
