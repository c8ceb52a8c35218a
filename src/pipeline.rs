// src/pipeline.rs
//! One end-to-end ingestion run.
//!
//! fetch → URL dedup → age window → validity → existing records → enrichment →
//! cross-source dedup → relevance gate → persist → event aggregation, with an
//! `ExecutionContext` following along and the execution record written last.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{PipelineConfig, PipelineMode};
use crate::dedup::{dedup_stats, deduplicate, MergedItem};
use crate::enrich::{enrich_in_batches, DynEnricher, EnrichedItem, NewsType};
use crate::error::PipelineError;
use crate::events::{detect_event, EventAggregator, LifecycleState};
use crate::health::HealthRegistry;
use crate::ingest::types::SourceConnector;
use crate::ingest::{
    dedup_by_url, ensure_metrics_described, fetch_all, filter_by_age, filter_existing,
    filter_valid, url_fingerprint,
};
use crate::quality;
use crate::relevance;
use crate::store::{EventStore, MemoryStore, NewsStore, PersistedRecord};
use crate::telemetry::{
    self, ExecutionContext, ExecutionStatus, ItemCoverage, LogEvent, LogEventType, TelemetrySink,
    TriggerSource,
};

/// Collaborators of a run. Cheap to share behind an `Arc`.
pub struct PipelineDeps {
    pub connectors: Vec<Arc<dyn SourceConnector>>,
    pub registry: Arc<HealthRegistry>,
    pub enricher: DynEnricher,
    pub news: Arc<dyn NewsStore>,
    pub aggregator: Arc<EventAggregator>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub config: PipelineConfig,
}

impl PipelineDeps {
    /// Wire every storage collaborator to one `MemoryStore`, returned for inspection.
    pub fn in_memory(
        connectors: Vec<Arc<dyn SourceConnector>>,
        enricher: DynEnricher,
        config: PipelineConfig,
    ) -> (Self, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let events: Arc<dyn EventStore> = store.clone();
        let deps = Self {
            connectors,
            registry: Arc::new(HealthRegistry::new()),
            enricher,
            news: store.clone(),
            aggregator: Arc::new(EventAggregator::new(events)),
            telemetry: store.clone(),
            config,
        };
        (deps, store)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Mode name; `None` means the default mode.
    pub mode: Option<String>,
    pub triggered_by: TriggerSource,
    /// Reference time for the age window. Defaults to the wall clock.
    pub now: Option<DateTime<Utc>>,
}

impl PipelineOptions {
    pub fn manual(mode: impl Into<String>) -> Self {
        Self {
            mode: Some(mode.into()),
            triggered_by: TriggerSource::Manual,
            now: None,
        }
    }
}

/// What a caller gets back from `run_pipeline`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineResult {
    /// Absent when the run was rejected before it started.
    pub execution_id: Option<String>,
    pub status: ExecutionStatus,
    pub mode: Option<PipelineMode>,
    pub max_age_days: u32,
    pub fetched: usize,
    pub url_duplicates: usize,
    pub too_old: usize,
    pub invalid: usize,
    pub already_stored: usize,
    pub enriched: usize,
    pub ai_failed: usize,
    pub cross_source_duplicates: usize,
    pub skipped: usize,
    pub inserted: usize,
    pub failed: usize,
    pub events_created: usize,
    pub events_updated: usize,
    pub sources_failed: usize,
    pub errors: Vec<String>,
    pub duration_ms: i64,
}

impl PipelineResult {
    fn rejected(message: String) -> Self {
        Self {
            execution_id: None,
            status: ExecutionStatus::Failed,
            mode: None,
            max_age_days: 0,
            fetched: 0,
            url_duplicates: 0,
            too_old: 0,
            invalid: 0,
            already_stored: 0,
            enriched: 0,
            ai_failed: 0,
            cross_source_duplicates: 0,
            skipped: 0,
            inserted: 0,
            failed: 0,
            events_created: 0,
            events_updated: 0,
            sources_failed: 0,
            errors: vec![message],
            duration_ms: 0,
        }
    }

    fn started(execution_id: String, mode: PipelineMode, max_age_days: u32) -> Self {
        Self {
            execution_id: Some(execution_id),
            status: ExecutionStatus::Running,
            mode: Some(mode),
            max_age_days,
            errors: Vec::new(),
            ..Self::rejected(String::new())
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

fn default_lifecycle_state(news_type: NewsType, negative_signal: bool) -> LifecycleState {
    if negative_signal {
        return LifecycleState::PostponedOrSoftened;
    }
    match news_type {
        NewsType::NewLaw | NewsType::Amendment => LifecycleState::Adopted,
        NewsType::Enforcement | NewsType::CourtDecision => LifecycleState::EnforcementSignal,
        NewsType::Guidance => LifecycleState::Guidance,
        NewsType::Proposal => LifecycleState::Proposal,
    }
}

/// Build the record for one relevance-approved group.
pub fn to_record(group: &MergedItem<EnrichedItem>, retrieved_at: DateTime<Utc>) -> PersistedRecord {
    let raw = &group.item.raw;
    let e = &group.item.enrichment;
    let headline = if e.headline.trim().is_empty() {
        raw.title.clone()
    } else {
        e.headline.clone()
    };
    PersistedRecord {
        id: String::new(),
        headline,
        summary: e.summary.clone(),
        content: raw.content.clone(),
        news_type: e.news_type,
        source_url: raw.url.clone(),
        source_name: raw.source_name.clone(),
        source_type: raw.source_type.clone(),
        sources: group.is_multi_source().then(|| group.sources.clone()),
        published_at: raw.published_at.unwrap_or(retrieved_at),
        retrieved_at,
        regulation_tags: e.regulation_tags.clone(),
        impact_level: e.impact_level,
        gs1_impact_tags: e.gs1_impact_tags.clone(),
        sector_tags: e.sector_tags.clone(),
        suggested_actions: e.suggested_actions.clone(),
        related_standards: e.related_standards.clone(),
        regulatory_state: e
            .regulatory_state
            .unwrap_or_else(|| default_lifecycle_state(e.news_type, e.is_negative_signal)),
        is_negative_signal: e.is_negative_signal,
        negative_signal_keywords: e.negative_signal_keywords.clone(),
        confidence_level: e.confidence_level,
        event_id: None,
    }
}

/// Execute one run. Never returns an error: every failure is reflected in the
/// result's status and `errors`.
pub async fn run_pipeline(deps: &PipelineDeps, opts: PipelineOptions) -> PipelineResult {
    ensure_metrics_described();

    let (mode, max_age_days) = match deps.config.modes.resolve(opts.mode.as_deref()) {
        Ok(resolved) => resolved,
        Err(e) => {
            error!(error = %e, "pipeline rejected");
            return PipelineResult::rejected(e.to_string());
        }
    };

    let mut ctx = ExecutionContext::new(opts.triggered_by);
    ctx.set_config_snapshot(deps.config.snapshot());
    let mut result = PipelineResult::started(ctx.execution_id.clone(), mode, max_age_days);
    let now = opts.now.unwrap_or_else(Utc::now);

    ctx.log(
        LogEvent::info(LogEventType::PipelineStart, format!("pipeline started in {mode} mode"))
            .with_data(serde_json::json!({
                "mode": mode.as_str(),
                "max_age_days": max_age_days,
                "sources": deps.connectors.len(),
                "triggered_by": opts.triggered_by.as_str(),
            })),
    );

    let stages = AssertUnwindSafe(run_stages(deps, &mut ctx, &mut result, max_age_days, now))
        .catch_unwind()
        .await;

    let status = match stages {
        Ok(()) => ExecutionStatus::from_outcome(result.errors.len(), result.inserted),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            let err = PipelineError::Unexpected(anyhow::anyhow!("pipeline aborted: {message}"));
            ctx.log(LogEvent::error(LogEventType::Error, "pipeline aborted", err.to_string()));
            result.errors.push(err.to_string());
            ExecutionStatus::Failed
        }
    };

    ctx.complete(status);
    let record = ctx.summary();
    result.status = status;
    result.duration_ms = record.duration_ms.unwrap_or_default();

    telemetry::persist(deps.telemetry.as_ref(), &record).await;

    info!(
        execution_id = %record.execution_id,
        status = %status,
        inserted = result.inserted,
        skipped = result.skipped,
        failed = result.failed,
        events_created = result.events_created,
        events_updated = result.events_updated,
        duration_ms = result.duration_ms,
        "pipeline finished"
    );
    result
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn run_stages(
    deps: &PipelineDeps,
    ctx: &mut ExecutionContext,
    result: &mut PipelineResult,
    max_age_days: u32,
    now: DateTime<Utc>,
) {
    // Fetch
    let fetch_opts = deps.config.fetch.to_options();
    let reports = fetch_all(&deps.connectors, &deps.registry, &fetch_opts).await;
    let mut items = Vec::new();
    for report in reports {
        ctx.record_source_attempt(&report.source_id, report.items.len(), report.error.as_ref());
        if !report.succeeded() {
            result.sources_failed += 1;
            if report.was_skipped() {
                debug!(source_id = %report.source_id, "source skipped while unhealthy");
            }
        }
        items.extend(report.items);
    }
    result.fetched = items.len();

    // Cheap filters
    let (items, url_duplicates) = dedup_by_url(items);
    result.url_duplicates = url_duplicates;
    ctx.record_deduplication(url_duplicates);

    let before_age = items.len();
    let (items, too_old) = filter_by_age(items, max_age_days, now);
    result.too_old = too_old;
    ctx.log(
        LogEvent::info(
            LogEventType::AgeFilter,
            format!("age filter kept {} of {before_age} items", items.len()),
        )
        .with_data(serde_json::json!({
            "max_age_days": max_age_days,
            "dropped": too_old,
        })),
    );

    let (items, invalid) = filter_valid(items);
    result.invalid = invalid;

    let (items, already_stored) = filter_existing(items, deps.news.as_ref()).await;
    result.already_stored = already_stored;

    if items.is_empty() {
        info!(execution_id = %ctx.execution_id, "no new items to process");
        return;
    }

    // Enrichment
    let run = enrich_in_batches(deps.enricher.as_ref(), items, deps.config.ai.batch_size).await;
    for failure in &run.failures {
        let message = failure.error.to_string();
        result.ai_failed += failure.items.len();
        result.errors.push(message.clone());
        // One error entry per batch, one failed call per item.
        for (i, _) in failure.items.iter().enumerate() {
            let payload = (i == 0).then_some(message.as_str());
            ctx.record_ai_processing(false, None, payload);
        }
    }
    for item in &run.enriched {
        ctx.record_ai_processing(true, Some(quality::score(&item.enrichment)), None);
    }
    result.enriched = run.enriched.len();

    // Cross-source dedup
    let original = run.enriched.len();
    let groups = deduplicate(run.enriched);
    let stats = dedup_stats(original, &groups);
    result.cross_source_duplicates = stats.removed();
    ctx.record_deduplication(stats.removed());

    // Relevance + persistence + events
    let min_summary = deps.config.relevance.min_summary_chars;
    for group in &groups {
        if let Err(reason) = relevance::check(&group.item.enrichment, min_summary) {
            debug!(url_fp = %url_fingerprint(&group.item.raw.url), reason = %reason, "item skipped");
            result.skipped += 1;
            continue;
        }

        let record = to_record(group, now);
        let url = record.source_url.clone();
        let stored = match deps.news.insert(record).await {
            Ok(stored) => stored,
            Err(e) => {
                let err = PipelineError::Persistence {
                    url: url.clone(),
                    message: format!("{e:#}"),
                };
                result.failed += 1;
                result.errors.push(err.to_string());
                ctx.record_item_processed(false, ItemCoverage::default());
                ctx.log(LogEvent::error(LogEventType::ItemSave, "failed to save item", err.to_string()));
                continue;
            }
        };

        result.inserted += 1;
        ctx.record_item_processed(true, ItemCoverage::of(&group.item.enrichment));
        ctx.log(
            LogEvent::info(LogEventType::ItemSave, "item saved").with_data(serde_json::json!({
                "id": stored.id,
                "sources": group.sources.len(),
            })),
        );

        link_to_event(deps, ctx, result, &stored).await;
    }

    match deps.aggregator.stats().await {
        Ok(stats) => info!(
            total = stats.total,
            complete = stats.complete,
            incomplete = stats.incomplete,
            "event store summary"
        ),
        Err(e) => warn!(error = %e, "event stats unavailable"),
    }
}

/// Event failures are logged and never fail the item.
async fn link_to_event(
    deps: &PipelineDeps,
    ctx: &mut ExecutionContext,
    result: &mut PipelineResult,
    stored: &PersistedRecord,
) {
    let Some(detection) = detect_event(stored, Some(deps.enricher.as_ref())).await else {
        debug!(id = %stored.id, "no regulatory event detected");
        return;
    };

    let outcome = match deps.aggregator.create_or_update_event(&stored.id, &detection).await {
        Ok(outcome) => outcome,
        Err(e) => {
            ctx.log(LogEvent::warn(
                LogEventType::Error,
                format!("event aggregation failed for {}: {e:#}", stored.id),
            ));
            return;
        }
    };

    if outcome.is_new {
        result.events_created += 1;
    } else {
        result.events_updated += 1;
    }
    if let Err(e) = deps.news.link_event(&stored.id, &outcome.event_id).await {
        ctx.log(LogEvent::warn(
            LogEventType::Error,
            format!("linking {} to event {} failed: {e:#}", stored.id, outcome.event_id),
        ));
    }
}
