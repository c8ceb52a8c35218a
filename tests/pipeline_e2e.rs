// tests/pipeline_e2e.rs
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use regwatch::enrich::{
    DynEnricher, Enricher, Enrichment, EnrichmentInput, EventContext, KeywordEnricher,
};
use regwatch::events::delta::DeltaNarrative;
use regwatch::events::EventStatus;
use regwatch::ingest::types::{RawItem, SourceConnector, SourceType};
use regwatch::store::PersistedRecord;
use regwatch::{
    run_guarded, run_pipeline, ExecutionStatus, MemoryStore, PipelineConfig, PipelineDeps,
    PipelineOptions, RunLock, TriggerSource,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 20, 0, 0, 0).unwrap()
}

fn day(d: u32) -> Option<DateTime<Utc>> {
    Some(Utc.with_ymd_and_hms(2025, 3, d, 9, 0, 0).unwrap())
}

fn raw(title: &str, url: &str, content: &str, published_at: Option<DateTime<Utc>>) -> RawItem {
    RawItem {
        title: title.into(),
        url: url.into(),
        content: content.into(),
        published_at,
        source_name: String::new(),
        source_type: SourceType::Other(String::new()),
        regulation_tags: vec![],
    }
}

struct StaticConnector {
    id: String,
    source_type: SourceType,
    items: Mutex<Vec<RawItem>>,
    fail: bool,
    calls: AtomicUsize,
}

impl StaticConnector {
    fn new(id: &str, source_type: SourceType, items: Vec<RawItem>) -> Arc<Self> {
        let items = items
            .into_iter()
            .map(|mut it| {
                it.source_name = id.to_string();
                it.source_type = source_type.clone();
                it
            })
            .collect();
        Arc::new(Self {
            id: id.into(),
            source_type,
            items: Mutex::new(items),
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            source_type: SourceType::DutchNational,
            items: Mutex::new(vec![]),
            fail: true,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SourceConnector for StaticConnector {
    async fn fetch(&self) -> Result<Vec<RawItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("feed unreachable");
        }
        Ok(self.items.lock().unwrap().clone())
    }
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.id
    }
    fn source_type(&self) -> SourceType {
        self.source_type.clone()
    }
}

const CSRD_URL: &str = "https://ec.europa.eu/news/csrd-adopted";
const PPWR_URL: &str = "https://ec.europa.eu/news/ppwr-proposal";

fn csrd_eu() -> RawItem {
    raw(
        "Council formally adopts CSRD amendment on reporting timelines",
        CSRD_URL,
        "The Council formally adopted the amendment to the Corporate Sustainability Reporting Directive (CSRD). \
         Large undertakings must apply the revised ESRS data points from 2027. \
         The text will be published in the Official Journal.",
        day(10),
    )
}

fn ppwr_eu() -> RawItem {
    raw(
        "Commission publishes proposal on PPWR labelling",
        PPWR_URL,
        "The European Commission published a proposal revising PPWR labelling obligations for packaging placed on the EU market. \
         Harmonised sorting labels would apply across all member states.",
        day(12),
    )
}

fn holiday_notice() -> RawItem {
    raw(
        "Office closed for the holidays",
        "https://ec.europa.eu/news/office-closed",
        "Our office will be closed for the holidays. We wish everyone a good break.",
        day(14),
    )
}

fn stale_item() -> RawItem {
    raw(
        "Older CSRD news",
        "https://ec.europa.eu/news/old",
        "The Council formally adopted CSRD years ago.",
        Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
    )
}

fn csrd_gs1() -> RawItem {
    raw(
        "Council formally adopts CSRD amendment on reporting timeline",
        "https://www.gs1.nl/nieuws/csrd-adopted",
        "GS1 summarises the adopted CSRD amendment for companies reporting under ESRS. \
         Product data should be traceable to GTINs and GLNs.",
        day(11),
    )
}

fn csrd_eu_url_copy() -> RawItem {
    let mut it = csrd_eu();
    it.url = format!("{CSRD_URL}/?utm_source=rss");
    it
}

fn test_config() -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.fetch.retries = 0;
    cfg.fetch.retry_delay_ms = 1;
    cfg.fetch.timeout_ms = 2_000;
    cfg.ai.batch_size = 10;
    cfg
}

fn standard_sources() -> Vec<Arc<dyn SourceConnector>> {
    vec![
        StaticConnector::new(
            "eu-commission",
            SourceType::EuOfficial,
            vec![csrd_eu(), ppwr_eu(), holiday_notice(), stale_item()],
        ),
        StaticConnector::new(
            "gs1-nl",
            SourceType::Gs1Official,
            vec![csrd_gs1(), csrd_eu_url_copy()],
        ),
    ]
}

fn opts() -> PipelineOptions {
    PipelineOptions {
        mode: Some("normal".into()),
        triggered_by: TriggerSource::Manual,
        now: Some(now()),
    }
}

fn keyword() -> DynEnricher {
    Arc::new(KeywordEnricher)
}

#[tokio::test]
async fn full_run_filters_merges_persists_and_aggregates() {
    let (deps, store) = PipelineDeps::in_memory(standard_sources(), keyword(), test_config());

    let res = run_pipeline(&deps, opts()).await;

    assert_eq!(res.status, ExecutionStatus::Success, "{:?}", res.errors);
    assert_eq!(res.max_age_days, 30);
    assert_eq!(res.fetched, 6);
    assert_eq!(res.url_duplicates, 1);
    assert_eq!(res.too_old, 1);
    assert_eq!(res.enriched, 4);
    assert_eq!(res.cross_source_duplicates, 1);
    assert_eq!(res.skipped, 1);
    assert_eq!(res.inserted, 2);
    assert_eq!(res.events_created, 2);
    assert!(res.errors.is_empty());

    let records = store.records();
    let csrd = records.iter().find(|r| r.source_url == CSRD_URL).unwrap();
    assert_eq!(csrd.source_name, "eu-commission");
    let sources = csrd.sources.as_ref().expect("multi-source attribution");
    assert_eq!(sources.len(), 2);
    let ppwr = records.iter().find(|r| r.source_url == PPWR_URL).unwrap();
    assert!(ppwr.sources.is_none());

    let events = store.events();
    let keys: Vec<&str> = events.iter().map(|e| e.dedup_key.as_str()).collect();
    assert!(keys.contains(&"CSRD_ADOPTION_2025-Q1"), "{keys:?}");
    assert!(keys.contains(&"PPWR_PROPOSAL_2025-Q1"), "{keys:?}");
    // Keyword narration falls back to the template narrative.
    assert!(events.iter().all(|e| e.status == EventStatus::Incomplete));
    assert!(records.iter().all(|r| r.event_id.is_some()));

    let execs = store.executions();
    assert_eq!(execs.len(), 1);
    let rec = &execs[0];
    assert_eq!(rec.status, ExecutionStatus::Success);
    assert_eq!(Some(rec.execution_id.clone()), res.execution_id);
    assert_eq!(rec.sources_attempted, 2);
    assert_eq!(rec.items_fetched, 6);
    assert_eq!(rec.items_deduplicated, 2);
    assert_eq!(rec.items_saved, 2);
    assert_eq!(rec.ai_calls_made, 4);
    assert!(rec.ai_avg_quality_score.is_some());
    assert!(rec.config_snapshot.is_some());
}

#[tokio::test]
async fn invalid_mode_fails_before_any_fetch() {
    let eu = StaticConnector::new("eu-commission", SourceType::EuOfficial, vec![csrd_eu()]);
    let sources: Vec<Arc<dyn SourceConnector>> = vec![eu.clone()];
    let (deps, store) = PipelineDeps::in_memory(sources, keyword(), test_config());

    let res = run_pipeline(
        &deps,
        PipelineOptions {
            mode: Some("turbo".into()),
            ..opts()
        },
    )
    .await;

    assert_eq!(res.status, ExecutionStatus::Failed);
    assert!(res.execution_id.is_none());
    assert!(res.errors[0].contains("Invalid pipeline mode"), "{:?}", res.errors);
    assert!(res.errors[0].contains("normal, backfill, incremental, full-refresh"));
    assert_eq!(eu.calls.load(Ordering::SeqCst), 0);
    assert!(store.executions().is_empty());
}

#[tokio::test]
async fn same_quarter_articles_share_one_event() {
    let follow_up = raw(
        "CSRD final text lands in the Official Journal",
        "https://ec.europa.eu/news/csrd-oj",
        "The adopted CSRD amendment was published in the Official Journal today. \
         It enters into force twenty days later and companies should prepare their ESRS reporting.",
        day(18),
    );
    let sources: Vec<Arc<dyn SourceConnector>> = vec![StaticConnector::new(
        "eu-commission",
        SourceType::EuOfficial,
        vec![csrd_eu(), follow_up],
    )];
    let (deps, store) = PipelineDeps::in_memory(sources, keyword(), test_config());

    let res = run_pipeline(&deps, opts()).await;

    assert_eq!(res.inserted, 2);
    assert_eq!(res.events_created, 1);
    assert_eq!(res.events_updated, 1);
    let events = store.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].source_article_ids.len(), 2);
    assert_eq!(events[0].event_date_earliest, day(10).unwrap());
    assert_eq!(events[0].event_date_latest, day(18).unwrap());
    let ids: Vec<Option<String>> = store.records().into_iter().map(|r| r.event_id).collect();
    assert!(ids.iter().all(|id| id.as_deref() == Some(events[0].id.as_str())));
}

#[tokio::test]
async fn existing_records_are_not_reprocessed() {
    let (deps, store) = PipelineDeps::in_memory(standard_sources(), keyword(), test_config());
    let first = run_pipeline(&deps, opts()).await;
    assert_eq!(first.inserted, 2);

    let second = run_pipeline(&deps, opts()).await;
    // CSRD + PPWR are stored. The GS1 copy no longer has a partner to merge
    // into, so it lands on its own and joins the existing CSRD event.
    assert_eq!(second.already_stored, 2);
    assert_eq!(second.inserted, 1);
    assert_eq!(second.events_created, 0);
    assert_eq!(second.events_updated, 1);
    assert_eq!(second.status, ExecutionStatus::Success);
    assert_eq!(store.records().len(), 3);
    assert_eq!(store.events().len(), 2);
    assert_eq!(store.executions().len(), 2);
}

#[tokio::test]
async fn nothing_new_is_a_successful_empty_run() {
    let sources: Vec<Arc<dyn SourceConnector>> =
        vec![StaticConnector::new("eu-commission", SourceType::EuOfficial, vec![csrd_eu()])];
    let (deps, store) = PipelineDeps::in_memory(sources, keyword(), test_config());
    store.seed_record(PersistedRecord {
        source_url: CSRD_URL.into(),
        ..sample_record()
    });

    let res = run_pipeline(&deps, opts()).await;
    assert_eq!(res.status, ExecutionStatus::Success);
    assert_eq!(res.already_stored, 1);
    assert_eq!(res.enriched, 0);
    assert_eq!(store.executions()[0].ai_calls_made, 0);
}

#[tokio::test]
async fn failing_source_is_reported_but_not_an_error() {
    let mut sources = standard_sources();
    sources.push(StaticConnector::failing("rvo-nl"));
    let (deps, store) = PipelineDeps::in_memory(sources, keyword(), test_config());

    let res = run_pipeline(&deps, opts()).await;
    assert_eq!(res.status, ExecutionStatus::Success);
    assert_eq!(res.sources_failed, 1);
    assert_eq!(res.inserted, 2);

    let rec = &store.executions()[0];
    assert_eq!(rec.sources_failed, 1);
    assert_eq!(rec.sources_succeeded, 2);
    assert!(rec
        .warnings
        .iter()
        .any(|w| w == "source rvo-nl failed: feed unreachable"));
    let health = deps.registry.get("rvo-nl").unwrap();
    assert_eq!(health.consecutive_failures, 1);
}

#[tokio::test]
async fn failed_existence_lookup_keeps_items() {
    let (deps, store) = PipelineDeps::in_memory(standard_sources(), keyword(), test_config());
    store.set_fail_lookups(true);

    let res = run_pipeline(&deps, opts()).await;
    assert_eq!(res.status, ExecutionStatus::Success);
    assert_eq!(res.already_stored, 0);
    assert_eq!(res.inserted, 2);
    assert!(res.errors.is_empty(), "{:?}", res.errors);
    assert_eq!(store.records().len(), 2);
}

#[tokio::test]
async fn persistence_failure_yields_partial_success() {
    let (deps, store) = PipelineDeps::in_memory(standard_sources(), keyword(), test_config());
    store.fail_insert_for(PPWR_URL);

    let res = run_pipeline(&deps, opts()).await;
    assert_eq!(res.status, ExecutionStatus::PartialSuccess);
    assert_eq!(res.inserted, 1);
    assert_eq!(res.failed, 1);
    assert_eq!(res.errors.len(), 1);
    assert!(res.errors[0].starts_with("Failed to insert: https://ec.europa.eu/news/ppwr-proposal"));

    let rec = &store.executions()[0];
    assert_eq!(rec.items_failed, 1);
    assert_eq!(rec.error_count, 1);
}

#[tokio::test]
async fn telemetry_sink_failure_leaves_result_unchanged() {
    let (deps, store) = PipelineDeps::in_memory(standard_sources(), keyword(), test_config());
    store.set_fail_telemetry(true);

    let res = run_pipeline(&deps, opts()).await;
    assert_eq!(res.status, ExecutionStatus::Success);
    assert_eq!(res.inserted, 2);
    assert!(res.errors.is_empty());
    assert!(store.executions().is_empty());
}

/// Fails the configured batch number (1-based) and delegates otherwise.
struct FlakyEnricher {
    fail_batch: usize,
    calls: AtomicUsize,
}

impl Enricher for FlakyEnricher {
    fn enrich_batch<'a>(
        &'a self,
        inputs: &'a [EnrichmentInput],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Enrichment>>> + Send + 'a>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let out: Result<Vec<Enrichment>> = if n == self.fail_batch {
            Err(anyhow::anyhow!("upstream 503"))
        } else {
            Ok(inputs.iter().map(|i| KeywordEnricher.enrich_one(i)).collect())
        };
        Box::pin(async move { out })
    }

    fn narrate_event<'a>(
        &'a self,
        _ctx: &'a EventContext,
    ) -> Pin<Box<dyn Future<Output = Option<DeltaNarrative>> + Send + 'a>> {
        Box::pin(async { None })
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

#[tokio::test]
async fn ai_batch_failure_drops_only_that_batch() {
    let mut cfg = test_config();
    cfg.ai.batch_size = 1;
    let enricher: DynEnricher = Arc::new(FlakyEnricher {
        fail_batch: 2,
        calls: AtomicUsize::new(0),
    });
    let (deps, store) = PipelineDeps::in_memory(standard_sources(), enricher, cfg);

    let res = run_pipeline(&deps, opts()).await;
    // Batch 2 is the PPWR item; CSRD (merged with GS1) still lands.
    assert_eq!(res.ai_failed, 1);
    assert_eq!(res.enriched, 3);
    assert_eq!(res.inserted, 1);
    assert_eq!(res.errors.len(), 1);
    assert!(res.errors[0].contains("upstream 503"));
    assert_eq!(res.status, ExecutionStatus::PartialSuccess);

    let rec = &store.executions()[0];
    assert_eq!(rec.ai_calls_made, 4);
    assert_eq!(rec.ai_calls_failed, 1);
    assert_eq!(rec.error_count, 1);
}

static KEYWORD: KeywordEnricher = KeywordEnricher;

/// Narrates every event with a full five-field delta.
struct NarratingEnricher;

impl Enricher for NarratingEnricher {
    fn enrich_batch<'a>(
        &'a self,
        inputs: &'a [EnrichmentInput],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Enrichment>>> + Send + 'a>> {
        KEYWORD.enrich_batch(inputs)
    }

    fn narrate_event<'a>(
        &'a self,
        ctx: &'a EventContext,
    ) -> Pin<Box<dyn Future<Output = Option<DeltaNarrative>> + Send + 'a>> {
        let reg = ctx.primary_regulation.clone();
        Box::pin(async move {
            Some(DeltaNarrative {
                previous_assumption: Some(format!("Companies expected {reg} reporting to start on the original timeline.")),
                new_information: Some(format!("The Council has now formally adopted the {reg} amendment text.")),
                what_changed: Some("Reporting for large undertakings moves to the 2027 financial year.".into()),
                what_did_not_change: Some("The ESRS data points and the assurance requirements stay the same.".into()),
                decision_impact: Some("Plan data collection for the later start date but keep preparing now.".into()),
            })
        })
    }

    fn name(&self) -> &'static str {
        "narrating"
    }
}

#[tokio::test]
async fn narrated_events_are_complete() {
    let sources: Vec<Arc<dyn SourceConnector>> =
        vec![StaticConnector::new("eu-commission", SourceType::EuOfficial, vec![csrd_eu()])];
    let (deps, store) = PipelineDeps::in_memory(sources, Arc::new(NarratingEnricher), test_config());

    let res = run_pipeline(&deps, opts()).await;
    assert_eq!(res.events_created, 1);
    let ev = &store.events()[0];
    assert_eq!(ev.status, EventStatus::Complete);
    assert_eq!(ev.completeness_score, 100);
    assert!(ev.delta_validation_passed);
}

struct PanickingEnricher;

impl Enricher for PanickingEnricher {
    fn enrich_batch<'a>(
        &'a self,
        _inputs: &'a [EnrichmentInput],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Enrichment>>> + Send + 'a>> {
        panic!("enricher state corrupted")
    }

    fn narrate_event<'a>(
        &'a self,
        _ctx: &'a EventContext,
    ) -> Pin<Box<dyn Future<Output = Option<DeltaNarrative>> + Send + 'a>> {
        Box::pin(async { None })
    }

    fn name(&self) -> &'static str {
        "panicking"
    }
}

#[tokio::test]
async fn unexpected_failure_still_writes_failed_record() {
    let (deps, store) =
        PipelineDeps::in_memory(standard_sources(), Arc::new(PanickingEnricher), test_config());

    let res = run_pipeline(&deps, opts()).await;
    assert_eq!(res.status, ExecutionStatus::Failed);
    assert!(res.errors.iter().any(|e| e.contains("enricher state corrupted")));

    let execs = store.executions();
    assert_eq!(execs.len(), 1);
    assert_eq!(execs[0].status, ExecutionStatus::Failed);
    assert!(execs[0].completed_at.is_some());
}

#[tokio::test]
async fn run_lock_refuses_overlapping_runs() {
    let (deps, _store) = PipelineDeps::in_memory(standard_sources(), keyword(), test_config());
    let lock = RunLock::new();

    let held = lock.try_acquire().expect("free lock");
    assert!(run_guarded(&deps, &lock, opts()).await.is_none());
    drop(held);

    let res = run_guarded(&deps, &lock, opts()).await.expect("lock released");
    assert_eq!(res.status, ExecutionStatus::Success);
    assert!(!lock.is_running());
}

fn sample_record() -> PersistedRecord {
    use regwatch::enrich::{ConfidenceLevel, ImpactLevel, NewsType};
    use regwatch::events::LifecycleState;
    PersistedRecord {
        id: String::new(),
        headline: "Seeded".into(),
        summary: "Seeded summary".into(),
        content: "Seeded content".into(),
        news_type: NewsType::Guidance,
        source_url: "https://example.org/seeded".into(),
        source_name: "eu-commission".into(),
        source_type: SourceType::EuOfficial,
        sources: None,
        published_at: now(),
        retrieved_at: now(),
        regulation_tags: vec!["CSRD".into()],
        impact_level: ImpactLevel::Medium,
        gs1_impact_tags: vec![],
        sector_tags: vec![],
        suggested_actions: vec![],
        related_standards: vec![],
        regulatory_state: LifecycleState::Guidance,
        is_negative_signal: false,
        negative_signal_keywords: vec![],
        confidence_level: ConfidenceLevel::GuidanceInterpretation,
        event_id: None,
    }
}

#[tokio::test]
async fn memory_store_is_shared_across_collaborators() {
    let store = Arc::new(MemoryStore::new());
    let seeded = store.seed_record(sample_record());
    assert_eq!(seeded.id, "news-1");
    assert_eq!(store.records().len(), 1);
}
