// src/store.rs
//! Storage boundary: persisted news records, regulatory events and execution
//! records. Real deployments plug in a database; `MemoryStore` backs the
//! binary's demo mode and the tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::dedup::SourceRef;
use crate::enrich::{ConfidenceLevel, ImpactLevel, NewsType};
use crate::events::{LifecycleState, RegulatoryEvent};
use crate::ingest::types::SourceType;
use crate::telemetry::{ExecutionRecord, TelemetrySink};

/// An enriched, relevance-approved news item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    /// Assigned by the store on insert.
    #[serde(default)]
    pub id: String,
    pub headline: String,
    pub summary: String,
    pub content: String,
    pub news_type: NewsType,
    pub source_url: String,
    pub source_name: String,
    pub source_type: SourceType,
    /// Present only when more than one source covered the story.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SourceRef>>,
    pub published_at: DateTime<Utc>,
    pub retrieved_at: DateTime<Utc>,
    pub regulation_tags: Vec<String>,
    pub impact_level: ImpactLevel,
    pub gs1_impact_tags: Vec<String>,
    pub sector_tags: Vec<String>,
    pub suggested_actions: Vec<String>,
    pub related_standards: Vec<String>,
    pub regulatory_state: LifecycleState,
    pub is_negative_signal: bool,
    pub negative_signal_keywords: Vec<String>,
    pub confidence_level: ConfidenceLevel,
    #[serde(default)]
    pub event_id: Option<String>,
}

#[async_trait]
pub trait NewsStore: Send + Sync {
    async fn get_by_url(&self, url: &str) -> Result<Option<PersistedRecord>>;
    /// Stores the record and returns it with its id set.
    async fn insert(&self, record: PersistedRecord) -> Result<PersistedRecord>;
    async fn link_event(&self, record_id: &str, event_id: &str) -> Result<()>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn find_by_dedup_key(&self, dedup_key: &str) -> Result<Option<RegulatoryEvent>>;
    /// Stores the event and returns it with its id set.
    async fn insert_event(&self, event: RegulatoryEvent) -> Result<RegulatoryEvent>;
    async fn update_event(&self, event: &RegulatoryEvent) -> Result<()>;
    async fn all_events(&self) -> Result<Vec<RegulatoryEvent>>;
}

/// In-memory implementation of every storage trait, with failure injection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    news: Mutex<Vec<PersistedRecord>>,
    events: Mutex<Vec<RegulatoryEvent>>,
    executions: Mutex<Vec<ExecutionRecord>>,
    next_id: AtomicU64,
    fail_insert_urls: Mutex<HashSet<String>>,
    fail_lookups: AtomicBool,
    fail_telemetry: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{prefix}-{n}")
    }

    /// Pre-populate a record as if an earlier run had stored it.
    pub fn seed_record(&self, mut record: PersistedRecord) -> PersistedRecord {
        record.id = self.next_id("news");
        lock(&self.news).push(record.clone());
        record
    }

    /// Make `insert` fail for this source URL.
    pub fn fail_insert_for(&self, url: &str) {
        lock(&self.fail_insert_urls).insert(url.to_string());
    }

    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_telemetry(&self, fail: bool) {
        self.fail_telemetry.store(fail, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<PersistedRecord> {
        lock(&self.news).clone()
    }

    pub fn events(&self) -> Vec<RegulatoryEvent> {
        lock(&self.events).clone()
    }

    pub fn executions(&self) -> Vec<ExecutionRecord> {
        lock(&self.executions).clone()
    }
}

#[async_trait]
impl NewsStore for MemoryStore {
    async fn get_by_url(&self, url: &str) -> Result<Option<PersistedRecord>> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(anyhow!("lookup unavailable"));
        }
        Ok(lock(&self.news).iter().find(|r| r.source_url == url).cloned())
    }

    async fn insert(&self, mut record: PersistedRecord) -> Result<PersistedRecord> {
        if lock(&self.fail_insert_urls).contains(&record.source_url) {
            return Err(anyhow!("write rejected"));
        }
        let mut news = lock(&self.news);
        if news.iter().any(|r| r.source_url == record.source_url) {
            return Err(anyhow!("duplicate source_url"));
        }
        record.id = self.next_id("news");
        news.push(record.clone());
        Ok(record)
    }

    async fn link_event(&self, record_id: &str, event_id: &str) -> Result<()> {
        let mut news = lock(&self.news);
        let rec = news
            .iter_mut()
            .find(|r| r.id == record_id)
            .ok_or_else(|| anyhow!("unknown news record {record_id}"))?;
        rec.event_id = Some(event_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn find_by_dedup_key(&self, dedup_key: &str) -> Result<Option<RegulatoryEvent>> {
        Ok(lock(&self.events)
            .iter()
            .find(|e| e.dedup_key == dedup_key)
            .cloned())
    }

    async fn insert_event(&self, mut event: RegulatoryEvent) -> Result<RegulatoryEvent> {
        let mut events = lock(&self.events);
        if events.iter().any(|e| e.dedup_key == event.dedup_key) {
            return Err(anyhow!("duplicate dedup_key {}", event.dedup_key));
        }
        event.id = self.next_id("evt");
        events.push(event.clone());
        Ok(event)
    }

    async fn update_event(&self, event: &RegulatoryEvent) -> Result<()> {
        let mut events = lock(&self.events);
        let slot = events
            .iter_mut()
            .find(|e| e.id == event.id)
            .ok_or_else(|| anyhow!("unknown event {}", event.id))?;
        *slot = event.clone();
        Ok(())
    }

    async fn all_events(&self) -> Result<Vec<RegulatoryEvent>> {
        Ok(self.events())
    }
}

#[async_trait]
impl TelemetrySink for MemoryStore {
    async fn save(&self, record: &ExecutionRecord) -> Result<()> {
        if self.fail_telemetry.load(Ordering::SeqCst) {
            return Err(anyhow!("telemetry store unavailable"));
        }
        lock(&self.executions).push(record.clone());
        Ok(())
    }
}
