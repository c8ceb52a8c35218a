// src/events/mod.rs
//! Regulatory events: detection from persisted articles, quarter-based
//! aggregation and delta (narrative) completeness.
//!
//! An event is identified by `REGULATION_EVENTTYPE_QUARTER`; at most one event
//! exists per key, and every later article for the same key is linked to it.

pub mod aggregate;
pub mod delta;
pub mod detect;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::enrich::ConfidenceLevel;
use delta::DeltaNarrative;

pub use aggregate::EventAggregator;
pub use delta::{validate_delta, DeltaValidation};
pub use detect::{
    detect_affected_regulations, detect_event, detect_event_type, detect_primary_regulation,
    generate_dedup_key, get_quarter,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Adoption,
    Proposal,
    PoliticalAgreement,
    Postponement,
    GuidancePublication,
    EnforcementStart,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Adoption => "ADOPTION",
            EventType::Proposal => "PROPOSAL",
            EventType::PoliticalAgreement => "POLITICAL_AGREEMENT",
            EventType::Postponement => "POSTPONEMENT",
            EventType::GuidancePublication => "GUIDANCE_PUBLICATION",
            EventType::EnforcementStart => "ENFORCEMENT_START",
        }
    }

    /// Lifecycle state an event of this type puts the regulation in.
    pub fn lifecycle_state(&self) -> LifecycleState {
        match self {
            EventType::Adoption => LifecycleState::Adopted,
            EventType::Proposal => LifecycleState::Proposal,
            EventType::PoliticalAgreement => LifecycleState::PoliticalAgreement,
            EventType::Postponement => LifecycleState::PostponedOrSoftened,
            EventType::GuidancePublication => LifecycleState::Guidance,
            EventType::EnforcementStart => LifecycleState::EnforcementSignal,
        }
    }

    /// "political agreement" style label for generated prose.
    pub fn label(&self) -> String {
        self.as_str().to_lowercase().replace('_', " ")
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Proposal,
    PoliticalAgreement,
    Adopted,
    DelegatedActDraft,
    DelegatedActAdopted,
    Guidance,
    EnforcementSignal,
    PostponedOrSoftened,
}

impl LifecycleState {
    pub fn label(&self) -> &'static str {
        match self {
            LifecycleState::Proposal => "proposal",
            LifecycleState::PoliticalAgreement => "political agreement",
            LifecycleState::Adopted => "adopted",
            LifecycleState::DelegatedActDraft => "delegated act draft",
            LifecycleState::DelegatedActAdopted => "delegated act adopted",
            LifecycleState::Guidance => "guidance",
            LifecycleState::EnforcementSignal => "enforcement signal",
            LifecycleState::PostponedOrSoftened => "postponed or softened",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Complete,
    Incomplete,
}

/// Everything derived from one article that the aggregator needs.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDetection {
    pub event_type: EventType,
    pub primary_regulation: String,
    pub affected_regulations: Vec<String>,
    pub lifecycle_state: LifecycleState,
    pub title: String,
    pub summary: String,
    /// Falls back to "now" at aggregation time when absent.
    pub event_date: Option<DateTime<Utc>>,
    pub narrative: DeltaNarrative,
    pub confidence_level: ConfidenceLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegulatoryEvent {
    /// Assigned by the event store on insert.
    #[serde(default)]
    pub id: String,
    pub dedup_key: String,
    pub event_type: EventType,
    pub primary_regulation: String,
    pub affected_regulations: Vec<String>,
    pub lifecycle_state: LifecycleState,
    pub quarter: String,
    pub title: String,
    pub summary: String,
    pub event_date_earliest: DateTime<Utc>,
    pub event_date_latest: DateTime<Utc>,
    pub source_article_ids: Vec<String>,
    #[serde(flatten)]
    pub narrative: DeltaNarrative,
    pub confidence_level: ConfidenceLevel,
    pub status: EventStatus,
    pub completeness_score: u8,
    pub delta_validation_passed: bool,
    pub missing_delta_fields: Vec<String>,
}

/// Result of one create-or-update call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventOutcome {
    pub event_id: String,
    pub dedup_key: String,
    pub is_new: bool,
    /// Event status after the merge.
    pub status: EventStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventStats {
    pub total: usize,
    pub complete: usize,
    pub incomplete: usize,
    pub by_regulation: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
}

impl EventStats {
    pub fn from_events(events: &[RegulatoryEvent]) -> Self {
        let mut stats = EventStats {
            total: events.len(),
            ..Default::default()
        };
        for ev in events {
            match ev.status {
                EventStatus::Complete => stats.complete += 1,
                EventStatus::Incomplete => stats.incomplete += 1,
            }
            *stats
                .by_regulation
                .entry(ev.primary_regulation.clone())
                .or_default() += 1;
            *stats
                .by_type
                .entry(ev.event_type.as_str().to_string())
                .or_default() += 1;
        }
        stats
    }
}
