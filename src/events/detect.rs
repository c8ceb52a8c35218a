// src/events/detect.rs
//! Heuristic event detection over article text.
//!
//! Keyword sets are checked in table order and the first hit wins, so an
//! article that mentions both an adoption and a proposal is an ADOPTION.
//! The tables are pinned by `tests/fixtures/event_keywords.v1.json`.

use chrono::Datelike;
use once_cell::sync::OnceCell;
use regex::Regex;
use tracing::debug;

use super::delta::DeltaNarrative;
use super::{EventDetection, EventType};
use crate::enrich::{ConfidenceLevel, Enricher, EventContext};
use crate::store::PersistedRecord;

pub const EVENT_KEYWORDS: &[(EventType, &[&str])] = &[
    (
        EventType::Adoption,
        &["adopted", "adoption", "final adoption", "formally adopted", "entered into force"],
    ),
    (
        EventType::Proposal,
        &["proposal", "proposed", "draft proposal", "legislative proposal", "commission proposal"],
    ),
    (
        EventType::PoliticalAgreement,
        &["political agreement", "trilogue", "provisional agreement", "council agreement"],
    ),
    (
        EventType::Postponement,
        &[
            "postponed",
            "delayed",
            "extended",
            "deferred",
            "pushed back",
            "uitstel",
            "uitgesteld",
            "verschoben",
            "verschiebung",
        ],
    ),
    (
        EventType::GuidancePublication,
        &["guidance", "guidelines", "faq", "interpretation", "q&a", "clarification"],
    ),
    (
        EventType::EnforcementStart,
        &["enforcement", "comes into effect", "applicable from", "compliance deadline"],
    ),
];

/// Known regulation codes, in lookup order.
pub const REGULATION_CODES: &[&str] = &[
    "CSRD",
    "ESRS",
    "CSDDD",
    "CS3D",
    "EUDR",
    "ESPR",
    "DPP",
    "PPWR",
    "EU_TAXONOMY",
    "SFDR",
    "GREEN_CLAIMS",
    "BATTERY_REGULATION",
    "REACH",
    "CBAM",
    "ETS",
    "RED_III",
    "EPBD",
    "EED",
];

fn code_patterns() -> &'static [(&'static str, Regex)] {
    static PATTERNS: OnceCell<Vec<(&'static str, Regex)>> = OnceCell::new();
    PATTERNS.get_or_init(|| {
        REGULATION_CODES
            .iter()
            .map(|code| {
                // EU_TAXONOMY also matches "EU TAXONOMY" and "EU-TAXONOMY".
                let body = regex::escape(code).replace('_', "[ _-]");
                (*code, Regex::new(&format!(r"\b{body}\b")).unwrap())
            })
            .collect()
    })
}

fn codes_in_text(text: &str) -> impl Iterator<Item = &'static str> + '_ {
    let upper = text.to_uppercase();
    code_patterns()
        .iter()
        .filter(move |(_, re)| re.is_match(&upper))
        .map(|(code, _)| *code)
}

fn clean_tags(tags: &[String]) -> impl Iterator<Item = String> + '_ {
    tags.iter()
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty())
}

pub fn detect_event_type(text: &str) -> Option<EventType> {
    let lower = text.to_lowercase();
    EVENT_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(ty, _)| *ty)
}

/// First tag wins; otherwise the first known code present in the text.
pub fn detect_primary_regulation(text: &str, tags: &[String]) -> Option<String> {
    clean_tags(tags)
        .next()
        .or_else(|| codes_in_text(text).next().map(str::to_string))
}

/// Tags first, then codes found in the text; deduplicated, order preserved.
pub fn detect_affected_regulations(text: &str, tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for reg in clean_tags(tags).chain(codes_in_text(text).map(str::to_string)) {
        if !out.contains(&reg) {
            out.push(reg);
        }
    }
    out
}

/// `YYYY-Q{1..4}`.
pub fn get_quarter<D: Datelike>(date: &D) -> String {
    format!("{}-Q{}", date.year(), (date.month() - 1) / 3 + 1)
}

pub fn generate_dedup_key(regulation: &str, event_type: &str, quarter: &str) -> String {
    format!("{regulation}_{event_type}_{quarter}").to_uppercase()
}

/// Template narrative used when no narrator produced one. The two fields that
/// need knowledge of prior expectations stay empty, so such events remain
/// INCOMPLETE until a better narrative arrives.
pub fn fallback_narrative(event_type: EventType, regulation: &str) -> DeltaNarrative {
    let lifecycle = event_type.lifecycle_state();
    DeltaNarrative {
        previous_assumption: None,
        new_information: Some(format!(
            "This article reports a {} event for {regulation}.",
            event_type.label()
        )),
        what_changed: Some(format!(
            "The {regulation} regulation has progressed to the {} stage.",
            lifecycle.label()
        )),
        what_did_not_change: None,
        decision_impact: Some(format!(
            "Organizations affected by {regulation} should review their compliance timelines and data requirements."
        )),
    }
}

/// Build an event detection for a persisted article, or `None` when either the
/// event type or the primary regulation cannot be determined.
pub async fn detect_event(
    article: &PersistedRecord,
    narrator: Option<&dyn Enricher>,
) -> Option<EventDetection> {
    let text = format!("{}\n\n{}\n\n{}", article.headline, article.summary, article.content);
    let event_type = detect_event_type(&text)?;
    let primary_regulation = detect_primary_regulation(&text, &article.regulation_tags)?;
    let affected_regulations = detect_affected_regulations(&text, &article.regulation_tags);

    let ctx = EventContext {
        event_type,
        primary_regulation: primary_regulation.clone(),
        title: article.headline.clone(),
        text,
    };
    let narrated = match narrator {
        Some(n) => n.narrate_event(&ctx).await,
        None => None,
    };
    let (narrative, confidence_level) = match narrated {
        Some(n) => (n, article.confidence_level),
        None => {
            debug!(
                regulation = %primary_regulation,
                event_type = %event_type,
                "no narrator output; using fallback narrative"
            );
            (
                fallback_narrative(event_type, &primary_regulation),
                ConfidenceLevel::GuidanceInterpretation,
            )
        }
    };

    Some(EventDetection {
        event_type,
        lifecycle_state: event_type.lifecycle_state(),
        primary_regulation,
        affected_regulations,
        title: article.headline.clone(),
        summary: article.summary.clone(),
        event_date: Some(article.published_at),
        narrative,
        confidence_level,
    })
}
