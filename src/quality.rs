// src/quality.rs
//! Deterministic quality score for an enrichment, in [0,1]. Telemetry only;
//! never used to gate persistence.
//!
//! total = 0.4 * summary_coherence + 0.4 * tag_accuracy + 0.2 * citation_completeness

use serde::Serialize;

use crate::enrich::Enrichment;

pub const W_COHERENCE: f64 = 0.4;
pub const W_TAGS: f64 = 0.4;
pub const W_CITATION: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityBreakdown {
    pub summary_coherence: f64,
    pub tag_accuracy: f64,
    pub citation_completeness: f64,
    pub total: f64,
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Number of `.`-separated segments; "A. B" counts 2 and "" counts 1.
pub fn sentence_count(summary: &str) -> usize {
    summary.split('.').count()
}

pub fn summary_coherence(summary: &str) -> f64 {
    let len = summary.chars().count();
    let length = if (100..=500).contains(&len) { 1.0 } else { 0.5 };
    let no_ellipsis = flag(!summary.contains("..."));
    let sentences = if sentence_count(summary) >= 2 { 1.0 } else { 0.5 };
    0.5 * length + 0.3 * no_ellipsis + 0.2 * sentences
}

pub fn breakdown(e: &Enrichment) -> QualityBreakdown {
    let summary_coherence = summary_coherence(&e.summary);
    let tag_accuracy = 0.4 * flag(!e.regulation_tags.is_empty())
        + 0.3 * flag(!e.gs1_impact_tags.is_empty())
        + 0.3 * flag(!e.sector_tags.is_empty());
    let citation_completeness =
        0.6 * flag(!e.suggested_actions.is_empty()) + 0.4 * flag(!e.related_standards.is_empty());
    let total = W_COHERENCE * summary_coherence
        + W_TAGS * tag_accuracy
        + W_CITATION * citation_completeness;
    QualityBreakdown {
        summary_coherence,
        tag_accuracy,
        citation_completeness,
        total: total.clamp(0.0, 1.0),
    }
}

pub fn score(e: &Enrichment) -> f64 {
    breakdown(e).total
}
