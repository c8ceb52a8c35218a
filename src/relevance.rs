// src/relevance.rs
//! Relevance gate applied to enriched items before persistence.

use std::fmt;

use crate::enrich::Enrichment;

/// Case-insensitive phrases the enricher uses when it found nothing of interest.
pub const PLACEHOLDER_PHRASES: &[&str] = &["no relevant", "not relevant", "nothing relevant"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoRegulationTags,
    PlaceholderHeadline,
    PlaceholderSummary,
    SummaryTooShort { len: usize, min: usize },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoRegulationTags => f.write_str("no regulation tags"),
            SkipReason::PlaceholderHeadline => f.write_str("placeholder headline"),
            SkipReason::PlaceholderSummary => f.write_str("placeholder summary"),
            SkipReason::SummaryTooShort { len, min } => {
                write!(f, "summary too short ({len} <= {min} chars)")
            }
        }
    }
}

fn has_placeholder(text: &str) -> bool {
    let lower = text.to_lowercase();
    PLACEHOLDER_PHRASES.iter().any(|p| lower.contains(p))
}

/// `Ok(())` when the item may be persisted. The summary must be strictly longer
/// than `min_summary_chars`.
pub fn check(enrichment: &Enrichment, min_summary_chars: usize) -> Result<(), SkipReason> {
    if enrichment.regulation_tags.is_empty() {
        return Err(SkipReason::NoRegulationTags);
    }
    if has_placeholder(&enrichment.headline) {
        return Err(SkipReason::PlaceholderHeadline);
    }
    if has_placeholder(&enrichment.summary) {
        return Err(SkipReason::PlaceholderSummary);
    }
    let len = enrichment.summary.chars().count();
    if len <= min_summary_chars {
        return Err(SkipReason::SummaryTooShort {
            len,
            min: min_summary_chars,
        });
    }
    Ok(())
}
