// src/dedup.rs
//! Cross-source fuzzy deduplication.
//!
//! Runs after enrichment, so titles are the enriched headlines and tag overlap
//! uses the enriched regulation tags. Grouping is greedy and single-pass:
//! each unassigned item seeds a group and absorbs every later unassigned item
//! from a different source that `is_duplicate` accepts. O(n²) comparisons;
//! fine for a few hundred items per run, needs an index beyond ~1000.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::ingest::types::{RawItem, SourceType};

pub const TITLE_SIMILARITY_STRONG: f64 = 0.7;
pub const TITLE_SIMILARITY_WITH_TAGS: f64 = 0.5;
pub const TAG_OVERLAP_WITH_TITLE: f64 = 0.6;
pub const TAG_OVERLAP_WITH_WORDS: f64 = 0.5;
pub const MIN_SHARED_WORDS: usize = 3;
/// Words must be strictly longer than this to count as significant.
pub const SIGNIFICANT_WORD_LEN: usize = 4;

/// Fields the deduplicator needs from an item.
pub trait DedupCandidate {
    fn title(&self) -> &str;
    fn url(&self) -> &str;
    fn source_name(&self) -> &str;
    fn source_type(&self) -> &SourceType;
    fn regulation_tags(&self) -> &[String];
}

impl DedupCandidate for RawItem {
    fn title(&self) -> &str {
        &self.title
    }
    fn url(&self) -> &str {
        &self.url
    }
    fn source_name(&self) -> &str {
        &self.source_name
    }
    fn source_type(&self) -> &SourceType {
        &self.source_type
    }
    fn regulation_tags(&self) -> &[String] {
        &self.regulation_tags
    }
}

/// Attribution of one source inside a merged group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub url: String,
}

impl SourceRef {
    fn of<T: DedupCandidate>(item: &T) -> Self {
        Self {
            name: item.source_name().to_string(),
            source_type: item.source_type().clone(),
            url: item.url().to_string(),
        }
    }
}

/// A group of items describing the same story.
#[derive(Debug, Clone)]
pub struct MergedItem<T> {
    /// The item whose source won primary selection.
    pub item: T,
    /// One entry per member, in input order. Never empty.
    pub sources: Vec<SourceRef>,
    pub primary_source: SourceRef,
}

impl<T> MergedItem<T> {
    pub fn is_multi_source(&self) -> bool {
        self.sources.len() > 1
    }
}

/// `1 - levenshtein / max_len` over lowercased, trimmed titles. Two empty titles are identical.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    strsim::normalized_levenshtein(&a, &b)
}

/// Jaccard index over regulation-tag sets; 0 when both are empty.
pub fn tag_overlap(a: &[String], b: &[String]) -> f64 {
    let sa: HashSet<&str> = a.iter().map(String::as_str).collect();
    let sb: HashSet<&str> = b.iter().map(String::as_str).collect();
    let union = sa.union(&sb).count();
    if union == 0 {
        return 0.0;
    }
    sa.intersection(&sb).count() as f64 / union as f64
}

fn significant_words(title: &str) -> HashSet<String> {
    title
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.chars().count() > SIGNIFICANT_WORD_LEN)
        .map(str::to_string)
        .collect()
}

/// Number of distinct lowercased words longer than four characters present in both titles.
/// A word repeated in one title counts once.
pub fn shared_significant_words(a: &str, b: &str) -> usize {
    let wa = significant_words(a);
    let wb = significant_words(b);
    wa.intersection(&wb).count()
}

/// Whether two items from *different* sources cover the same story.
/// Items from the same source are never duplicates.
pub fn is_duplicate<A: DedupCandidate, B: DedupCandidate>(a: &A, b: &B) -> bool {
    if a.source_name() == b.source_name() {
        return false;
    }
    let title_sim = title_similarity(a.title(), b.title());
    if title_sim >= TITLE_SIMILARITY_STRONG {
        return true;
    }
    let tags = tag_overlap(a.regulation_tags(), b.regulation_tags());
    if tags >= TAG_OVERLAP_WITH_TITLE && title_sim >= TITLE_SIMILARITY_WITH_TAGS {
        return true;
    }
    shared_significant_words(a.title(), b.title()) >= MIN_SHARED_WORDS
        && tags >= TAG_OVERLAP_WITH_WORDS
}

/// Partition `items` into merged groups. Every input lands in exactly one group.
pub fn deduplicate<T: DedupCandidate + Clone>(items: Vec<T>) -> Vec<MergedItem<T>> {
    let mut assigned = vec![false; items.len()];
    let mut groups: Vec<MergedItem<T>> = Vec::new();

    for i in 0..items.len() {
        if assigned[i] {
            continue;
        }
        assigned[i] = true;
        let mut members = vec![i];
        for j in (i + 1)..items.len() {
            if !assigned[j] && is_duplicate(&items[i], &items[j]) {
                assigned[j] = true;
                members.push(j);
            }
        }

        // Stable: the earliest member wins ties on priority.
        let mut primary = members[0];
        for &m in &members[1..] {
            if items[m].source_type().priority() > items[primary].source_type().priority() {
                primary = m;
            }
        }

        let sources: Vec<SourceRef> = members.iter().map(|&m| SourceRef::of(&items[m])).collect();
        if sources.len() > 1 {
            debug!(
                title = items[primary].title(),
                sources = ?sources.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
                "merged cross-source duplicates"
            );
        }
        groups.push(MergedItem {
            primary_source: SourceRef::of(&items[primary]),
            item: items[primary].clone(),
            sources,
        });
    }

    groups
}

/// Aggregate numbers for one dedup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    pub original: usize,
    pub merged: usize,
    pub multi_source: usize,
}

impl DedupStats {
    pub fn removed(&self) -> usize {
        self.original.saturating_sub(self.merged)
    }
}

pub fn dedup_stats<T>(original: usize, groups: &[MergedItem<T>]) -> DedupStats {
    let stats = DedupStats {
        original,
        merged: groups.len(),
        multi_source: groups.iter().filter(|g| g.is_multi_source()).count(),
    };
    info!(
        original = stats.original,
        merged = stats.merged,
        multi_source = stats.multi_source,
        "cross-source dedup complete"
    );
    stats
}
