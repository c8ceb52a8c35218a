// src/ingest/mod.rs
//! Source fetch round and the cheap pre-enrichment filters:
//! exact URL dedup, age window, structural validity and the existing-record check.

pub mod providers;
pub mod types;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::fetch::{fetch_with_health, FetchOptions, FetchOutcome};
use crate::health::HealthRegistry;
use crate::store::NewsStore;
use types::{RawItem, SourceConnector, SourceFetchReport};

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_items_fetched_total", "Items returned by connectors.");
        describe_counter!("ingest_url_duplicates_total", "Items removed by exact URL dedup.");
        describe_counter!("ingest_too_old_total", "Items outside the run's age window.");
        describe_counter!("ingest_invalid_total", "Structurally invalid items.");
        describe_counter!("ingest_existing_total", "Items already persisted earlier.");
        describe_counter!("fetch_retries_total", "Fetch retries after a failed attempt.");
        describe_counter!("fetch_failures_total", "Sources that failed after all retries.");
        describe_counter!("fetch_skipped_total", "Fetches skipped by an open circuit.");
        describe_counter!("source_circuit_open_total", "Sources that became unhealthy.");
        describe_histogram!("fetch_duration_ms", "Successful fetch duration in milliseconds.");
        describe_counter!("ai_items_enriched_total", "Items enriched successfully.");
        describe_counter!("ai_batch_failures_total", "Enrichment batches dropped.");
        describe_counter!("events_created_total", "Regulatory events created.");
        describe_counter!("events_updated_total", "Articles linked to an existing event.");
        describe_counter!("pipeline_runs_total", "Pipeline runs by final status.");
        describe_counter!("pipeline_items_saved_total", "Records persisted.");
        describe_counter!("pipeline_items_failed_total", "Records whose insert failed.");
        describe_counter!("pipeline_items_deduplicated_total", "Items removed by either dedup stage.");
        describe_counter!("pipeline_sources_failed_total", "Source fetches that failed in a run.");
        describe_counter!("telemetry_write_failures_total", "Execution records that could not be saved.");
        describe_histogram!("ai_quality_score", "Quality score of enriched items.");
        describe_gauge!("ingest_unhealthy_sources", "Sources currently marked unhealthy.");
        describe_histogram!("pipeline_duration_ms", "Pipeline run duration in milliseconds.");
        describe_gauge!("pipeline_last_run_ts", "Unix ts when the pipeline last completed.");
    });
}

/// Normalize text: decode entities, strip tags, straighten quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    re_ws.replace_all(&out, " ").trim().to_string()
}

/// Scheme + host (+ port) + path, without query, fragment or trailing `/`.
/// Unparsable input falls back to lowercase + trim.
pub fn normalize_url(raw: &str) -> String {
    match url::Url::parse(raw.trim()) {
        Ok(u) if u.has_host() => {
            let host = u.host_str().unwrap_or_default().to_ascii_lowercase();
            let port = u.port().map(|p| format!(":{p}")).unwrap_or_default();
            let path = u.path().trim_end_matches('/');
            format!("{}://{host}{port}{path}", u.scheme())
        }
        _ => raw.trim().to_lowercase(),
    }
}

/// Short stable fingerprint of a URL for log lines.
pub fn url_fingerprint(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_url(url).as_bytes());
    let digest = hasher.finalize();
    digest[..6].iter().map(|b| format!("{b:02x}")).collect()
}

/// Keep the first occurrence per normalized URL. Returns (kept, removed).
pub fn dedup_by_url(items: Vec<RawItem>) -> (Vec<RawItem>, usize) {
    let mut seen: HashSet<String> = HashSet::new();
    let before = items.len();
    let kept: Vec<RawItem> = items
        .into_iter()
        .filter(|it| seen.insert(normalize_url(&it.url)))
        .collect();
    let removed = before - kept.len();
    counter!("ingest_url_duplicates_total").increment(removed as u64);
    (kept, removed)
}

/// Drop items published more than `max_age_days` before `now`, and undated items.
/// Returns (kept, dropped).
pub fn filter_by_age(
    items: Vec<RawItem>,
    max_age_days: u32,
    now: DateTime<Utc>,
) -> (Vec<RawItem>, usize) {
    let cutoff = now - ChronoDuration::days(i64::from(max_age_days));
    let before = items.len();
    let kept: Vec<RawItem> = items
        .into_iter()
        .filter(|it| it.published_at.is_some_and(|d| d >= cutoff))
        .collect();
    let dropped = before - kept.len();
    counter!("ingest_too_old_total").increment(dropped as u64);
    (kept, dropped)
}

/// Normalize title/content in place, then check required fields.
pub fn validate_item(item: &mut RawItem) -> Result<(), PipelineError> {
    item.title = normalize_text(&item.title);
    item.content = normalize_text(&item.content);
    item.url = item.url.trim().to_string();

    let missing = if item.title.is_empty() {
        Some("missing title")
    } else if item.url.is_empty() {
        Some("missing url")
    } else if item.content.is_empty() {
        Some("missing content")
    } else if item.published_at.is_none() {
        Some("missing publication date")
    } else {
        None
    };
    match missing {
        Some(reason) => Err(PipelineError::Validation {
            url: item.url.clone(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Returns (valid, invalid_count).
pub fn filter_valid(items: Vec<RawItem>) -> (Vec<RawItem>, usize) {
    let mut valid = Vec::with_capacity(items.len());
    let mut invalid = 0usize;
    for mut it in items {
        match validate_item(&mut it) {
            Ok(()) => valid.push(it),
            Err(e) => {
                debug!(error = %e, "dropping invalid item");
                invalid += 1;
            }
        }
    }
    counter!("ingest_invalid_total").increment(invalid as u64);
    (valid, invalid)
}

/// Query storage one item at a time; drop items already persisted.
/// A lookup error keeps the item. Returns (new, existing_count).
pub async fn filter_existing(items: Vec<RawItem>, store: &dyn NewsStore) -> (Vec<RawItem>, usize) {
    let mut fresh = Vec::with_capacity(items.len());
    let mut existing = 0usize;
    for it in items {
        match store.get_by_url(&it.url).await {
            Ok(Some(_)) => existing += 1,
            Ok(None) => fresh.push(it),
            Err(e) => {
                warn!(url_fp = %url_fingerprint(&it.url), error = %e, "existence lookup failed; keeping item");
                fresh.push(it);
            }
        }
    }
    counter!("ingest_existing_total").increment(existing as u64);
    (fresh, existing)
}

/// Fetch every connector concurrently through the health-aware orchestrator.
/// Reports come back in connector order.
pub async fn fetch_all(
    connectors: &[Arc<dyn SourceConnector>],
    registry: &HealthRegistry,
    opts: &FetchOptions,
) -> Vec<SourceFetchReport> {
    ensure_metrics_described();

    let rounds = connectors.iter().map(|c| async move {
        let outcome = fetch_with_health(registry, c.id(), || c.fetch(), opts).await;
        match outcome {
            FetchOutcome::Fetched {
                data,
                response_time_ms,
            } => SourceFetchReport {
                source_id: c.id().to_string(),
                source_name: c.name().to_string(),
                items: data,
                response_time_ms: Some(response_time_ms),
                error: None,
            },
            FetchOutcome::Failed { error } => {
                let error = PipelineError::TransientSource {
                    source_id: c.id().to_string(),
                    error,
                };
                warn!(source_id = c.id(), error = %error, "source fetch failed");
                SourceFetchReport {
                    source_id: c.id().to_string(),
                    source_name: c.name().to_string(),
                    items: Vec::new(),
                    response_time_ms: None,
                    error: Some(error),
                }
            }
        }
    });
    let reports = join_all(rounds).await;

    let fetched: usize = reports.iter().map(|r| r.items.len()).sum();
    counter!("ingest_items_fetched_total").increment(fetched as u64);
    gauge!("ingest_unhealthy_sources").set(registry.unhealthy_sources().len() as f64);
    info!(
        sources = reports.len(),
        failed = reports.iter().filter(|r| !r.succeeded()).count(),
        items = fetched,
        "fetch round complete"
    );
    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use types::SourceType;

    fn item(url: &str, days_old: i64) -> RawItem {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        RawItem {
            title: "Title".into(),
            url: url.into(),
            content: "Body".into(),
            published_at: Some(now - ChronoDuration::days(days_old)),
            source_name: "S".into(),
            source_type: SourceType::EuOfficial,
            regulation_tags: vec![],
        }
    }

    #[test]
    fn normalize_text_strips_markup() {
        let s = "  <p>CSRD&nbsp;&amp; ESRS</p>\n\n<b>update</b>  ";
        assert_eq!(normalize_text(s), "CSRD & ESRS update");
    }

    #[test]
    fn normalize_url_drops_query_fragment_and_slash() {
        assert_eq!(
            normalize_url("https://EC.Europa.eu/news/item/?utm_source=x#top"),
            "https://ec.europa.eu/news/item"
        );
        assert_eq!(normalize_url("  Not A Url "), "not a url");
    }

    #[test]
    fn url_dedup_keeps_first() {
        let (kept, removed) = dedup_by_url(vec![
            item("https://a.eu/x", 1),
            item("https://a.eu/x/?ref=rss", 2),
            item("https://a.eu/y", 3),
        ]);
        assert_eq!(removed, 1);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].url, "https://a.eu/x");
    }

    #[test]
    fn age_filter_inclusive_window_and_undated() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let mut undated = item("https://a.eu/u", 0);
        undated.published_at = None;
        let (kept, dropped) =
            filter_by_age(vec![item("https://a.eu/1", 7), item("https://a.eu/2", 8), undated], 7, now);
        assert_eq!(kept.len(), 1);
        assert_eq!(dropped, 2);
    }

    #[test]
    fn validation_requires_content_after_normalizing() {
        let mut it = item("https://a.eu/1", 0);
        it.content = "<br/> &nbsp; ".into();
        let err = validate_item(&mut it).unwrap_err();
        assert!(err.to_string().contains("missing content"));
    }
}
