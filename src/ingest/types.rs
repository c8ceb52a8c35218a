// src/ingest/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{FetchError, PipelineError};

/// Kind of publisher behind a source. Drives primary-source selection when
/// several sources cover the same story.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SourceType {
    EuOfficial,
    Gs1Official,
    DutchNational,
    Other(String),
}

impl SourceType {
    /// EU official 3, GS1/standards official 2, everything else 1.
    pub fn priority(&self) -> u8 {
        match self {
            SourceType::EuOfficial => 3,
            SourceType::Gs1Official => 2,
            SourceType::DutchNational | SourceType::Other(_) => 1,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SourceType::EuOfficial => "EU_OFFICIAL",
            SourceType::Gs1Official => "GS1_OFFICIAL",
            SourceType::DutchNational => "DUTCH_NATIONAL",
            SourceType::Other(s) => s.as_str(),
        }
    }
}

impl From<String> for SourceType {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "EU_OFFICIAL" => SourceType::EuOfficial,
            "GS1_OFFICIAL" => SourceType::Gs1Official,
            "DUTCH_NATIONAL" => SourceType::DutchNational,
            _ => SourceType::Other(s),
        }
    }
}

impl From<&str> for SourceType {
    fn from(s: &str) -> Self {
        SourceType::from(s.to_string())
    }
}

impl From<SourceType> for String {
    fn from(t: SourceType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One item as delivered by a connector. `url` is the exact-dedup key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub title: String,
    #[serde(alias = "link")]
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, alias = "pubDate")]
    pub published_at: Option<DateTime<Utc>>,
    pub source_name: String,
    pub source_type: SourceType,
    #[serde(default)]
    pub regulation_tags: Vec<String>,
}

/// A configured external source (RSS, scraper, API client, fixture).
#[async_trait::async_trait]
pub trait SourceConnector: Send + Sync {
    async fn fetch(&self) -> Result<Vec<RawItem>>;
    /// Stable id used as the health-registry key.
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn source_type(&self) -> SourceType;
}

/// Per-source result of one fetch round.
#[derive(Debug)]
pub struct SourceFetchReport {
    pub source_id: String,
    pub source_name: String,
    pub items: Vec<RawItem>,
    pub response_time_ms: Option<u64>,
    /// `None` on success.
    pub error: Option<PipelineError>,
}

impl SourceFetchReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub fn was_skipped(&self) -> bool {
        matches!(
            self.error,
            Some(PipelineError::TransientSource {
                error: FetchError::Skipped { .. },
                ..
            })
        )
    }
}
