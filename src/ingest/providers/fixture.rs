// src/ingest/providers/fixture.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::histogram;
use serde::Deserialize;
use std::path::Path;

use crate::ingest::types::{RawItem, SourceConnector, SourceType};

#[derive(Debug, Deserialize)]
struct FixtureItem {
    title: String,
    #[serde(alias = "link")]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default, alias = "pubDate")]
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    regulation_tags: Vec<String>,
}

/// Connector that serves items from a JSON array (fixture or demo data).
/// The payload is parsed on every fetch, so a malformed fixture behaves like a
/// failing source.
pub struct FixtureConnector {
    id: String,
    name: String,
    source_type: SourceType,
    payload: String,
}

impl FixtureConnector {
    pub fn from_json(
        id: impl Into<String>,
        name: impl Into<String>,
        source_type: SourceType,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            source_type,
            payload: payload.into(),
        }
    }

    pub fn from_file(
        id: impl Into<String>,
        name: impl Into<String>,
        source_type: SourceType,
        path: &Path,
    ) -> Result<Self> {
        let payload = std::fs::read_to_string(path)
            .with_context(|| format!("reading fixture {}", path.display()))?;
        Ok(Self::from_json(id, name, source_type, payload))
    }
}

#[async_trait]
impl SourceConnector for FixtureConnector {
    async fn fetch(&self) -> Result<Vec<RawItem>> {
        let t0 = std::time::Instant::now();
        let items: Vec<FixtureItem> = serde_json::from_str(&self.payload)
            .with_context(|| format!("parsing fixture for source {}", self.id))?;
        let out = items
            .into_iter()
            .map(|it| RawItem {
                title: it.title,
                url: it.url,
                content: it.content,
                published_at: it.published_at,
                source_name: self.name.clone(),
                source_type: self.source_type.clone(),
                regulation_tags: it.regulation_tags,
            })
            .collect();
        histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(out)
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn source_type(&self) -> SourceType {
        self.source_type.clone()
    }
}
