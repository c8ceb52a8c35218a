// src/config.rs
//! Pipeline configuration: fetch policy, mode windows, AI settings, relevance
//! bar and scheduler cadence.
//!
//! Resolution order for the file:
//! 1) $PIPELINE_CONFIG_PATH
//! 2) config/pipeline.toml
//! 3) config/pipeline.json
//! 4) built-in defaults
//!
//! Missing keys fall back to defaults, so a config file only needs the values it overrides.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::PipelineError;
use crate::fetch::FetchOptions;

pub const ENV_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const ENV_PIPELINE_MODE: &str = "PIPELINE_MODE";
pub const ENV_INTERVAL_SECS: &str = "PIPELINE_INTERVAL_SECS";
pub const DEFAULT_CONFIG_TOML: &str = "config/pipeline.toml";
pub const DEFAULT_CONFIG_JSON: &str = "config/pipeline.json";

// ------------------------------------------------------------
// Modes
// ------------------------------------------------------------

/// Ingestion mode; each one names an age window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineMode {
    #[default]
    Normal,
    Backfill,
    Incremental,
    FullRefresh,
}

impl PipelineMode {
    pub const ALL: [PipelineMode; 4] = [
        PipelineMode::Normal,
        PipelineMode::Backfill,
        PipelineMode::Incremental,
        PipelineMode::FullRefresh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineMode::Normal => "normal",
            PipelineMode::Backfill => "backfill",
            PipelineMode::Incremental => "incremental",
            PipelineMode::FullRefresh => "full-refresh",
        }
    }

    fn valid_names() -> String {
        Self::ALL
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                PipelineError::Configuration(format!(
                    "Invalid pipeline mode \"{wanted}\". Valid modes: {}",
                    Self::valid_names()
                ))
            })
    }
}

/// Age window (days) per mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeWindows {
    pub normal: u32,
    pub backfill: u32,
    pub incremental: u32,
    #[serde(rename = "full-refresh", alias = "full_refresh")]
    pub full_refresh: u32,
}

impl Default for ModeWindows {
    fn default() -> Self {
        Self {
            normal: 30,
            backfill: 200,
            incremental: 7,
            full_refresh: 365,
        }
    }
}

impl ModeWindows {
    pub fn max_age_days(&self, mode: PipelineMode) -> u32 {
        match mode {
            PipelineMode::Normal => self.normal,
            PipelineMode::Backfill => self.backfill,
            PipelineMode::Incremental => self.incremental,
            PipelineMode::FullRefresh => self.full_refresh,
        }
    }

    /// Resolve an optional mode name into `(mode, max_age_days)`.
    /// `None` means the default mode. Unknown names are a configuration error.
    pub fn resolve(&self, requested: Option<&str>) -> Result<(PipelineMode, u32), PipelineError> {
        let mode = match requested {
            None => PipelineMode::default(),
            Some(name) => name.parse::<PipelineMode>()?,
        };
        Ok((mode, self.max_age_days(mode)))
    }
}

// ------------------------------------------------------------
// Sections
// ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub timeout_ms: u64,
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            retries: 2,
            retry_delay_ms: 2_000,
        }
    }
}

impl FetchSettings {
    pub fn to_options(&self) -> FetchOptions {
        FetchOptions {
            timeout: Duration::from_millis(self.timeout_ms),
            retries: self.retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSettings {
    pub enabled: bool,
    /// "openai" | "keyword" (case-insensitive)
    pub provider: Option<String>,
    pub model: Option<String>,
    pub batch_size: usize,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: None,
            model: None,
            batch_size: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceSettings {
    /// Summary must be strictly longer than this.
    pub min_summary_chars: usize,
}

impl Default for RelevanceSettings {
    fn default() -> Self {
        Self {
            min_summary_chars: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub interval_secs: u64,
    pub mode: String,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval_secs: 6 * 3600,
            mode: PipelineMode::Normal.as_str().to_string(),
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub fetch: FetchSettings,
    pub modes: ModeWindows,
    pub ai: AiSettings,
    pub relevance: RelevanceSettings,
    pub scheduler: SchedulerSettings,
}

impl PipelineConfig {
    /// Load from an explicit path. Supports TOML or JSON.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg = parse_config(&content, ext.as_str())
            .with_context(|| format!("parsing pipeline config {}", path.display()))?;
        Ok(cfg.sanitized())
    }

    /// Load using env var + fallbacks (see module docs).
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        let toml_p = PathBuf::from(DEFAULT_CONFIG_TOML);
        if toml_p.exists() {
            return Self::load_from(&toml_p);
        }
        let json_p = PathBuf::from(DEFAULT_CONFIG_JSON);
        if json_p.exists() {
            return Self::load_from(&json_p);
        }
        Ok(Self::default())
    }

    /// Apply `PIPELINE_MODE` and `PIPELINE_INTERVAL_SECS`. The mode is validated
    /// when a run starts; an unparsable interval is ignored with a warning.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(mode) = std::env::var(ENV_PIPELINE_MODE) {
            if !mode.trim().is_empty() {
                self.scheduler.mode = mode.trim().to_string();
            }
        }
        if let Ok(raw) = std::env::var(ENV_INTERVAL_SECS) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.scheduler.interval_secs = secs,
                _ => tracing::warn!(value = %raw, "ignoring invalid {ENV_INTERVAL_SECS}"),
            }
        }
        self
    }

    /// Replace nonsensical values with defaults.
    pub fn sanitized(mut self) -> Self {
        let d = FetchSettings::default();
        if self.fetch.timeout_ms == 0 {
            self.fetch.timeout_ms = d.timeout_ms;
        }
        if self.ai.batch_size == 0 {
            self.ai.batch_size = AiSettings::default().batch_size;
        }
        if self.scheduler.interval_secs == 0 {
            self.scheduler.interval_secs = SchedulerSettings::default().interval_secs;
        }
        if let Some(p) = self.ai.provider.as_mut() {
            *p = p.trim().to_ascii_lowercase();
        }
        self
    }

    /// JSON snapshot stored alongside the execution record.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<PipelineConfig> {
    if hint_ext == "json" {
        return serde_json::from_str(s).map_err(Into::into);
    }
    match toml::from_str::<PipelineConfig>(s) {
        Ok(cfg) => Ok(cfg),
        Err(toml_err) => serde_json::from_str(s)
            .map_err(|_| anyhow!("unsupported pipeline config format: {toml_err}")),
    }
}
