// src/error.rs
//! Error taxonomy for a pipeline run.
//!
//! Per-item and per-source failures are recovered locally and only counted;
//! `Configuration` and `Unexpected` are the two kinds that abort a run.

use std::time::Duration;

use thiserror::Error;

/// Error returned by the fetch orchestrator for one source.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Circuit is open: the source failed repeatedly and is still cooling down.
    #[error("source {source_id} temporarily disabled due to repeated failures")]
    Skipped { source_id: String },

    /// The connector did not answer within the hard timeout.
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The connector returned an error (network, parse, ...).
    #[error("{0:#}")]
    Source(anyhow::Error),
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout(_))
    }
}

/// Run-level error kinds.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Timeout/network failure of one source after retries. Never aborts a run.
    #[error("source {source_id} failed: {error}")]
    TransientSource {
        source_id: String,
        #[source]
        error: FetchError,
    },

    /// A malformed item. Dropped and counted.
    #[error("invalid item {url}: {reason}")]
    Validation { url: String, reason: String },

    /// Write failure for one record. The item is marked failed.
    #[error("Failed to insert: {url} - {message}")]
    Persistence { url: String, message: String },

    /// Whole-batch enrichment failure.
    #[error("AI batch {batch} ({size} items) failed: {message}")]
    AiBatch {
        batch: usize,
        size: usize,
        message: String,
    },

    /// Invalid run configuration. Raised before any I/O.
    #[error("{0}")]
    Configuration(String),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}
