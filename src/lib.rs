// src/lib.rs
// Public library surface for the binary and the integration tests.

pub mod config;
pub mod error;

// Source health and fetching
pub mod fetch;
pub mod health;
pub mod ingest;

// Enrichment, dedup and gating
pub mod dedup;
pub mod enrich;
pub mod quality;
pub mod relevance;

// Regulatory events
pub mod events;

// Run orchestration and observability
pub mod metrics;
pub mod pipeline;
pub mod scheduler;
pub mod store;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::config::{PipelineConfig, PipelineMode};
pub use crate::error::{FetchError, PipelineError};
pub use crate::health::HealthRegistry;
pub use crate::pipeline::{run_pipeline, PipelineDeps, PipelineOptions, PipelineResult};
pub use crate::scheduler::{run_guarded, spawn_scheduler, RunLock, SchedulerCfg};
pub use crate::store::MemoryStore;
pub use crate::telemetry::{ExecutionStatus, TriggerSource};
