use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::gauge;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::ingest::ensure_metrics_described;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder once per process; later calls share it.
    pub fn init() -> Result<Self> {
        let handle = HANDLE
            .get_or_try_init(|| {
                PrometheusBuilder::new()
                    .install_recorder()
                    .context("installing prometheus recorder")
            })?
            .clone();

        ensure_metrics_described();
        gauge!("pipeline_build_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
