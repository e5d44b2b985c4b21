use std::sync::Arc;

use anyhow::Result;
use axum::http::{header::HeaderName, HeaderMap, HeaderValue, StatusCode};
use axum::{extract::Extension, routing::get, AddExtensionLayer, Router};
use futures::prelude::*;
use mastership_core::MastershipService;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Config;

const METRIC_STORE_MASTERED: &str = "mastership_store_mastered_devices";

/// State of the metrics endpoint.
pub struct PromState {
    pub handle: PrometheusHandle,
    /// Consulted on every scrape for gauges which are read from the store.
    pub service: Arc<MastershipService>,
}

/// Spawns a prometheus server which renders the given recorder's metrics.
pub fn spawn_prom_server(config: &Config, state: Arc<PromState>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<Result<()>> {
    metrics::register_gauge!(METRIC_STORE_MASTERED, metrics::Unit::Count, "devices the store records this node as mastering");
    let app = Router::new().route("/metrics", get(prometheus_scrape)).layer(AddExtensionLayer::new(state));
    let server = axum::Server::bind(&([0, 0, 0, 0], config.metrics_port).into())
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move {
            let _res = shutdown.recv().await;
        });
    tracing::info!("metrics server is listening at 0.0.0.0:{}/metrics", config.metrics_port);
    tokio::spawn(server.map_err(anyhow::Error::from))
}

/// Handle Prometheus metrics scraping.
pub(super) async fn prometheus_scrape(Extension(state): Extension<Arc<PromState>>) -> (StatusCode, HeaderMap, String) {
    match state.service.get_devices_of(state.service.local_node()) {
        Ok(devices) => metrics::gauge!(METRIC_STORE_MASTERED, devices.len() as f64),
        Err(err) => tracing::warn!(error = ?err, "error counting mastered devices for scrape"),
    }
    let mut headers = HeaderMap::new();
    headers.insert(HeaderName::from_static("content-type"), HeaderValue::from_static("text/plain; version=0.0.4"));
    (StatusCode::OK, headers, state.handle.render())
}
