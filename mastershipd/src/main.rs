//! The mastership coordination daemon.

mod app;
mod config;
#[cfg(test)]
mod config_test;
mod database;
#[cfg(test)]
mod database_test;
mod error;
mod provider;
mod server;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::prelude::*;

use crate::app::App;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Setup tracing/logging system.
    tracing_subscriber::registry()
        // Filter spans based on the RUST_LOG env var.
        .with(tracing_subscriber::EnvFilter::from_default_env())
        // Send a copy of all spans to stdout in compact form.
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(true)
        )
        // Install this registry as the global tracing registry.
        .try_init()
        .context("error initializing logging/tracing system")?;

    let cfg = Arc::new(Config::new()?);
    let recorder = PrometheusBuilder::new().add_global_label("node", cfg.node_id.clone()).build();
    let metrics_handle = recorder.handle();
    metrics::set_boxed_recorder(Box::new(recorder)).context("error setting prometheus metrics recorder")?;

    tracing::info!(
        node_id = %cfg.node_id,
        cluster_nodes = ?cfg.cluster_nodes,
        http_port = %cfg.http_port,
        metrics_port = %cfg.metrics_port,
        storage_data_path = %cfg.storage_data_path,
        read_policy = ?cfg.read_policy,
        "starting mastership daemon",
    );
    let app = App::new(cfg, metrics_handle).await?;
    if let Err(err) = app.spawn().await.context("error joining app handle").and_then(|res| res) {
        tracing::error!(error = ?err);
    }

    // Ensure any pending output is flushed.
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    Ok(())
}
