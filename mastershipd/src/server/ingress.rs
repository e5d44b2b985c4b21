//! HTTP ingress of device and membership signals.
//!
//! The device provider layer reports device connectivity here, and the cluster membership layer
//! reports node liveness.

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{AddExtensionLayer, Router};
use futures::prelude::*;
use mastership_core::{DeviceId, DeviceSignal, MastershipService, NodeId, NodeRoster, StaticRoster};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::MastershipErrorExt;

/// Shared state of the ingress handlers.
pub struct IngressState {
    pub service: Arc<MastershipService>,
    pub roster: Arc<StaticRoster>,
    /// A channel of device signals to the lifecycle controller.
    pub signals: mpsc::Sender<DeviceSignal>,
}

impl IngressState {
    async fn signal(&self, signal: DeviceSignal) -> (StatusCode, String) {
        match self.signals.send(signal).await {
            Ok(()) => (StatusCode::ACCEPTED, String::new()),
            Err(err) => {
                tracing::error!(signal = ?err.0, "device lifecycle controller is not running, dropping signal");
                (StatusCode::SERVICE_UNAVAILABLE, "device lifecycle controller is not running".into())
            }
        }
    }
}

/// Spawns the ingress server.
pub fn spawn_ingress_server(config: &Config, state: Arc<IngressState>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<Result<()>> {
    let app = Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/devices/:device/connected", post(device_connected))
        .route("/devices/:device/disconnected", post(device_disconnected))
        .route("/devices/:device", delete(device_removed))
        .route("/nodes/:node/unreachable", post(node_unreachable))
        .route("/nodes/:node/reachable", post(node_reachable))
        .layer(AddExtensionLayer::new(state));
    let server = axum::Server::bind(&([0, 0, 0, 0], config.http_port).into())
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move {
            let _res = shutdown.recv().await;
        });
    tracing::info!("ingress server is listening at 0.0.0.0:{}", config.http_port);
    tokio::spawn(server.map_err(anyhow::Error::from))
}

pub(super) async fn device_connected(Extension(state): Extension<Arc<IngressState>>, Path(device): Path<String>) -> (StatusCode, String) {
    state.signal(DeviceSignal::Connected(DeviceId::from(device))).await
}

pub(super) async fn device_disconnected(Extension(state): Extension<Arc<IngressState>>, Path(device): Path<String>) -> (StatusCode, String) {
    state.signal(DeviceSignal::Disconnected(DeviceId::from(device))).await
}

/// Handle the removal of a device from the cluster.
pub(super) async fn device_removed(Extension(state): Extension<Arc<IngressState>>, Path(device): Path<String>) -> (StatusCode, String) {
    let device = DeviceId::from(device);
    let (status, body) = state.signal(DeviceSignal::Disconnected(device.clone())).await;
    if status != StatusCode::ACCEPTED {
        return (status, body);
    }
    match state.service.remove_device(&device).await {
        Ok(()) => (StatusCode::NO_CONTENT, String::new()),
        Err(err) => {
            tracing::error!(error = ?err, %device, "error removing device");
            (err.status(), err.to_string())
        }
    }
}

/// Handle a report from the membership layer that a node is unreachable.
pub(super) async fn node_unreachable(Extension(state): Extension<Arc<IngressState>>, Path(node): Path<String>) -> (StatusCode, String) {
    let node = NodeId::from(node);
    if &node == state.roster.local_node() {
        return (StatusCode::BAD_REQUEST, "the local node can not be marked unreachable".into());
    }
    state.roster.set_reachable(&node, false);
    match state.service.on_node_unreachable(&node).await {
        Ok(events) => (StatusCode::OK, format!("{} devices changed", events.len())),
        Err(err) => {
            tracing::error!(error = ?err, %node, "error evicting unreachable node");
            (err.status(), err.to_string())
        }
    }
}

/// Handle a report from the membership layer that a node is reachable again.
pub(super) async fn node_reachable(Extension(state): Extension<Arc<IngressState>>, Path(node): Path<String>) -> StatusCode {
    state.roster.set_reachable(&NodeId::from(node), true);
    StatusCode::OK
}
