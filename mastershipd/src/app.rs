use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::StreamExt;
use mastership_core::{
    LifecycleCtl, ListenerId, MastershipService, MastershipStore, NodeId, SledSubstrate, StaticRoster,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, SignalStream};
use tokio_stream::StreamMap;

use crate::config::Config;
use crate::database::Database;
use crate::provider::{EventLog, LoggingDeviceProvider};
use crate::server::{spawn_ingress_server, spawn_prom_server, IngressState, PromState};

/// The capacity of the device signal channel.
const SIGNAL_BUFFER: usize = 1000;

/// The application object for when the daemon is running as a server.
pub struct App {
    /// The application's runtime config.
    _config: Arc<Config>,
    /// The application's database system.
    db: Database,
    /// The node-local mastership service.
    service: Arc<MastershipService>,
    /// The ID of the listener logging mastership events.
    event_log: ListenerId,

    /// A channel used for triggering graceful shutdown.
    shutdown_tx: broadcast::Sender<()>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,

    /// The join handle of the device lifecycle controller.
    lifecycle_handle: JoinHandle<Result<()>>,
    /// The join handle of the ingress server.
    ingress_server: JoinHandle<Result<()>>,
    /// The join handle of the metrics server.
    metrics_server: JoinHandle<Result<()>>,
}

impl App {
    /// Create a new instance.
    pub async fn new(config: Arc<Config>, metrics: PrometheusHandle) -> Result<Self> {
        let (shutdown_tx, _) = broadcast::channel(10);

        // Initialize this node's storage.
        let db = Database::new(config.clone()).await.context("error opening database")?;
        let tree = db.get_mastership_tree().await.context("error opening mastership tree")?;

        // Build the mastership stack.
        let roster = Arc::new(StaticRoster::new(
            NodeId::from(config.node_id.as_str()),
            config.cluster_nodes.iter().map(|node| NodeId::from(node.as_str())),
        ));
        let store = Arc::new(MastershipStore::new(
            Arc::new(SledSubstrate::new(tree)),
            roster.clone(),
            config.retry_policy(),
            config.read_policy,
            config.event_buffer,
        ));
        let service = Arc::new(MastershipService::new(store));
        let event_log = service.add_listener(Arc::new(EventLog));

        // Spawn various core tasks.
        let (signals_tx, signals_rx) = mpsc::channel(SIGNAL_BUFFER);
        let lifecycle_handle = LifecycleCtl::new(
            service.clone(),
            Arc::new(LoggingDeviceProvider::new()),
            signals_rx,
            config.mastership_check_interval(),
            shutdown_tx.clone(),
        )
        .spawn();

        let ingress_state = Arc::new(IngressState {
            service: service.clone(),
            roster,
            signals: signals_tx,
        });
        let ingress_server = spawn_ingress_server(&config, ingress_state, shutdown_tx.subscribe());
        let prom_state = Arc::new(PromState {
            handle: metrics,
            service: service.clone(),
        });
        let metrics_server = spawn_prom_server(&config, prom_state, shutdown_tx.subscribe());

        Ok(Self {
            _config: config,
            db,
            service,
            event_log,
            shutdown_rx: BroadcastStream::new(shutdown_tx.subscribe()),
            shutdown_tx,
            lifecycle_handle,
            ingress_server,
            metrics_server,
        })
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let mut signals = StreamMap::new();
        signals.insert("sigterm", SignalStream::new(signal(SignalKind::terminate()).context("error building signal stream")?));
        signals.insert("sigint", SignalStream::new(signal(SignalKind::interrupt()).context("error building signal stream")?));

        loop {
            tokio::select! {
                Some((_, sig)) = signals.next() => {
                    tracing::debug!(signal = ?sig, "signal received, beginning graceful shutdown");
                    let _ = self.shutdown_tx.send(());
                    break;
                }
                _ = self.shutdown_rx.next() => break,
            }
        }

        // Begin shutdown routine.
        tracing::debug!("mastership daemon is shutting down");
        if let Err(err) = self.lifecycle_handle.await.context("error joining device lifecycle controller handle").and_then(|res| res) {
            tracing::error!(error = ?err, "error shutting down device lifecycle controller");
        }
        if let Err(err) = self.ingress_server.await.context("error joining ingress server handle").and_then(|res| res) {
            tracing::error!(error = ?err, "error shutting down ingress server");
        }
        if let Err(err) = self.metrics_server.await.context("error joining metrics server handle").and_then(|res| res) {
            tracing::error!(error = ?err, "error shutting down metrics server");
        }
        self.service.remove_listener(&self.event_log);
        if let Err(err) = self.db.flush().await {
            tracing::error!(error = ?err, "error flushing database on shutdown");
        }

        tracing::debug!("mastership daemon shutdown complete");
        Ok(())
    }
}
