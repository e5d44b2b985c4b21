//! Device lifecycle controller.
//!
//! Drives the local node's roles in response to device connectivity signals from the device
//! provider layer and to mastership events, and guards the issuing of control operations.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use dashmap::DashMap;
use futures::stream::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream, IntervalStream, ReceiverStream};

use crate::error::{MastershipError, MastershipResult};
use crate::event::{MastershipEvent, MastershipEventType};
use crate::fence::TermFence;
use crate::ids::{DeviceId, MastershipRole};
use crate::service::MastershipService;
use crate::term::MastershipTerm;

const METRIC_LOCAL_MASTERED: &str = "mastership_local_mastered_devices";
const METRIC_PROVIDER_FAILURES: &str = "mastership_provider_failures";

/// The device provider layer, which drives devices according to the local node's role.
pub trait DeviceProvider: Send + Sync + 'static {
    /// Apply a new local role for `device`, along with the term under which it was granted.
    fn role_changed(&self, device: &DeviceId, role: MastershipRole, term: Option<&MastershipTerm>) -> Result<()>;
}

/// A connectivity signal from the device provider layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceSignal {
    /// The device is reachable from this node.
    Connected(DeviceId),
    /// The device is no longer reachable from this node.
    Disconnected(DeviceId),
}

/// The local control state of devices, consulted before any control operation is issued.
pub struct ControlGate {
    service: Arc<MastershipService>,
    /// The role under which this node currently drives each device.
    roles: DashMap<DeviceId, MastershipRole>,
    fence: TermFence,
}

impl ControlGate {
    fn new(service: Arc<MastershipService>) -> Self {
        metrics::register_gauge!(METRIC_LOCAL_MASTERED, metrics::Unit::Count, "devices this node is currently driving as master");
        Self {
            service,
            roles: DashMap::new(),
            fence: TermFence::new(),
        }
    }

    /// Authorize a control operation for `device`, returning the term to tag it with.
    ///
    /// Succeeds only if this node drives the device as master and the store still names this
    /// node as master of the current term. Queued operations must call this again right
    /// before they are issued.
    pub fn authorize(&self, device: &DeviceId) -> MastershipResult<MastershipTerm> {
        let local = self.service.local_node();
        let not_master = || MastershipError::NotMaster {
            device: device.clone(),
            node: local.clone(),
        };
        if self.role_of(device) != MastershipRole::Master {
            return Err(not_master());
        }
        match self.service.get_term_for(device)? {
            Some(term) if term.master() == local => Ok(term),
            _ => Err(not_master()),
        }
    }

    /// Admit a control operation arriving for `device` tagged with `term`.
    pub fn admit(&self, device: &DeviceId, term: &MastershipTerm) -> MastershipResult<()> {
        self.fence.admit(device, term)
    }

    /// The newest term admitted for `device`.
    pub fn admitted_term(&self, device: &DeviceId) -> Option<MastershipTerm> {
        self.fence.current(device)
    }

    /// Drop the fencing state of a device which is no longer driven from this node.
    fn forget(&self, device: &DeviceId) {
        self.fence.forget(device);
    }

    /// The role under which this node currently drives `device`.
    pub fn role_of(&self, device: &DeviceId) -> MastershipRole {
        self.roles.get(device).map(|role| *role.value()).unwrap_or(MastershipRole::None)
    }

    /// Update the local role of `device`, returning the previous role.
    fn set_role(&self, device: &DeviceId, role: MastershipRole) -> MastershipRole {
        let previous = match role {
            MastershipRole::None => self.roles.remove(device).map(|(_, role)| role),
            role => self.roles.insert(device.clone(), role),
        }
        .unwrap_or(MastershipRole::None);
        if previous == MastershipRole::Master && role != MastershipRole::Master {
            tracing::info!(%device, "local node deposed, no further control operations will be issued");
        }
        let mastered = self.roles.iter().filter(|role| *role.value() == MastershipRole::Master).count();
        metrics::gauge!(METRIC_LOCAL_MASTERED, mastered as f64);
        previous
    }
}

/// A controller driving the local node's device roles.
pub struct LifecycleCtl {
    service: Arc<MastershipService>,
    provider: Arc<dyn DeviceProvider>,
    gate: Arc<ControlGate>,

    /// Devices currently reachable from this node.
    reachable: BTreeSet<DeviceId>,
    /// The last role handed to the provider for each device.
    applied: HashMap<DeviceId, MastershipRole>,

    /// A channel of device signals from the provider layer.
    signals: ReceiverStream<DeviceSignal>,
    /// The stream of mastership events.
    events: BroadcastStream<MastershipEvent>,
    /// The interval at which local roles are reconciled with the store.
    check_interval: Duration,

    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,
}

impl LifecycleCtl {
    /// Create a new instance.
    pub fn new(
        service: Arc<MastershipService>, provider: Arc<dyn DeviceProvider>, signals: mpsc::Receiver<DeviceSignal>, check_interval: Duration, shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        metrics::register_counter!(METRIC_PROVIDER_FAILURES, metrics::Unit::Count, "role changes which the device provider failed to apply");
        let events = BroadcastStream::new(service.subscribe());
        Self {
            gate: Arc::new(ControlGate::new(service.clone())),
            service,
            provider,
            reachable: Default::default(),
            applied: Default::default(),
            signals: ReceiverStream::new(signals),
            events,
            check_interval,
            shutdown_rx: BroadcastStream::new(shutdown_tx.subscribe()),
        }
    }

    /// A handle to the control gate of this controller.
    pub fn gate(&self) -> Arc<ControlGate> {
        self.gate.clone()
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        tracing::debug!(node = %self.service.local_node(), "device lifecycle controller has started");

        let mut check = IntervalStream::new(tokio::time::interval_at(tokio::time::Instant::now() + self.check_interval, self.check_interval));
        loop {
            tokio::select! {
                Some(signal) = self.signals.next() => self.handle_signal(signal).await,
                Some(res) = self.events.next() => match res {
                    Ok(event) => self.handle_mastership_event(event).await,
                    Err(BroadcastStreamRecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "device lifecycle controller fell behind on mastership events, reconciling");
                        self.mastership_check().await;
                    }
                },
                Some(_) = check.next() => self.mastership_check().await,
                _ = self.shutdown_rx.next() => break,
            }
        }

        tracing::debug!("device lifecycle controller has shutdown");
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn handle_signal(&mut self, signal: DeviceSignal) {
        match signal {
            DeviceSignal::Connected(device) => {
                self.reachable.insert(device.clone());
                self.reassert(&device).await;
            }
            DeviceSignal::Disconnected(device) => {
                self.reachable.remove(&device);
                self.applied.remove(&device);
                self.gate.set_role(&device, MastershipRole::None);
                self.gate.forget(&device);
                self.relinquish(&device).await;
            }
        }
    }

    /// Handle a mastership event, updating the local role of its device.
    #[tracing::instrument(level = "trace", skip(self, event), fields(device = %event.subject(), event = %event.event_type()))]
    async fn handle_mastership_event(&mut self, event: MastershipEvent) {
        if event.event_type() == MastershipEventType::BackupsChanged {
            return;
        }
        let device = event.subject().clone();
        // Events may already be superseded, so the local role is taken from the current record.
        let next_role = match self.service.get_local_role(&device) {
            Ok(role) => role,
            Err(err) => {
                tracing::error!(error = ?err, %device, "error reading local role, falling back to event role info");
                let local = self.service.local_node();
                let role_info = event.role_info();
                if role_info.master() == Some(local) || role_info.backups().contains(local) {
                    MastershipRole::Standby
                } else {
                    MastershipRole::None
                }
            }
        };

        // Writes stop before anything else happens.
        self.gate.set_role(&device, next_role);
        if !self.reachable.contains(&device) {
            if next_role != MastershipRole::None {
                tracing::debug!(%device, role = %next_role, "device not reachable locally, relinquishing role");
                self.relinquish(&device).await;
            }
            return;
        }
        let term = match next_role {
            MastershipRole::Master => self.service.get_term_for(&device).ok().flatten(),
            _ => None,
        };
        self.apply_role(&device, next_role, term.as_ref()).await;
    }

    /// Reconcile local roles with the store.
    ///
    /// Reachable devices for which this node holds no role request one again. Roles changed
    /// without an observed event are applied as found, and devices which this node masters
    /// without reaching them are relinquished.
    #[tracing::instrument(level = "trace", skip(self))]
    async fn mastership_check(&mut self) {
        let devices: Vec<DeviceId> = self.reachable.iter().cloned().collect();
        for device in devices {
            match self.service.get_local_role(&device) {
                Ok(MastershipRole::None) => {
                    tracing::debug!(%device, "reachable device has no local role, reasserting");
                    self.reassert(&device).await;
                }
                Ok(role) if self.gate.role_of(&device) != role || self.applied.get(&device) != Some(&role) => {
                    tracing::debug!(%device, %role, "local role changed without an observed event, applying");
                    self.gate.set_role(&device, role);
                    let term = match role {
                        MastershipRole::Master => match self.service.get_term_for(&device) {
                            Ok(term) => term,
                            Err(err) => {
                                tracing::error!(error = ?err, %device, "error reading term of mastered device");
                                continue;
                            }
                        },
                        _ => None,
                    };
                    self.apply_role(&device, role, term.as_ref()).await;
                }
                Ok(_) => (),
                Err(err) => tracing::error!(error = ?err, %device, "error checking local role"),
            }
        }

        let mastered = match self.service.get_devices_of(self.service.local_node()) {
            Ok(mastered) => mastered,
            Err(err) => {
                tracing::error!(error = ?err, "error listing locally mastered devices");
                return;
            }
        };
        for device in mastered.iter().filter(|device| !self.reachable.contains(*device)) {
            tracing::debug!(%device, "mastered device is not reachable locally, relinquishing");
            self.gate.set_role(device, MastershipRole::None);
            self.relinquish(device).await;
        }
    }

    /// Request a role for a reachable device and hand it to the provider.
    async fn reassert(&mut self, device: &DeviceId) {
        let role = match self.service.request_role_for(device).await {
            Ok(role) => role,
            Err(err) => {
                tracing::error!(error = ?err, %device, "error requesting device role");
                return;
            }
        };
        let term = match role {
            MastershipRole::Master => match self.service.get_term_for(device) {
                Ok(term) => term,
                Err(err) => {
                    tracing::error!(error = ?err, %device, "error reading term of newly mastered device");
                    return;
                }
            },
            _ => None,
        };
        self.gate.set_role(device, role);
        self.apply_role(device, role, term.as_ref()).await;
    }

    /// Hand a role to the provider, relinquishing it if the provider fails to apply it.
    async fn apply_role(&mut self, device: &DeviceId, role: MastershipRole, term: Option<&MastershipTerm>) {
        if self.applied.get(device) == Some(&role) {
            return;
        }
        match self.provider.role_changed(device, role, term) {
            Ok(()) => {
                self.applied.insert(device.clone(), role);
            }
            Err(err) => {
                tracing::error!(error = ?err, %device, %role, "device provider failed to apply role, relinquishing");
                metrics::increment_counter!(METRIC_PROVIDER_FAILURES);
                self.applied.remove(device);
                self.gate.set_role(device, MastershipRole::None);
                self.relinquish(device).await;
            }
        }
    }

    async fn relinquish(&self, device: &DeviceId) {
        if let Err(err) = self.service.relinquish_mastership(device).await {
            tracing::error!(error = ?err, %device, "error relinquishing device role");
        }
    }
}
