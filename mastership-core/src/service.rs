//! The mastership service.
//!
//! A façade over the `MastershipStore` which supplies the local node's identity, runs mutations
//! as spawned tasks whose results are delivered through `PendingResult`, and fans events out to
//! registered listeners.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::DashMap;
use derive_more::Display;
use futures::stream::StreamExt;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use uuid::Uuid;

use crate::error::{MastershipError, MastershipResult};
use crate::event::MastershipEvent;
use crate::ids::{DeviceId, MastershipRole, NodeId};
use crate::info::{MastershipInfo, RoleInfo};
use crate::store::MastershipStore;
use crate::term::MastershipTerm;

const METRIC_LISTENER_LAGGED: &str = "mastership_listener_lagged_events";
const METRIC_LISTENERS: &str = "mastership_listeners";

/// A consumer of mastership events.
///
/// Each listener is driven by its own task, so a slow listener delays only its own deliveries.
/// Events of a given device are delivered in commit order.
pub trait MastershipListener: Send + Sync + 'static {
    /// Handle a mastership event.
    fn event(&self, event: &MastershipEvent);
}

/// The ID of a registered listener.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

/// The eventual result of a mastership mutation.
///
/// The mutation runs on its own task. Dropping this value only gives up on observing the result;
/// the mutation itself still runs to completion.
pub struct PendingResult<T> {
    rx: oneshot::Receiver<MastershipResult<T>>,
}

impl<T: Send + 'static> PendingResult<T> {
    /// Spawn the given mutation, returning a handle to its eventual result.
    fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = MastershipResult<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let _res = tx.send(fut.await);
        });
        Self { rx }
    }
}

impl<T> Future for PendingResult<T> {
    type Output = MastershipResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(res)) => Poll::Ready(res),
            Poll::Ready(Err(_)) => Poll::Ready(Err(MastershipError::Cancelled)),
        }
    }
}

/// The node-local entrypoint to mastership coordination.
pub struct MastershipService {
    store: Arc<MastershipStore>,
    /// Forwarding tasks of all registered listeners.
    listeners: DashMap<ListenerId, JoinHandle<()>>,
}

impl MastershipService {
    /// Create a new instance.
    pub fn new(store: Arc<MastershipStore>) -> Self {
        metrics::register_counter!(METRIC_LISTENER_LAGGED, metrics::Unit::Count, "events missed by listeners which fell behind");
        metrics::register_gauge!(METRIC_LISTENERS, metrics::Unit::Count, "registered mastership listeners");
        Self {
            store,
            listeners: DashMap::new(),
        }
    }

    /// The identity of this node.
    pub fn local_node(&self) -> &NodeId {
        self.store.roster().local_node()
    }

    /// Get the role of this node for `device`.
    pub fn get_local_role(&self, device: &DeviceId) -> MastershipResult<MastershipRole> {
        self.store.get_role(self.local_node(), device)
    }

    /// Check if this node is the master of `device`.
    pub fn is_local_master(&self, device: &DeviceId) -> MastershipResult<bool> {
        Ok(matches!(self.get_local_role(device)?, MastershipRole::Master))
    }

    pub fn get_role(&self, node: &NodeId, device: &DeviceId) -> MastershipResult<MastershipRole> {
        self.store.get_role(node, device)
    }

    pub fn get_master(&self, device: &DeviceId) -> MastershipResult<Option<NodeId>> {
        self.store.get_master(device)
    }

    pub fn get_nodes_for(&self, device: &DeviceId) -> MastershipResult<RoleInfo> {
        self.store.get_nodes_for(device)
    }

    pub fn get_mastership_for(&self, device: &DeviceId) -> MastershipResult<MastershipInfo> {
        self.store.get_mastership_for(device)
    }

    pub fn get_devices_of(&self, node: &NodeId) -> MastershipResult<BTreeSet<DeviceId>> {
        self.store.get_devices_of(node)
    }

    pub fn get_term_for(&self, device: &DeviceId) -> MastershipResult<Option<MastershipTerm>> {
        self.store.get_term_for(device)
    }

    /// Request a role for this node on `device`.
    pub fn request_role_for(&self, device: &DeviceId) -> PendingResult<MastershipRole> {
        let (store, node, device) = (self.store.clone(), self.local_node().clone(), device.clone());
        PendingResult::spawn(async move { store.request_role(&node, &device).await })
    }

    /// Relinquish any role this node holds for `device`.
    pub fn relinquish_mastership(&self, device: &DeviceId) -> PendingResult<Option<MastershipEvent>> {
        let (store, node, device) = (self.store.clone(), self.local_node().clone(), device.clone());
        PendingResult::spawn(async move { store.relinquish_role(&node, &device).await })
    }

    /// Install `node` as the master of `device`.
    pub fn set_master(&self, node: &NodeId, device: &DeviceId) -> PendingResult<Option<MastershipEvent>> {
        let (store, node, device) = (self.store.clone(), node.clone(), device.clone());
        PendingResult::spawn(async move { store.set_master(&node, &device).await })
    }

    /// Remove every role held by `node`, which the membership layer reports as unreachable.
    ///
    /// The roster must already report `node` as unreachable, otherwise it may be re-elected
    /// as the replacement of its own devices.
    pub fn on_node_unreachable(&self, node: &NodeId) -> PendingResult<Vec<MastershipEvent>> {
        let (store, node) = (self.store.clone(), node.clone());
        PendingResult::spawn(async move { store.evict_node(&node).await })
    }

    /// Forget `device`, which has been removed from the cluster.
    pub fn remove_device(&self, device: &DeviceId) -> PendingResult<()> {
        let (store, device) = (self.store.clone(), device.clone());
        PendingResult::spawn(async move { store.purge(&device).await })
    }

    /// Subscribe to the raw event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<MastershipEvent> {
        self.store.subscribe()
    }

    /// Register a listener, which will receive every event published from now on.
    pub fn add_listener(&self, listener: Arc<dyn MastershipListener>) -> ListenerId {
        let id = ListenerId(Uuid::new_v4());
        let mut events = BroadcastStream::new(self.store.subscribe());
        let handle = tokio::spawn(async move {
            while let Some(res) = events.next().await {
                match res {
                    Ok(event) => listener.event(&event),
                    Err(BroadcastStreamRecvError::Lagged(missed)) => {
                        tracing::warn!(listener = %id, missed, "mastership listener fell behind, events were dropped");
                        metrics::counter!(METRIC_LISTENER_LAGGED, missed);
                    }
                }
            }
        });
        self.listeners.insert(id, handle);
        metrics::gauge!(METRIC_LISTENERS, self.listeners.len() as f64);
        id
    }

    /// Unregister a listener, returning `false` if it was not registered.
    pub fn remove_listener(&self, id: &ListenerId) -> bool {
        let removed = match self.listeners.remove(id) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        };
        metrics::gauge!(METRIC_LISTENERS, self.listeners.len() as f64);
        removed
    }
}

impl Drop for MastershipService {
    fn drop(&mut self) {
        self.listeners.iter().for_each(|handle| handle.value().abort());
    }
}
