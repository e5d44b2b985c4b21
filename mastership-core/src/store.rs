//! The mastership store.
//!
//! All mutations follow the same discipline: read the device's record from the substrate, run
//! the election transition against it, and commit the output with a compare-and-swap. A conflict
//! means another writer committed first, in which case the transition is re-run against the new
//! record after a jittered backoff. Local writers to the same device are serialized through a
//! striped lock, so that a commit and the publication of its event are never reordered with
//! respect to other local commits for the same device. Different devices never contend.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::{broadcast, Mutex};

use crate::error::{MastershipError, MastershipResult};
use crate::event::{MastershipEvent, MastershipEventType};
use crate::ids::{DeviceId, MastershipRole, NodeId};
use crate::info::{MastershipInfo, RoleInfo};
use crate::record::{self, MastershipRecord, Transition};
use crate::roster::NodeRoster;
use crate::substrate::{CasOutcome, RecordSubstrate};
use crate::term::MastershipTerm;

/// The number of lock stripes used to serialize local writers per device.
const LOCK_STRIPES: u64 = 64;
/// The default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

pub(crate) const METRIC_CAS_CONFLICTS: &str = "mastership_cas_conflicts";
pub(crate) const METRIC_MASTER_CHANGES: &str = "mastership_master_changes";
pub(crate) const METRIC_SUSPENSIONS: &str = "mastership_suspensions";
pub(crate) const METRIC_STALE_READS: &str = "mastership_stale_reads";

/// The bounds of the CAS retry loop.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// The maximum number of CAS attempts for a single mutation.
    pub max_attempts: u32,
    /// The backoff applied after the first conflict, doubled on each following conflict.
    pub base_backoff: Duration,
    /// The upper bound of any single backoff.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 32,
            base_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// The delay to apply after the given failed attempt, with jitter between 50% and 100%.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base_backoff.saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        let capped = exp.min(self.max_backoff);
        capped.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
    }
}

/// How reads behave while the substrate is unreachable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadPolicy {
    /// Answer from the last record observed by this node.
    Available,
    /// Fail with `StoreUnavailable`.
    Consistent,
}

impl FromStr for ReadPolicy {
    type Err = String;

    fn from_str(val: &str) -> Result<Self, Self::Err> {
        match val.to_ascii_lowercase().as_str() {
            "available" => Ok(Self::Available),
            "consistent" => Ok(Self::Consistent),
            other => Err(format!("unknown read policy {:?}, expected one of `available` or `consistent`", other)),
        }
    }
}

/// The replicated holder of mastership records, and the engine of the election algorithm.
pub struct MastershipStore {
    /// The substrate holding the authoritative records.
    substrate: Arc<dyn RecordSubstrate>,
    /// The cluster's node roster.
    roster: Arc<dyn NodeRoster>,
    /// Bounds of the CAS retry loop.
    retry: RetryPolicy,
    /// Read behavior while the substrate is unreachable.
    read_policy: ReadPolicy,
    /// The last record observed by this node for each device.
    cache: DashMap<DeviceId, MastershipRecord>,
    /// Striped locks serializing local writers of the same device.
    locks: Vec<Mutex<()>>,
    /// The channel on which committed changes are published.
    events: broadcast::Sender<MastershipEvent>,
}

impl MastershipStore {
    /// Create a new instance.
    pub fn new(substrate: Arc<dyn RecordSubstrate>, roster: Arc<dyn NodeRoster>, retry: RetryPolicy, read_policy: ReadPolicy, event_buffer: usize) -> Self {
        metrics::register_counter!(METRIC_CAS_CONFLICTS, metrics::Unit::Count, "compare-and-swap conflicts on mastership records");
        metrics::register_counter!(METRIC_MASTER_CHANGES, metrics::Unit::Count, "committed master changes observed by this node");
        metrics::register_counter!(METRIC_SUSPENSIONS, metrics::Unit::Count, "devices suspended for lack of a reachable candidate");
        metrics::register_counter!(METRIC_STALE_READS, metrics::Unit::Count, "reads answered from the local cache while the substrate was unavailable");
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self {
            substrate,
            roster,
            retry,
            read_policy,
            cache: DashMap::new(),
            locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            events,
        }
    }

    /// The cluster's node roster.
    pub fn roster(&self) -> &Arc<dyn NodeRoster> {
        &self.roster
    }

    /// Subscribe to all events published by this store.
    pub fn subscribe(&self) -> broadcast::Receiver<MastershipEvent> {
        self.events.subscribe()
    }

    /// Request a role for `node` on `device`, electing it as master if the device has none.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn request_role(&self, node: &NodeId, device: &DeviceId) -> MastershipResult<MastershipRole> {
        let (role, _) = self.update(device, |current, roster| record::request_role(current, node, roster)).await?;
        Ok(role)
    }

    /// Install `node` as master of `device` under the next term.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn set_master(&self, node: &NodeId, device: &DeviceId) -> MastershipResult<Option<MastershipEvent>> {
        let (_, event) = self.update(device, |current, roster| record::set_master(current, node, roster)).await?;
        Ok(event)
    }

    /// Relinquish mastership of `device` held by `node`, promoting the next reachable backup.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn unset_master(&self, node: &NodeId, device: &DeviceId) -> MastershipResult<Option<MastershipEvent>> {
        let (_, event) = self.update(device, |current, roster| record::unset_master(current, node, roster)).await?;
        Ok(event)
    }

    /// Relinquish any role which `node` holds for `device`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn relinquish_role(&self, node: &NodeId, device: &DeviceId) -> MastershipResult<Option<MastershipEvent>> {
        let (_, event) = self.update(device, |current, roster| record::relinquish_role(current, node, roster)).await?;
        Ok(event)
    }

    /// Remove `node` from every device on which it holds a role.
    ///
    /// Devices mastered by `node` fail over to their next reachable backup. A failure on one
    /// device does not stop the sweep over the others.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn evict_node(&self, node: &NodeId) -> MastershipResult<Vec<MastershipEvent>> {
        let records = self.substrate.scan()?;
        let mut events = vec![];
        for (device, rec) in records {
            if matches!(rec.role_of(node), MastershipRole::None) {
                continue;
            }
            match self.relinquish_role(node, &device).await {
                Ok(event) => events.extend(event),
                Err(err) => tracing::error!(error = ?err, %node, %device, "error evicting node from device"),
            }
        }
        tracing::info!(%node, changes = events.len(), "node evicted from mastership records");
        Ok(events)
    }

    /// Delete the record of `device`, which is no longer known to the cluster.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn purge(&self, device: &DeviceId) -> MastershipResult<()> {
        let _guard = self.lock_for(device).lock().await;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let current = match self.substrate.get(device)? {
                Some(current) => current,
                None => break,
            };
            match self.substrate.compare_and_swap(device, Some(&current), None)? {
                CasOutcome::Committed => break,
                CasOutcome::Conflict => self.on_conflict(device, attempt).await?,
            }
        }
        self.cache.remove(device);
        tracing::debug!(%device, "mastership record purged");
        Ok(())
    }

    /// Get the role of `node` for `device`.
    pub fn get_role(&self, node: &NodeId, device: &DeviceId) -> MastershipResult<MastershipRole> {
        Ok(self.read(device)?.map(|rec| rec.role_of(node)).unwrap_or(MastershipRole::None))
    }

    /// Get the master of `device`, if any.
    pub fn get_master(&self, device: &DeviceId) -> MastershipResult<Option<NodeId>> {
        Ok(self.read(device)?.and_then(|rec| rec.master().cloned()))
    }

    /// Get the current term of `device`, absent if the device has no master.
    pub fn get_term_for(&self, device: &DeviceId) -> MastershipResult<Option<MastershipTerm>> {
        Ok(self.read(device)?.and_then(|rec| rec.term()))
    }

    /// Get the master and ranked backups of `device`.
    pub fn get_nodes_for(&self, device: &DeviceId) -> MastershipResult<RoleInfo> {
        Ok(self.read(device)?.map(|rec| rec.role_info()).unwrap_or_default())
    }

    /// Get the role of every roster node for `device`.
    pub fn get_mastership_for(&self, device: &DeviceId) -> MastershipResult<MastershipInfo> {
        let rec = self.read(device)?.unwrap_or_default();
        Ok(rec.mastership_info(self.roster.nodes()))
    }

    /// Get all devices mastered by `node`.
    pub fn get_devices_of(&self, node: &NodeId) -> MastershipResult<BTreeSet<DeviceId>> {
        let records = match self.substrate.scan() {
            Ok(records) => records,
            Err(err) => match self.read_policy {
                ReadPolicy::Consistent => return Err(err),
                ReadPolicy::Available => {
                    tracing::warn!(error = ?err, "substrate unavailable, answering device scan from local cache");
                    metrics::increment_counter!(METRIC_STALE_READS);
                    self.cache.iter().map(|rec| (rec.key().clone(), rec.value().clone())).collect()
                }
            },
        };
        Ok(records
            .into_iter()
            .filter(|(_, rec)| rec.master() == Some(node))
            .map(|(device, _)| device)
            .collect())
    }

    /// Read the record of `device`, honoring the configured read policy.
    fn read(&self, device: &DeviceId) -> MastershipResult<Option<MastershipRecord>> {
        match self.substrate.get(device) {
            Ok(rec) => {
                self.observe(device, rec.as_ref());
                Ok(rec)
            }
            Err(err) => match self.read_policy {
                ReadPolicy::Consistent => Err(err),
                ReadPolicy::Available => {
                    tracing::warn!(error = ?err, %device, "substrate unavailable, answering from local cache");
                    metrics::increment_counter!(METRIC_STALE_READS);
                    Ok(self.cache.get(device).map(|rec| rec.value().clone()))
                }
            },
        }
    }

    /// Record the latest observed state of a device in the local cache.
    fn observe(&self, device: &DeviceId, rec: Option<&MastershipRecord>) {
        match rec {
            Some(rec) => {
                self.cache.insert(device.clone(), rec.clone());
            }
            None => {
                self.cache.remove(device);
            }
        }
    }

    fn lock_for(&self, device: &DeviceId) -> &Mutex<()> {
        let idx = seahash::hash(device.as_str().as_bytes()) % LOCK_STRIPES;
        &self.locks[idx as usize]
    }

    /// Account for a CAS conflict, backing off or failing once the retry budget is spent.
    async fn on_conflict(&self, device: &DeviceId, attempt: u32) -> MastershipResult<()> {
        metrics::increment_counter!(METRIC_CAS_CONFLICTS);
        if attempt >= self.retry.max_attempts {
            tracing::warn!(%device, attempt, "mastership record CAS retry budget exhausted");
            return Err(MastershipError::ConcurrentModificationExceeded {
                device: device.clone(),
                attempts: attempt,
            });
        }
        tracing::trace!(%device, attempt, "mastership record CAS conflict, retrying");
        tokio::time::sleep(self.retry.backoff(attempt)).await;
        Ok(())
    }

    /// Run the given transition against the device's record until it commits.
    async fn update<F>(&self, device: &DeviceId, transition: F) -> MastershipResult<(MastershipRole, Option<MastershipEvent>)>
    where
        F: Fn(Option<&MastershipRecord>, &dyn NodeRoster) -> Transition,
    {
        let _guard = self.lock_for(device).lock().await;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let current = self.substrate.get(device)?;
            let output = transition(current.as_ref(), self.roster.as_ref());
            let next = match output.next {
                Some(next) => next,
                None => {
                    self.observe(device, current.as_ref());
                    return Ok((output.role, None));
                }
            };
            match self.substrate.compare_and_swap(device, current.as_ref(), Some(&next))? {
                CasOutcome::Committed => {
                    self.observe(device, Some(&next));
                    let event = output.event_type.map(|event_type| self.publish(event_type, device, &next));
                    return Ok((output.role, event));
                }
                CasOutcome::Conflict => self.on_conflict(device, attempt).await?,
            }
        }
    }

    /// Publish an event for a committed record.
    fn publish(&self, event_type: MastershipEventType, device: &DeviceId, rec: &MastershipRecord) -> MastershipEvent {
        match event_type {
            MastershipEventType::MasterChanged => metrics::increment_counter!(METRIC_MASTER_CHANGES),
            MastershipEventType::Suspended => metrics::increment_counter!(METRIC_SUSPENSIONS),
            MastershipEventType::BackupsChanged => (),
        }
        let event = MastershipEvent::new(event_type, device.clone(), rec.role_info(), rec.term());
        tracing::debug!(
            %device,
            event = %event_type,
            master = ?rec.master(),
            term = rec.term_number(),
            "mastership change committed",
        );
        // No receivers is not an error, the change is committed regardless.
        let _res = self.events.send(event.clone());
        event
    }
}
