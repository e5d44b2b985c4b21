//! The replicated per-device mastership record, and the election transitions over it.
//!
//! Transitions are pure functions of the current record and the node roster. They compute the
//! record to commit (if anything changes at all), the resulting role of the calling node, and the
//! type of event which the commit represents. The store is responsible for committing the output
//! with a compare-and-swap and for retrying the transition on conflict.

use prost::Message;

use crate::error::{MastershipError, MastershipResult};
use crate::event::MastershipEventType;
use crate::ids::{MastershipRole, NodeId};
use crate::info::{MastershipInfo, RoleInfo};
use crate::roster::NodeRoster;
use crate::term::MastershipTerm;

/// The authoritative ownership state of a single device.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MastershipRecord {
    /// The current master, absent if the device is suspended.
    master: Option<NodeId>,
    /// Candidate nodes in the order they requested a role, never containing the master.
    backups: Vec<NodeId>,
    /// The term number of the current master, or of the last master if suspended.
    term_number: u64,
}

/// The storage model of a `MastershipRecord`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MastershipRecordModel {
    /// The current master, if any.
    #[prost(string, optional, tag = "1")]
    pub master: ::core::option::Option<::prost::alloc::string::String>,
    /// Candidate nodes in rank order.
    #[prost(string, repeated, tag = "2")]
    pub backups: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    /// The term number of the record.
    #[prost(uint64, tag = "3")]
    pub term_number: u64,
}

/// The output of an election transition.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    /// The record to commit, or `None` if the current state already satisfies the request.
    pub next: Option<MastershipRecord>,
    /// The role of the requesting node once the transition is committed.
    pub role: MastershipRole,
    /// The type of event to emit once the transition is committed.
    pub event_type: Option<MastershipEventType>,
}

impl Transition {
    fn noop(current: Option<&MastershipRecord>, node: &NodeId) -> Self {
        Self {
            next: None,
            role: current.map(|rec| rec.role_of(node)).unwrap_or(MastershipRole::None),
            event_type: None,
        }
    }

    /// Build a transition, collapsing it to a no-op if the record did not change.
    fn from_update(current: &MastershipRecord, next: MastershipRecord, role: MastershipRole, event_type: Option<MastershipEventType>) -> Self {
        if &next == current {
            return Self { next: None, role, event_type: None };
        }
        Self {
            next: Some(next),
            role,
            event_type,
        }
    }
}

impl MastershipRecord {
    /// Create a record for a device's very first master.
    pub fn first_master(master: NodeId) -> Self {
        Self {
            master: Some(master),
            backups: vec![],
            term_number: 0,
        }
    }

    pub fn master(&self) -> Option<&NodeId> {
        self.master.as_ref()
    }

    pub fn backups(&self) -> &[NodeId] {
        &self.backups
    }

    pub fn term_number(&self) -> u64 {
        self.term_number
    }

    /// The current term, absent while the device has no master.
    pub fn term(&self) -> Option<MastershipTerm> {
        self.master.clone().map(|master| MastershipTerm::new(master, self.term_number))
    }

    /// The role held by the given node according to this record.
    pub fn role_of(&self, node: &NodeId) -> MastershipRole {
        if self.master.as_ref() == Some(node) {
            MastershipRole::Master
        } else if self.backups.contains(node) {
            MastershipRole::Standby
        } else {
            MastershipRole::None
        }
    }

    pub fn role_info(&self) -> RoleInfo {
        RoleInfo::new(self.master.clone(), self.backups.clone())
    }

    /// Build a full role snapshot covering all of the given nodes.
    pub fn mastership_info(&self, nodes: impl IntoIterator<Item = NodeId>) -> MastershipInfo {
        MastershipInfo::new(self.term_number, self.master.clone(), self.backups.clone(), nodes)
    }

    /// Encode this record into its storage representation.
    pub fn encode(&self) -> MastershipResult<Vec<u8>> {
        let model = MastershipRecordModel {
            master: self.master.as_ref().map(|node| node.as_str().to_string()),
            backups: self.backups.iter().map(|node| node.as_str().to_string()).collect(),
            term_number: self.term_number,
        };
        let mut buf = Vec::with_capacity(model.encoded_len());
        model.encode(&mut buf).map_err(|err| MastershipError::Codec(err.to_string()))?;
        Ok(buf)
    }

    /// Decode a record from its storage representation.
    pub fn decode(data: &[u8]) -> MastershipResult<Self> {
        let model = MastershipRecordModel::decode(data).map_err(|err| MastershipError::Codec(err.to_string()))?;
        Ok(Self {
            master: model.master.map(NodeId::from),
            backups: model.backups.into_iter().map(NodeId::from).collect(),
            term_number: model.term_number,
        })
    }

    /// Promote the first reachable backup to master under the next term.
    ///
    /// Unreachable candidates are dropped along the way. When no candidate remains the record is
    /// left without a master and its term number untouched.
    fn promote_next(&mut self, roster: &dyn NodeRoster) -> MastershipEventType {
        while !self.backups.is_empty() {
            let candidate = self.backups.remove(0);
            if roster.is_reachable(&candidate) {
                self.master = Some(candidate);
                self.term_number += 1;
                return MastershipEventType::MasterChanged;
            }
            tracing::debug!(node = %candidate, "skipping unreachable mastership candidate");
        }
        self.master = None;
        MastershipEventType::Suspended
    }
}

/// Request a role for `node`.
///
/// - No record: `node` becomes the first master under term 0.
/// - `node` is master: no-op.
/// - The record has no master: `node` becomes master under the next term.
/// - Otherwise `node` is ranked as a backup, if it is not one already.
///
/// A recorded master which the roster reports as unreachable is first replaced as though it had
/// relinquished mastership.
pub fn request_role(current: Option<&MastershipRecord>, node: &NodeId, roster: &dyn NodeRoster) -> Transition {
    let current = match current {
        Some(current) => current,
        None => {
            return Transition {
                next: Some(MastershipRecord::first_master(node.clone())),
                role: MastershipRole::Master,
                event_type: Some(MastershipEventType::MasterChanged),
            }
        }
    };

    let mut next = current.clone();
    let mut event_type = None;
    if let Some(master) = next.master.clone() {
        if &master != node && !roster.is_reachable(&master) {
            tracing::debug!(%master, "recorded master is unreachable, electing a replacement");
            next.master = None;
            event_type = Some(next.promote_next(roster));
        }
    }

    let role = match next.master.as_ref() {
        Some(master) if master == node => MastershipRole::Master,
        Some(_) => {
            if !next.backups.contains(node) {
                next.backups.push(node.clone());
                event_type.get_or_insert(MastershipEventType::BackupsChanged);
            }
            MastershipRole::Standby
        }
        None => {
            next.backups.retain(|backup| backup != node);
            next.master = Some(node.clone());
            next.term_number += 1;
            event_type = Some(MastershipEventType::MasterChanged);
            MastershipRole::Master
        }
    };
    Transition::from_update(current, next, role, event_type)
}

/// Install `node` as the master of the device under the next term.
///
/// The previous master, if still reachable, is ranked last among the backups. Installing an
/// unreachable node is skipped.
pub fn set_master(current: Option<&MastershipRecord>, node: &NodeId, roster: &dyn NodeRoster) -> Transition {
    if !roster.is_reachable(node) {
        tracing::warn!(%node, "refusing to install unreachable node as master");
        return Transition::noop(current, node);
    }
    let current = match current {
        Some(current) => current,
        None => {
            return Transition {
                next: Some(MastershipRecord::first_master(node.clone())),
                role: MastershipRole::Master,
                event_type: Some(MastershipEventType::MasterChanged),
            }
        }
    };
    if current.master.as_ref() == Some(node) {
        return Transition::noop(Some(current), node);
    }

    let mut next = current.clone();
    next.backups.retain(|backup| backup != node);
    if let Some(previous) = next.master.take() {
        if roster.is_reachable(&previous) {
            next.backups.push(previous);
        }
    }
    next.master = Some(node.clone());
    next.term_number += 1;
    Transition::from_update(current, next, MastershipRole::Master, Some(MastershipEventType::MasterChanged))
}

/// Relinquish mastership held by `node`.
///
/// The first reachable backup is promoted under the next term. If none remains, the device is
/// suspended. A no-op if `node` is not the master.
pub fn unset_master(current: Option<&MastershipRecord>, node: &NodeId, roster: &dyn NodeRoster) -> Transition {
    let current = match current {
        Some(current) if current.master.as_ref() == Some(node) => current,
        _ => return Transition::noop(current, node),
    };
    let mut next = current.clone();
    next.master = None;
    let event_type = next.promote_next(roster);
    Transition::from_update(current, next, MastershipRole::None, Some(event_type))
}

/// Relinquish any role held by `node`.
///
/// A master relinquishes as per `unset_master`, while a backup is simply removed from the
/// candidate list.
pub fn relinquish_role(current: Option<&MastershipRecord>, node: &NodeId, roster: &dyn NodeRoster) -> Transition {
    match current.map(|rec| rec.role_of(node)) {
        Some(MastershipRole::Master) => unset_master(current, node, roster),
        Some(MastershipRole::Standby) => match current {
            Some(current) => {
                let mut next = current.clone();
                next.backups.retain(|backup| backup != node);
                Transition::from_update(current, next, MastershipRole::None, Some(MastershipEventType::BackupsChanged))
            }
            None => Transition::noop(current, node),
        },
        _ => Transition::noop(current, node),
    }
}
