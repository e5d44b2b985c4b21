//! Read-only ownership snapshots.

use std::collections::BTreeMap;

use crate::ids::{MastershipRole, NodeId};

/// The current master of a device along with its standbys in rank order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoleInfo {
    master: Option<NodeId>,
    backups: Vec<NodeId>,
}

impl RoleInfo {
    /// Create a new instance.
    pub fn new(master: Option<NodeId>, backups: Vec<NodeId>) -> Self {
        Self { master, backups }
    }

    pub fn master(&self) -> Option<&NodeId> {
        self.master.as_ref()
    }

    pub fn backups(&self) -> &[NodeId] {
        &self.backups
    }
}

/// The role of every known cluster node for a device, along with the device's term number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MastershipInfo {
    term: u64,
    master: Option<NodeId>,
    backups: Vec<NodeId>,
    roles: BTreeMap<NodeId, MastershipRole>,
}

impl MastershipInfo {
    /// Create a new instance.
    ///
    /// Every node in `nodes` receives an entry in the role map; nodes which are neither the
    /// master nor a backup map to `NONE`.
    pub fn new(term: u64, master: Option<NodeId>, backups: Vec<NodeId>, nodes: impl IntoIterator<Item = NodeId>) -> Self {
        let mut roles: BTreeMap<NodeId, MastershipRole> = nodes.into_iter().map(|node| (node, MastershipRole::None)).collect();
        for node in backups.iter() {
            roles.insert(node.clone(), MastershipRole::Standby);
        }
        if let Some(node) = master.as_ref() {
            roles.insert(node.clone(), MastershipRole::Master);
        }
        Self { term, master, backups, roles }
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    pub fn master(&self) -> Option<&NodeId> {
        self.master.as_ref()
    }

    pub fn roles(&self) -> &BTreeMap<NodeId, MastershipRole> {
        &self.roles
    }

    /// Get all nodes currently holding the given role.
    ///
    /// Standbys are returned in rank order, and nodes without a role in node ID order.
    pub fn get_roles(&self, role: MastershipRole) -> Vec<NodeId> {
        match role {
            MastershipRole::Master => self.master.iter().cloned().collect(),
            MastershipRole::Standby => self.backups.clone(),
            MastershipRole::None => self
                .roles
                .iter()
                .filter(|(_, role)| matches!(role, MastershipRole::None))
                .map(|(node, _)| node.clone())
                .collect(),
        }
    }

    /// Project this snapshot down to a `RoleInfo`.
    pub fn role_info(&self) -> RoleInfo {
        RoleInfo::new(self.master.clone(), self.backups.clone())
    }
}
