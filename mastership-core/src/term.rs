use derive_more::Display;

use crate::ids::NodeId;

/// A master node paired with the term number under which it holds mastership.
///
/// Terms are fencing tokens. Any write sent to a device is tagged with the term the sender
/// believed to be current, and the driver layer drops writes carrying a stale term. Terms are
/// compared for equality only; they are never globally ordered.
#[derive(Clone, Debug, Display, PartialEq, Eq, Hash)]
#[display(fmt = "({}, {})", master, term_number)]
pub struct MastershipTerm {
    master: NodeId,
    term_number: u64,
}

impl MastershipTerm {
    /// Create a new instance.
    pub fn new(master: NodeId, term_number: u64) -> Self {
        Self { master, term_number }
    }

    /// The master node of this term.
    pub fn master(&self) -> &NodeId {
        &self.master
    }

    /// The term number.
    pub fn term_number(&self) -> u64 {
        self.term_number
    }
}
