//! Mastership coordination for a cluster of controller nodes sharing a pool of devices.
//!
//! Every device is driven by exactly one master node at a time, with the remaining interested
//! nodes ranked as standbys. Ownership is recorded per device in a CAS-capable substrate and is
//! tagged with a monotonically increasing term which is used to fence writes from deposed masters.

pub mod error;
pub mod event;
pub mod fence;
pub mod ids;
pub mod info;
pub mod lifecycle;
pub mod record;
pub mod roster;
pub mod service;
#[cfg(test)]
mod service_test;
pub mod store;
pub mod substrate;
pub mod term;

pub use error::{MastershipError, MastershipResult};
pub use event::{MastershipEvent, MastershipEventType};
pub use fence::TermFence;
pub use ids::{DeviceId, MastershipRole, NodeId};
pub use info::{MastershipInfo, RoleInfo};
pub use lifecycle::{ControlGate, DeviceProvider, DeviceSignal, LifecycleCtl};
pub use record::MastershipRecord;
pub use roster::{NodeRoster, StaticRoster};
pub use service::{ListenerId, MastershipListener, MastershipService, PendingResult};
pub use store::{MastershipStore, ReadPolicy, RetryPolicy};
pub use substrate::{CasOutcome, MemorySubstrate, RecordSubstrate, SledSubstrate};
pub use term::MastershipTerm;
