//! The CAS-capable key-value substrate in which mastership records are stored.
//!
//! Replication of records across the cluster is a concern of the substrate implementation. The
//! store only relies upon per-key atomic reads and compare-and-swap writes.

mod memory;
#[cfg(test)]
mod memory_test;
mod tree;

pub use memory::MemorySubstrate;
pub use tree::SledSubstrate;

use crate::error::MastershipResult;
use crate::ids::DeviceId;
use crate::record::MastershipRecord;

/// The outcome of a compare-and-swap against the substrate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write was committed.
    Committed,
    /// The stored record no longer matched the expected record; nothing was written.
    Conflict,
}

/// A key-value substrate storing one `MastershipRecord` per device.
///
/// Implementations must make each call atomic for its key. Any failure to reach the underlying
/// storage is reported as `MastershipError::StoreUnavailable`.
pub trait RecordSubstrate: Send + Sync + 'static {
    /// Read the record of the given device.
    fn get(&self, device: &DeviceId) -> MastershipResult<Option<MastershipRecord>>;

    /// Replace the record of the given device with `next` if it currently equals `expected`.
    ///
    /// An `expected` of `None` asserts that no record exists, and a `next` of `None` deletes the
    /// record.
    fn compare_and_swap(&self, device: &DeviceId, expected: Option<&MastershipRecord>, next: Option<&MastershipRecord>) -> MastershipResult<CasOutcome>;

    /// Read all stored records.
    fn scan(&self) -> MastershipResult<Vec<(DeviceId, MastershipRecord)>>;
}
