//! Mastership error abstractions.

use thiserror::Error;

use crate::ids::{DeviceId, NodeId};

/// A result type where the error is a `MastershipError`.
pub type MastershipResult<T> = ::std::result::Result<T, MastershipError>;

/// Mastership error variants.
///
/// Unknown devices are not an error: they read as `NONE` roles and absent masters.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum MastershipError {
    /// The replicated substrate could not be reached to read or commit a record.
    #[error("mastership store unavailable: {0}")]
    StoreUnavailable(String),
    /// The CAS retry loop for a device exhausted its retry budget. Safe to retry.
    #[error("concurrent modification of device {device} exceeded {attempts} attempts")]
    ConcurrentModificationExceeded { device: DeviceId, attempts: u32 },
    /// A control operation was attempted by a node which is not the device's master.
    #[error("node {node} is not the master of device {device}")]
    NotMaster { device: DeviceId, node: NodeId },
    /// A control operation carried a term older than the newest admitted term for the device.
    #[error("stale term {presented} for device {device}, current term is {current}")]
    StaleTerm { device: DeviceId, presented: u64, current: u64 },
    /// The caller stopped waiting before the result was delivered.
    #[error("the pending mastership request was cancelled")]
    Cancelled,
    /// A stored record could not be encoded or decoded.
    #[error("error encoding or decoding mastership record: {0}")]
    Codec(String),
}

impl MastershipError {
    /// Check if this error is transient, meaning the same request may simply be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConcurrentModificationExceeded { .. } | Self::StoreUnavailable(_))
    }
}
