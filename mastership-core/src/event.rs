use derive_more::Display;
use time::OffsetDateTime;

use crate::ids::DeviceId;
use crate::info::RoleInfo;
use crate::term::MastershipTerm;

/// The kind of ownership change described by a `MastershipEvent`.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum MastershipEventType {
    /// The device's master changed, including the first election of a master.
    #[display(fmt = "MASTER_CHANGED")]
    MasterChanged,
    /// The device's standby list changed while its master stayed the same.
    #[display(fmt = "BACKUPS_CHANGED")]
    BackupsChanged,
    /// The device lost its master and no reachable candidate remains.
    #[display(fmt = "SUSPENDED")]
    Suspended,
}

/// A notification of a committed change to a device's ownership.
#[derive(Clone, Debug, PartialEq)]
pub struct MastershipEvent {
    event_type: MastershipEventType,
    subject: DeviceId,
    role_info: RoleInfo,
    term: Option<MastershipTerm>,
    time: OffsetDateTime,
}

impl MastershipEvent {
    /// Create a new instance stamped with the current time.
    pub fn new(event_type: MastershipEventType, subject: DeviceId, role_info: RoleInfo, term: Option<MastershipTerm>) -> Self {
        Self {
            event_type,
            subject,
            role_info,
            term,
            time: OffsetDateTime::now_utc(),
        }
    }

    pub fn event_type(&self) -> MastershipEventType {
        self.event_type
    }

    pub fn subject(&self) -> &DeviceId {
        &self.subject
    }

    pub fn role_info(&self) -> &RoleInfo {
        &self.role_info
    }

    /// The term committed along with this change, absent when the device has no master.
    pub fn term(&self) -> Option<&MastershipTerm> {
        self.term.as_ref()
    }

    pub fn time(&self) -> OffsetDateTime {
        self.time
    }
}
