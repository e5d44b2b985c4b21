//! Device provider and event sinks of the daemon.
//!
//! Device drivers live outside of this process, so the provider only records and logs the role
//! under which this node drives each device.

use anyhow::Result;
use dashmap::DashMap;
use mastership_core::{DeviceId, DeviceProvider, MastershipEvent, MastershipListener, MastershipRole, MastershipTerm};

/// A device provider which records and logs role changes.
#[derive(Default)]
pub struct LoggingDeviceProvider {
    roles: DashMap<DeviceId, MastershipRole>,
}

impl LoggingDeviceProvider {
    /// Create a new instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// The last role applied to the given device.
    pub fn role_of(&self, device: &DeviceId) -> MastershipRole {
        self.roles.get(device).map(|role| *role.value()).unwrap_or(MastershipRole::None)
    }
}

impl DeviceProvider for LoggingDeviceProvider {
    fn role_changed(&self, device: &DeviceId, role: MastershipRole, term: Option<&MastershipTerm>) -> Result<()> {
        match term {
            Some(term) => tracing::info!(%device, %role, %term, "applying device role"),
            None => tracing::info!(%device, %role, "applying device role"),
        }
        match role {
            MastershipRole::None => {
                self.roles.remove(device);
            }
            role => {
                self.roles.insert(device.clone(), role);
            }
        }
        Ok(())
    }
}

/// A listener which logs every mastership event.
pub struct EventLog;

impl MastershipListener for EventLog {
    fn event(&self, event: &MastershipEvent) {
        tracing::info!(
            device = %event.subject(),
            event = %event.event_type(),
            master = ?event.role_info().master(),
            backups = ?event.role_info().backups(),
            term = ?event.term().map(|term| term.term_number()),
            "mastership event",
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use mastership_core::NodeId;

    #[test]
    fn provider_tracks_applied_roles() -> Result<()> {
        let provider = LoggingDeviceProvider::new();
        let device = DeviceId::from("of:0001");
        let term = MastershipTerm::new(NodeId::from("node-0"), 3);

        provider.role_changed(&device, MastershipRole::Master, Some(&term))?;
        assert_eq!(provider.role_of(&device), MastershipRole::Master, "expected master role to be recorded");

        provider.role_changed(&device, MastershipRole::None, None)?;
        assert_eq!(provider.role_of(&device), MastershipRole::None, "expected role to be cleared");
        Ok(())
    }
}
