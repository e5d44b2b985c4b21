//! Term fencing of device control operations.
//!
//! Every control operation sent to a device carries the term under which its sender believed it
//! was master. A device-side fence admits an operation only if its term is at least as new as
//! every term admitted before it, which keeps a deposed master from interleaving writes with its
//! successor.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{MastershipError, MastershipResult};
use crate::ids::DeviceId;
use crate::term::MastershipTerm;

/// A per-device record of the newest admitted mastership term.
#[derive(Default)]
pub struct TermFence {
    admitted: DashMap<DeviceId, MastershipTerm>,
}

impl TermFence {
    /// Create a new instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a control operation for `device` issued under `term`.
    ///
    /// Operations carrying an older term number are rejected, as are operations carrying the
    /// current term number but a different master.
    pub fn admit(&self, device: &DeviceId, term: &MastershipTerm) -> MastershipResult<()> {
        match self.admitted.entry(device.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(term.clone());
            }
            Entry::Occupied(mut entry) => {
                let current = entry.get();
                let stale = term.term_number() < current.term_number()
                    || (term.term_number() == current.term_number() && term.master() != current.master());
                if stale {
                    tracing::warn!(%device, presented = %term, current = %current, "rejecting control operation under stale term");
                    return Err(MastershipError::StaleTerm {
                        device: device.clone(),
                        presented: term.term_number(),
                        current: current.term_number(),
                    });
                }
                if term.term_number() > current.term_number() {
                    entry.insert(term.clone());
                }
            }
        }
        Ok(())
    }

    /// The newest term admitted for `device`.
    pub fn current(&self, device: &DeviceId) -> Option<MastershipTerm> {
        self.admitted.get(device).map(|term| term.value().clone())
    }

    /// Forget everything admitted for `device`.
    pub fn forget(&self, device: &DeviceId) {
        self.admitted.remove(device);
    }
}
