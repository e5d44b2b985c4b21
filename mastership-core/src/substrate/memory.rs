use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{MastershipError, MastershipResult};
use crate::ids::DeviceId;
use crate::record::MastershipRecord;
use crate::substrate::{CasOutcome, RecordSubstrate};

const ERR_UNAVAILABLE: &str = "in-memory substrate has been marked unavailable";

/// An in-process substrate.
///
/// Suitable for single node deployments and for tests. Availability may be toggled in order to
/// exercise the store's behavior when its substrate can not be reached.
#[derive(Default)]
pub struct MemorySubstrate {
    records: DashMap<DeviceId, MastershipRecord>,
    unavailable: AtomicBool,
}

impl MemorySubstrate {
    /// Create a new instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark this substrate as available or unavailable.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> MastershipResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MastershipError::StoreUnavailable(ERR_UNAVAILABLE.into()));
        }
        Ok(())
    }
}

impl RecordSubstrate for MemorySubstrate {
    fn get(&self, device: &DeviceId) -> MastershipResult<Option<MastershipRecord>> {
        self.ensure_available()?;
        Ok(self.records.get(device).map(|rec| rec.value().clone()))
    }

    fn compare_and_swap(&self, device: &DeviceId, expected: Option<&MastershipRecord>, next: Option<&MastershipRecord>) -> MastershipResult<CasOutcome> {
        self.ensure_available()?;
        match self.records.entry(device.clone()) {
            Entry::Occupied(mut entry) => {
                if expected != Some(entry.get()) {
                    return Ok(CasOutcome::Conflict);
                }
                match next {
                    Some(next) => {
                        entry.insert(next.clone());
                    }
                    None => {
                        entry.remove();
                    }
                }
            }
            Entry::Vacant(entry) => {
                if expected.is_some() {
                    return Ok(CasOutcome::Conflict);
                }
                if let Some(next) = next {
                    entry.insert(next.clone());
                }
            }
        }
        Ok(CasOutcome::Committed)
    }

    fn scan(&self) -> MastershipResult<Vec<(DeviceId, MastershipRecord)>> {
        self.ensure_available()?;
        Ok(self.records.iter().map(|rec| (rec.key().clone(), rec.value().clone())).collect())
    }
}
