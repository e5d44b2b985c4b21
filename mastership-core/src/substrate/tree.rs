use sled::Tree;

use crate::error::{MastershipError, MastershipResult};
use crate::ids::DeviceId;
use crate::record::MastershipRecord;
use crate::substrate::{CasOutcome, RecordSubstrate};

/// A substrate backed by a sled tree, keyed by device ID.
///
/// Values are the prost encoding of each record. Encoding is deterministic, so the re-encoded
/// expected record is byte-for-byte comparable with the stored value.
#[derive(Clone)]
pub struct SledSubstrate {
    tree: Tree,
}

impl SledSubstrate {
    /// Create a new instance over the given tree.
    pub fn new(tree: Tree) -> Self {
        Self { tree }
    }
}

fn unavailable(err: sled::Error) -> MastershipError {
    MastershipError::StoreUnavailable(err.to_string())
}

impl RecordSubstrate for SledSubstrate {
    fn get(&self, device: &DeviceId) -> MastershipResult<Option<MastershipRecord>> {
        self.tree
            .get(device.as_str().as_bytes())
            .map_err(unavailable)?
            .map(|val| MastershipRecord::decode(&val))
            .transpose()
    }

    fn compare_and_swap(&self, device: &DeviceId, expected: Option<&MastershipRecord>, next: Option<&MastershipRecord>) -> MastershipResult<CasOutcome> {
        let old = expected.map(MastershipRecord::encode).transpose()?;
        let new = next.map(MastershipRecord::encode).transpose()?;
        match self.tree.compare_and_swap(device.as_str().as_bytes(), old, new).map_err(unavailable)? {
            Ok(()) => Ok(CasOutcome::Committed),
            Err(_) => Ok(CasOutcome::Conflict),
        }
    }

    fn scan(&self) -> MastershipResult<Vec<(DeviceId, MastershipRecord)>> {
        let mut records = vec![];
        for kv_res in self.tree.iter() {
            let (key, val) = kv_res.map_err(unavailable)?;
            let device = std::str::from_utf8(&key).map_err(|err| MastershipError::Codec(err.to_string()))?;
            records.push((DeviceId::from(device), MastershipRecord::decode(&val)?));
        }
        Ok(records)
    }
}
