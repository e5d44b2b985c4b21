use anyhow::Result;

use crate::error::MastershipError;
use crate::ids::DeviceId;
use crate::record::MastershipRecord;
use crate::substrate::{CasOutcome, MemorySubstrate, RecordSubstrate};

#[test]
fn compare_and_swap_rejects_stale_expectations() -> Result<()> {
    let substrate = MemorySubstrate::new();
    let device = DeviceId::from("of:0001");
    let first = MastershipRecord::first_master("n1".into());
    let other = MastershipRecord::first_master("n2".into());

    assert_eq!(substrate.compare_and_swap(&device, None, Some(&first))?, CasOutcome::Committed);
    assert_eq!(
        substrate.compare_and_swap(&device, None, Some(&other))?,
        CasOutcome::Conflict,
        "expected create to conflict with an existing record"
    );
    assert_eq!(
        substrate.compare_and_swap(&device, Some(&other), None)?,
        CasOutcome::Conflict,
        "expected delete to conflict with a mismatched record"
    );
    assert_eq!(substrate.get(&device)?, Some(first.clone()));

    assert_eq!(substrate.compare_and_swap(&device, Some(&first), None)?, CasOutcome::Committed);
    assert_eq!(substrate.get(&device)?, None, "expected record to be deleted");
    Ok(())
}

#[test]
fn unavailable_substrate_fails_every_call() -> Result<()> {
    let substrate = MemorySubstrate::new();
    let device = DeviceId::from("of:0001");
    substrate.set_available(false);

    let res = substrate.get(&device);

    assert!(matches!(res, Err(MastershipError::StoreUnavailable(_))), "expected StoreUnavailable, got {:?}", res);
    assert!(substrate.scan().is_err(), "expected scan to fail while unavailable");
    substrate.set_available(true);
    assert!(substrate.scan()?.is_empty());
    Ok(())
}
