use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use mastership_core::{
    DeviceId, DeviceSignal, MastershipService, MastershipStore, MemorySubstrate, NodeId, NodeRoster, ReadPolicy, RetryPolicy, StaticRoster,
};
use tokio::sync::mpsc;

use super::ingress::{device_connected, device_disconnected, device_removed, node_reachable, node_unreachable, IngressState};

struct Fixture {
    state: Arc<IngressState>,
    store: Arc<MastershipStore>,
    signals: mpsc::Receiver<DeviceSignal>,
}

fn fixture() -> Fixture {
    let roster = Arc::new(StaticRoster::new("node-0".into(), vec!["node-1".into(), "node-2".into()]));
    let store = Arc::new(MastershipStore::new(
        Arc::new(MemorySubstrate::new()),
        roster.clone(),
        RetryPolicy::default(),
        ReadPolicy::Available,
        16,
    ));
    let service = Arc::new(MastershipService::new(store.clone()));
    let (signals_tx, signals) = mpsc::channel(16);
    let state = Arc::new(IngressState {
        service,
        roster,
        signals: signals_tx,
    });
    Fixture { state, store, signals }
}

#[tokio::test]
async fn device_signals_are_forwarded_to_lifecycle() -> Result<()> {
    let mut fx = fixture();

    let (connected, _) = device_connected(Extension(fx.state.clone()), Path("of:0001".into())).await;
    let (disconnected, _) = device_disconnected(Extension(fx.state.clone()), Path("of:0001".into())).await;

    assert_eq!(connected, StatusCode::ACCEPTED);
    assert_eq!(disconnected, StatusCode::ACCEPTED);
    assert_eq!(fx.signals.recv().await, Some(DeviceSignal::Connected("of:0001".into())));
    assert_eq!(fx.signals.recv().await, Some(DeviceSignal::Disconnected("of:0001".into())));
    Ok(())
}

#[tokio::test]
async fn device_signals_fail_without_lifecycle() -> Result<()> {
    let fx = fixture();
    drop(fx.signals);

    let (status, body) = device_connected(Extension(fx.state.clone()), Path("of:0001".into())).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "unexpected status, body {:?}", body);
    Ok(())
}

#[tokio::test]
async fn removed_device_is_purged() -> Result<()> {
    let mut fx = fixture();
    let device = DeviceId::from("of:0001");
    fx.store.request_role(&NodeId::from("node-0"), &device).await?;

    let (status, body) = device_removed(Extension(fx.state.clone()), Path("of:0001".into())).await;

    assert_eq!(status, StatusCode::NO_CONTENT, "unexpected status, body {:?}", body);
    assert_eq!(fx.signals.recv().await, Some(DeviceSignal::Disconnected(device.clone())));
    assert_eq!(fx.state.service.get_master(&device)?, None, "expected device record to be purged");
    Ok(())
}

#[tokio::test]
async fn unreachable_node_is_evicted() -> Result<()> {
    let fx = fixture();
    let device = DeviceId::from("of:0001");
    fx.store.request_role(&NodeId::from("node-1"), &device).await?;
    fx.store.request_role(&NodeId::from("node-0"), &device).await?;

    let (status, body) = node_unreachable(Extension(fx.state.clone()), Path("node-1".into())).await;

    assert_eq!(status, StatusCode::OK, "unexpected status, body {:?}", body);
    assert!(!fx.state.roster.is_reachable(&NodeId::from("node-1")), "expected node-1 to be marked unreachable");
    let term = fx.state.service.get_term_for(&device)?.context("expected a current term")?;
    assert_eq!(term.master(), &NodeId::from("node-0"), "expected local node to take over");
    assert_eq!(term.term_number(), 1);

    let status = node_reachable(Extension(fx.state.clone()), Path("node-1".into())).await;

    assert_eq!(status, StatusCode::OK);
    assert!(fx.state.roster.is_reachable(&NodeId::from("node-1")), "expected node-1 to be reachable again");
    Ok(())
}

#[tokio::test]
async fn local_node_can_not_be_evicted() -> Result<()> {
    let fx = fixture();

    let (status, _) = node_unreachable(Extension(fx.state.clone()), Path("node-0".into())).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(fx.state.roster.is_reachable(&NodeId::from("node-0")), "expected local node to stay reachable");
    Ok(())
}
