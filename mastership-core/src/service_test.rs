use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use crate::event::{MastershipEvent, MastershipEventType};
use crate::ids::{DeviceId, MastershipRole, NodeId};
use crate::roster::StaticRoster;
use crate::service::{MastershipListener, MastershipService};
use crate::store::{MastershipStore, ReadPolicy, RetryPolicy};
use crate::substrate::MemorySubstrate;
use crate::term::MastershipTerm;

/// A listener which forwards every event it receives onto a channel.
struct ChannelListener(mpsc::UnboundedSender<MastershipEvent>);

impl MastershipListener for ChannelListener {
    fn event(&self, event: &MastershipEvent) {
        let _res = self.0.send(event.clone());
    }
}

struct Fixture {
    roster: Arc<StaticRoster>,
    store: Arc<MastershipStore>,
    service: MastershipService,
}

fn fixture() -> Fixture {
    let roster = Arc::new(StaticRoster::new("n1".into(), vec!["n2".into(), "n3".into()]));
    let store = Arc::new(MastershipStore::new(
        Arc::new(MemorySubstrate::new()),
        roster.clone(),
        RetryPolicy::default(),
        ReadPolicy::Available,
        64,
    ));
    let service = MastershipService::new(store.clone());
    Fixture { roster, store, service }
}

fn node(id: &str) -> NodeId {
    NodeId::from(id)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<MastershipEvent>) -> Result<MastershipEvent> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .context("timeout waiting for mastership event")?
        .context("listener channel closed unexpectedly")
}

#[tokio::test]
async fn local_requests_use_the_local_node_identity() -> Result<()> {
    let fx = fixture();
    let d1 = DeviceId::from("of:0001");

    let role = fx.service.request_role_for(&d1).await?;

    assert_eq!(fx.service.local_node(), &node("n1"));
    assert_eq!(role, MastershipRole::Master);
    assert!(fx.service.is_local_master(&d1)?, "expected local node to master the device");
    assert_eq!(fx.service.get_local_role(&d1)?, MastershipRole::Master);
    assert_eq!(fx.service.get_term_for(&d1)?, Some(MastershipTerm::new(node("n1"), 0)));
    assert!(fx.service.get_devices_of(&node("n1"))?.contains(&d1));
    Ok(())
}

#[tokio::test]
async fn relinquish_mastership_hands_device_to_next_candidate() -> Result<()> {
    let fx = fixture();
    let d1 = DeviceId::from("of:0001");
    fx.service.request_role_for(&d1).await?;
    fx.store.request_role(&node("n2"), &d1).await?;

    let event = fx.service.relinquish_mastership(&d1).await?.context("expected a master change")?;

    assert_eq!(event.event_type(), MastershipEventType::MasterChanged);
    assert_eq!(fx.service.get_master(&d1)?, Some(node("n2")));
    assert_eq!(fx.service.get_local_role(&d1)?, MastershipRole::None, "expected local node to hold no role");
    Ok(())
}

#[tokio::test]
async fn dropped_pending_result_still_commits() -> Result<()> {
    let fx = fixture();
    let d1 = DeviceId::from("of:0001");

    drop(fx.service.request_role_for(&d1));

    let mut committed = false;
    for _ in 0..200 {
        if fx.service.get_master(&d1)?.is_some() {
            committed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(committed, "expected the role request to commit after its result was dropped");
    assert_eq!(fx.service.get_master(&d1)?, Some(node("n1")));
    Ok(())
}

#[tokio::test]
async fn listeners_receive_device_events_in_commit_order() -> Result<()> {
    let fx = fixture();
    let (tx, mut rx) = mpsc::unbounded_channel();
    fx.service.add_listener(Arc::new(ChannelListener(tx)));
    let d1 = DeviceId::from("of:0001");

    fx.service.request_role_for(&d1).await?;
    fx.store.request_role(&node("n2"), &d1).await?;
    fx.service.set_master(&node("n2"), &d1).await?;
    fx.service.relinquish_mastership(&d1).await?;

    let expected = [
        (MastershipEventType::MasterChanged, 0),
        (MastershipEventType::BackupsChanged, 0),
        (MastershipEventType::MasterChanged, 1),
        (MastershipEventType::BackupsChanged, 1),
    ];
    for (event_type, term_number) in expected {
        let event = next_event(&mut rx).await?;
        assert_eq!(event.event_type(), event_type, "unexpected event order, got {:?}", event);
        assert_eq!(event.term().map(|term| term.term_number()), Some(term_number));
        assert_eq!(event.subject(), &d1);
    }
    Ok(())
}

#[tokio::test]
async fn removed_listener_is_released() -> Result<()> {
    let fx = fixture();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = fx.service.add_listener(Arc::new(ChannelListener(tx)));

    assert!(fx.service.remove_listener(&id), "expected listener to be removed");
    assert!(!fx.service.remove_listener(&id), "expected second removal to find nothing");
    fx.service.request_role_for(&DeviceId::from("of:0001")).await?;

    let res = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await?;
    assert!(res.is_none(), "expected no events after removal, got {:?}", res);
    Ok(())
}

#[tokio::test]
async fn unreachable_node_loses_all_roles() -> Result<()> {
    let fx = fixture();
    let (d1, d2) = (DeviceId::from("of:0001"), DeviceId::from("of:0002"));
    fx.store.request_role(&node("n2"), &d1).await?;
    fx.service.request_role_for(&d1).await?;
    fx.store.request_role(&node("n3"), &d2).await?;
    fx.store.request_role(&node("n2"), &d2).await?;
    fx.roster.set_reachable(&node("n2"), false);

    let events = fx.service.on_node_unreachable(&node("n2")).await?;

    assert_eq!(events.len(), 2, "expected one event per device, got {:?}", events);
    assert_eq!(fx.service.get_term_for(&d1)?, Some(MastershipTerm::new(node("n1"), 1)), "expected local node to take over d1");
    assert!(fx.service.get_nodes_for(&d2)?.backups().is_empty(), "expected n2 to be dropped from d2 backups");
    Ok(())
}

#[tokio::test]
async fn removed_device_reads_as_unknown() -> Result<()> {
    let fx = fixture();
    let d1 = DeviceId::from("of:0001");
    fx.service.request_role_for(&d1).await?;

    fx.service.remove_device(&d1).await?;

    assert_eq!(fx.service.get_local_role(&d1)?, MastershipRole::None);
    assert_eq!(fx.service.get_master(&d1)?, None);
    let info = fx.service.get_mastership_for(&d1)?;
    assert_eq!(info.get_roles(MastershipRole::None).len(), 3, "expected every node to hold no role");
    Ok(())
}
