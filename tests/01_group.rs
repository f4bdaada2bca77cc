mod support;

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use gatecrab::group::{Group, GroupEvent, GroupSpec};
use gatecrab::protocol::close_code::NORMAL_CLOSURE;
use gatecrab::shard::{ShardEventKind, ShardStatus};
use support::MockConnector;

fn start() -> (Arc<Group>, mpsc::UnboundedReceiver<GroupEvent>) {
    let (connector, peers) = MockConnector::new();
    support::spawn_auto_gateway(peers);

    let (group, events) = Group::new(
        GroupSpec::new(1, 3..6, 8),
        Arc::new(support::settings()),
        Arc::new(connector),
    );
    (Arc::new(group), events)
}

/// Plays the handshake queue for a single group until it reports ready.
/// Returns the shard ids in the order they asked for a grant.
async fn grant_until_ready(group: &Group, events: &mut mpsc::UnboundedReceiver<GroupEvent>) -> Vec<u32> {
    let mut asked = Vec::new();
    loop {
        match events.recv().await.expect("group event stream ended") {
            GroupEvent::Shard(event) if event.kind == ShardEventKind::NeedHandshake => {
                asked.push(event.shard_id);
                group.identify(event.shard_id).unwrap();
            }
            GroupEvent::Ready { group_id } => {
                assert_eq!(group_id, 1);
                return asked;
            }
            _ => {}
        }
    }
}

#[tokio::test(start_paused = true)]
async fn spawn_connects_every_shard_in_order_and_reports_ready_once() {
    let (group, mut events) = start();

    let spawner = tokio::spawn({
        let group = group.clone();
        async move { group.spawn().await }
    });

    let asked = grant_until_ready(&group, &mut events).await;
    assert_eq!(asked, vec![3, 4, 5]);
    assert!(spawner.await.unwrap().is_empty());
    assert!(group.is_ready());

    let stats = group.snapshot().await;
    assert_eq!(stats.ready, 3);
    assert_eq!(
        stats.shards.iter().map(|s| s.shard_id).collect::<Vec<_>>(),
        vec![3, 4, 5]
    );
    assert!(stats.shards.iter().all(|s| s.status == ShardStatus::Ready));
    assert_eq!(stats.counters.identifies, 3);

    // a resumed shard does not announce the group a second time
    group.reconnect(4).unwrap();
    loop {
        match events.recv().await.unwrap() {
            GroupEvent::Shard(event) if event.kind == ShardEventKind::Resumed => {
                assert_eq!(event.shard_id, 4);
                break;
            }
            GroupEvent::Ready { .. } => panic!("group announced ready twice"),
            _ => {}
        }
    }
    assert_eq!(group.ready_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn unknown_shards_are_rejected() {
    let (group, _events) = start();

    assert!(matches!(
        group.identify(7),
        Err(gatecrab::GatewayError::UnknownShard { shard_id: 7 })
    ));
    assert!(group.send(Some(0), json!({"op": 3})).is_err());
    assert!(group.shard_snapshot(6).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn shutdown_disconnects_every_shard() {
    let (group, mut events) = start();

    let spawner = tokio::spawn({
        let group = group.clone();
        async move { group.spawn().await }
    });
    grant_until_ready(&group, &mut events).await;
    spawner.await.unwrap();

    group.shutdown(NORMAL_CLOSURE).await;

    let mut closed = Vec::new();
    while closed.len() < 3 {
        if let GroupEvent::Shard(event) = events.recv().await.unwrap() {
            if let ShardEventKind::Disconnected { code } = event.kind {
                assert_eq!(code, Some(NORMAL_CLOSURE));
                closed.push(event.shard_id);
            }
        }
    }
    closed.sort();
    assert_eq!(closed, vec![3, 4, 5]);

    let stats = group.snapshot().await;
    assert_eq!(stats.ready, 0);
    assert!(stats.shards.iter().all(|s| s.status == ShardStatus::Disconnected));
}
