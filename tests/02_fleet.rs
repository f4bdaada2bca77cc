mod support;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use gatecrab::admin::{AdminCommand, EvalReply};
use gatecrab::group::GroupSpec;
use gatecrab::orchestrator::{
    FleetSettings, GatewayInfo, GatewayInfoSource, StaticGatewayInfo,
};
use gatecrab::shard::{ShardEventKind, ShardStatus};
use gatecrab::worker::{
    GroupLauncher, InProcessLauncher, LaunchedGroup, Signal, WorkerExit, WorkerHandle,
};
use gatecrab::{FleetEvent, GatewayError, Orchestrator};
use support::MockConnector;

/// Counts REST lookups so the cache can be observed.
struct CountingInfo {
    inner: StaticGatewayInfo,
    calls: AtomicU32,
}

#[async_trait]
impl GatewayInfoSource for CountingInfo {
    async fn fetch(&self) -> Result<GatewayInfo, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch().await
    }
}

/// Runs groups in-process; the group named in `crash_group` dies without a
/// shutdown request once the trigger fires.
struct CrashingLauncher {
    inner: InProcessLauncher,
    crash_group: u32,
    trigger: Mutex<Option<oneshot::Receiver<()>>>,
}

#[async_trait]
impl GroupLauncher for CrashingLauncher {
    async fn launch(
        &self,
        spec: GroupSpec,
        gateway_url: &str,
    ) -> Result<LaunchedGroup, GatewayError> {
        let group_id = spec.group_id;
        let launched = self.inner.launch(spec, gateway_url).await?;
        if group_id != self.crash_group {
            return Ok(launched);
        }
        let Some(mut trigger) = self.trigger.lock().unwrap().take() else {
            return Ok(launched);
        };

        let LaunchedGroup {
            outbound,
            inbound: mut worker_rx,
            handle: mut worker,
        } = launched;
        let (handle, mut kill_rx, exit_tx) = WorkerHandle::new();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = worker_rx.recv() => match message {
                        Some(message) => {
                            let _ = inbound_tx.send(message);
                        }
                        None => break,
                    },
                    _ = &mut trigger => break,
                    _ = &mut kill_rx => break,
                }
            }
            worker.kill();
            worker.wait().await;
            drop(inbound_tx);
            let _ = exit_tx.send(Some(WorkerExit {
                success: false,
                detail: "crashed".into(),
            }));
        });

        Ok(LaunchedGroup {
            outbound,
            inbound,
            handle,
        })
    }
}

fn fleet() -> (Orchestrator, Arc<CountingInfo>, mpsc::UnboundedReceiver<FleetEvent>) {
    fleet_with(|inner| Arc::new(inner))
}

fn fleet_with(
    launcher: impl FnOnce(InProcessLauncher) -> Arc<dyn GroupLauncher>,
) -> (Orchestrator, Arc<CountingInfo>, mpsc::UnboundedReceiver<FleetEvent>) {
    let (connector, peers) = MockConnector::new();
    support::spawn_auto_gateway(peers);

    let info = Arc::new(CountingInfo {
        inner: StaticGatewayInfo::new(support::GATEWAY_URL, 5, 1),
        calls: AtomicU32::new(0),
    });
    let launcher = launcher(InProcessLauncher::new(support::settings(), Arc::new(connector)));
    let settings = FleetSettings {
        shards_per_group: 2,
        ..FleetSettings::default()
    };

    let orchestrator = Orchestrator::new(settings, info.clone(), launcher);
    let events = orchestrator.take_events().unwrap();
    (orchestrator, info, events)
}

/// Drains events until `FleetReady`; returns group-ready order and the
/// instants at which shards became ready.
async fn until_fleet_ready(events: &mut mpsc::UnboundedReceiver<FleetEvent>) -> (Vec<u32>, Vec<Instant>) {
    let mut groups = Vec::new();
    let mut shard_ready = Vec::new();
    loop {
        match events.recv().await.expect("fleet event stream ended") {
            FleetEvent::Shard { event, .. } => {
                if matches!(event.kind, ShardEventKind::Ready { .. }) {
                    shard_ready.push(Instant::now());
                }
            }
            FleetEvent::GroupReady { group_id } => groups.push(group_id),
            FleetEvent::FleetReady => return (groups, shard_ready),
            // leftovers from a previous spawn
            FleetEvent::WorkerExited { expected: true, .. } => {}
            FleetEvent::WorkerExited { group_id, .. } => panic!("group {group_id} exited early"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn fleet_partitions_shards_and_paces_handshakes() {
    let (orchestrator, _info, mut events) = fleet();
    orchestrator.spawn().await.unwrap();

    assert_eq!(orchestrator.total_shards(), 5);
    assert_eq!(
        orchestrator.groups(),
        vec![
            GroupSpec::new(0, 0..2, 5),
            GroupSpec::new(1, 2..4, 5),
            GroupSpec::new(2, 4..5, 5),
        ]
    );

    let (mut groups, shard_ready) = until_fleet_ready(&mut events).await;
    groups.sort();
    assert_eq!(groups, vec![0, 1, 2]);
    assert!(orchestrator.is_ready());
    assert_eq!(orchestrator.ready_groups(), 3);

    // one identify per window across the whole fleet
    assert_eq!(shard_ready.len(), 5);
    for pair in shard_ready.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(4900));
    }
}

#[tokio::test(start_paused = true)]
async fn broadcast_eval_isolates_failures_per_group() {
    let (orchestrator, _info, mut events) = fleet();
    orchestrator.spawn().await.unwrap();
    until_fleet_ready(&mut events).await;

    let results = orchestrator
        .broadcast_eval(AdminCommand::ShardInfo { shard_id: 4 })
        .await
        .unwrap();
    assert_eq!(results.len(), 3);

    for (group_id, result) in results {
        match (group_id, result) {
            (2, Ok(EvalReply::Shard(snapshot))) => {
                assert_eq!(snapshot.shard_id, 4);
                assert_eq!(snapshot.status, ShardStatus::Ready);
            }
            (0 | 1, Err(GatewayError::Eval(message))) => assert!(message.contains("shard 4")),
            (group_id, other) => panic!("group {group_id}: unexpected {other:?}"),
        }
    }

    assert_eq!(orchestrator.eval(1, AdminCommand::Ping).await.unwrap(), EvalReply::Pong);
    let Ok(EvalReply::Stats(stats)) = orchestrator.eval(0, AdminCommand::Stats).await else {
        panic!("expected stats");
    };
    assert_eq!(stats.ready, 2);
}

#[tokio::test(start_paused = true)]
async fn routing_follows_shard_ownership() {
    let (orchestrator, _info, mut events) = fleet();

    assert!(matches!(
        orchestrator.send(0, json!({"op": 3})),
        Err(GatewayError::NotSpawned)
    ));

    orchestrator.spawn().await.unwrap();
    until_fleet_ready(&mut events).await;

    orchestrator.send(3, json!({"op": 3, "d": null})).unwrap();
    orchestrator.broadcast(json!({"op": 3, "d": null})).unwrap();
    assert!(matches!(
        orchestrator.send(9, json!({"op": 3})),
        Err(GatewayError::NoOwningGroup { shard_id: 9 })
    ));
}

#[tokio::test(start_paused = true)]
async fn kill_is_idempotent_and_respawn_refetches_gateway_info() {
    let (orchestrator, info, mut events) = fleet();
    orchestrator.spawn().await.unwrap();
    assert!(matches!(orchestrator.spawn().await, Err(GatewayError::AlreadySpawned)));
    until_fleet_ready(&mut events).await;

    orchestrator.kill(Signal::Terminate).await;
    orchestrator.kill(Signal::Terminate).await;
    assert!(!orchestrator.is_spawned());
    assert!(!orchestrator.is_ready());

    let mut exited = Vec::new();
    while exited.len() < 3 {
        if let FleetEvent::WorkerExited { group_id, expected } = events.recv().await.unwrap() {
            assert!(expected);
            exited.push(group_id);
        }
    }
    exited.sort();
    assert_eq!(exited, vec![0, 1, 2]);

    // a plain spawn reuses the cached lookup
    orchestrator.spawn().await.unwrap();
    assert_eq!(info.calls.load(Ordering::SeqCst), 1);
    until_fleet_ready(&mut events).await;

    orchestrator.respawn(Signal::Kill).await.unwrap();
    assert_eq!(info.calls.load(Ordering::SeqCst), 2);
    until_fleet_ready(&mut events).await;

    orchestrator.kill(Signal::Kill).await;
}

#[tokio::test(start_paused = true)]
async fn crashed_group_leaves_the_rest_of_the_fleet_serving() {
    let (crash, trigger) = oneshot::channel();
    let (orchestrator, _info, mut events) = fleet_with(|inner| {
        Arc::new(CrashingLauncher {
            inner,
            crash_group: 1,
            trigger: Mutex::new(Some(trigger)),
        })
    });
    orchestrator.spawn().await.unwrap();
    until_fleet_ready(&mut events).await;
    assert_eq!(orchestrator.ready_groups(), 3);

    crash.send(()).unwrap();
    loop {
        match events.recv().await.expect("fleet event stream ended") {
            FleetEvent::WorkerExited { group_id, expected } => {
                assert_eq!(group_id, 1);
                assert!(!expected);
                break;
            }
            _ => continue,
        }
    }

    assert!(orchestrator.is_spawned());
    assert!(!orchestrator.is_ready());
    assert_eq!(orchestrator.ready_groups(), 2);

    assert!(matches!(
        orchestrator.send(2, json!({"op": 3})),
        Err(GatewayError::NoOwningGroup { shard_id: 2 })
    ));
    orchestrator.send(4, json!({"op": 3, "d": null})).unwrap();

    assert!(matches!(
        orchestrator.eval(1, AdminCommand::Ping).await,
        Err(GatewayError::NotSpawned)
    ));
    let results = orchestrator.broadcast_eval(AdminCommand::Ping).await.unwrap();
    let mut groups: Vec<u32> = results
        .into_iter()
        .map(|(group_id, result)| {
            assert_eq!(result.unwrap(), EvalReply::Pong);
            group_id
        })
        .collect();
    groups.sort();
    assert_eq!(groups, vec![0, 2]);

    orchestrator.kill(Signal::Kill).await;
}
