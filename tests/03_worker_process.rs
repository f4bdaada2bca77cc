use std::ffi::OsString;
use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tokio::time::timeout;

use gatecrab::admin::{AdminCommand, EvalReply};
use gatecrab::group::GroupSpec;
use gatecrab::worker::{BridgeEvent, BridgeOptions, ProcessLauncher, Signal, WorkerBridge};
use gatecrab::GatewayError;

// Nothing listens here; shards keep retrying while the worker answers evals.
const DEAD_GATEWAY: &str = "ws://127.0.0.1:9";

const DEADLINE: Duration = Duration::from_secs(20);

fn config_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp config");
    writeln!(file, "token = \"test-token\"").unwrap();
    writeln!(file, "compression = \"none\"").unwrap();
    file
}

fn launcher(config: &NamedTempFile) -> ProcessLauncher {
    ProcessLauncher::new(
        env!("CARGO_BIN_EXE_gatecrab"),
        vec![
            OsString::from("--config"),
            config.path().as_os_str().to_owned(),
            OsString::from("--log"),
            OsString::from("warn"),
        ],
    )
}

async fn spawn_worker(
    config: &NamedTempFile,
) -> (WorkerBridge, mpsc::UnboundedReceiver<BridgeEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let bridge = WorkerBridge::spawn(
        GroupSpec::new(3, 6..8, 8),
        &launcher(config),
        DEAD_GATEWAY,
        BridgeOptions::default(),
        tx,
    )
    .await
    .expect("launch worker process");
    (bridge, rx)
}

async fn exit_event(events: &mut mpsc::UnboundedReceiver<BridgeEvent>) -> bool {
    loop {
        match events.recv().await.expect("bridge event stream ended") {
            BridgeEvent::Exited { group_id, expected, .. } => {
                assert_eq!(group_id, 3);
                return expected;
            }
            BridgeEvent::Group { .. } => {}
        }
    }
}

#[tokio::test]
async fn worker_process_answers_evals_and_stops_gracefully() {
    let config = config_file();
    let (bridge, mut events) = spawn_worker(&config).await;

    let pong = timeout(DEADLINE, bridge.eval(AdminCommand::Ping)).await.unwrap();
    assert_eq!(pong.unwrap(), EvalReply::Pong);

    let stats = timeout(DEADLINE, bridge.eval(AdminCommand::Stats)).await.unwrap();
    let Ok(EvalReply::Stats(stats)) = stats else {
        panic!("expected stats, got {stats:?}");
    };
    assert_eq!(stats.group_id, 3);
    assert_eq!(
        stats.shards.iter().map(|s| s.shard_id).collect::<Vec<_>>(),
        vec![6, 7]
    );
    assert_eq!(stats.ready, 0);

    let missing = timeout(DEADLINE, bridge.eval(AdminCommand::ShardInfo { shard_id: 2 }))
        .await
        .unwrap();
    assert!(matches!(missing, Err(GatewayError::Eval(ref m)) if m.contains("shard 2")));

    timeout(DEADLINE, bridge.kill(Signal::Terminate)).await.unwrap();
    assert!(bridge.exit().expect("exit recorded").success);
    assert!(timeout(DEADLINE, exit_event(&mut events)).await.unwrap());

    assert!(matches!(
        bridge.eval(AdminCommand::Ping).await,
        Err(GatewayError::ProcessExited { group_id: 3 })
    ));
}

#[tokio::test]
async fn hard_kill_is_still_an_expected_exit() {
    let config = config_file();
    let (bridge, mut events) = spawn_worker(&config).await;

    timeout(DEADLINE, bridge.kill(Signal::Kill)).await.unwrap();
    timeout(DEADLINE, bridge.kill(Signal::Kill)).await.unwrap();

    assert!(!bridge.exit().expect("exit recorded").success);
    assert!(timeout(DEADLINE, exit_event(&mut events)).await.unwrap());
    assert_eq!(bridge.pending_evals(), 0);
}
