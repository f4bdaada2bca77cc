use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::admin::{self, AdminCommand};
use crate::group::{Group, GroupSpec};
use crate::ipc::{IpcMessage, spawn_frame_reader, spawn_frame_writer};
use crate::net::Connector;
use crate::protocol::close_code::NORMAL_CLOSURE;
use crate::shard::ShardSettings;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

/// How long a stdio worker waits for its last frames to reach the parent.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

// -----------------------------------------------------------------------------
// ----- Host Loop -------------------------------------------------------------

/// Runs one group against a parent channel until the parent says `shutdown`
/// or goes away. Shared by worker processes and in-process workers.
pub async fn serve_group(
    spec: GroupSpec,
    settings: Arc<ShardSettings>,
    connector: Arc<dyn Connector>,
    mut commands: mpsc::UnboundedReceiver<IpcMessage>,
    replies: mpsc::UnboundedSender<IpcMessage>,
) {
    let (group, mut events) = Group::new(spec, settings, connector);
    let group = Arc::new(group);

    let spawner = tokio::spawn({
        let group = group.clone();
        async move {
            let failures = group.spawn().await;
            if !failures.is_empty() {
                warn!(
                    "group {}: {} shard(s) failed to connect",
                    group.group_id(),
                    failures.len()
                );
            }
        }
    });

    loop {
        select! {
            // -- Group events up to the parent --
            event = events.recv() => {
                let Some(event) = event else { break };
                if replies.send(IpcMessage::Dispatch(event)).is_err() {
                    info!("group {}: parent channel closed", spec.group_id);
                    spawner.abort();
                    group.shutdown(NORMAL_CLOSURE).await;
                    break;
                }
            }

            // -- Parent instructions --
            msg = commands.recv() => {
                let Some(msg) = msg else {
                    info!("group {}: parent went away, shutting down", spec.group_id);
                    spawner.abort();
                    group.shutdown(NORMAL_CLOSURE).await;
                    break;
                };

                match msg {
                    IpcMessage::Shutdown { code } => {
                        spawner.abort();
                        group.shutdown(code).await;
                        break;
                    }
                    IpcMessage::Handshake { shard_id } => {
                        if let Err(err) = group.identify(shard_id) {
                            warn!("group {}: handshake for shard {shard_id}: {err}", spec.group_id);
                        }
                    }
                    IpcMessage::Send { shard_id, payload } => {
                        if let Err(err) = group.send(shard_id, payload) {
                            warn!("group {}: send failed: {err}", spec.group_id);
                        }
                    }
                    IpcMessage::Eval { nonce, command } => {
                        spawn_eval(group.clone(), nonce, command, replies.clone());
                    }
                    other => debug!("group {}: ignoring {other:?}", spec.group_id),
                }
            }
        }
    }

    // no-op unless the event stream ended first
    spawner.abort();

    // final disconnect notices
    while let Ok(event) = events.try_recv() {
        let _ = replies.send(IpcMessage::Dispatch(event));
    }
    info!("group {}: worker stopped", spec.group_id);
}

/// Worker process entry: the parent channel is this process's stdin/stdout.
pub async fn serve_stdio(spec: GroupSpec, settings: Arc<ShardSettings>, connector: Arc<dyn Connector>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();

    let _reader = spawn_frame_reader(tokio::io::stdin(), cmd_tx);
    let writer = spawn_frame_writer(tokio::io::stdout(), reply_rx);

    serve_group(spec, settings, connector, cmd_rx, reply_tx).await;

    if tokio::time::timeout(FLUSH_TIMEOUT, writer).await.is_err() {
        warn!("group {}: gave up flushing ipc channel", spec.group_id);
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Eval --------------------------------------------------------

/// Runs in its own task so a failing or panicking command only fails its
/// own reply.
fn spawn_eval(
    group: Arc<Group>,
    nonce: u64,
    command: AdminCommand,
    replies: mpsc::UnboundedSender<IpcMessage>,
) {
    tokio::spawn(async move {
        let group_id = group.group_id();
        let joined = tokio::spawn(async move { admin::execute(&group, command).await }).await;

        let result = match joined {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(err)) => Err(err.to_string()),
            Err(err) => {
                error!("group {group_id}: eval {nonce} panicked: {err}");
                Err(format!("eval panicked: {err}"))
            }
        };

        let _ = replies.send(IpcMessage::EvalResponse { nonce, result });
    });
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::EvalReply;
    use crate::errors::GatewayError;
    use crate::net::{Transport, TransportPeer};
    use async_trait::async_trait;

    struct ChannelConnector {
        peers: mpsc::UnboundedSender<TransportPeer>,
    }

    #[async_trait]
    impl Connector for ChannelConnector {
        async fn connect(&self, _url: &str) -> Result<Transport, GatewayError> {
            let (transport, peer) = Transport::channel();
            let _ = self.peers.send(peer);
            Ok(transport)
        }
    }

    fn start() -> (
        mpsc::UnboundedSender<IpcMessage>,
        mpsc::UnboundedReceiver<IpcMessage>,
        tokio::task::JoinHandle<()>,
        mpsc::UnboundedReceiver<TransportPeer>,
    ) {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();

        let host = tokio::spawn(serve_group(
            GroupSpec::new(1, 2..4, 4),
            Arc::new(ShardSettings::for_tests("wss://gateway.test")),
            Arc::new(ChannelConnector { peers: peer_tx }),
            cmd_rx,
            reply_tx,
        ));
        (cmd_tx, reply_rx, host, peer_rx)
    }

    async fn eval_reply(
        replies: &mut mpsc::UnboundedReceiver<IpcMessage>,
        want: u64,
    ) -> Result<EvalReply, String> {
        loop {
            match replies.recv().await.expect("host closed") {
                IpcMessage::EvalResponse { nonce, result } if nonce == want => return result,
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn evals_answer_by_nonce_and_errors_stay_isolated() {
        let (cmd, mut replies, _host, _peers) = start();

        cmd.send(IpcMessage::Eval {
            nonce: 1,
            command: AdminCommand::ShardInfo { shard_id: 9 },
        })
        .unwrap();
        let err = eval_reply(&mut replies, 1).await.unwrap_err();
        assert!(err.contains("shard 9"));

        cmd.send(IpcMessage::Eval {
            nonce: 2,
            command: AdminCommand::Ping,
        })
        .unwrap();
        assert_eq!(eval_reply(&mut replies, 2).await, Ok(EvalReply::Pong));
    }

    #[tokio::test]
    async fn shutdown_stops_the_host() {
        let (cmd, _replies, host, _peers) = start();
        cmd.send(IpcMessage::Shutdown { code: 1000 }).unwrap();
        host.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_parent_stops_the_host() {
        let (cmd, _replies, host, _peers) = start();
        drop(cmd);
        host.await.unwrap();
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
