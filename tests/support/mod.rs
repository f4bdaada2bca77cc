use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use gatecrab::GatewayError;
use gatecrab::net::{Connector, Inbound, Outbound, Transport, TransportPeer};
use gatecrab::protocol::Compression;
use gatecrab::shard::{ReconnectPolicy, ShardEvent, ShardEventKind, ShardSettings};

// -----------------------------------------------------------------------------
// ----- Settings --------------------------------------------------------------

pub const GATEWAY_URL: &str = "wss://gateway.test";

/// Plain-JSON settings with a fixed one second reconnect delay.
pub fn settings() -> ShardSettings {
    ShardSettings::new(SecretString::new("test-token".into()), GATEWAY_URL)
        .with_compression(Compression::None)
        .with_reconnect(ReconnectPolicy::fixed(Duration::from_secs(1)))
}

// -----------------------------------------------------------------------------
// ----- MockConnector ---------------------------------------------------------

/// Hands every opened transport's far side to the test as `(url, peer)`.
pub struct MockConnector {
    peers: mpsc::UnboundedSender<(String, TransportPeer)>,
}

impl MockConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, TransportPeer)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { peers: tx }, rx)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Transport, GatewayError> {
        let (transport, peer) = Transport::channel();
        self.peers
            .send((url.to_string(), peer))
            .map_err(|_| GatewayError::Transport("mock gateway is gone".into()))?;
        Ok(transport)
    }
}

// -----------------------------------------------------------------------------
// ----- Scripted gateway ------------------------------------------------------

#[allow(dead_code)]
pub fn hello(interval_ms: u64) -> Inbound {
    text(json!({"op": 10, "d": {"heartbeat_interval": interval_ms}}))
}

#[allow(dead_code)]
pub fn ready(session_id: &str, seq: u64) -> Inbound {
    text(json!({
        "op": 0, "t": "READY", "s": seq,
        "d": {"session_id": session_id, "resume_gateway_url": "wss://resume.test"}
    }))
}

#[allow(dead_code)]
pub fn text(value: Value) -> Inbound {
    Inbound::Text(value.to_string())
}

/// Next text frame written by the shard, skipping heartbeats.
#[allow(dead_code)]
pub async fn next_command(peer: &mut TransportPeer) -> Value {
    loop {
        match peer.outbound.recv().await.expect("shard dropped the writer") {
            Outbound::Text(raw) => {
                let value: Value = serde_json::from_str(&raw).unwrap();
                if value["op"] != 1 {
                    return value;
                }
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }
}

#[allow(dead_code)]
pub async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<ShardEvent>,
    matches: impl Fn(&ShardEventKind) -> bool,
) -> ShardEventKind {
    loop {
        let event = events.recv().await.expect("event stream ended");
        if matches(&event.kind) {
            return event.kind;
        }
    }
}

/// A well-behaved gateway: greets every transport, answers identify with
/// READY, resume with RESUMED and every heartbeat with an ack.
#[allow(dead_code)]
pub fn spawn_auto_gateway(mut peers: mpsc::UnboundedReceiver<(String, TransportPeer)>) {
    tokio::spawn(async move {
        let mut sessions = 0u64;
        while let Some((_, peer)) = peers.recv().await {
            sessions += 1;
            tokio::spawn(serve_peer(peer, sessions));
        }
    });
}

async fn serve_peer(mut peer: TransportPeer, session: u64) {
    if peer.inbound.send(hello(45_000)).is_err() {
        return;
    }

    while let Some(frame) = peer.outbound.recv().await {
        let Outbound::Text(raw) = frame else { return };
        let Ok(value) = serde_json::from_str::<Value>(&raw) else {
            continue;
        };

        let reply = match value["op"].as_u64() {
            Some(1) => json!({"op": 11, "d": null}),
            Some(2) => {
                let shard = value["d"]["shard"][0].as_u64().unwrap_or_default();
                json!({
                    "op": 0, "t": "READY", "s": 1,
                    "d": {"session_id": format!("session-{session}-{shard}")}
                })
            }
            Some(6) => json!({"op": 0, "t": "RESUMED", "s": value["d"]["seq"], "d": null}),
            _ => continue,
        };

        if peer.inbound.send(text(reply)).is_err() {
            return;
        }
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
