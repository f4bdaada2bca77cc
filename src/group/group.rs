use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::event::GroupEvent;
use super::readiness::ReadyTracker;
use super::spec::GroupSpec;
use crate::analytics::{GatewayStats, StatsSnapshot};
use crate::errors::GatewayError;
use crate::net::Connector;
use crate::shard::{Connection, ShardEvent, ShardSettings, ShardSnapshot};

// -----------------------------------------------------------------------------
// ----- Group -----------------------------------------------------------------

#[derive(Debug)]
pub struct Group {
    spec: GroupSpec,
    connections: BTreeMap<u32, Connection>,
    readiness: Arc<Mutex<ReadyTracker>>,
    stats: Arc<GatewayStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStats {
    pub group_id: u32,
    pub ready: usize,
    pub shards: Vec<ShardSnapshot>,
    pub counters: StatsSnapshot,
}

// -----------------------------------------------------------------------------
// ----- Group: Static ---------------------------------------------------------

impl Group {
    /// Create one idle connection per owned shard. Nothing is opened until
    /// `spawn()`.
    pub fn new(
        spec: GroupSpec,
        settings: Arc<ShardSettings>,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::UnboundedReceiver<GroupEvent>) {
        let (shard_tx, shard_rx) = mpsc::unbounded_channel();
        let (group_tx, group_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(GatewayStats::default());

        let connections = spec
            .shards()
            .map(|shard_id| {
                let conn = Connection::spawn(
                    shard_id,
                    spec.total_shards,
                    settings.clone(),
                    connector.clone(),
                    shard_tx.clone(),
                    stats.clone(),
                );
                (shard_id, conn)
            })
            .collect();

        let readiness = Arc::new(Mutex::new(ReadyTracker::new(spec.len())));
        tokio::spawn(pump_events(
            spec.group_id,
            shard_rx,
            group_tx,
            readiness.clone(),
        ));

        let group = Self {
            spec,
            connections,
            readiness,
            stats,
        };
        (group, group_rx)
    }
}

// -----------------------------------------------------------------------------
// ----- Group: Public ---------------------------------------------------------

impl Group {
    pub fn spec(&self) -> GroupSpec {
        self.spec
    }

    pub fn group_id(&self) -> u32 {
        self.spec.group_id
    }

    pub fn ready_count(&self) -> usize {
        self.readiness.lock().ready_count()
    }

    pub fn is_ready(&self) -> bool {
        self.readiness.lock().is_ready()
    }

    /// Connect every shard, one after another. A shard that fails does not
    /// stop the rest; the failures are returned.
    pub async fn spawn(&self) -> Vec<(u32, GatewayError)> {
        info!(
            "group {}: connecting shards {:?} of {}",
            self.spec.group_id,
            self.spec.shards(),
            self.spec.total_shards
        );

        let mut failures = Vec::new();
        for (shard_id, conn) in &self.connections {
            match conn.connect().await {
                Ok(()) => debug!("group {}: shard {shard_id} ready", self.spec.group_id),
                Err(err) => {
                    warn!("group {}: shard {shard_id} failed: {err}", self.spec.group_id);
                    failures.push((*shard_id, err));
                }
            }
        }
        failures
    }

    /// Handshake grant for one shard.
    pub fn identify(&self, shard_id: u32) -> Result<(), GatewayError> {
        self.connection(shard_id)?.identify()
    }

    /// Route to one shard, or broadcast when `shard_id` is `None`.
    pub fn send(&self, shard_id: Option<u32>, payload: Value) -> Result<(), GatewayError> {
        match shard_id {
            Some(shard_id) => self.connection(shard_id)?.send(payload),
            None => {
                for conn in self.connections.values() {
                    if let Err(err) = conn.send(payload.clone()) {
                        warn!("group {}: broadcast skipped: {err}", self.spec.group_id);
                    }
                }
                Ok(())
            }
        }
    }

    pub fn reconnect(&self, shard_id: u32) -> Result<(), GatewayError> {
        self.connection(shard_id)?.reconnect()
    }

    /// Disconnect every shard and wait for all of them to settle.
    pub async fn shutdown(&self, code: u16) {
        info!("group {}: shutting down with code {code}", self.spec.group_id);

        let results = join_all(self.connections.values().map(|conn| conn.disconnect(code))).await;
        for (shard_id, result) in self.connections.keys().zip(results) {
            if let Err(err) = result {
                warn!("group {}: shard {shard_id} did not close cleanly: {err}", self.spec.group_id);
            }
        }
    }

    pub async fn shard_snapshot(&self, shard_id: u32) -> Result<ShardSnapshot, GatewayError> {
        self.connection(shard_id)?.snapshot().await
    }

    pub async fn snapshot(&self) -> GroupStats {
        let mut shards = Vec::with_capacity(self.connections.len());
        for conn in self.connections.values() {
            if let Ok(snapshot) = conn.snapshot().await {
                shards.push(snapshot);
            }
        }

        GroupStats {
            group_id: self.spec.group_id,
            ready: self.ready_count(),
            shards,
            counters: self.stats.snapshot(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Group: Private --------------------------------------------------------

impl Group {
    fn connection(&self, shard_id: u32) -> Result<&Connection, GatewayError> {
        self.connections
            .get(&shard_id)
            .ok_or(GatewayError::UnknownShard { shard_id })
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Event Pump --------------------------------------------------

/// Tags nothing (shard events carry their id) but folds readiness and emits
/// the group-ready announcement right after the shard event that caused it.
async fn pump_events(
    group_id: u32,
    mut shard_rx: mpsc::UnboundedReceiver<ShardEvent>,
    group_tx: mpsc::UnboundedSender<GroupEvent>,
    readiness: Arc<Mutex<ReadyTracker>>,
) {
    while let Some(event) = shard_rx.recv().await {
        let announce = readiness.lock().observe(&event);

        if group_tx.send(GroupEvent::Shard(event)).is_err() {
            continue;
        }
        if announce {
            info!("group {group_id}: all shards ready");
            let _ = group_tx.send(GroupEvent::Ready { group_id });
        }
    }
    debug!("group {group_id}: event pump stopped");
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{Transport, TransportPeer};
    use async_trait::async_trait;

    struct ChannelConnector {
        peers: mpsc::UnboundedSender<(String, TransportPeer)>,
    }

    #[async_trait]
    impl Connector for ChannelConnector {
        async fn connect(&self, url: &str) -> Result<Transport, GatewayError> {
            let (transport, peer) = Transport::channel();
            let _ = self.peers.send((url.to_string(), peer));
            Ok(transport)
        }
    }

    fn group(range: std::ops::Range<u32>) -> (Group, mpsc::UnboundedReceiver<(String, TransportPeer)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (group, _events) = Group::new(
            GroupSpec::new(0, range, 4),
            Arc::new(ShardSettings::for_tests("wss://gateway.test")),
            Arc::new(ChannelConnector { peers: tx }),
        );
        (group, rx)
    }

    #[tokio::test]
    async fn unknown_shards_are_rejected() {
        let (group, _peers) = group(0..2);

        assert!(matches!(
            group.identify(3),
            Err(GatewayError::UnknownShard { shard_id: 3 })
        ));
        assert!(matches!(
            group.send(Some(7), serde_json::json!({"op": 3})),
            Err(GatewayError::UnknownShard { shard_id: 7 })
        ));
        assert!(group.send(None, serde_json::json!({"op": 3})).is_ok());
    }

    #[tokio::test]
    async fn snapshot_lists_every_shard_in_order() {
        let (group, _peers) = group(2..4);

        let stats = group.snapshot().await;
        assert_eq!(stats.group_id, 0);
        assert_eq!(stats.ready, 0);
        let ids: Vec<u32> = stats.shards.iter().map(|s| s.shard_id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn shutdown_before_spawn_is_harmless() {
        let (group, _peers) = group(0..2);
        group.shutdown(1000).await;
        group.shutdown(1000).await;
        assert!(!group.is_ready());
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
