use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::select;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::gateway_info::{GatewayInfo, GatewayInfoSource};
use super::handshake_queue::{HANDSHAKE_WINDOW, HandshakeQueue};
use super::partition::partition;
use crate::admin::{AdminCommand, EvalReply};
use crate::errors::GatewayError;
use crate::group::{GroupEvent, GroupSpec};
use crate::shard::{ShardEvent, ShardEventKind};
use crate::worker::{BridgeEvent, BridgeOptions, GroupLauncher, Signal, WorkerBridge};

// -----------------------------------------------------------------------------
// ----- FleetSettings ---------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FleetSettings {
    pub shards_per_group: u32,
    /// Overrides the REST shard suggestion.
    pub total_shards: Option<u32>,
    /// Overrides the REST gateway URL.
    pub gateway_url: Option<String>,
    pub handshake_window: Duration,
    pub bridge: BridgeOptions,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            shards_per_group: 16,
            total_shards: None,
            gateway_url: None,
            handshake_window: HANDSHAKE_WINDOW,
            bridge: BridgeOptions::default(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- FleetEvent ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum FleetEvent {
    Shard { group_id: u32, event: ShardEvent },
    GroupReady { group_id: u32 },
    /// Every group of the current spawn reported ready.
    FleetReady,
    WorkerExited { group_id: u32, expected: bool },
}

// -----------------------------------------------------------------------------
// ----- Orchestrator ----------------------------------------------------------

/// Fleet coordinator: sizes the fleet, launches one worker per group, and
/// owns the only handshake queue.
pub struct Orchestrator {
    settings: FleetSettings,
    info_source: Arc<dyn GatewayInfoSource>,
    launcher: Arc<dyn GroupLauncher>,
    fleet: Arc<Mutex<Fleet>>,
    events_tx: mpsc::UnboundedSender<FleetEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<FleetEvent>>>,
}

#[derive(Debug, Clone, Copy)]
struct HandshakeRequest {
    group_id: u32,
    shard_id: u32,
}

#[derive(Default)]
struct Fleet {
    /// Bumped on every spawn; events from older spawns never touch state.
    generation: u64,
    spawned: bool,
    info: Option<GatewayInfo>,
    total_shards: u32,
    groups: Vec<GroupSpec>,
    bridges: BTreeMap<u32, Arc<WorkerBridge>>,
    ready: BTreeSet<u32>,
    queue: Option<HandshakeQueue<HandshakeRequest>>,
}

// -----------------------------------------------------------------------------
// ----- Orchestrator: Static --------------------------------------------------

impl Orchestrator {
    pub fn new(
        settings: FleetSettings,
        info_source: Arc<dyn GatewayInfoSource>,
        launcher: Arc<dyn GroupLauncher>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            settings,
            info_source,
            launcher,
            fleet: Arc::new(Mutex::new(Fleet::default())),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Orchestrator: Lifecycle -----------------------------------------------

impl Orchestrator {
    /// Resolve the fleet size and launch every group. Fails with
    /// `AlreadySpawned` until `kill()` ran.
    pub async fn spawn(&self) -> Result<(), GatewayError> {
        let generation = {
            let mut fleet = self.fleet.lock();
            if fleet.spawned {
                return Err(GatewayError::AlreadySpawned);
            }
            fleet.spawned = true;
            fleet.generation += 1;
            fleet.generation
        };

        let result = self.launch(generation).await;
        if result.is_err() {
            self.fleet.lock().spawned = false;
        }
        result
    }

    /// Stop every worker in parallel and wait for all of them. Idempotent.
    pub async fn kill(&self, signal: Signal) {
        let bridges: Vec<Arc<WorkerBridge>> = {
            let mut fleet = self.fleet.lock();
            fleet.spawned = false;
            fleet.queue = None;
            fleet.ready.clear();
            std::mem::take(&mut fleet.bridges).into_values().collect()
        };

        if bridges.is_empty() {
            return;
        }

        info!("stopping {} worker(s) with {signal:?}", bridges.len());
        join_all(bridges.iter().map(|bridge| bridge.kill(signal))).await;
    }

    /// Kill, forget the cached gateway info, and spawn again. The only way the
    /// shard count changes.
    pub async fn respawn(&self, signal: Signal) -> Result<(), GatewayError> {
        self.kill(signal).await;
        self.fleet.lock().info = None;
        self.spawn().await
    }

    /// The fleet event stream. Can be taken once.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<FleetEvent>> {
        self.events_rx.lock().take()
    }
}

// -----------------------------------------------------------------------------
// ----- Orchestrator: Routing -------------------------------------------------

impl Orchestrator {
    /// Queue a handshake grant for one shard behind the fleet-wide budget.
    pub fn request_handshake(&self, group_id: u32, shard_id: u32) -> Result<(), GatewayError> {
        let queue = self.fleet.lock().queue.clone();
        match queue {
            Some(queue) if queue.push(HandshakeRequest { group_id, shard_id }) => Ok(()),
            _ => Err(GatewayError::NotSpawned),
        }
    }

    pub fn send(&self, shard_id: u32, payload: Value) -> Result<(), GatewayError> {
        self.owner(shard_id)?.send(Some(shard_id), payload)
    }

    pub fn broadcast(&self, payload: Value) -> Result<(), GatewayError> {
        for bridge in self.bridges()? {
            if let Err(err) = bridge.send(None, payload.clone()) {
                warn!("broadcast to group {} failed: {err}", bridge.group_id());
            }
        }
        Ok(())
    }

    pub async fn eval(&self, group_id: u32, command: AdminCommand) -> Result<EvalReply, GatewayError> {
        let bridge = self
            .fleet
            .lock()
            .bridges
            .get(&group_id)
            .cloned()
            .ok_or(GatewayError::NotSpawned)?;
        bridge.eval(command).await
    }

    /// Run `command` in every live group. One result per group, in group
    /// order; a failure in one group leaves the others untouched.
    pub async fn broadcast_eval(
        &self,
        command: AdminCommand,
    ) -> Result<Vec<(u32, Result<EvalReply, GatewayError>)>, GatewayError> {
        let bridges = self.bridges()?;
        let results = join_all(bridges.iter().map(|bridge| {
            let command = command.clone();
            async move { (bridge.group_id(), bridge.eval(command).await) }
        }))
        .await;
        Ok(results)
    }
}

// -----------------------------------------------------------------------------
// ----- Orchestrator: Accessors -----------------------------------------------

impl Orchestrator {
    pub fn groups(&self) -> Vec<GroupSpec> {
        self.fleet.lock().groups.clone()
    }

    pub fn total_shards(&self) -> u32 {
        self.fleet.lock().total_shards
    }

    pub fn ready_groups(&self) -> usize {
        self.fleet.lock().ready.len()
    }

    pub fn is_ready(&self) -> bool {
        let fleet = self.fleet.lock();
        fleet.spawned && !fleet.groups.is_empty() && fleet.ready.len() == fleet.groups.len()
    }

    pub fn is_spawned(&self) -> bool {
        self.fleet.lock().spawned
    }

    pub fn gateway_info(&self) -> Option<GatewayInfo> {
        self.fleet.lock().info.clone()
    }
}

// -----------------------------------------------------------------------------
// ----- Orchestrator: Private -------------------------------------------------

impl Orchestrator {
    async fn launch(&self, generation: u64) -> Result<(), GatewayError> {
        let cached = self.fleet.lock().info.clone();
        let info = match cached {
            Some(info) => info,
            None => self.info_source.fetch().await?,
        };

        let total_shards = self.settings.total_shards.unwrap_or(info.shards).max(1);
        let gateway_url = self
            .settings
            .gateway_url
            .clone()
            .unwrap_or_else(|| info.url.clone());
        let groups = partition(total_shards, self.settings.shards_per_group);
        let max_concurrency = info.session_start_limit.max_concurrency;

        info!(
            "spawning {total_shards} shard(s) in {} group(s), {max_concurrency} handshake(s) per {:?}",
            groups.len(),
            self.settings.handshake_window
        );

        let (bridge_tx, bridge_rx) = mpsc::unbounded_channel();
        let (grant_tx, grant_rx) = mpsc::unbounded_channel();
        let queue = HandshakeQueue::spawn(max_concurrency, self.settings.handshake_window, grant_tx);

        let mut bridges = BTreeMap::new();
        for spec in &groups {
            let launched = WorkerBridge::spawn(
                *spec,
                self.launcher.as_ref(),
                &gateway_url,
                self.settings.bridge,
                bridge_tx.clone(),
            )
            .await;

            match launched {
                Ok(bridge) => {
                    bridges.insert(spec.group_id, Arc::new(bridge));
                }
                Err(err) => {
                    warn!("group {}: launch failed, stopping fleet: {err}", spec.group_id);
                    join_all(bridges.values().map(|b| b.kill(Signal::Kill))).await;
                    return Err(err);
                }
            }
        }
        drop(bridge_tx);

        {
            let mut fleet = self.fleet.lock();
            fleet.info = Some(info);
            fleet.total_shards = total_shards;
            fleet.groups = groups;
            fleet.bridges = bridges;
            fleet.ready.clear();
            fleet.queue = Some(queue.clone());
        }

        tokio::spawn(pump_events(
            generation,
            self.fleet.clone(),
            bridge_rx,
            grant_rx,
            queue,
            self.events_tx.clone(),
        ));
        Ok(())
    }

    fn owner(&self, shard_id: u32) -> Result<Arc<WorkerBridge>, GatewayError> {
        let fleet = self.fleet.lock();
        if !fleet.spawned {
            return Err(GatewayError::NotSpawned);
        }
        fleet
            .bridges
            .values()
            .find(|bridge| bridge.contains(shard_id))
            .cloned()
            .ok_or(GatewayError::NoOwningGroup { shard_id })
    }

    fn bridges(&self) -> Result<Vec<Arc<WorkerBridge>>, GatewayError> {
        let fleet = self.fleet.lock();
        if !fleet.spawned {
            return Err(GatewayError::NotSpawned);
        }
        Ok(fleet.bridges.values().cloned().collect())
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Event Pump --------------------------------------------------

async fn pump_events(
    generation: u64,
    fleet: Arc<Mutex<Fleet>>,
    mut bridge_rx: mpsc::UnboundedReceiver<BridgeEvent>,
    mut grant_rx: mpsc::UnboundedReceiver<HandshakeRequest>,
    queue: HandshakeQueue<HandshakeRequest>,
    events: mpsc::UnboundedSender<FleetEvent>,
) {
    loop {
        select! {
            // -- Worker traffic --
            event = bridge_rx.recv() => {
                let Some(event) = event else { break };
                on_bridge_event(generation, &fleet, &queue, &events, event);
            }

            // -- Handshake grants leaving the queue --
            grant = grant_rx.recv() => {
                let Some(HandshakeRequest { group_id, shard_id }) = grant else { break };

                let bridge = {
                    let fleet = fleet.lock();
                    (fleet.generation == generation)
                        .then(|| fleet.bridges.get(&group_id).cloned())
                        .flatten()
                };

                match bridge {
                    Some(bridge) => {
                        debug!("group {group_id}: handshake granted for shard {shard_id}");
                        if let Err(err) = bridge.handshake(shard_id) {
                            warn!("group {group_id}: handshake for shard {shard_id} lost: {err}");
                        }
                    }
                    None => debug!("group {group_id}: dropping stale handshake grant"),
                }
            }
        }
    }
    debug!("fleet event pump for spawn {generation} stopped");
}

fn on_bridge_event(
    generation: u64,
    fleet: &Mutex<Fleet>,
    queue: &HandshakeQueue<HandshakeRequest>,
    events: &mpsc::UnboundedSender<FleetEvent>,
    event: BridgeEvent,
) {
    match event {
        BridgeEvent::Group {
            group_id,
            event: GroupEvent::Shard(event),
        } => {
            if event.kind == ShardEventKind::NeedHandshake {
                queue.push(HandshakeRequest {
                    group_id,
                    shard_id: event.shard_id,
                });
            }
            let _ = events.send(FleetEvent::Shard { group_id, event });
        }

        BridgeEvent::Group {
            event: GroupEvent::Ready { group_id },
            ..
        } => {
            let fleet_ready = {
                let mut fleet = fleet.lock();
                if fleet.generation != generation {
                    return;
                }
                fleet.ready.insert(group_id) && fleet.ready.len() == fleet.groups.len()
            };

            info!("group {group_id} ready");
            let _ = events.send(FleetEvent::GroupReady { group_id });
            if fleet_ready {
                info!("fleet ready");
                let _ = events.send(FleetEvent::FleetReady);
            }
        }

        BridgeEvent::Exited {
            group_id, expected, ..
        } => {
            if !expected {
                let mut fleet = fleet.lock();
                if fleet.generation == generation {
                    fleet.bridges.remove(&group_id);
                    fleet.ready.remove(&group_id);
                }
            }
            let _ = events.send(FleetEvent::WorkerExited { group_id, expected });
        }
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
