use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::{
    select,
    sync::{mpsc, oneshot},
    time::{Instant, Interval, MissedTickBehavior, Sleep},
};
use tracing::{debug, info, warn};

use super::event::{ShardEvent, ShardEventKind};
use super::session::{Effect, ShardSession, ShardSnapshot};
use super::settings::ShardSettings;
use crate::analytics::GatewayStats;
use crate::errors::GatewayError;
use crate::net::{Connector, Inbound, Inflater, Outbound, Transport};
use crate::protocol::{Compression, GatewayPayload};

// -----------------------------------------------------------------------------
// ----- Connection ------------------------------------------------------------

/// Handle to one shard's connection actor. Cheap to clone; the actor stops
/// when the last handle is dropped.
#[derive(Debug, Clone)]
pub struct Connection {
    shard_id: u32,
    commands: mpsc::UnboundedSender<ShardCommand>,
}

#[derive(Debug)]
enum ShardCommand {
    Connect(oneshot::Sender<Result<(), GatewayError>>),
    Identify,
    Send(Value),
    Reconnect,
    Disconnect { code: u16, done: oneshot::Sender<()> },
    Snapshot(oneshot::Sender<ShardSnapshot>),
}

// -----------------------------------------------------------------------------
// ----- Connection: Static ----------------------------------------------------

impl Connection {
    pub fn spawn(
        shard_id: u32,
        total_shards: u32,
        settings: Arc<ShardSettings>,
        connector: Arc<dyn Connector>,
        events: mpsc::UnboundedSender<ShardEvent>,
        stats: Arc<GatewayStats>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let actor = ShardActor {
            shard_id,
            session: ShardSession::new(shard_id, total_shards, settings.clone(), stats.clone()),
            settings,
            connector,
            events,
            stats,
            commands: rx,
            transport: None,
            inflater: None,
            heartbeat: None,
            reconnect: None,
            reconnect_attempts: 0,
            waiter: None,
        };
        tokio::spawn(actor.run());

        Self {
            shard_id,
            commands: tx,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Connection: Public ----------------------------------------------------

impl Connection {
    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    /// Open the transport. Resolves once the session is ready, or fails on a
    /// terminal close. Non-terminal closes on the way are retried internally.
    pub async fn connect(&self) -> Result<(), GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.command(ShardCommand::Connect(tx))?;
        rx.await.map_err(|_| self.gone())?
    }

    /// Handshake grant: send Identify if this shard is waiting for one.
    pub fn identify(&self) -> Result<(), GatewayError> {
        self.command(ShardCommand::Identify)
    }

    /// Forward a raw `{op, d}` payload to the gateway.
    pub fn send(&self, payload: Value) -> Result<(), GatewayError> {
        self.command(ShardCommand::Send(payload))
    }

    /// Drop the transport and resume on a fresh one.
    pub fn reconnect(&self) -> Result<(), GatewayError> {
        self.command(ShardCommand::Reconnect)
    }

    /// Close without reconnecting. Safe to call repeatedly and after the actor stopped.
    pub async fn disconnect(&self, code: u16) -> Result<(), GatewayError> {
        let (tx, rx) = oneshot::channel();
        if self.command(ShardCommand::Disconnect { code, done: tx }).is_err() {
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }

    pub async fn snapshot(&self) -> Result<ShardSnapshot, GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.command(ShardCommand::Snapshot(tx))?;
        rx.await.map_err(|_| self.gone())
    }
}

// -----------------------------------------------------------------------------
// ----- Connection: Private ---------------------------------------------------

impl Connection {
    fn command(&self, command: ShardCommand) -> Result<(), GatewayError> {
        self.commands.send(command).map_err(|_| self.gone())
    }

    fn gone(&self) -> GatewayError {
        GatewayError::ShardGone {
            shard_id: self.shard_id,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ShardActor ------------------------------------------------------------

struct ShardActor {
    shard_id: u32,
    session: ShardSession,
    settings: Arc<ShardSettings>,
    connector: Arc<dyn Connector>,
    events: mpsc::UnboundedSender<ShardEvent>,
    stats: Arc<GatewayStats>,
    commands: mpsc::UnboundedReceiver<ShardCommand>,

    transport: Option<Transport>,
    inflater: Option<Inflater>,
    heartbeat: Option<Interval>,
    reconnect: Option<Pin<Box<Sleep>>>,
    reconnect_attempts: u32,
    waiter: Option<oneshot::Sender<Result<(), GatewayError>>>,
}

// -----------------------------------------------------------------------------
// ----- ShardActor: Run -------------------------------------------------------

impl ShardActor {
    async fn run(mut self) {
        loop {
            select! {
                // -- Commands from the group --
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    self.on_command(command).await;
                }

                // -- Gateway frames --
                frame = next_frame(&mut self.transport) => {
                    self.on_frame(frame);
                }

                // -- Heartbeat --
                _ = next_beat(&mut self.heartbeat) => {
                    let effects = self.session.on_heartbeat_tick(Instant::now());
                    self.apply(effects);
                }

                // -- Reconnect debounce --
                _ = wait_reconnect(&mut self.reconnect) => {
                    self.reconnect = None;
                    self.open().await;
                }
            }
        }

        if let Some(transport) = self.transport.take() {
            let _ = transport.send(Outbound::Terminate);
        }
        debug!("shard {}: connection actor stopped", self.shard_id);
    }
}

// -----------------------------------------------------------------------------
// ----- ShardActor: Commands --------------------------------------------------

impl ShardActor {
    async fn on_command(&mut self, command: ShardCommand) {
        match command {
            ShardCommand::Connect(reply) => {
                if !self.session.status().can_connect() {
                    let _ = reply.send(Err(GatewayError::AlreadyConnecting {
                        shard_id: self.shard_id,
                    }));
                    return;
                }
                if let Some(previous) = self.waiter.replace(reply) {
                    let _ = previous.send(Err(GatewayError::AlreadyConnecting {
                        shard_id: self.shard_id,
                    }));
                }
                self.reconnect = None;
                self.open().await;
            }

            ShardCommand::Identify => {
                let effects = self.session.identify();
                self.apply(effects);
            }

            ShardCommand::Send(payload) => self.forward(payload),

            ShardCommand::Reconnect => {
                let effects = self.session.request_reconnect();
                self.apply(effects);
            }

            ShardCommand::Disconnect { code, done } => {
                self.disconnect(code);
                let _ = done.send(());
            }

            ShardCommand::Snapshot(reply) => {
                let _ = reply.send(self.session.snapshot());
            }
        }
    }

    async fn open(&mut self) {
        let url = match self.session.begin_connect() {
            Ok(url) => url,
            Err(err) => {
                debug!("shard {}: {err}", self.shard_id);
                return;
            }
        };

        self.emit(ShardEventKind::Connecting);
        debug!("shard {}: connecting to {url}", self.shard_id);

        match self.connector.connect(&url).await {
            Ok(transport) => {
                self.transport = Some(transport);
                self.inflater = match self.settings.compression {
                    Compression::ZlibStream => Some(Inflater::new()),
                    Compression::None => None,
                };
            }
            Err(err) => {
                warn!("shard {}: {err}", self.shard_id);
                self.emit(ShardEventKind::Error {
                    message: err.to_string(),
                });
                let effects = self.session.on_close(None);
                self.apply(effects);
            }
        }
    }

    fn disconnect(&mut self, code: u16) {
        self.reconnect = None;
        self.session.shutdown(self.transport.is_some());

        match self.drop_transport() {
            Some(transport) => {
                let _ = transport.send(Outbound::Close { code });
                info!("shard {}: disconnected with code {code}", self.shard_id);
                let effects = self.session.on_close(Some(code));
                self.apply(effects);
            }
            None => {
                // nothing open; a pending connect() can never complete now
                if let Some(waiter) = self.waiter.take() {
                    let _ = waiter.send(Err(GatewayError::ConnectionClosed {
                        shard_id: self.shard_id,
                    }));
                }
            }
        }
    }

    fn forward(&mut self, payload: Value) {
        let Some(transport) = self.transport.as_ref() else {
            warn!("shard {}: dropping outbound payload, not connected", self.shard_id);
            return;
        };

        match serde_json::to_string(&payload) {
            Ok(text) => {
                let _ = transport.send(Outbound::Text(text));
            }
            Err(err) => warn!("shard {}: unserializable payload: {err}", self.shard_id),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ShardActor: Frames ----------------------------------------------------

impl ShardActor {
    fn on_frame(&mut self, frame: Inbound) {
        let decoded = match frame {
            Inbound::Text(text) => GatewayPayload::parse(text.as_bytes())
                .map(Some)
                .map_err(GatewayError::from),

            Inbound::Binary(bytes) => match self.inflater.as_mut() {
                Some(inflater) => inflater
                    .push(&bytes)
                    .and_then(|_| inflater.decode().map_err(GatewayError::from)),
                None => GatewayPayload::parse(&bytes)
                    .map(Some)
                    .map_err(GatewayError::from),
            },

            Inbound::Closed { code } => {
                self.drop_transport();
                let effects = self.session.on_close(code);
                self.apply(effects);
                return;
            }

            Inbound::Error(message) => {
                warn!("shard {}: transport error: {message}", self.shard_id);
                self.emit(ShardEventKind::Error { message });
                self.apply(vec![Effect::Terminate]);
                return;
            }
        };

        match decoded {
            Ok(Some(payload)) => {
                let effects = self.session.on_payload(payload, Instant::now());
                self.apply(effects);
            }
            Ok(None) => {}
            Err(err) => {
                warn!("shard {}: {err}", self.shard_id);
                self.emit(ShardEventKind::Error {
                    message: err.to_string(),
                });
                self.apply(vec![Effect::Terminate]);
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ShardActor: Effects ---------------------------------------------------

impl ShardActor {
    fn apply(&mut self, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();

        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Send(text) => {
                    if let Some(transport) = self.transport.as_ref() {
                        let _ = transport.send(Outbound::Text(text));
                    }
                }

                Effect::StartHeartbeat { first, interval } => {
                    let mut timer = tokio::time::interval_at(Instant::now() + first, interval);
                    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.heartbeat = Some(timer);
                }

                Effect::Emit(kind) => {
                    if matches!(kind, ShardEventKind::Ready { .. } | ShardEventKind::Resumed) {
                        self.reconnect_attempts = 0;
                    }
                    self.emit(kind);
                }

                Effect::Terminate => {
                    // already closed: the close path ran once, do not run it again
                    if let Some(transport) = self.drop_transport() {
                        let _ = transport.send(Outbound::Terminate);
                        queue.extend(self.session.on_close(None));
                    }
                }

                Effect::ScheduleReconnect => self.schedule_reconnect(),

                Effect::Settle(result) => {
                    if let Some(waiter) = self.waiter.take() {
                        let _ = waiter.send(result);
                    }
                }
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect.is_some() {
            return;
        }

        let delay = self.settings.reconnect.delay(self.reconnect_attempts);
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        self.reconnect = Some(Box::pin(tokio::time::sleep(delay)));
        self.stats.inc_reconnect();

        info!(
            "shard {}: reconnecting in {}ms",
            self.shard_id,
            delay.as_millis()
        );
        self.emit(ShardEventKind::Reconnecting {
            delay_ms: delay.as_millis() as u64,
        });
    }

    fn drop_transport(&mut self) -> Option<Transport> {
        self.heartbeat = None;
        self.inflater = None;
        self.transport.take()
    }

    fn emit(&self, kind: ShardEventKind) {
        let _ = self.events.send(ShardEvent {
            shard_id: self.shard_id,
            kind,
        });
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

async fn next_frame(transport: &mut Option<Transport>) -> Inbound {
    match transport {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_beat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn wait_reconnect(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
