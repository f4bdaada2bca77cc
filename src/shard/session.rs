//! Protocol decisions for one shard, free of IO.
//!
//! The connection actor feeds in payloads, heartbeat ticks, handshake grants
//! and close notifications; the session answers with `Effect`s. Every failure
//! ends in `on_close`, which is the only place that decides whether and how
//! to reconnect.

use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::event::ShardEventKind;
use super::heartbeat::{Beat, HeartbeatTracker};
use super::settings::ShardSettings;
use super::state::{ShardStatus, Strategy};
use crate::analytics::GatewayStats;
use crate::errors::GatewayError;
use crate::protocol::close_code::{AUTHENTICATION_FAILED, DISALLOWED_INTENTS, INVALID_INTENTS};
use crate::protocol::payload::{self, GatewayPayload, Hello, ReadyData};
use crate::protocol::{CloseAction, Opcode, classify_close, gateway_url};

// -----------------------------------------------------------------------------
// ----- Effect ----------------------------------------------------------------

#[derive(Debug)]
pub(crate) enum Effect {
    /// Write a text frame.
    Send(String),

    /// (Re)arm the heartbeat timer.
    StartHeartbeat { first: Duration, interval: Duration },

    /// Report upward.
    Emit(ShardEventKind),

    /// Drop the transport and run the close path with no close code.
    Terminate,

    /// Arm the reconnect timer unless one is already pending.
    ScheduleReconnect,

    /// Resolve a pending `connect()` call.
    Settle(Result<(), GatewayError>),
}

// -----------------------------------------------------------------------------
// ----- ShardSnapshot ---------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardSnapshot {
    pub shard_id: u32,
    pub status: ShardStatus,
    pub strategy: Option<Strategy>,
    pub session_id: Option<String>,
    pub sequence: Option<u64>,
    pub latency_ms: Option<u64>,
    pub missed_acks: u8,
}

// -----------------------------------------------------------------------------
// ----- ShardSession ----------------------------------------------------------

#[derive(Debug)]
pub struct ShardSession {
    shard_id: u32,
    total_shards: u32,
    settings: Arc<ShardSettings>,
    stats: Arc<GatewayStats>,

    status: ShardStatus,
    strategy: Option<Strategy>,
    session_id: Option<String>,
    sequence: Option<u64>,
    resume_url: Option<String>,
    awaiting_handshake: bool,
    heartbeat: HeartbeatTracker,
}

// -----------------------------------------------------------------------------
// ----- ShardSession: Static --------------------------------------------------

impl ShardSession {
    pub fn new(
        shard_id: u32,
        total_shards: u32,
        settings: Arc<ShardSettings>,
        stats: Arc<GatewayStats>,
    ) -> Self {
        Self {
            shard_id,
            total_shards,
            settings,
            stats,
            status: ShardStatus::Idle,
            strategy: None,
            session_id: None,
            sequence: None,
            resume_url: None,
            awaiting_handshake: false,
            heartbeat: HeartbeatTracker::default(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ShardSession: Public --------------------------------------------------

impl ShardSession {
    pub fn status(&self) -> ShardStatus {
        self.status
    }

    pub fn strategy(&self) -> Option<Strategy> {
        self.strategy
    }

    pub fn resumable(&self) -> bool {
        self.strategy == Some(Strategy::Resume)
            && self.session_id.is_some()
            && self.sequence.is_some()
    }

    /// Move into `Connecting`/`Resuming` and return the URL to open.
    pub fn begin_connect(&mut self) -> Result<String, GatewayError> {
        if !self.status.can_connect() {
            return Err(GatewayError::AlreadyConnecting {
                shard_id: self.shard_id,
            });
        }

        if self.strategy == Some(Strategy::Shutdown) {
            self.strategy = None;
        }

        let resuming = self.resumable();
        self.status = if resuming {
            ShardStatus::Resuming
        } else {
            ShardStatus::Connecting
        };
        self.stats.inc_connect();

        let base = match (&self.resume_url, resuming) {
            (Some(url), true) => url.as_str(),
            _ => self.settings.gateway_url.as_str(),
        };
        Ok(gateway_url(base, self.settings.compression))
    }

    pub(crate) fn on_payload(&mut self, payload: GatewayPayload, now: Instant) -> Vec<Effect> {
        let Some(op) = payload.opcode() else {
            debug!("shard {}: ignoring unknown opcode {}", self.shard_id, payload.op);
            return Vec::new();
        };

        match op {
            Opcode::Hello => self.on_hello(payload),
            Opcode::Dispatch => self.on_dispatch(payload),
            Opcode::Heartbeat => {
                self.heartbeat.on_forced_send(now);
                self.send_heartbeat()
            }
            Opcode::HeartbeatAck => {
                self.heartbeat.on_ack(now);
                Vec::new()
            }
            Opcode::InvalidSession => self.on_invalid_session(payload.d.as_bool().unwrap_or(false)),
            Opcode::Reconnect => {
                debug!("shard {}: gateway requested reconnect", self.shard_id);
                self.strategy = Some(Strategy::Resume);
                vec![Effect::Terminate]
            }
            _ => {
                debug!("shard {}: ignoring send-only opcode {:?}", self.shard_id, op);
                Vec::new()
            }
        }
    }

    pub(crate) fn on_heartbeat_tick(&mut self, now: Instant) -> Vec<Effect> {
        match self.heartbeat.on_tick(now) {
            Beat::Send => self.send_heartbeat(),
            Beat::Zombied => {
                warn!(
                    "shard {}: {} heartbeats went unacknowledged, dropping connection",
                    self.shard_id,
                    self.heartbeat.misses()
                );
                self.stats.inc_zombie();
                vec![
                    Effect::Emit(ShardEventKind::Error {
                        message: "heartbeat acknowledgements missed".into(),
                    }),
                    Effect::Terminate,
                ]
            }
        }
    }

    /// Handshake grant from the fleet queue.
    pub(crate) fn identify(&mut self) -> Vec<Effect> {
        if !self.awaiting_handshake || self.status != ShardStatus::Connecting {
            debug!("shard {}: dropping stale handshake grant", self.shard_id);
            return Vec::new();
        }
        self.awaiting_handshake = false;
        self.strategy = None;

        let identify = payload::identify(
            self.settings.token.expose_secret(),
            self.settings.intents,
            &self.settings.properties,
            self.shard_id,
            self.total_shards,
        );
        self.stats.inc_identify();
        self.encoded(identify)
    }

    /// Operator-forced reconnect that keeps the session.
    pub(crate) fn request_reconnect(&mut self) -> Vec<Effect> {
        match self.status {
            ShardStatus::Connecting | ShardStatus::Resuming | ShardStatus::Ready => {
                if self.strategy != Some(Strategy::Reidentify) {
                    self.strategy = Some(Strategy::Resume);
                }
                vec![Effect::Terminate]
            }
            _ => Vec::new(),
        }
    }

    /// Operator-driven close. The actor closes the transport and then calls
    /// `on_close` with the same code.
    pub fn shutdown(&mut self, has_transport: bool) {
        self.strategy = Some(Strategy::Shutdown);
        self.awaiting_handshake = false;
        self.status = if has_transport {
            ShardStatus::Disconnecting
        } else {
            ShardStatus::Disconnected
        };
    }

    /// The single close path. `code` is `None` for terminated transports.
    pub(crate) fn on_close(&mut self, code: Option<u16>) -> Vec<Effect> {
        self.heartbeat.stop();
        self.awaiting_handshake = false;
        self.status = ShardStatus::Disconnected;

        if classify_close(code) == CloseAction::Fatal {
            let code = code.unwrap_or_default();
            let err = self.fatal_error(code);
            self.strategy = Some(Strategy::Shutdown);
            warn!("shard {}: {err}", self.shard_id);
            return vec![
                Effect::Emit(ShardEventKind::Fatal {
                    code,
                    message: err.to_string(),
                }),
                Effect::Settle(Err(err)),
            ];
        }

        if self.strategy == Some(Strategy::Shutdown) {
            return vec![
                Effect::Emit(ShardEventKind::Disconnected { code }),
                Effect::Settle(Err(GatewayError::ConnectionClosed {
                    shard_id: self.shard_id,
                })),
            ];
        }

        match classify_close(code) {
            CloseAction::Reidentify => {
                self.clear_session();
                self.strategy = Some(Strategy::Reidentify);
            }
            _ => {
                if self.strategy.is_none() {
                    self.strategy = Some(Strategy::Resume);
                }
            }
        }

        debug!(
            "shard {}: closed with {:?}, next strategy {:?}",
            self.shard_id, code, self.strategy
        );
        vec![
            Effect::Emit(ShardEventKind::Disconnected { code }),
            Effect::ScheduleReconnect,
        ]
    }

    pub fn snapshot(&self) -> ShardSnapshot {
        ShardSnapshot {
            shard_id: self.shard_id,
            status: self.status,
            strategy: self.strategy,
            session_id: self.session_id.clone(),
            sequence: self.sequence,
            latency_ms: self.heartbeat.latency().map(|d| d.as_millis() as u64),
            missed_acks: self.heartbeat.misses(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ShardSession: Private -------------------------------------------------

impl ShardSession {
    fn on_hello(&mut self, payload: GatewayPayload) -> Vec<Effect> {
        let hello: Hello = match serde_json::from_value(payload.d) {
            Ok(hello) => hello,
            Err(err) => return self.protocol_error(format!("malformed hello: {err}")),
        };

        if hello.heartbeat_interval == 0 {
            return self.protocol_error("hello without a heartbeat interval".to_string());
        }

        let interval = Duration::from_millis(hello.heartbeat_interval);
        let first = self.heartbeat.start(interval);
        let mut effects = vec![Effect::StartHeartbeat { first, interval }];

        if self.resumable() {
            // resumable() guarantees both are set
            let (Some(session_id), Some(seq)) = (self.session_id.as_deref(), self.sequence) else {
                return effects;
            };
            self.status = ShardStatus::Resuming;
            self.stats.inc_resume();
            let resume = payload::resume(self.settings.token.expose_secret(), session_id, seq);
            effects.extend(self.encoded(resume));
        } else {
            self.status = ShardStatus::Connecting;
            self.awaiting_handshake = true;
            effects.push(Effect::Emit(ShardEventKind::NeedHandshake));
        }

        effects
    }

    fn on_dispatch(&mut self, payload: GatewayPayload) -> Vec<Effect> {
        if let Some(seq) = payload.s {
            self.sequence = Some(self.sequence.map_or(seq, |current| current.max(seq)));
        }
        self.stats.inc_dispatch();

        let event = payload.t.unwrap_or_default();
        let mut effects = Vec::new();

        match event.as_str() {
            "READY" => {
                let ready: ReadyData = match serde_json::from_value(payload.d.clone()) {
                    Ok(ready) => ready,
                    Err(err) => return self.protocol_error(format!("malformed READY: {err}")),
                };
                self.session_id = Some(ready.session_id.clone());
                self.resume_url = ready.resume_gateway_url;
                self.strategy = None;
                self.status = ShardStatus::Ready;

                effects.push(Effect::Emit(ShardEventKind::Ready {
                    session_id: ready.session_id,
                }));
                effects.push(Effect::Settle(Ok(())));
            }
            "RESUMED" => {
                self.strategy = None;
                self.status = ShardStatus::Ready;

                effects.push(Effect::Emit(ShardEventKind::Resumed));
                effects.push(Effect::Settle(Ok(())));
            }
            _ => {}
        }

        effects.push(Effect::Emit(ShardEventKind::Dispatch {
            event,
            sequence: payload.s.unwrap_or_default(),
            data: payload.d,
        }));
        effects
    }

    fn on_invalid_session(&mut self, resumable: bool) -> Vec<Effect> {
        self.stats.inc_invalid_session();
        if resumable {
            self.strategy = Some(Strategy::Resume);
        } else {
            self.clear_session();
            self.strategy = Some(Strategy::Reidentify);
        }
        debug!(
            "shard {}: invalid session (resumable={resumable})",
            self.shard_id
        );
        vec![Effect::Terminate]
    }

    fn send_heartbeat(&mut self) -> Vec<Effect> {
        self.stats.inc_heartbeat();
        self.encoded(payload::heartbeat(self.sequence))
    }

    fn encoded(&self, frame: Result<String, serde_json::Error>) -> Vec<Effect> {
        match frame {
            Ok(text) => vec![Effect::Send(text)],
            Err(err) => {
                warn!("shard {}: failed to encode payload: {err}", self.shard_id);
                Vec::new()
            }
        }
    }

    fn protocol_error(&self, message: String) -> Vec<Effect> {
        warn!("shard {}: {message}", self.shard_id);
        vec![
            Effect::Emit(ShardEventKind::Error { message }),
            Effect::Terminate,
        ]
    }

    fn clear_session(&mut self) {
        self.session_id = None;
        self.sequence = None;
        self.resume_url = None;
    }

    fn fatal_error(&self, code: u16) -> GatewayError {
        let shard_id = self.shard_id;
        match code {
            AUTHENTICATION_FAILED => GatewayError::AuthenticationFailed { shard_id },
            INVALID_INTENTS => GatewayError::InvalidIntents { shard_id },
            DISALLOWED_INTENTS => GatewayError::DisallowedIntents { shard_id },
            _ => GatewayError::ConnectionClosed { shard_id },
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
