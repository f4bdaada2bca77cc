use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Opcode;

// -----------------------------------------------------------------------------
// ----- GatewayPayload (inbound) ----------------------------------------------

/// Envelope of every frame the gateway sends. `s` and `t` are only set on
/// Dispatch frames.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,

    #[serde(default)]
    pub d: Value,

    #[serde(default)]
    pub s: Option<u64>,

    #[serde(default)]
    pub t: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hello {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadyData {
    pub session_id: String,

    #[serde(default)]
    pub resume_gateway_url: Option<String>,
}

// -----------------------------------------------------------------------------
// ----- GatewayPayload: Static ------------------------------------------------

impl GatewayPayload {
    pub fn parse(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_u8(self.op)
    }
}

// -----------------------------------------------------------------------------
// ----- Outbound --------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: "gatecrab".to_string(),
            device: "gatecrab".to_string(),
        }
    }
}

#[derive(Serialize)]
struct Outbound<T> {
    op: u8,
    d: T,
}

#[derive(Serialize)]
struct Identify<'a> {
    token: &'a str,
    intents: u64,
    properties: &'a IdentifyProperties,
    shard: [u32; 2],
}

#[derive(Serialize)]
struct Resume<'a> {
    token: &'a str,
    session_id: &'a str,
    seq: u64,
}

pub fn heartbeat(sequence: Option<u64>) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Outbound {
        op: Opcode::Heartbeat.as_u8(),
        d: sequence,
    })
}

pub fn identify(
    token: &str,
    intents: u64,
    properties: &IdentifyProperties,
    shard_id: u32,
    total_shards: u32,
) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Outbound {
        op: Opcode::Identify.as_u8(),
        d: Identify {
            token,
            intents,
            properties,
            shard: [shard_id, total_shards],
        },
    })
}

pub fn resume(token: &str, session_id: &str, seq: u64) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Outbound {
        op: Opcode::Resume.as_u8(),
        d: Resume {
            token,
            session_id,
            seq,
        },
    })
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_dispatch_envelope() {
        let raw = br#"{"op":0,"s":42,"t":"MESSAGE_CREATE","d":{"id":"1"}}"#;
        let payload = GatewayPayload::parse(raw).unwrap();
        assert_eq!(payload.opcode(), Some(Opcode::Dispatch));
        assert_eq!(payload.s, Some(42));
        assert_eq!(payload.t.as_deref(), Some("MESSAGE_CREATE"));
        assert_eq!(payload.d, json!({"id": "1"}));
    }

    #[test]
    fn missing_fields_default_to_null() {
        let payload = GatewayPayload::parse(br#"{"op":11}"#).unwrap();
        assert_eq!(payload.opcode(), Some(Opcode::HeartbeatAck));
        assert!(payload.d.is_null());
        assert_eq!(payload.s, None);
    }

    #[test]
    fn identify_carries_shard_pair() {
        let props = IdentifyProperties {
            os: "linux".into(),
            browser: "crab".into(),
            device: "crab".into(),
        };
        let raw = identify("tok", 513, &props, 3, 8).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            value,
            json!({
                "op": 2,
                "d": {
                    "token": "tok",
                    "intents": 513,
                    "properties": {"os": "linux", "browser": "crab", "device": "crab"},
                    "shard": [3, 8]
                }
            })
        );
    }

    #[test]
    fn resume_and_heartbeat_shapes() {
        let value: Value = serde_json::from_str(&resume("tok", "abc", 9).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"op": 6, "d": {"token": "tok", "session_id": "abc", "seq": 9}})
        );

        let value: Value = serde_json::from_str(&heartbeat(None).unwrap()).unwrap();
        assert_eq!(value, json!({"op": 1, "d": null}));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
