use once_cell::sync::OnceCell;
use secrecy::SecretString;
use serde::Deserialize;
use std::{path::Path, time::Duration};
use thiserror::Error;
use tokio::fs;

use super::types::Runtime;
use crate::orchestrator::{FleetSettings, HANDSHAKE_WINDOW};
use crate::protocol::Compression;
use crate::shard::{ReconnectPolicy, ShardSettings};
use crate::worker::BridgeOptions;

// -----------------------------------------------------------------------------
// ----- Singleton -------------------------------------------------------------

static GATEWAY: OnceCell<GatewayConfig> = OnceCell::new();

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const TOKEN_ENV: &str = "GATECRAB_TOKEN";

const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";
const DEFAULT_SHARDS_PER_GROUP: u32 = 16;

// -----------------------------------------------------------------------------
// ----- GatewayConfig ---------------------------------------------------------

/// Everything the fleet reads from `gatecrab.toml`.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub token: SecretString,
    pub intents: u64,
    pub api_base: String,
    pub gateway_url: Option<String>,
    pub shards_per_group: u32,
    pub total_shards: Option<u32>,
    pub runtime: Runtime,
    pub compression: Compression,
    pub reconnect: ReconnectPolicy,
    pub eval_timeout: Duration,
    pub kill_grace: Duration,
}

// -----------------------------------------------------------------------------
// ----- GatewayConfig: Static -------------------------------------------------

impl GatewayConfig {
    /// Init: panic on any error. A fleet never starts half-configured.
    pub async fn init(path: &Path) {
        let cfg = Self::from_file_async(path)
            .await
            .unwrap_or_else(|e| panic!("failed to load gateway config from {:?}: {e}", path));

        GATEWAY
            .set(cfg)
            .unwrap_or_else(|_| panic!("GatewayConfig::init called twice"));
    }

    pub fn handle() -> &'static GatewayConfig {
        GATEWAY.get().expect("GatewayConfig not initialized")
    }

    /// `GATECRAB_TOKEN` wins over the file's `token`.
    pub async fn from_file_async(path: &Path) -> Result<GatewayConfig, ConfigError> {
        let raw = fs::read_to_string(path).await.map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&raw, std::env::var(TOKEN_ENV).ok())
    }

    pub fn parse(raw: &str, env_token: Option<String>) -> Result<GatewayConfig, ConfigError> {
        let doc: GatewayFile = toml::from_str(raw).map_err(|e| ConfigError::Toml { source: e })?;

        let token = env_token
            .filter(|t| !t.trim().is_empty())
            .or(doc.token)
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingToken)?;

        if doc.shards_per_group == Some(0) {
            return Err(ConfigError::InvalidField("shards_per_group".into()));
        }
        if doc.total_shards == Some(0) {
            return Err(ConfigError::InvalidField("total_shards".into()));
        }

        let defaults = ReconnectPolicy::default();
        let reconnect = ReconnectPolicy {
            base: doc.reconnect.base.unwrap_or(defaults.base),
            max: doc.reconnect.max.unwrap_or(defaults.max),
            jitter: doc.reconnect.jitter.unwrap_or(defaults.jitter),
        };
        if !(0.0..=1.0).contains(&reconnect.jitter) {
            return Err(ConfigError::InvalidField("reconnect.jitter".into()));
        }
        if reconnect.max < reconnect.base {
            return Err(ConfigError::InvalidField("reconnect.max".into()));
        }

        let bridge = BridgeOptions::default();

        Ok(GatewayConfig {
            token: SecretString::new(token.into_boxed_str()),
            intents: doc.intents,
            api_base: doc.api_base.unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            gateway_url: doc.gateway_url,
            shards_per_group: doc.shards_per_group.unwrap_or(DEFAULT_SHARDS_PER_GROUP),
            total_shards: doc.total_shards,
            runtime: doc.runtime,
            compression: doc.compression,
            reconnect,
            eval_timeout: doc.eval_timeout.unwrap_or(bridge.eval_timeout),
            kill_grace: doc.kill_grace.unwrap_or(bridge.kill_grace),
        })
    }
}

// -----------------------------------------------------------------------------
// ----- GatewayConfig: Public -------------------------------------------------

impl GatewayConfig {
    pub fn shard_settings(&self, gateway_url: &str) -> ShardSettings {
        ShardSettings::new(self.token.clone(), gateway_url)
            .with_intents(self.intents)
            .with_compression(self.compression)
            .with_reconnect(self.reconnect)
    }

    pub fn fleet_settings(&self) -> FleetSettings {
        FleetSettings {
            shards_per_group: self.shards_per_group,
            total_shards: self.total_shards,
            gateway_url: self.gateway_url.clone(),
            handshake_window: HANDSHAKE_WINDOW,
            bridge: BridgeOptions {
                eval_timeout: self.eval_timeout,
                kill_grace: self.kill_grace,
            },
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: On-disk format ----------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct GatewayFile {
    #[serde(default)]
    token: Option<String>,

    #[serde(default)]
    intents: u64,

    #[serde(default)]
    api_base: Option<String>,

    #[serde(default)]
    gateway_url: Option<String>,

    #[serde(default)]
    shards_per_group: Option<u32>,

    #[serde(default)]
    total_shards: Option<u32>,

    #[serde(default)]
    runtime: Runtime,

    #[serde(default, alias = "compress")]
    compression: Compression,

    #[serde(default)]
    reconnect: ReconnectFile,

    #[serde(default, deserialize_with = "de_duration")]
    eval_timeout: Option<Duration>,

    #[serde(default, deserialize_with = "de_duration")]
    kill_grace: Option<Duration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ReconnectFile {
    #[serde(default, deserialize_with = "de_duration")]
    base: Option<Duration>,

    #[serde(default, deserialize_with = "de_duration")]
    max: Option<Duration>,

    #[serde(default)]
    jitter: Option<f64>,
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

/// Integer milliseconds (`30000`) or a humantime string (`"30s"`, `"1m 30s"`).
fn de_duration<'de, D>(d: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{Error, Unexpected, Visitor};
    use std::fmt;

    struct OptVisitor;
    struct DurationVisitor;

    impl<'de> Visitor<'de> for OptVisitor {
        type Value = Option<Duration>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("integer milliseconds (e.g., 30000) or a duration string (e.g., \"30s\")")
        }
        fn visit_none<E: Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
        fn visit_unit<E: Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
        fn visit_some<D2>(self, d2: D2) -> Result<Self::Value, D2::Error>
        where
            D2: serde::Deserializer<'de>,
        {
            d2.deserialize_any(DurationVisitor)
        }
    }

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Option<Duration>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("integer milliseconds (e.g., 30000) or a duration string (e.g., \"30s\")")
        }

        fn visit_u64<E: Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(Duration::from_millis(v)))
        }

        fn visit_i64<E: Error>(self, v: i64) -> Result<Self::Value, E> {
            if v < 0 {
                return Err(E::invalid_value(Unexpected::Signed(v), &self));
            }
            Ok(Some(Duration::from_millis(v as u64)))
        }

        fn visit_str<E: Error>(self, v: &str) -> Result<Self::Value, E> {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|_| E::invalid_value(Unexpected::Str(v), &self))
        }
    }

    d.deserialize_option(OptVisitor)
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no token: set `token` in the config file or {TOKEN_ENV}")]
    MissingToken,

    #[error("invalid or missing field '{0}'")]
    InvalidField(String),

    #[error("read error for {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("toml parse error: {source}")]
    Toml { source: toml::de::Error },
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
