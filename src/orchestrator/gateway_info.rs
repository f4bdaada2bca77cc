use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::GatewayError;

// -----------------------------------------------------------------------------
// ----- GatewayInfo -----------------------------------------------------------

/// Fleet sizing hints from the REST API's `GET /gateway/bot`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayInfo {
    pub url: String,
    pub shards: u32,
    pub session_start_limit: SessionStartLimit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStartLimit {
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub remaining: u32,
    #[serde(default)]
    pub reset_after: u64,
    pub max_concurrency: u32,
}

// -----------------------------------------------------------------------------
// ----- GatewayInfoSource -----------------------------------------------------

#[async_trait]
pub trait GatewayInfoSource: Send + Sync + 'static {
    async fn fetch(&self) -> Result<GatewayInfo, GatewayError>;
}

// -----------------------------------------------------------------------------
// ----- RestGatewayInfo -------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RestGatewayInfo {
    client: Client,
    api_base: String,
    token: SecretString,
}

impl RestGatewayInfo {
    pub fn new(api_base: impl Into<String>, token: SecretString) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into(),
            token,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/gateway/bot", self.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl GatewayInfoSource for RestGatewayInfo {
    async fn fetch(&self) -> Result<GatewayInfo, GatewayError> {
        let url = self.endpoint();
        debug!("fetching gateway info from {url}");

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bot {}", self.token.expose_secret()))
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| GatewayError::GatewayInfo(e.to_string()))?;

        response
            .json::<GatewayInfo>()
            .await
            .map_err(|e| GatewayError::GatewayInfo(e.to_string()))
    }
}

// -----------------------------------------------------------------------------
// ----- StaticGatewayInfo -----------------------------------------------------

/// Fixed answer; for tests and for fleets configured without REST access.
#[derive(Debug, Clone)]
pub struct StaticGatewayInfo(pub GatewayInfo);

impl StaticGatewayInfo {
    pub fn new(url: impl Into<String>, shards: u32, max_concurrency: u32) -> Self {
        Self(GatewayInfo {
            url: url.into(),
            shards,
            session_start_limit: SessionStartLimit {
                total: 1000,
                remaining: 1000,
                reset_after: 0,
                max_concurrency,
            },
        })
    }
}

#[async_trait]
impl GatewayInfoSource for StaticGatewayInfo {
    async fn fetch(&self) -> Result<GatewayInfo, GatewayError> {
        Ok(self.0.clone())
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_rest_shape() {
        let raw = r#"{
            "url": "wss://gateway.discord.gg",
            "shards": 9,
            "session_start_limit": {
                "total": 1000, "remaining": 999, "reset_after": 14400000, "max_concurrency": 16
            }
        }"#;

        let info: GatewayInfo = serde_json::from_str(raw).unwrap();
        assert_eq!(info.shards, 9);
        assert_eq!(info.session_start_limit.max_concurrency, 16);
    }

    #[test]
    fn endpoint_ignores_trailing_slash() {
        let rest = RestGatewayInfo::new("https://api.test/v10/", SecretString::new("t".into()));
        assert_eq!(rest.endpoint(), "https://api.test/v10/gateway/bot");
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
