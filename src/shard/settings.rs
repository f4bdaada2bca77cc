use secrecy::SecretString;

use super::reconnect::ReconnectPolicy;
use crate::protocol::{Compression, IdentifyProperties};

// -----------------------------------------------------------------------------
// ----- ShardSettings ---------------------------------------------------------

/// Per-connection settings shared by every shard in a group.
#[derive(Debug, Clone)]
pub struct ShardSettings {
    pub token: SecretString,
    pub intents: u64,
    pub gateway_url: String,
    pub compression: Compression,
    pub properties: IdentifyProperties,
    pub reconnect: ReconnectPolicy,
}

impl ShardSettings {
    pub fn new(token: SecretString, gateway_url: impl Into<String>) -> Self {
        Self {
            token,
            intents: 0,
            gateway_url: gateway_url.into(),
            compression: Compression::default(),
            properties: IdentifyProperties::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_intents(mut self, intents: u64) -> Self {
        self.intents = intents;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    #[cfg(test)]
    pub(crate) fn for_tests(gateway_url: &str) -> Self {
        Self::new(SecretString::new("test-token".into()), gateway_url)
            .with_compression(Compression::None)
            .with_reconnect(ReconnectPolicy::fixed(std::time::Duration::from_millis(1000)))
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
