//! Environment-level configuration
//!
//! Read once at process start into a plain struct; components receive
//! their dependencies by constructor injection, never by reading the
//! environment themselves.

use crate::channel::{MemoryHub, MessageChannel, RedisChannel};
use crate::error::{RelayError, Result};
use crate::retry::DEFAULT_MAX_RETRIES;
use std::sync::Arc;

/// Which transport backs the message channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Redis Pub/Sub — cross-process deployments
    Redis,
    /// In-process hub — tests and single-process use
    Memory,
}

/// Relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Transport selection (`CHANNEL_TYPE`: `redis` | `memory`)
    pub transport: TransportKind,

    /// Redis connection URL (`REDIS_URL`)
    pub redis_url: String,

    /// Visualization retry ceiling (`MAX_VISUALIZATION_RETRIES`)
    pub max_retries: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Redis,
            redis_url: "redis://localhost:6379".to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RelayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let transport = match std::env::var("CHANNEL_TYPE") {
            Ok(value) => match value.as_str() {
                "redis" => TransportKind::Redis,
                "memory" => TransportKind::Memory,
                other => {
                    return Err(RelayError::Config(format!(
                        "Unknown CHANNEL_TYPE '{}' (expected 'redis' or 'memory')",
                        other
                    )))
                }
            },
            Err(_) => defaults.transport,
        };

        let redis_url = std::env::var("REDIS_URL").unwrap_or(defaults.redis_url);

        let max_retries = match std::env::var("MAX_VISUALIZATION_RETRIES") {
            Ok(value) => value.parse().map_err(|_| {
                RelayError::Config(format!(
                    "Invalid MAX_VISUALIZATION_RETRIES '{}' (expected an integer)",
                    value
                ))
            })?,
            Err(_) => defaults.max_retries,
        };

        Ok(Self {
            transport,
            redis_url,
            max_retries,
        })
    }

    /// Build a channel for the configured transport
    ///
    /// Explicit factory: the in-process hub is passed in so every memory
    /// channel in the process shares one broker.
    pub fn build_channel(&self, hub: &MemoryHub) -> Arc<dyn MessageChannel> {
        match self.transport {
            TransportKind::Redis => Arc::new(RedisChannel::new(self.redis_url.clone())),
            TransportKind::Memory => Arc::new(hub.channel()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.transport, TransportKind::Redis);
        assert_eq!(config.redis_url, "redis://localhost:6379");
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn test_build_memory_channel_shares_hub() {
        let config = RelayConfig {
            transport: TransportKind::Memory,
            ..RelayConfig::default()
        };
        let hub = MemoryHub::new();
        // Two channels from one config must land on the same hub
        let _first = config.build_channel(&hub);
        let _second = config.build_channel(&hub);
    }
}
