//! The configuration surface enumerated in `spec.md` §6. On-disk loading and
//! DI wiring are out of scope (`spec.md` §1) -- these are plain structs the
//! embedding application populates however it likes; `serde` derives are
//! kept (the teacher crate already depends on `serde`) so a caller can still
//! deserialize one from whatever source they choose.

use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

use crate::endpoint::Endpoint;

/// Which wire dialect a pool speaks (`spec.md` §4.1). Binary is the default;
/// SASL authentication is binary-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Binary,
    Text,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Binary
    }
}

/// `socket_pool.failure_policy` (`spec.md` §6, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FailurePolicyConfig {
    None,
    Throttling {
        failure_threshold: u32,
        #[serde(with = "duration_secs")]
        reset_after: Duration,
        #[serde(with = "duration_secs")]
        dead_timeout: Duration,
    },
}

impl Default for FailurePolicyConfig {
    fn default() -> Self {
        FailurePolicyConfig::Throttling {
            failure_threshold: 4,
            reset_after: Duration::from_secs(360),
            dead_timeout: Duration::from_secs(10),
        }
    }
}

/// `socket_pool` (`spec.md` §6, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketPoolConfig {
    pub min_pool_size: usize,
    pub max_pool_size: usize,
    #[serde(with = "duration_secs")]
    pub connection_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub receive_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub queue_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub dead_timeout: Duration,
    pub failure_policy: FailurePolicyConfig,
}

impl Default for SocketPoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: 2,
            max_pool_size: 10,
            connection_timeout: Duration::from_secs(5),
            receive_timeout: Duration::from_secs(5),
            queue_timeout: Duration::from_secs(5),
            dead_timeout: Duration::from_secs(10),
            failure_policy: FailurePolicyConfig::default(),
        }
    }
}

/// `authentication` (`spec.md` §6). Only the `PLAIN` mechanism's parameters
/// are modeled directly; a caller supplying a custom [`crate::auth::AuthProvider`]
/// bypasses this struct entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub zone: Option<String>,
    pub user_name: String,
    pub password: String,
}

/// Top-level client configuration (`spec.md` §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub servers: Vec<Endpoint>,
    pub socket_pool: SocketPoolConfig,
    #[serde(default)]
    pub protocol: Protocol,
    pub authentication: Option<AuthConfig>,
    /// Hard-coded per `spec.md` §5 and §9's open questions; exposed here so
    /// callers who need a different bound for cross-node fan-out can set it.
    #[serde(with = "duration_secs", default = "default_multi_node_deadline")]
    pub multi_node_deadline: Duration,
}

fn default_multi_node_deadline() -> Duration {
    Duration::from_secs(13)
}

impl ClientConfig {
    pub fn new(servers: Vec<Endpoint>) -> Self {
        Self {
            servers,
            socket_pool: SocketPoolConfig::default(),
            protocol: Protocol::default(),
            authentication: None,
            multi_node_deadline: default_multi_node_deadline(),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_protocol_is_binary() {
        assert_eq!(Protocol::Binary, Protocol::default());
    }

    #[test]
    fn test_new_config_uses_defaults() {
        let config = ClientConfig::new(vec![Endpoint::new("localhost", 11211)]);
        assert_eq!(Duration::from_secs(13), config.multi_node_deadline);
        assert_eq!(2, config.socket_pool.min_pool_size);
    }
}
