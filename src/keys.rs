/// Gossip key namespace.
///
/// Each node publishes its state as string key/value pairs:
///
/// - `proxy_addr`, `admin_addr`: immutable, published once
/// - `endpoint:<endpoint-id>`: listener count as a base-10 integer; an absent
///   key means zero listeners
use crate::error::{SyncError, SyncResult};
use std::str::FromStr;

pub const PROXY_ADDR_KEY: &str = "proxy_addr";
pub const ADMIN_ADDR_KEY: &str = "admin_addr";
pub const ENDPOINT_PREFIX: &str = "endpoint:";

/// A decoded gossip key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StateKey {
    ProxyAddr,
    AdminAddr,
    /// Listener count for the endpoint with this ID.
    Endpoint(String),
}

impl StateKey {
    pub fn endpoint(endpoint_id: impl Into<String>) -> Self {
        StateKey::Endpoint(endpoint_id.into())
    }

    /// Immutable keys are set once and never change for the lifetime of a
    /// node.
    pub fn is_immutable(&self) -> bool {
        matches!(self, StateKey::ProxyAddr | StateKey::AdminAddr)
    }

    pub fn endpoint_id(&self) -> Option<&str> {
        match self {
            StateKey::Endpoint(id) => Some(id),
            _ => None,
        }
    }

    /// Human-readable kind, used by diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            StateKey::ProxyAddr | StateKey::AdminAddr => "immutable",
            StateKey::Endpoint(_) => "endpoint",
        }
    }
}

impl FromStr for StateKey {
    type Err = SyncError;

    fn from_str(key: &str) -> SyncResult<Self> {
        match key {
            PROXY_ADDR_KEY => Ok(StateKey::ProxyAddr),
            ADMIN_ADDR_KEY => Ok(StateKey::AdminAddr),
            _ => match key.strip_prefix(ENDPOINT_PREFIX) {
                Some(id) if !id.is_empty() => Ok(StateKey::Endpoint(id.to_string())),
                _ => Err(SyncError::UnsupportedKey {
                    key: key.to_string(),
                }),
            },
        }
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateKey::ProxyAddr => f.write_str(PROXY_ADDR_KEY),
            StateKey::AdminAddr => f.write_str(ADMIN_ADDR_KEY),
            StateKey::Endpoint(id) => write!(f, "{}{}", ENDPOINT_PREFIX, id),
        }
    }
}

/// Key for an endpoint's listener count.
pub fn endpoint_key(endpoint_id: &str) -> String {
    format!("{}{}", ENDPOINT_PREFIX, endpoint_id)
}

/// Parse a listener count published under `key`.
pub fn parse_listeners(key: &str, value: &str) -> SyncResult<usize> {
    value
        .parse::<usize>()
        .map_err(|source| SyncError::InvalidListeners {
            key: key.to_string(),
            value: value.to_string(),
            source,
        })
}

pub fn encode_listeners(count: usize) -> String {
    count.to_string()
}
