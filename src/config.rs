/// Configuration for the local node.
use crate::error::{SyncError, SyncResult};
use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default address for proxy traffic.
pub const DEFAULT_PROXY_ADDR: &str = "0.0.0.0:8000";

/// Default address for the admin API.
pub const DEFAULT_ADMIN_ADDR: &str = "0.0.0.0:8002";

/// Identity and addresses of the local node.
///
/// Missing fields fall back to their defaults when loaded from JSON, so a
/// file only needs to name what it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Unique node ID (default: randomly generated).
    pub node_id: NodeId,
    /// Address advertised for proxy traffic.
    pub proxy_addr: String,
    /// Address advertised for the admin API.
    pub admin_addr: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::generate(),
            proxy_addr: DEFAULT_PROXY_ADDR.to_string(),
            admin_addr: DEFAULT_ADMIN_ADDR.to_string(),
        }
    }
}

impl NodeConfig {
    /// Create a new config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the node ID.
    pub fn node_id(mut self, id: impl Into<NodeId>) -> Self {
        self.node_id = id.into();
        self
    }

    /// Set the advertised proxy address.
    pub fn proxy_addr(mut self, addr: impl Into<String>) -> Self {
        self.proxy_addr = addr.into();
        self
    }

    /// Set the advertised admin address.
    pub fn admin_addr(mut self, addr: impl Into<String>) -> Self {
        self.admin_addr = addr.into();
        self
    }

    /// Check the config can describe a cluster member.
    ///
    /// Remote nodes only join the cluster once both addresses are known, so
    /// an empty address would leave this node pending forever on its peers.
    pub fn validate(&self) -> SyncResult<()> {
        if self.node_id.is_empty() {
            return Err(SyncError::InvalidConfig {
                reason: "node id must not be empty".to_string(),
            });
        }
        if self.proxy_addr.is_empty() {
            return Err(SyncError::InvalidConfig {
                reason: "proxy address must not be empty".to_string(),
            });
        }
        if self.admin_addr.is_empty() {
            return Err(SyncError::InvalidConfig {
                reason: "admin address must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Parse and validate a config from JSON.
    pub fn from_json(json: &str) -> SyncResult<Self> {
        let config: NodeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config from a JSON file.
    pub fn from_json_file(path: &Path) -> SyncResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}
