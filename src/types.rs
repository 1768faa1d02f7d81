/// Node records shared by the membership store and the synchronizer.
///
/// A [`Node`] is a visible cluster member (or the local node). A
/// [`PendingNode`] has the same shape but lives in the synchronizer's staging
/// table until both of its immutable addresses are known.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Length of generated node identifiers.
const GENERATED_ID_LEN: usize = 7;

/// Opaque, globally unique node identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a short random identifier.
    pub fn generate() -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        Self(simple[..GENERATED_ID_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Failure detector's current belief about a remote node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Node is reachable.
    Active,
    /// Node is not responding but may recover.
    Unreachable,
    /// Node left gracefully and is waiting to expire.
    Left,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Active => "active",
            NodeStatus::Unreachable => "unreachable",
            NodeStatus::Left => "left",
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set `count` listeners for `endpoint_id`, removing the entry at zero.
fn set_listeners(endpoints: &mut BTreeMap<String, usize>, endpoint_id: &str, count: usize) {
    if count == 0 {
        endpoints.remove(endpoint_id);
    } else {
        endpoints.insert(endpoint_id.to_string(), count);
    }
}

/// A cluster member as seen by the membership store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Address serving proxy traffic. Immutable.
    pub proxy_addr: String,
    /// Address serving the admin API. Immutable.
    pub admin_addr: String,
    /// Listener count per endpoint ID. Zero counts are never stored.
    pub endpoints: BTreeMap<String, usize>,
    pub status: NodeStatus,
}

impl Node {
    /// Create an active node with no endpoints.
    pub fn new(
        id: impl Into<NodeId>,
        proxy_addr: impl Into<String>,
        admin_addr: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            proxy_addr: proxy_addr.into(),
            admin_addr: admin_addr.into(),
            endpoints: BTreeMap::new(),
            status: NodeStatus::Active,
        }
    }

    /// Listener count for an endpoint, zero if absent.
    pub fn listeners(&self, endpoint_id: &str) -> usize {
        self.endpoints.get(endpoint_id).copied().unwrap_or(0)
    }

    pub fn set_endpoint(&mut self, endpoint_id: &str, count: usize) {
        set_listeners(&mut self.endpoints, endpoint_id, count);
    }

    /// Remove an endpoint, returning whether it was present.
    pub fn remove_endpoint(&mut self, endpoint_id: &str) -> bool {
        self.endpoints.remove(endpoint_id).is_some()
    }

    /// Total listeners across all endpoints.
    pub fn total_listeners(&self) -> usize {
        self.endpoints.values().sum()
    }
}

/// A node whose existence is known but which can't join the cluster yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingNode {
    pub id: NodeId,
    pub proxy_addr: Option<String>,
    pub admin_addr: Option<String>,
    pub endpoints: BTreeMap<String, usize>,
    /// Status observed while pending. `None` until a reachability or leave
    /// notification arrives.
    pub status: Option<NodeStatus>,
    /// When the node was first staged.
    pub first_seen: DateTime<Utc>,
}

impl PendingNode {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            proxy_addr: None,
            admin_addr: None,
            endpoints: BTreeMap::new(),
            status: None,
            first_seen: Utc::now(),
        }
    }

    /// Set the proxy address. Returns false if it was already set or `addr`
    /// is empty.
    pub fn set_proxy_addr(&mut self, addr: &str) -> bool {
        set_once(&mut self.proxy_addr, addr)
    }

    /// Set the admin address. Returns false if it was already set or `addr`
    /// is empty.
    pub fn set_admin_addr(&mut self, addr: &str) -> bool {
        set_once(&mut self.admin_addr, addr)
    }

    pub fn set_endpoint(&mut self, endpoint_id: &str, count: usize) {
        set_listeners(&mut self.endpoints, endpoint_id, count);
    }

    pub fn remove_endpoint(&mut self, endpoint_id: &str) -> bool {
        self.endpoints.remove(endpoint_id).is_some()
    }

    /// Whether both immutable fields are known.
    pub fn is_complete(&self) -> bool {
        self.proxy_addr.is_some() && self.admin_addr.is_some()
    }

    /// Convert into a cluster member.
    ///
    /// Returns `None` while either address is missing. The status defaults to
    /// active unless one was observed while pending.
    pub fn into_node(self) -> Option<Node> {
        let (Some(proxy_addr), Some(admin_addr)) = (self.proxy_addr, self.admin_addr) else {
            return None;
        };
        Some(Node {
            id: self.id,
            proxy_addr,
            admin_addr,
            endpoints: self.endpoints,
            status: self.status.unwrap_or(NodeStatus::Active),
        })
    }
}

fn set_once(field: &mut Option<String>, value: &str) -> bool {
    if field.is_some() || value.is_empty() {
        return false;
    }
    *field = Some(value.to_string());
    true
}

/// Where a node identifier currently resides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeLocation {
    /// Not known to the synchronizer or the store.
    Unknown,
    /// Staged, waiting for its immutable fields.
    Pending,
    /// Visible in the membership store.
    Active,
}
