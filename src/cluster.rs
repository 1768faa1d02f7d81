/// Cluster membership state.
///
/// This module holds the authoritative view of the cluster:
///
/// - The local node, including the endpoints it is serving
/// - Remote members that have been promoted by the synchronizer
/// - Subscribers notified when a local endpoint's listener count changes
///
/// # Design
///
/// [`MembershipStore`] is the contract the synchronizer depends on, so it can
/// be exercised against any thread-safe store. [`ClusterState`] is the
/// in-memory implementation: remote members live in a `DashMap`, the local
/// node behind a lock of its own, and every operation is safe to call
/// concurrently from gossip and proxy threads.
use crate::config::NodeConfig;
use crate::error::SyncResult;
use crate::types::{Node, NodeId, NodeStatus};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Callback fired with the endpoint ID whenever a local listener count changes.
pub type LocalEndpointCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Operations the synchronizer needs from the membership store.
///
/// Implementations must be safe to call concurrently.
pub trait MembershipStore: Send + Sync {
    /// The local node's own record.
    fn local_node(&self) -> Node;

    fn local_id(&self) -> NodeId;

    /// Look up a remote member.
    fn node(&self, id: &NodeId) -> Option<Node>;

    /// Add a promoted node as a member.
    fn insert_active(&self, node: Node);

    /// Delete a member. Returns false if it wasn't a member.
    fn remove_expired(&self, id: &NodeId) -> bool;

    /// Update a member's status. Returns false if it isn't a member.
    fn set_remote_status(&self, id: &NodeId, status: NodeStatus) -> bool;

    /// Set a member's listener count for an endpoint; zero removes it.
    /// Returns false if `id` isn't a member.
    fn set_remote_endpoint_count(&self, id: &NodeId, endpoint_id: &str, count: usize) -> bool;

    /// Remove an endpoint from a member. Returns false if `id` isn't a
    /// member; removing an endpoint the member doesn't have succeeds.
    fn remove_remote_endpoint(&self, id: &NodeId, endpoint_id: &str) -> bool;

    fn subscribe_local_endpoint_changes(&self, callback: LocalEndpointCallback);

    fn local_endpoint_listener_count(&self, endpoint_id: &str) -> usize;

    /// All remote members.
    fn nodes(&self) -> Vec<Node>;
}

/// In-memory cluster membership.
pub struct ClusterState {
    local_id: NodeId,
    /// The local node. Never stored in `nodes`.
    local: RwLock<Node>,
    /// Remote members.
    nodes: DashMap<NodeId, Node>,
    /// Local endpoint subscribers.
    subscribers: Mutex<Vec<LocalEndpointCallback>>,
}

impl ClusterState {
    /// Create the cluster state for a local node.
    pub fn new(config: &NodeConfig) -> SyncResult<Self> {
        config.validate()?;
        let local = Node::new(
            config.node_id.clone(),
            config.proxy_addr.clone(),
            config.admin_addr.clone(),
        );
        Ok(Self {
            local_id: config.node_id.clone(),
            local: RwLock::new(local),
            nodes: DashMap::new(),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Register a local listener on an endpoint.
    pub fn add_local_endpoint(&self, endpoint_id: &str) {
        {
            let mut local = self.local.write();
            let count = local.listeners(endpoint_id) + 1;
            local.set_endpoint(endpoint_id, count);
        }
        self.notify_local_endpoint(endpoint_id);
    }

    /// Unregister a local listener from an endpoint.
    ///
    /// The endpoint is removed once its last listener goes. Removing a
    /// listener from an endpoint with none is a no-op.
    pub fn remove_local_endpoint(&self, endpoint_id: &str) {
        {
            let mut local = self.local.write();
            let count = local.listeners(endpoint_id);
            if count == 0 {
                return;
            }
            local.set_endpoint(endpoint_id, count - 1);
        }
        self.notify_local_endpoint(endpoint_id);
    }

    /// Number of remote members.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn notify_local_endpoint(&self, endpoint_id: &str) {
        // Callbacks read the local node, so they run without holding any of
        // our locks.
        let subscribers: Vec<LocalEndpointCallback> = self.subscribers.lock().clone();
        for callback in subscribers {
            callback(endpoint_id);
        }
    }
}

impl MembershipStore for ClusterState {
    fn local_node(&self) -> Node {
        self.local.read().clone()
    }

    fn local_id(&self) -> NodeId {
        self.local_id.clone()
    }

    fn node(&self, id: &NodeId) -> Option<Node> {
        self.nodes.get(id).map(|entry| entry.value().clone())
    }

    fn insert_active(&self, node: Node) {
        if node.id == self.local_id {
            tracing::warn!(node_id = %node.id, "refusing to add local node as remote member");
            return;
        }
        self.nodes.insert(node.id.clone(), node);
    }

    fn remove_expired(&self, id: &NodeId) -> bool {
        self.nodes.remove(id).is_some()
    }

    fn set_remote_status(&self, id: &NodeId, status: NodeStatus) -> bool {
        match self.nodes.get_mut(id) {
            Some(mut node) => {
                node.status = status;
                true
            }
            None => false,
        }
    }

    fn set_remote_endpoint_count(&self, id: &NodeId, endpoint_id: &str, count: usize) -> bool {
        match self.nodes.get_mut(id) {
            Some(mut node) => {
                node.set_endpoint(endpoint_id, count);
                true
            }
            None => false,
        }
    }

    fn remove_remote_endpoint(&self, id: &NodeId, endpoint_id: &str) -> bool {
        match self.nodes.get_mut(id) {
            Some(mut node) => {
                node.remove_endpoint(endpoint_id);
                true
            }
            None => false,
        }
    }

    fn subscribe_local_endpoint_changes(&self, callback: LocalEndpointCallback) {
        self.subscribers.lock().push(callback);
    }

    fn local_endpoint_listener_count(&self, endpoint_id: &str) -> usize {
        self.local.read().listeners(endpoint_id)
    }

    fn nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .nodes
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }
}
