/// Point-in-time view of cluster membership for inspection.
use crate::cluster::MembershipStore;
use crate::syncer::Syncer;
use crate::types::{Node, NodeId, NodeStatus, PendingNode};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Cluster status information.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    /// This node's ID.
    pub local_id: NodeId,
    /// Number of active members.
    pub active: usize,
    /// Number of unreachable members.
    pub unreachable: usize,
    /// Number of members that left and haven't expired.
    pub left: usize,
    /// Members, sorted by ID.
    pub nodes: Vec<Node>,
    /// Nodes waiting for their immutable fields.
    pub pending: Vec<PendingNode>,
    pub generated_at: DateTime<Utc>,
}

impl ClusterStatus {
    /// Collect the status of `syncer` and the store behind it.
    pub fn collect<S: MembershipStore + 'static>(syncer: &Syncer<S>) -> Self {
        let nodes = syncer.store().nodes();
        let count = |status: NodeStatus| nodes.iter().filter(|n| n.status == status).count();

        Self {
            local_id: syncer.store().local_id(),
            active: count(NodeStatus::Active),
            unreachable: count(NodeStatus::Unreachable),
            left: count(NodeStatus::Left),
            pending: syncer.pending_nodes(),
            generated_at: Utc::now(),
            nodes,
        }
    }

    /// Total members, excluding pending nodes and the local node.
    pub fn member_count(&self) -> usize {
        self.nodes.len()
    }
}
