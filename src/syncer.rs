/// Synchronizes gossip state with the cluster membership store.
///
/// Gossip delivers a node's existence (join) and its attributes (key upserts)
/// as separate messages with no ordering between them. A node that joins is
/// therefore staged as *pending* and only added to the cluster once both of
/// its immutable fields (`proxy_addr` and `admin_addr`) are known.
///
/// # Lookup order
///
/// Every inbound callback checks the store first and only then the pending
/// table. Once a node is promoted all further updates resolve against the
/// store. If a node is promoted between the two checks, the pending path
/// retries the store while holding the pending lock, so updates racing with
/// promotion are never dropped.
///
/// Locks are always taken pending-then-store, never the other way round.
///
/// # Outbound
///
/// [`Syncer::sync`] publishes the local node's state through a [`Gossiper`]
/// and keeps endpoint listener counts up to date as they change.
use crate::cluster::MembershipStore;
use crate::gossip::{Gossiper, Watcher};
use crate::keys::{self, StateKey, ADMIN_ADDR_KEY, PROXY_ADDR_KEY};
use crate::types::{NodeId, NodeLocation, NodeStatus, PendingNode};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Reconciles gossip events into a [`MembershipStore`].
///
/// The store is called while the pending lock is held when retrying after a
/// concurrent promotion. This can't deadlock: the store never calls back into
/// the syncer, and its only callbacks (local endpoint changes) don't touch the
/// pending table.
pub struct Syncer<S: MembershipStore> {
    /// Nodes we don't have the full state for yet, so can't be added to the
    /// cluster.
    pending: Mutex<HashMap<NodeId, PendingNode>>,
    store: Arc<S>,
    local_id: NodeId,
}

impl<S: MembershipStore + 'static> Syncer<S> {
    pub fn new(store: Arc<S>) -> Self {
        let local_id = store.local_id();
        Self {
            pending: Mutex::new(HashMap::new()),
            store,
            local_id,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Publish the local node's state and keep it in sync.
    ///
    /// Immutable fields are published before endpoints so peers are likely to
    /// see the identifying fields first.
    pub fn sync(&self, gossiper: Arc<dyn Gossiper>) {
        // The store owns the callback, so it only holds a weak reference
        // back to the store.
        let store = Arc::downgrade(&self.store);
        let publisher = Arc::clone(&gossiper);
        self.store
            .subscribe_local_endpoint_changes(Arc::new(move |endpoint_id: &str| {
                let Some(store) = store.upgrade() else {
                    return;
                };
                publish_local_endpoint(store.as_ref(), publisher.as_ref(), endpoint_id);
            }));

        let local = self.store.local_node();
        gossiper.upsert_local(PROXY_ADDR_KEY, &local.proxy_addr);
        gossiper.upsert_local(ADMIN_ADDR_KEY, &local.admin_addr);
        for (endpoint_id, listeners) in &local.endpoints {
            gossiper.upsert_local(
                &keys::endpoint_key(endpoint_id),
                &keys::encode_listeners(*listeners),
            );
        }

        tracing::info!(
            node_id = %self.local_id,
            endpoints = local.endpoints.len(),
            "published local node state"
        );
    }

    /// Where a node currently resides.
    pub fn locate(&self, node_id: &NodeId) -> NodeLocation {
        if self.store.node(node_id).is_some() {
            return NodeLocation::Active;
        }
        if self.pending.lock().contains_key(node_id) {
            return NodeLocation::Pending;
        }
        // Promoted between the two checks.
        if self.store.node(node_id).is_some() {
            return NodeLocation::Active;
        }
        NodeLocation::Unknown
    }

    pub fn is_pending(&self, node_id: &NodeId) -> bool {
        self.pending.lock().contains_key(node_id)
    }

    /// Snapshot of pending nodes, sorted by ID.
    pub fn pending_nodes(&self) -> Vec<PendingNode> {
        let mut nodes: Vec<PendingNode> = self.pending.lock().values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn is_local(&self, node_id: &NodeId) -> bool {
        *node_id == self.local_id
    }

    /// Apply `status` to a member, or to its pending record so it survives
    /// promotion.
    fn update_status(&self, node_id: &NodeId, status: NodeStatus) {
        if self.store.set_remote_status(node_id, status) {
            tracing::info!(node_id = %node_id, %status, "node status; updated cluster");
            return;
        }

        let mut pending = self.pending.lock();
        if let Some(node) = pending.get_mut(node_id) {
            node.status = Some(status);
            tracing::info!(node_id = %node_id, %status, "node status; updated pending");
        } else if self.store.set_remote_status(node_id, status) {
            tracing::info!(node_id = %node_id, %status, "node status; updated cluster");
        } else {
            tracing::warn!(node_id = %node_id, %status, "node status; unknown node");
        }
    }

    /// Stage a key update on a pending node, promoting it once complete.
    fn upsert_pending(
        &self,
        node_id: &NodeId,
        state_key: &StateKey,
        value: &str,
        listeners: usize,
    ) {
        let mut pending = self.pending.lock();

        let Some(node) = pending.get_mut(node_id) else {
            // Promoted since we checked the store.
            if let StateKey::Endpoint(endpoint_id) = state_key {
                if self
                    .store
                    .set_remote_endpoint_count(node_id, endpoint_id, listeners)
                {
                    tracing::debug!(node_id = %node_id, key = %state_key, "node upsert state; updated cluster");
                    return;
                }
            } else if self.store.node(node_id).is_some() {
                return;
            }
            tracing::warn!(
                node_id = %node_id,
                key = %state_key,
                value,
                "node upsert state; unknown node"
            );
            return;
        };

        match state_key {
            StateKey::ProxyAddr => {
                if !node.set_proxy_addr(value) {
                    tracing::debug!(node_id = %node_id, value, "node upsert state; proxy address ignored");
                }
            }
            StateKey::AdminAddr => {
                if !node.set_admin_addr(value) {
                    tracing::debug!(node_id = %node_id, value, "node upsert state; admin address ignored");
                }
            }
            StateKey::Endpoint(endpoint_id) => node.set_endpoint(endpoint_id, listeners),
        }

        if !node.is_complete() {
            tracing::debug!(
                node_id = %node_id,
                key = %state_key,
                value,
                "node upsert state; updated pending node"
            );
            return;
        }

        // Promote while still holding the lock so the node is never missing
        // from both locations.
        if let Some(node) = pending.remove(node_id).and_then(PendingNode::into_node) {
            tracing::info!(
                node_id = %node_id,
                proxy_addr = %node.proxy_addr,
                admin_addr = %node.admin_addr,
                status = %node.status,
                "node upsert state; added to cluster"
            );
            self.store.insert_active(node);
        }
    }
}

impl<S: MembershipStore + 'static> Watcher for Syncer<S> {
    fn on_join(&self, node_id: &NodeId) {
        if self.is_local(node_id) {
            tracing::warn!(node_id = %node_id, "node joined; same id as local node");
            return;
        }

        if self.store.node(node_id).is_some() {
            tracing::warn!(node_id = %node_id, "node joined; already in cluster");
            return;
        }

        let mut pending = self.pending.lock();
        if pending.contains_key(node_id) {
            tracing::warn!(node_id = %node_id, "node joined; already pending");
            return;
        }
        if self.store.node(node_id).is_some() {
            tracing::warn!(node_id = %node_id, "node joined; already in cluster");
            return;
        }

        // Not enough information to add to the cluster yet.
        pending.insert(node_id.clone(), PendingNode::new(node_id.clone()));
        tracing::info!(node_id = %node_id, "node joined");
    }

    fn on_leave(&self, node_id: &NodeId) {
        if self.is_local(node_id) {
            tracing::warn!(node_id = %node_id, "node left; same id as local node");
            return;
        }

        if self.store.set_remote_status(node_id, NodeStatus::Left) {
            tracing::info!(node_id = %node_id, "node left; updated cluster");
            return;
        }

        let mut pending = self.pending.lock();
        // A pending node was never visible so can be forgotten.
        if pending.remove(node_id).is_some() {
            tracing::info!(node_id = %node_id, "node left; removed from pending");
        } else if self.store.set_remote_status(node_id, NodeStatus::Left) {
            tracing::info!(node_id = %node_id, "node left; updated cluster");
        } else {
            tracing::warn!(node_id = %node_id, "node left; unknown node");
        }
    }

    fn on_reachable(&self, node_id: &NodeId) {
        if self.is_local(node_id) {
            tracing::warn!(node_id = %node_id, "node reachable; same id as local node");
            return;
        }
        self.update_status(node_id, NodeStatus::Active);
    }

    fn on_unreachable(&self, node_id: &NodeId) {
        if self.is_local(node_id) {
            tracing::warn!(node_id = %node_id, "node unreachable; same id as local node");
            return;
        }
        // Unreachable nodes are kept as they may come back.
        self.update_status(node_id, NodeStatus::Unreachable);
    }

    fn on_expired(&self, node_id: &NodeId) {
        if self.is_local(node_id) {
            tracing::warn!(node_id = %node_id, "node expired; same id as local node");
            return;
        }

        if self.store.remove_expired(node_id) {
            tracing::info!(node_id = %node_id, "node expired; removed from cluster");
            return;
        }

        let mut pending = self.pending.lock();
        if pending.remove(node_id).is_some() {
            tracing::info!(node_id = %node_id, "node expired; removed from pending");
        } else if self.store.remove_expired(node_id) {
            tracing::info!(node_id = %node_id, "node expired; removed from cluster");
        } else {
            tracing::warn!(node_id = %node_id, "node expired; unknown node");
        }
    }

    fn on_upsert_key(&self, node_id: &NodeId, key: &str, value: &str) {
        if self.is_local(node_id) {
            tracing::warn!(node_id = %node_id, key, "node upsert state; same id as local node");
            return;
        }

        let state_key: StateKey = match key.parse() {
            Ok(state_key) => state_key,
            Err(e) => {
                tracing::error!(node_id = %node_id, key, error = %e, "node upsert state; unsupported key");
                return;
            }
        };

        let listeners = match &state_key {
            StateKey::Endpoint(_) => match keys::parse_listeners(key, value) {
                Ok(listeners) => listeners,
                Err(e) => {
                    tracing::error!(
                        node_id = %node_id,
                        key,
                        listeners = value,
                        error = %e,
                        "node upsert state; invalid endpoint listeners"
                    );
                    return;
                }
            },
            _ => 0,
        };

        if state_key.is_immutable() {
            // Immutable fields may be re-delivered after a compaction
            // re-versions them. Once the node is in the cluster they're
            // ignored.
            if self.store.node(node_id).is_some() {
                return;
            }
        } else if let StateKey::Endpoint(endpoint_id) = &state_key {
            if self
                .store
                .set_remote_endpoint_count(node_id, endpoint_id, listeners)
            {
                tracing::debug!(node_id = %node_id, key, value, "node upsert state; updated cluster");
                return;
            }
        }

        self.upsert_pending(node_id, &state_key, value, listeners);
    }

    fn on_delete_key(&self, node_id: &NodeId, key: &str) {
        if self.is_local(node_id) {
            tracing::warn!(node_id = %node_id, key, "node delete state; same id as local node");
            return;
        }

        // Only endpoint state can be deleted.
        let endpoint_id = match key.parse::<StateKey>() {
            Ok(StateKey::Endpoint(endpoint_id)) => endpoint_id,
            _ => {
                tracing::error!(node_id = %node_id, key, "node delete state; unsupported key");
                return;
            }
        };

        if self.store.remove_remote_endpoint(node_id, &endpoint_id) {
            tracing::debug!(node_id = %node_id, key, "node delete state; updated cluster");
            return;
        }

        let mut pending = self.pending.lock();
        if let Some(node) = pending.get_mut(node_id) {
            node.remove_endpoint(&endpoint_id);
            tracing::debug!(node_id = %node_id, key, "node delete state; updated pending");
        } else if self.store.remove_remote_endpoint(node_id, &endpoint_id) {
            tracing::debug!(node_id = %node_id, key, "node delete state; updated cluster");
        } else {
            tracing::warn!(node_id = %node_id, key, "node delete state; unknown node");
        }
    }
}

/// Mirror a local endpoint's listener count into gossip.
///
/// Endpoints without listeners are deleted rather than published as zero.
///
/// Proxy threads change listener counts concurrently, so a count may change
/// between reading it and publishing it. The count is re-read after each
/// publish and republished until gossip matches it; whichever publish lands
/// last is always followed by a read that agrees with it.
fn publish_local_endpoint<S: MembershipStore + ?Sized>(
    store: &S,
    gossiper: &dyn Gossiper,
    endpoint_id: &str,
) {
    let key = keys::endpoint_key(endpoint_id);
    let mut listeners = store.local_endpoint_listener_count(endpoint_id);
    loop {
        if listeners > 0 {
            gossiper.upsert_local(&key, &keys::encode_listeners(listeners));
        } else {
            gossiper.delete_local(&key);
        }

        let current = store.local_endpoint_listener_count(endpoint_id);
        if current == listeners {
            return;
        }
        tracing::debug!(
            endpoint_id,
            published = listeners,
            current,
            "local endpoint changed while publishing; republishing"
        );
        listeners = current;
    }
}
