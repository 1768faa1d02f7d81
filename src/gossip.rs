/// Boundary between the gossip engine and cluster membership.
///
/// The gossip engine maintains a replicated key/value set per node. It talks
/// to the rest of the system through two traits:
///
/// - [`Watcher`]: notified of node lifecycle events and per-node key changes
/// - [`Gossiper`]: accepts the local node's own key changes for dissemination
///
/// Events can also be delivered as messages: [`GossipEvent`] models each
/// watcher callback, and [`run_watcher`] applies a channel of them in order.
use crate::error::{SyncError, SyncResult};
use crate::types::NodeId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default channel capacity for event streams.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Publishes the local node's state to the cluster.
pub trait Gossiper: Send + Sync {
    fn upsert_local(&self, key: &str, value: &str);

    fn delete_local(&self, key: &str);
}

/// Receives gossip membership and key/value events.
///
/// Callbacks may run concurrently for different nodes. Updates to the same key
/// of the same node arrive in write order, but nothing else is ordered: a
/// node's keys may arrive before its join.
pub trait Watcher: Send + Sync {
    fn on_join(&self, node_id: &NodeId);

    fn on_leave(&self, node_id: &NodeId);

    fn on_reachable(&self, node_id: &NodeId);

    fn on_unreachable(&self, node_id: &NodeId);

    fn on_expired(&self, node_id: &NodeId);

    fn on_upsert_key(&self, node_id: &NodeId, key: &str, value: &str);

    fn on_delete_key(&self, node_id: &NodeId, key: &str);
}

/// A single watcher callback as a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GossipEvent {
    Join { node_id: NodeId },
    Leave { node_id: NodeId },
    Reachable { node_id: NodeId },
    Unreachable { node_id: NodeId },
    Expired { node_id: NodeId },
    UpsertKey {
        node_id: NodeId,
        key: String,
        value: String,
    },
    DeleteKey { node_id: NodeId, key: String },
}

impl GossipEvent {
    /// The node this event refers to.
    pub fn node_id(&self) -> &NodeId {
        match self {
            GossipEvent::Join { node_id }
            | GossipEvent::Leave { node_id }
            | GossipEvent::Reachable { node_id }
            | GossipEvent::Unreachable { node_id }
            | GossipEvent::Expired { node_id }
            | GossipEvent::UpsertKey { node_id, .. }
            | GossipEvent::DeleteKey { node_id, .. } => node_id,
        }
    }

    /// Invoke the matching watcher callback.
    pub fn dispatch<W: Watcher + ?Sized>(&self, watcher: &W) {
        match self {
            GossipEvent::Join { node_id } => watcher.on_join(node_id),
            GossipEvent::Leave { node_id } => watcher.on_leave(node_id),
            GossipEvent::Reachable { node_id } => watcher.on_reachable(node_id),
            GossipEvent::Unreachable { node_id } => watcher.on_unreachable(node_id),
            GossipEvent::Expired { node_id } => watcher.on_expired(node_id),
            GossipEvent::UpsertKey {
                node_id,
                key,
                value,
            } => watcher.on_upsert_key(node_id, key, value),
            GossipEvent::DeleteKey { node_id, key } => watcher.on_delete_key(node_id, key),
        }
    }

    /// Decode one line of a JSON-lines event log.
    ///
    /// `line` is the 1-based line number used in the error.
    pub fn from_json_line(json: &str, line: usize) -> SyncResult<Self> {
        serde_json::from_str(json).map_err(|e| SyncError::InvalidEvent {
            line,
            reason: e.to_string(),
        })
    }
}

/// Apply events to a watcher until the channel closes.
///
/// Returns the number of events applied.
pub async fn run_watcher<W: Watcher + ?Sized>(
    mut rx: mpsc::Receiver<GossipEvent>,
    watcher: &W,
) -> usize {
    let mut applied = 0;
    while let Some(event) = rx.recv().await {
        event.dispatch(watcher);
        applied += 1;
    }
    tracing::debug!(applied, "gossip event stream closed");
    applied
}

/// Spawn a task applying events to `watcher`.
///
/// Dropping every clone of the returned sender stops the task.
pub fn spawn_watcher<W: Watcher + 'static>(
    watcher: Arc<W>,
    capacity: usize,
) -> (mpsc::Sender<GossipEvent>, JoinHandle<usize>) {
    let (tx, rx) = mpsc::channel(capacity);
    let handle = tokio::spawn(async move { run_watcher(rx, watcher.as_ref()).await });
    (tx, handle)
}

/// In-memory replica of the local node's published gossip state.
#[derive(Debug, Default)]
pub struct LocalGossipState {
    entries: DashMap<String, String>,
}

impl LocalGossipState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// All published keys, sorted.
    pub fn entries(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Gossiper for LocalGossipState {
    fn upsert_local(&self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    fn delete_local(&self, key: &str) {
        self.entries.remove(key);
    }
}
