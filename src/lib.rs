//! # cluster-sync
//!
//! Turns an eventually-consistent gossip feed into an authoritative view of
//! cluster membership: which nodes exist, the addresses they serve on, whether
//! they are reachable, and how many listeners each node has per endpoint.
//!
//! ## Quick Start
//!
//! ```ignore
//! use cluster_sync::prelude::*;
//! use std::sync::Arc;
//!
//! let config = NodeConfig::new()
//!     .proxy_addr("10.0.0.1:8000")
//!     .admin_addr("10.0.0.1:8002");
//! let state = Arc::new(ClusterState::new(&config)?);
//! let syncer = Arc::new(Syncer::new(Arc::clone(&state)));
//!
//! // Publish local state through the gossip engine.
//! syncer.sync(gossiper);
//!
//! // Register the syncer as the gossip engine's watcher.
//! gossip_engine.watch(syncer);
//! ```
//!
//! ## Architecture
//!
//! - **Membership store** (`cluster`) - Local node plus promoted remote members
//! - **Gossip boundary** (`gossip`) - Watcher and publisher traits, event stream
//! - **Synchronizer** (`syncer`) - Stages joining nodes until their immutable
//!   fields arrive, then promotes them into the store
//!
//! A node is only visible in the store once both `proxy_addr` and
//! `admin_addr` are known, regardless of the order gossip delivers its join
//! and its keys.
//!
//! ## Thread Safety
//!
//! Watcher callbacks may be invoked concurrently from gossip threads while
//! proxy threads change local endpoints. All types here are `Send + Sync`.

pub mod cluster;
pub mod config;
mod error;
pub mod gossip;
pub mod keys;
pub mod status;
pub mod syncer;
mod types;

// Public API exports
pub use cluster::{ClusterState, LocalEndpointCallback, MembershipStore};
pub use config::NodeConfig;
pub use error::{SyncError, SyncResult};
pub use gossip::{GossipEvent, Gossiper, LocalGossipState, Watcher};
pub use keys::StateKey;
pub use status::ClusterStatus;
pub use syncer::Syncer;
pub use types::{Node, NodeId, NodeLocation, NodeStatus, PendingNode};

/// Prelude module for convenient imports.
///
/// Import everything you need with:
/// ```ignore
/// use cluster_sync::prelude::*;
/// ```
pub mod prelude {
    pub use crate::cluster::{ClusterState, MembershipStore};
    pub use crate::config::NodeConfig;
    pub use crate::error::{SyncError, SyncResult};
    pub use crate::gossip::{GossipEvent, Gossiper, LocalGossipState, Watcher};
    pub use crate::keys::StateKey;
    pub use crate::status::ClusterStatus;
    pub use crate::syncer::Syncer;
    pub use crate::types::{Node, NodeId, NodeLocation, NodeStatus, PendingNode};
}
