/// Error types for cluster synchronization.
///
/// The watcher callbacks never surface these to the gossip engine. They exist
/// so key decoding, configuration and event parsing can be expressed with `?`
/// and turned into a single log line at the edge.
use std::num::ParseIntError;
use thiserror::Error;

/// The main error type for cluster synchronization.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Gossip key outside the supported namespace
    #[error("Unsupported key '{key}'")]
    UnsupportedKey {
        /// The key as received
        key: String,
    },

    /// Endpoint listener count that is not a non-negative integer
    #[error("Invalid listener count '{value}' for key '{key}': {source}")]
    InvalidListeners {
        /// The endpoint key
        key: String,
        /// The offending value
        value: String,
        /// Underlying parse failure
        #[source]
        source: ParseIntError,
    },

    /// Local node configuration is unusable
    #[error("Invalid config: {reason}")]
    InvalidConfig {
        /// Description of the problem
        reason: String,
    },

    /// A recorded gossip event could not be decoded
    #[error("Invalid event on line {line}: {reason}")]
    InvalidEvent {
        /// 1-based line number in the event log
        line: usize,
        /// Description of the problem
        reason: String,
    },

    /// Serialization error when converting data to/from JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error reading configuration or event logs
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for cluster synchronization.
pub type SyncResult<T> = Result<T, SyncError>;
