//! Error types for meshdisc.

use crate::store::StoreError;

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type.
///
/// A watcher replays its terminal error on every [`next`](crate::Watcher::next)
/// call after closing, so the type is `Clone` and failure causes are captured
/// by message rather than by source.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Rejected TTL/interval combination at construction.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The announcement could not be serialized to its wire payload.
    #[error("failed to encode announcement: {0}")]
    Encode(String),

    /// The store rejected a synchronous setup operation (connect, namespace
    /// creation).
    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),

    /// The initial snapshot read failed.
    #[error("error reading announcements: {0}")]
    Discovery(#[source] StoreError),

    /// The change subscription failed to establish or broke mid-stream.
    #[error("error watching announcements: {0}")]
    Watch(#[source] StoreError),

    /// The store ended the change stream.
    #[error("announcement stream ended by the store")]
    StreamEnded,

    /// The watcher was closed and no earlier failure was recorded.
    #[error("watcher is closed")]
    Closed,
}

impl Error {
    /// Create an invalid-configuration error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
