//! Sync error types.

use hsync_chain::ChainError;
use hsync_network::NetworkError;
use thiserror::Error;

/// Sync errors.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A session is already running.
    #[error("busy")]
    Busy,

    /// Selected peer is not registered.
    #[error("peer is unknown or unhealthy")]
    UnknownPeer,

    /// Peer answered with something it was not asked for.
    #[error("action from bad peer ignored: {0}")]
    BadPeer(String),

    /// Peer withheld headers it promised.
    #[error("peer is stalling")]
    StallingPeer,

    /// Registry ran empty during a fetch.
    #[error("no peers to keep download active")]
    NoPeers,

    /// No answer within the request TTL.
    #[error("timeout")]
    Timeout,

    /// Peer returned no headers for a sample request.
    #[error("empty header set by peer")]
    EmptyHeaderSet,

    /// Work remains but no peer can take it.
    #[error("no peers available or all tried for download")]
    PeersUnavailable,

    /// Common ancestor below the allowed floor.
    #[error("retrieved ancestor is invalid: {0}")]
    InvalidAncestor(u64),

    /// Contiguity, linkage or seal failure.
    #[error("retrieved hash chain is invalid: {0}")]
    InvalidChain(String),

    /// Session aborted on request.
    #[error("header download canceled (requested)")]
    Cancelled,

    /// Delivery arrived with no session running.
    #[error("no sync active")]
    NoSyncActive,

    /// Delivery for a request that is no longer outstanding.
    #[error("no fetches pending")]
    StaleDelivery,

    /// Peer speaks an older protocol.
    #[error("peer doesn't speak recent enough protocol version (need version >= {0})")]
    TooOld(u32),

    /// Chain store error.
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    /// Network error.
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// How the driver reacts to a failed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Nothing to do; try again later.
    Ignore,
    /// Drop the master peer, then retry with another one.
    DropPeer,
    /// Wait before trying again.
    BackOff,
    /// Retry with a fresh selection.
    Retry,
}

impl SyncError {
    /// Classify the error for the sync driver.
    pub fn action(&self) -> RecoveryAction {
        match self {
            SyncError::Busy => RecoveryAction::Ignore,
            SyncError::Timeout
            | SyncError::BadPeer(_)
            | SyncError::StallingPeer
            | SyncError::EmptyHeaderSet
            | SyncError::PeersUnavailable
            | SyncError::TooOld(_)
            | SyncError::InvalidAncestor(_)
            | SyncError::InvalidChain(_) => RecoveryAction::DropPeer,
            SyncError::NoPeers => RecoveryAction::BackOff,
            _ => RecoveryAction::Retry,
        }
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
