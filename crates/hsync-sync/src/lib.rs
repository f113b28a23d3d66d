//! # hsync-sync
//!
//! Header synchronization engine.
//!
//! This crate provides:
//! - Common ancestor discovery against a master peer
//! - Skeleton-and-fill header download from all idle peers
//! - Adaptive request timeouts from peer round-trip times
//! - Ordered, chunked header import into a `ChainStore`
//! - The sync driver that picks the best peer and runs sessions

mod config;
mod downloader;
mod error;
mod fetch;
mod qos;
mod queue;
mod session;
mod sync;

pub use config::{DownloaderConfig, SyncerConfig};
pub use downloader::{Downloader, SyncEvent, SyncProgress};
pub use error::{RecoveryAction, SyncError, SyncResult};
pub use fetch::{DataPack, FetchStrategy, HeaderPack};
pub use qos::{compute_ttl, QosTuner};
pub use queue::{FetchRequest, HeaderQueue};
pub use sync::Syncer;

/// How much of the chain a session imports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Headers of every block, processed in full.
    Full,
    /// Headers up to a pivot, full processing after it.
    #[default]
    Fast,
    /// Headers only.
    Light,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Full => write!(f, "full"),
            SyncMode::Fast => write!(f, "fast"),
            SyncMode::Light => write!(f, "light"),
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(SyncMode::Full),
            "fast" => Ok(SyncMode::Fast),
            "light" => Ok(SyncMode::Light),
            other => Err(format!("unknown sync mode: {}", other)),
        }
    }
}
