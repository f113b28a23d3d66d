//! Downloader and sync driver configuration.

use crate::SyncMode;
use std::time::Duration;

/// Timing and sizing parameters of the downloader.
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Headers per fill or direct request.
    pub max_header_fetch: u64,
    /// Skeleton headers per skeleton request.
    pub max_skeleton_size: u64,
    /// Block gap between ancestor samples.
    pub ancestor_stride: u64,
    /// Lower bound of the RTT estimate.
    pub rtt_min_estimate: Duration,
    /// Upper bound and initial value of the RTT estimate.
    pub rtt_max_estimate: Duration,
    /// Lowest confidence in the RTT estimate.
    pub rtt_min_confidence: f64,
    /// RTT to TTL scaling factor.
    pub ttl_scaling: u32,
    /// Absolute TTL ceiling.
    pub ttl_limit: Duration,
    /// Peers whose RTT feeds the median.
    pub qos_tuning_peers: usize,
    /// Peer count above which joins no longer reduce confidence.
    pub qos_confidence_cap: usize,
    /// Weight of a new median in the RTT estimate.
    pub qos_tuning_impact: f64,
    /// Weight of a new measurement in per-peer estimates.
    pub measurement_impact: f64,
    /// Headers imported per chain store call.
    pub max_headers_process: usize,
    /// Seal verification frequency passed to the chain store.
    pub header_check_frequency: usize,
    /// Poll interval while waiting for the pivot commit.
    pub header_cont_check: Duration,
    /// Distance of the fast-sync pivot below the remote head.
    pub min_full_blocks: u64,
    /// Lowest block accepted as common ancestor.
    pub ancestor_floor: u64,
    /// Block accepted as ancestor even when at the floor.
    pub checkpoint: Option<u64>,
    /// Scheduler tick.
    pub fetch_tick: Duration,
    /// Timeouts that only demote a filler before it is dropped.
    pub timeout_grace: usize,
    /// Oldest protocol version a master peer may speak.
    pub min_protocol_version: u32,
    /// Buffered header deliveries.
    pub delivery_queue: usize,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            max_header_fetch: 192,
            max_skeleton_size: 128,
            ancestor_stride: 16,
            rtt_min_estimate: Duration::from_secs(2),
            rtt_max_estimate: Duration::from_secs(20),
            rtt_min_confidence: 0.1,
            ttl_scaling: 3,
            ttl_limit: Duration::from_secs(60),
            qos_tuning_peers: 5,
            qos_confidence_cap: 10,
            qos_tuning_impact: 0.25,
            measurement_impact: 0.1,
            max_headers_process: 2048,
            header_check_frequency: 1,
            header_cont_check: Duration::from_secs(3),
            min_full_blocks: 64,
            ancestor_floor: 4_370_000,
            checkpoint: Some(4_370_000),
            fetch_tick: Duration::from_millis(100),
            timeout_grace: 2,
            min_protocol_version: 62,
            delivery_queue: 16,
        }
    }
}

/// Sync driver parameters.
#[derive(Debug, Clone)]
pub struct SyncerConfig {
    /// Mode requested for every session.
    pub mode: SyncMode,
    /// Sleep when no peer is better than us.
    pub idle_interval: Duration,
    /// Sleep between sessions.
    pub retry_interval: Duration,
    /// Sleep after a transient failure such as losing all peers.
    pub backoff_interval: Duration,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            mode: SyncMode::Fast,
            idle_interval: Duration::from_secs(1),
            retry_interval: Duration::from_secs(1),
            backoff_interval: Duration::from_secs(5),
        }
    }
}
