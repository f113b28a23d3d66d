//! Peer scoring sink.
//!
//! Lifecycle events of remote peers (dialing, handshake outcome, checkpoint
//! check) are reported as `(peer, status, detail)` triples to an external
//! observer. Reporting never blocks the protocol path.

use crate::PeerId;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Peer lifecycle status codes. The numeric prefix orders statuses from
/// least to most qualified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerStatus {
    Dialing,
    DialFailed,
    ConnectionSetupFailed,
    HandshakeFailed,
    CheckpointCheckFailed,
    CheckpointCheckPassed,
}

impl PeerStatus {
    /// Stable numeric code.
    pub fn code(&self) -> u8 {
        match self {
            PeerStatus::Dialing => 0,
            PeerStatus::DialFailed => 19,
            PeerStatus::ConnectionSetupFailed => 29,
            PeerStatus::HandshakeFailed => 39,
            PeerStatus::CheckpointCheckFailed => 49,
            PeerStatus::CheckpointCheckPassed => 50,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            PeerStatus::Dialing => "tcp dialing",
            PeerStatus::DialFailed => "tcp dial fail",
            PeerStatus::ConnectionSetupFailed => "connection setup fail",
            PeerStatus::HandshakeFailed => "handshake failed",
            PeerStatus::CheckpointCheckFailed => "checkpoint block check failed",
            PeerStatus::CheckpointCheckPassed => "checkpoint block check passed",
        }
    }
}

impl std::fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}-{}", self.code(), self.label())
    }
}

/// One reported peer event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerReport {
    pub peer: PeerId,
    pub status: PeerStatus,
    pub detail: String,
}

/// Observer of peer lifecycle events.
pub trait ScoringSink: Send + Sync {
    /// Record an event. Must return without waiting.
    fn report(&self, peer: &PeerId, status: PeerStatus, detail: &str);
}

/// Discards every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ScoringSink for NoopSink {
    fn report(&self, _peer: &PeerId, _status: PeerStatus, _detail: &str) {}
}

/// Emits reports as log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ScoringSink for TracingSink {
    fn report(&self, peer: &PeerId, status: PeerStatus, detail: &str) {
        info!(peer = %peer, status = %status, detail, "Peer status");
    }
}

/// Forwards reports to a bounded channel, dropping them when it is full.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<PeerReport>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PeerReport>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl ScoringSink for ChannelSink {
    fn report(&self, peer: &PeerId, status: PeerStatus, detail: &str) {
        let report = PeerReport {
            peer: peer.clone(),
            status,
            detail: detail.to_string(),
        };
        if let Err(e) = self.tx.try_send(report) {
            debug!(peer = %peer, status = %status, error = %e, "Peer report dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(PeerStatus::Dialing.to_string(), "00-tcp dialing");
        assert_eq!(
            PeerStatus::CheckpointCheckPassed.to_string(),
            "50-checkpoint block check passed"
        );
    }

    #[test]
    fn test_channel_sink_never_blocks() {
        let (sink, mut rx) = ChannelSink::new(1);
        let peer = PeerId::from_bytes(vec![1]);
        sink.report(&peer, PeerStatus::Dialing, "");
        // Channel is full: the second report is dropped, not awaited
        sink.report(&peer, PeerStatus::DialFailed, "refused");

        let first = rx.try_recv().unwrap();
        assert_eq!(first.status, PeerStatus::Dialing);
        assert!(rx.try_recv().is_err());
    }
}
