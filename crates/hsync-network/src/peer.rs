//! Peer links.
//!
//! A `Peer` is one qualified connection: it is created after a successful
//! status handshake and owns the sending half of the connection's outbound
//! queue. Besides the request primitives it carries the download
//! statistics the sync engine uses for capacity estimates.

use crate::{GetBlockHeaders, HashOrNumber, Message, NetworkError, NetworkResult};
use hsync_chain::{BlockHash, Weight};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Unique peer identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub Vec<u8>);

impl PeerId {
    /// Create from bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Create from socket address.
    pub fn from_addr(addr: &SocketAddr) -> Self {
        Self(format!("{}", addr).into_bytes())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// Download statistics for one peer.
#[derive(Debug, Clone)]
struct PeerStats {
    headers_idle: bool,
    header_throughput: f64,
    rtt: Duration,
    header_started: Instant,
    last_request: Option<Instant>,
    last_response: Option<Instant>,
}

/// A qualified remote peer.
#[derive(Debug)]
pub struct Peer {
    id: PeerId,
    addr: Option<SocketAddr>,
    version: u32,
    head: BlockHash,
    td: Weight,
    tx: mpsc::Sender<Message>,
    closed: CancellationToken,
    stats: Mutex<PeerStats>,
}

impl Peer {
    /// Create a peer from its handshake status and outbound queue.
    pub fn new(
        id: PeerId,
        version: u32,
        head: BlockHash,
        td: Weight,
        tx: mpsc::Sender<Message>,
    ) -> Self {
        Self {
            id,
            addr: None,
            version,
            head,
            td,
            tx,
            closed: CancellationToken::new(),
            stats: Mutex::new(PeerStats {
                headers_idle: true,
                header_throughput: 0.0,
                rtt: Duration::ZERO,
                header_started: Instant::now(),
                last_request: None,
                last_response: None,
            }),
        }
    }

    /// Attach the remote socket address.
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = Some(addr);
        self
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    /// Negotiated protocol version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Head hash and total difficulty reported at handshake.
    pub fn head(&self) -> (BlockHash, Weight) {
        (self.head, self.td.clone())
    }

    /// Total difficulty reported at handshake.
    pub fn td(&self) -> &Weight {
        &self.td
    }

    fn send(&self, message: Message) -> NetworkResult<()> {
        if self.closed.is_cancelled() {
            return Err(NetworkError::ConnectionClosed);
        }
        self.tx
            .try_send(message)
            .map_err(|e| NetworkError::SendFailed {
                peer: self.id.to_string(),
                reason: e.to_string(),
            })?;
        self.stats.lock().last_request = Some(Instant::now());
        Ok(())
    }

    /// Request headers starting at a block hash. Fire-and-forget.
    pub fn request_headers_by_hash(
        &self,
        origin: BlockHash,
        amount: u64,
        skip: u64,
        reverse: bool,
    ) -> NetworkResult<()> {
        trace!(peer = %self.id, origin = ?origin, amount, skip, reverse, "Requesting headers by hash");
        self.send(Message::GetBlockHeaders(GetBlockHeaders {
            origin: HashOrNumber::Hash(origin),
            amount,
            skip,
            reverse,
        }))
    }

    /// Request headers starting at a block number. Fire-and-forget.
    pub fn request_headers_by_number(
        &self,
        origin: u64,
        amount: u64,
        skip: u64,
        reverse: bool,
    ) -> NetworkResult<()> {
        trace!(peer = %self.id, origin, amount, skip, reverse, "Requesting headers by number");
        self.send(Message::GetBlockHeaders(GetBlockHeaders {
            origin: HashOrNumber::Number(origin),
            amount,
            skip,
            reverse,
        }))
    }

    /// Send an arbitrary message on the connection.
    pub fn send_message(&self, message: Message) -> NetworkResult<()> {
        self.send(message)
    }

    /// Ask the connection task to close.
    pub fn disconnect(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled when the peer should be disconnected.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Record that a response arrived from this peer.
    pub fn mark_response(&self) {
        self.stats.lock().last_response = Some(Instant::now());
    }

    pub fn last_request(&self) -> Option<Instant> {
        self.stats.lock().last_request
    }

    pub fn last_response(&self) -> Option<Instant> {
        self.stats.lock().last_response
    }

    /// Whether no header request is outstanding.
    pub fn is_headers_idle(&self) -> bool {
        self.stats.lock().headers_idle
    }

    /// Issue a contiguous header request, marking the peer busy.
    pub fn fetch_headers(&self, from: u64, count: u64) -> NetworkResult<()> {
        {
            let mut stats = self.stats.lock();
            if !stats.headers_idle {
                return Err(NetworkError::SendFailed {
                    peer: self.id.to_string(),
                    reason: "already fetching headers".into(),
                });
            }
            stats.headers_idle = false;
            stats.header_started = Instant::now();
        }
        let result = self.request_headers_by_number(from, count, 0, false);
        if result.is_err() {
            self.stats.lock().headers_idle = true;
        }
        result
    }

    /// Mark the peer idle after a header delivery of `delivered` items and
    /// fold the measurement into its throughput and RTT estimates. A zero
    /// delivery resets the throughput estimate.
    pub fn set_headers_idle(&self, delivered: usize, measurement_impact: f64) {
        let mut stats = self.stats.lock();
        stats.headers_idle = true;
        if delivered == 0 {
            stats.header_throughput = 0.0;
            return;
        }
        let elapsed = stats.header_started.elapsed() + Duration::from_nanos(1);
        let measured = delivered as f64 / elapsed.as_secs_f64();
        stats.header_throughput =
            (1.0 - measurement_impact) * stats.header_throughput + measurement_impact * measured;
        stats.rtt = Duration::from_secs_f64(
            (1.0 - measurement_impact) * stats.rtt.as_secs_f64()
                + measurement_impact * elapsed.as_secs_f64(),
        );
    }

    /// Smoothed header throughput in headers per second.
    pub fn header_throughput(&self) -> f64 {
        self.stats.lock().header_throughput
    }

    /// Smoothed request round-trip time.
    pub fn rtt(&self) -> Duration {
        self.stats.lock().rtt
    }

    /// Seed the estimates of a newly registered peer.
    pub(crate) fn seed_estimates(&self, throughput: f64, rtt: Duration) {
        let mut stats = self.stats.lock();
        stats.header_throughput = throughput;
        stats.rtt = rtt;
    }

    /// Forget in-flight state and estimates.
    pub fn reset_stats(&self) {
        let mut stats = self.stats.lock();
        stats.headers_idle = true;
        stats.header_throughput = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_peer(capacity: usize) -> (Peer, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        let peer = Peer::new(
            PeerId::from_bytes(vec![1, 2, 3]),
            63,
            BlockHash([5u8; 32]),
            Weight::from(1000u32),
            tx,
        );
        (peer, rx)
    }

    #[test]
    fn test_request_primitives_queue_messages() {
        let (peer, mut rx) = test_peer(4);
        peer.request_headers_by_hash(BlockHash([5u8; 32]), 1, 0, false)
            .unwrap();
        peer.request_headers_by_number(10, 192, 15, false).unwrap();

        match rx.try_recv().unwrap() {
            Message::GetBlockHeaders(req) => {
                assert_eq!(req.origin, HashOrNumber::Hash(BlockHash([5u8; 32])));
                assert_eq!(req.amount, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        match rx.try_recv().unwrap() {
            Message::GetBlockHeaders(req) => {
                assert_eq!(req.origin, HashOrNumber::Number(10));
                assert_eq!(req.skip, 15);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(peer.last_request().is_some());
    }

    #[test]
    fn test_full_queue_reports_error() {
        let (peer, _rx) = test_peer(1);
        peer.request_headers_by_number(1, 1, 0, false).unwrap();
        assert!(matches!(
            peer.request_headers_by_number(2, 1, 0, false),
            Err(NetworkError::SendFailed { .. })
        ));
    }

    #[test]
    fn test_disconnected_peer_refuses_requests() {
        let (peer, _rx) = test_peer(4);
        peer.disconnect();
        assert!(peer.is_closed());
        assert!(matches!(
            peer.request_headers_by_number(1, 1, 0, false),
            Err(NetworkError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_fetch_headers_marks_busy_until_idle() {
        let (peer, _rx) = test_peer(4);
        assert!(peer.is_headers_idle());
        peer.fetch_headers(1, 192).unwrap();
        assert!(!peer.is_headers_idle());
        assert!(peer.fetch_headers(193, 192).is_err());

        peer.set_headers_idle(192, 0.1);
        assert!(peer.is_headers_idle());
        assert!(peer.header_throughput() > 0.0);
        assert!(peer.rtt() > Duration::ZERO);
    }

    #[test]
    fn test_zero_delivery_resets_throughput() {
        let (peer, _rx) = test_peer(4);
        peer.seed_estimates(500.0, Duration::from_millis(300));
        peer.set_headers_idle(0, 0.1);
        assert_eq!(peer.header_throughput(), 0.0);
    }

    #[test]
    fn test_remote_address() {
        let (peer, _rx) = test_peer(4);
        assert_eq!(peer.addr(), None);

        let addr: SocketAddr = "10.0.0.7:30313".parse().unwrap();
        let peer = peer.with_addr(addr);
        assert_eq!(peer.addr(), Some(addr));
    }
}
