//! Concurrent multi-peer fetch loop.
//!
//! `fetch_parts` drives any data kind described by a `FetchStrategy`: on
//! every delivery and every scheduler tick it expires late requests,
//! hands new reservations to idle peers and decides whether the fetch is
//! complete or stuck. Headers are the only kind implemented today.

use crate::{FetchRequest, HeaderQueue, QosTuner, SyncError, SyncResult};
use hsync_chain::Header;
use hsync_network::{Peer, PeerDropper, PeerId, PeerRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A batch of delivered items tagged with its sender.
pub trait DataPack: Send {
    /// Peer that delivered the batch.
    fn peer_id(&self) -> &PeerId;
    /// Number of items in the batch.
    fn items(&self) -> usize;
}

/// Headers delivered by one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderPack {
    pub peer: PeerId,
    pub headers: Vec<Header>,
}

impl DataPack for HeaderPack {
    fn peer_id(&self) -> &PeerId {
        &self.peer
    }

    fn items(&self) -> usize {
        self.headers.len()
    }
}

/// Per-kind hooks of the fetch loop.
pub trait FetchStrategy {
    type Packet: DataPack;

    /// Label for log messages.
    fn kind(&self) -> &'static str;

    /// File a delivery; returns the number of accepted items.
    fn deliver(&self, packet: Self::Packet) -> SyncResult<usize>;

    /// Expire late requests; returns offending peers with timeout counts.
    fn expire(&self) -> HashMap<PeerId, usize>;

    /// Work units not yet requested.
    fn pending(&self) -> usize;

    /// Whether any request is outstanding.
    fn in_flight(&self) -> bool;

    /// Whether the upstream producer will add no more work.
    fn finished(&self) -> bool;

    /// Whether downstream processing asks to pause new requests.
    fn throttle(&self) -> bool {
        false
    }

    /// Reserve the next task for a peer; the flag reports progress without
    /// a request. Tasks have a fixed size set when the work was scheduled.
    fn reserve(&self, peer: &Peer) -> SyncResult<(Option<FetchRequest>, bool)>;

    /// Send a reserved request.
    fn fetch(&self, peer: &Peer, request: &FetchRequest) -> SyncResult<()>;

    /// Return a reserved request to the pending set.
    fn cancel(&self, request: &FetchRequest);

    /// Idle peers and the total peer count.
    fn idle_peers(&self) -> (Vec<Arc<Peer>>, usize);

    /// Mark a peer idle after it delivered `accepted` items.
    fn set_idle(&self, peer: &Peer, accepted: usize);
}

/// Shared inputs of one `fetch_parts` run.
pub(crate) struct FetchContext<'a> {
    pub registry: &'a PeerRegistry,
    pub dropper: &'a dyn PeerDropper,
    pub cancel: &'a CancellationToken,
    pub tick: Duration,
    pub timeout_grace: usize,
}

/// Run the fetch loop until the strategy reports completion or a failure.
pub(crate) async fn fetch_parts<S: FetchStrategy>(
    strategy: &S,
    deliveries: &mut mpsc::Receiver<S::Packet>,
    ctx: &FetchContext<'_>,
) -> SyncResult<()> {
    let kind = strategy.kind();
    let mut ticker = tokio::time::interval(ctx.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(SyncError::Cancelled),

            packet = deliveries.recv() => {
                let Some(packet) = packet else {
                    return Err(SyncError::Cancelled);
                };
                // Deliveries from peers dropped meanwhile are ignored
                if let Some(peer) = ctx.registry.get(packet.peer_id()) {
                    let items = packet.items();
                    match strategy.deliver(packet) {
                        Ok(accepted) => {
                            strategy.set_idle(&peer, accepted);
                            if items == 0 {
                                debug!(kind, peer = %peer.id(), "Requested data not delivered");
                            } else {
                                debug!(kind, peer = %peer.id(), count = accepted, "Delivered new batch of data");
                            }
                        }
                        Err(e @ SyncError::InvalidChain(_)) => return Err(e),
                        Err(SyncError::StaleDelivery) => {
                            debug!(kind, peer = %peer.id(), "Stale delivery discarded");
                        }
                        Err(e) => {
                            strategy.set_idle(&peer, 0);
                            debug!(kind, peer = %peer.id(), error = %e, "Failed to deliver retrieved data");
                        }
                    }
                }
            }

            _ = ticker.tick() => {}
        }

        if ctx.registry.is_empty() {
            return Err(SyncError::NoPeers);
        }

        for (id, timeouts) in strategy.expire() {
            let Some(peer) = ctx.registry.get(&id) else {
                continue;
            };
            if timeouts > ctx.timeout_grace {
                warn!(kind, peer = %id, timeouts, "Stalling delivery, dropping");
                ctx.dropper.drop_peer(&id);
            } else {
                debug!(kind, peer = %id, timeouts, "Data delivery timed out");
                strategy.set_idle(&peer, 0);
            }
        }

        if strategy.pending() == 0 {
            if !strategy.in_flight() && strategy.finished() {
                debug!(kind, "Data fetching completed");
                return Ok(());
            }
            continue;
        }

        let mut progressed = false;
        let mut throttled = false;
        let mut running = strategy.in_flight();
        let (idles, total) = strategy.idle_peers();

        for peer in &idles {
            if strategy.throttle() {
                throttled = true;
                break;
            }
            if strategy.pending() == 0 {
                break;
            }
            let (request, progress) = strategy.reserve(peer)?;
            progressed |= progress;
            let Some(request) = request else {
                continue;
            };
            debug!(kind, peer = %peer.id(), from = request.from, "Requesting new batch of data");
            if let Err(e) = strategy.fetch(peer, &request) {
                warn!(kind, peer = %peer.id(), error = %e, "Fetch assignment failed");
                strategy.cancel(&request);
                continue;
            }
            running = true;
        }

        if !progressed && !throttled && !running && idles.len() == total && strategy.pending() > 0 {
            return Err(SyncError::PeersUnavailable);
        }
    }
}

/// Fetch strategy for skeleton fill headers.
pub(crate) struct HeaderFetcher<'a> {
    pub queue: &'a HeaderQueue,
    pub qos: &'a QosTuner,
    pub registry: &'a PeerRegistry,
    pub proc_tx: &'a mpsc::Sender<Vec<Header>>,
    pub max_header_fetch: u64,
    pub measurement_impact: f64,
}

impl FetchStrategy for HeaderFetcher<'_> {
    type Packet = HeaderPack;

    fn kind(&self) -> &'static str {
        "headers"
    }

    fn deliver(&self, packet: HeaderPack) -> SyncResult<usize> {
        self.queue
            .deliver_headers(&packet.peer, packet.headers, self.proc_tx)
    }

    fn expire(&self) -> HashMap<PeerId, usize> {
        self.queue.expire_headers(self.qos.request_ttl())
    }

    fn pending(&self) -> usize {
        self.queue.pending_headers()
    }

    fn in_flight(&self) -> bool {
        self.queue.in_flight_headers()
    }

    fn finished(&self) -> bool {
        self.queue.is_filled()
    }

    fn reserve(&self, peer: &Peer) -> SyncResult<(Option<FetchRequest>, bool)> {
        Ok((self.queue.reserve_headers(peer.id()), false))
    }

    fn fetch(&self, peer: &Peer, request: &FetchRequest) -> SyncResult<()> {
        peer.fetch_headers(request.from, self.max_header_fetch)?;
        Ok(())
    }

    fn cancel(&self, request: &FetchRequest) {
        self.queue.cancel_headers(request)
    }

    fn idle_peers(&self) -> (Vec<Arc<Peer>>, usize) {
        self.registry.header_idle_peers()
    }

    fn set_idle(&self, peer: &Peer, accepted: usize) {
        peer.set_headers_idle(accepted, self.measurement_impact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DownloaderConfig;
    use hsync_chain::{BlockHash, Weight};
    use hsync_network::{HashOrNumber, Message};
    use tokio::time::Instant;

    const FETCH: u64 = 4;

    fn chain(len: u64) -> Vec<Header> {
        let mut headers: Vec<Header> = Vec::new();
        let mut parent = BlockHash::ZERO;
        for number in 1..=len {
            let header = Header::new(parent, number, number, 1);
            parent = header.hash();
            headers.push(header);
        }
        headers
    }

    fn skeleton(headers: &[Header]) -> Vec<Header> {
        headers
            .iter()
            .filter(|h| h.number % FETCH == 0)
            .cloned()
            .collect()
    }

    fn peer(id: u8) -> (Arc<Peer>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(8);
        let peer = Peer::new(
            PeerId::from_bytes(vec![id]),
            63,
            BlockHash([id; 32]),
            Weight::from(100u32),
            tx,
        );
        (Arc::new(peer), rx)
    }

    struct Fixture {
        queue: HeaderQueue,
        qos: QosTuner,
        registry: Arc<PeerRegistry>,
        proc_tx: mpsc::Sender<Vec<Header>>,
        proc_rx: mpsc::Receiver<Vec<Header>>,
        cancel: CancellationToken,
    }

    impl Fixture {
        fn new() -> Self {
            let (proc_tx, proc_rx) = mpsc::channel(16);
            Self {
                queue: HeaderQueue::new(FETCH),
                qos: QosTuner::new(&DownloaderConfig::default()),
                registry: Arc::new(PeerRegistry::new()),
                proc_tx,
                proc_rx,
                cancel: CancellationToken::new(),
            }
        }

        async fn run(&self, deliveries: &mut mpsc::Receiver<HeaderPack>) -> SyncResult<()> {
            let fetcher = HeaderFetcher {
                queue: &self.queue,
                qos: &self.qos,
                registry: &self.registry,
                proc_tx: &self.proc_tx,
                max_header_fetch: FETCH,
                measurement_impact: 0.1,
            };
            let ctx = FetchContext {
                registry: &self.registry,
                dropper: self.registry.as_ref(),
                cancel: &self.cancel,
                tick: Duration::from_millis(100),
                timeout_grace: 2,
            };
            fetch_parts(&fetcher, deliveries, &ctx).await
        }
    }

    /// Answer fill requests from `headers` as `id`.
    fn serve(
        id: u8,
        headers: Vec<Header>,
        mut requests: mpsc::Receiver<Message>,
        deliveries: mpsc::Sender<HeaderPack>,
    ) {
        tokio::spawn(async move {
            while let Some(message) = requests.recv().await {
                let Message::GetBlockHeaders(req) = message else {
                    continue;
                };
                let HashOrNumber::Number(from) = req.origin else {
                    continue;
                };
                let batch = headers
                    .iter()
                    .filter(|h| h.number >= from && h.number < from + req.amount)
                    .cloned()
                    .collect();
                let pack = HeaderPack {
                    peer: PeerId::from_bytes(vec![id]),
                    headers: batch,
                };
                if deliveries.send(pack).await.is_err() {
                    return;
                }
            }
        });
    }

    #[tokio::test]
    async fn test_fill_with_two_peers() {
        let mut fx = Fixture::new();
        let headers = chain(16);
        let (delivery_tx, mut deliveries) = mpsc::channel(16);
        for id in [1, 2] {
            let (p, rx) = peer(id);
            fx.registry.add(p).unwrap();
            serve(id, headers.clone(), rx, delivery_tx.clone());
        }

        fx.queue.schedule_skeleton(1, &skeleton(&headers));
        fx.run(&mut deliveries).await.unwrap();

        let (filled, proced) = fx.queue.retrieve_headers();
        assert_eq!(filled, headers);
        let mut processed = Vec::new();
        while let Ok(batch) = fx.proc_rx.try_recv() {
            processed.extend(batch);
        }
        assert_eq!(processed.len(), proced);
        assert_eq!(processed[..], headers[..proced]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fastest_idle_peer_gets_the_task() {
        let fx = Fixture::new();
        let headers = chain(4);
        let (slow, mut slow_rx) = peer(1);
        let (fast, mut fast_rx) = peer(2);
        fx.registry.add(slow).unwrap();
        fx.registry.add(fast.clone()).unwrap();
        fast.set_headers_idle(64, 0.5);
        fx.queue.schedule_skeleton(1, &skeleton(&headers));

        let (_delivery_tx, mut deliveries) = mpsc::channel::<HeaderPack>(4);
        let pending = tokio::time::timeout(Duration::from_millis(50), fx.run(&mut deliveries)).await;
        assert!(pending.is_err());

        let Ok(Message::GetBlockHeaders(req)) = fast_rx.try_recv() else {
            panic!("fast peer was not asked");
        };
        assert_eq!(req.origin, HashOrNumber::Number(1));
        assert_eq!(req.amount, FETCH);
        assert!(slow_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_peers_removed_returns_no_peers_within_a_tick() {
        let fx = Fixture::new();
        let headers = chain(8);
        let (p, _rx) = peer(1);
        fx.registry.add(p.clone()).unwrap();
        fx.queue.schedule_skeleton(1, &skeleton(&headers));

        let (_delivery_tx, mut deliveries) = mpsc::channel::<HeaderPack>(4);
        let registry = fx.registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            registry.remove(p.id());
        });

        let started = Instant::now();
        let result = fx.run(&mut deliveries).await;
        assert!(matches!(result, Err(SyncError::NoPeers)));
        assert!(started.elapsed() <= Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_unreachable_peers_are_unavailable() {
        let fx = Fixture::new();
        let headers = chain(8);
        let (p, rx) = peer(1);
        drop(rx);
        fx.registry.add(p).unwrap();
        fx.queue.schedule_skeleton(1, &skeleton(&headers));

        let (_delivery_tx, mut deliveries) = mpsc::channel::<HeaderPack>(4);
        let result = fx.run(&mut deliveries).await;
        assert!(matches!(result, Err(SyncError::PeersUnavailable)));
        assert_eq!(fx.queue.pending_headers(), 2);
    }

    #[tokio::test]
    async fn test_cancel_stops_fetch() {
        let fx = Fixture::new();
        let headers = chain(8);
        let (p, _rx) = peer(1);
        fx.registry.add(p).unwrap();
        fx.queue.schedule_skeleton(1, &skeleton(&headers));
        fx.cancel.cancel();

        let (_delivery_tx, mut deliveries) = mpsc::channel::<HeaderPack>(4);
        assert!(matches!(
            fx.run(&mut deliveries).await,
            Err(SyncError::Cancelled)
        ));
    }
}
