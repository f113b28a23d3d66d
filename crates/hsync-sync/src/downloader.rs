//! Header downloader.
//!
//! One `synchronise` call runs a session against a master peer:
//!
//! 1. Probe the peer's head header.
//! 2. Find the common ancestor, first from a sparse sample of the top of
//!    the local chain, then by binary search.
//! 3. Fetch a skeleton from the master and fill its gaps from every idle
//!    peer, then finish with direct batches from the master.
//! 4. Import the headers in order, in bounded chunks.
//!
//! Fetching and processing run as sibling tasks; the first failure cancels
//! the other and is returned once both have exited.

use crate::fetch::{fetch_parts, FetchContext, HeaderFetcher};
use crate::session::{ActiveSession, Session, SessionSlot};
use crate::{DownloaderConfig, HeaderPack, HeaderQueue, QosTuner, SyncError, SyncMode, SyncResult};
use hsync_chain::{BlockHash, ChainStore, Header, Weight};
use hsync_network::{Peer, PeerDropper, PeerId, PeerRegistry, RegistryEvent};
use parking_lot::RwLock;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the sync event channel.
const EVENT_CHANNEL_SIZE: usize = 64;

/// Buffered batches between fetcher and processor.
const PROCESS_QUEUE_SIZE: usize = 1;

type SyncTask = Pin<Box<dyn Future<Output = SyncResult<()>> + Send>>;

/// Progress of the current or last session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncProgress {
    /// Common ancestor the session started from.
    pub starting_block: u64,
    /// Local head.
    pub current_block: u64,
    /// Highest block known to the network.
    pub highest_block: u64,
}

/// Session lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Started { peer: PeerId },
    Done { peer: PeerId },
    Failed { peer: PeerId, error: String },
}

#[derive(Debug, Default)]
struct SyncStats {
    origin: u64,
    height: u64,
}

struct Inner {
    config: DownloaderConfig,
    chain: Arc<dyn ChainStore>,
    registry: Arc<PeerRegistry>,
    dropper: Arc<dyn PeerDropper>,
    qos: Arc<QosTuner>,
    queue: HeaderQueue,
    delivery_tx: mpsc::Sender<HeaderPack>,
    delivery_rx: Arc<Mutex<mpsc::Receiver<HeaderPack>>>,
    active: SessionSlot,
    stats: RwLock<SyncStats>,
    committed: AtomicBool,
    notified: AtomicBool,
    events: broadcast::Sender<SyncEvent>,
    quit: CancellationToken,
}

/// Header sync engine.
#[derive(Clone)]
pub struct Downloader {
    inner: Arc<Inner>,
}

impl Downloader {
    /// Create a downloader and start its QoS loop and membership watcher.
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: DownloaderConfig,
        chain: Arc<dyn ChainStore>,
        registry: Arc<PeerRegistry>,
        dropper: Arc<dyn PeerDropper>,
    ) -> Self {
        let (delivery_tx, delivery_rx) = mpsc::channel(config.delivery_queue.max(1));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let qos = Arc::new(QosTuner::new(&config));
        let active: SessionSlot = Arc::new(RwLock::new(None));
        let quit = CancellationToken::new();

        let membership = registry.subscribe();
        tokio::spawn(qos.clone().run(registry.clone(), quit.clone()));
        tokio::spawn(watch_membership(
            membership,
            qos.clone(),
            active.clone(),
            quit.clone(),
        ));

        Self {
            inner: Arc::new(Inner {
                queue: HeaderQueue::new(config.max_header_fetch),
                config,
                chain,
                registry,
                dropper,
                qos,
                delivery_tx,
                delivery_rx: Arc::new(Mutex::new(delivery_rx)),
                active,
                stats: RwLock::new(SyncStats::default()),
                committed: AtomicBool::new(true),
                notified: AtomicBool::new(false),
                events,
                quit,
            }),
        }
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.inner.config
    }

    pub fn qos(&self) -> &QosTuner {
        &self.inner.qos
    }

    /// Whether a session is running.
    pub fn is_synchronising(&self) -> bool {
        self.inner.active.read().is_some()
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Progress of the current or last session.
    pub fn progress(&self) -> SyncProgress {
        let stats = self.inner.stats.read();
        SyncProgress {
            starting_block: stats.origin,
            current_block: self.inner.chain.current_header().number,
            highest_block: stats.height,
        }
    }

    /// Mark the fast-sync pivot as committed by an outside subsystem.
    pub fn commit_pivot(&self) {
        self.inner.committed.store(true, Ordering::SeqCst);
    }

    /// Abort the running session, if any.
    pub fn cancel(&self) {
        if let Some(active) = self.inner.active.read().as_ref() {
            active.cancel.cancel();
        }
    }

    /// Stop the background loops and any running session. The downloader
    /// cannot be used afterwards.
    pub fn terminate(&self) {
        self.inner.quit.cancel();
        self.cancel();
    }

    /// Hand a header response to the running session.
    pub async fn deliver_headers(&self, peer: PeerId, headers: Vec<Header>) -> SyncResult<()> {
        let cancel = match self.inner.active.read().as_ref() {
            Some(active) => active.cancel.clone(),
            None => return Err(SyncError::NoSyncActive),
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SyncError::NoSyncActive),
            sent = self.inner.delivery_tx.send(HeaderPack { peer, headers }) => {
                sent.map_err(|_| SyncError::NoSyncActive)
            }
        }
    }

    /// Sync the local chain with `id`. Drops the peer when the failure is
    /// its fault; a cancelled session counts as success.
    pub async fn synchronise(
        &self,
        id: &PeerId,
        head: BlockHash,
        td: Weight,
        mode: SyncMode,
    ) -> SyncResult<()> {
        let result = self.inner.clone().run_session(id, head, td, mode).await;
        match result {
            Ok(()) => Ok(()),
            Err(SyncError::Cancelled) => {
                debug!(peer = %id, "Synchronisation cancelled");
                Ok(())
            }
            Err(e) => {
                match e.action() {
                    crate::RecoveryAction::Ignore => {}
                    crate::RecoveryAction::DropPeer => {
                        debug!(peer = %id, error = %e, "Synchronisation failed, dropping peer");
                        self.inner.dropper.drop_peer(id);
                    }
                    _ => debug!(peer = %id, error = %e, "Synchronisation failed, retrying"),
                }
                Err(e)
            }
        }
    }
}

impl Inner {
    async fn run_session(
        self: Arc<Self>,
        id: &PeerId,
        head: BlockHash,
        td: Weight,
        mode: SyncMode,
    ) -> SyncResult<()> {
        let mut session = Session::acquire(&self.delivery_rx, &self.active, id.clone())?;

        if !self.notified.swap(true, Ordering::SeqCst) {
            info!("Block synchronisation started");
        }
        self.queue.reset();
        for peer in self.registry.peers() {
            peer.reset_stats();
        }

        let peer = self.registry.get(id).ok_or(SyncError::UnknownPeer)?;

        let _ = self.events.send(SyncEvent::Started { peer: id.clone() });
        let result = self
            .clone()
            .sync_with_peer(&mut session, peer, head, td, mode)
            .await;
        let _ = match &result {
            Ok(()) | Err(SyncError::Cancelled) => self.events.send(SyncEvent::Done { peer: id.clone() }),
            Err(e) => self.events.send(SyncEvent::Failed {
                peer: id.clone(),
                error: e.to_string(),
            }),
        };
        result
    }

    async fn sync_with_peer(
        self: Arc<Self>,
        session: &mut Session,
        peer: Arc<Peer>,
        head: BlockHash,
        td: Weight,
        mode: SyncMode,
    ) -> SyncResult<()> {
        if peer.version() < self.config.min_protocol_version {
            return Err(SyncError::TooOld(self.config.min_protocol_version));
        }

        info!(peer = %peer.id(), head = ?head, td = %td, %mode, "Synchronising with peer");
        let started = Instant::now();
        let cancel = session.cancel_token().clone();

        let latest = self
            .fetch_height(&peer, session.deliveries()?, &cancel)
            .await?;
        let height = latest.number;
        let mut origin = self
            .find_ancestor(&peer, height, session.deliveries()?, &cancel)
            .await?;

        {
            let mut stats = self.stats.write();
            if stats.height <= origin || stats.origin > origin {
                stats.origin = origin;
            }
            stats.height = height;
        }

        // Keep the origin below the fast-sync pivot
        let mut pivot = None;
        if mode == SyncMode::Fast {
            if height <= self.config.min_full_blocks {
                origin = 0;
            } else {
                let p = height - self.config.min_full_blocks;
                if p <= origin {
                    origin = p - 1;
                }
                pivot = Some(p);
            }
        }
        self.committed
            .store(!(mode == SyncMode::Fast && pivot.is_some()), Ordering::SeqCst);

        let (proc_tx, proc_rx) = mpsc::channel(PROCESS_QUEUE_SIZE);
        let mut deliveries = session.take_deliveries()?;

        let fetcher: SyncTask = {
            let inner = self.clone();
            let cancel = cancel.clone();
            let peer = peer.clone();
            Box::pin(async move {
                inner
                    .fetch_headers(&peer, origin + 1, pivot, &mut deliveries, &proc_tx, &cancel)
                    .await
            })
        };
        let processor: SyncTask = {
            let inner = self.clone();
            let cancel = cancel.clone();
            Box::pin(async move {
                inner
                    .process_headers(origin + 1, pivot, td, mode, proc_rx, &cancel)
                    .await
            })
        };

        let result = spawn_sync(vec![fetcher, processor], &cancel).await;
        info!(peer = %peer.id(), elapsed = ?started.elapsed(), "Synchronisation terminated");
        result
    }

    /// Wait for a header packet from `peer`, ignoring other senders.
    async fn wait_headers(
        &self,
        peer: &PeerId,
        deliveries: &mut mpsc::Receiver<HeaderPack>,
        cancel: &CancellationToken,
    ) -> SyncResult<Vec<Header>> {
        let ttl = self.qos.request_ttl();
        let deadline = tokio::time::sleep(ttl);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                packet = deliveries.recv() => {
                    let Some(packet) = packet else {
                        return Err(SyncError::Cancelled);
                    };
                    if &packet.peer != peer {
                        debug!(peer = %packet.peer, "Received headers from incorrect peer");
                        continue;
                    }
                    return Ok(packet.headers);
                }
                _ = &mut deadline => {
                    debug!(peer = %peer, ttl = ?ttl, "Waiting for headers timed out");
                    return Err(SyncError::Timeout);
                }
            }
        }
    }

    /// Retrieve the head header the peer advertised at handshake.
    async fn fetch_height(
        &self,
        peer: &Peer,
        deliveries: &mut mpsc::Receiver<HeaderPack>,
        cancel: &CancellationToken,
    ) -> SyncResult<Header> {
        debug!(peer = %peer.id(), "Retrieving remote chain height");
        let (head, _) = peer.head();
        peer.request_headers_by_hash(head, 1, 0, false)?;

        let headers = self.wait_headers(peer.id(), deliveries, cancel).await?;
        let [header] = <[Header; 1]>::try_from(headers).map_err(|headers| {
            SyncError::BadPeer(format!("{} headers for head request", headers.len()))
        })?;
        if header.hash() != head {
            return Err(SyncError::BadPeer(format!(
                "head {} does not match advertised {}",
                header.hash(),
                head
            )));
        }
        debug!(number = header.number, hash = ?head, "Remote head header identified");
        Ok(header)
    }

    fn check_ancestor(&self, number: u64) -> SyncResult<u64> {
        if number <= self.config.ancestor_floor && Some(number) != self.config.checkpoint {
            debug!(number, floor = self.config.ancestor_floor, "Ancestor below allowance");
            return Err(SyncError::InvalidAncestor(number));
        }
        debug!(number, "Found common ancestor");
        Ok(number)
    }

    /// Locate the highest block both chains share.
    async fn find_ancestor(
        &self,
        peer: &Peer,
        height: u64,
        deliveries: &mut mpsc::Receiver<HeaderPack>,
        cancel: &CancellationToken,
    ) -> SyncResult<u64> {
        let floor = self.config.ancestor_floor;
        let ceil = self.chain.current_header().number;
        let stride = self.config.ancestor_stride.max(1);
        debug!(local = ceil, remote = height, "Looking for common ancestor");

        // Sample the top of the local chain, ending exactly at its head
        let lower = floor.max(ceil.saturating_sub(self.config.max_header_fetch));
        let limit = (2 * self.config.max_header_fetch / stride).max(1);
        let count = (1 + ceil.saturating_sub(lower) / stride).min(limit);
        let from = ceil.saturating_sub((count - 1) * stride);

        peer.request_headers_by_number(from, count, stride - 1, false)?;
        let headers = self.wait_headers(peer.id(), deliveries, cancel).await?;
        if headers.is_empty() {
            return Err(SyncError::EmptyHeaderSet);
        }
        if headers.len() as u64 > count {
            return Err(SyncError::BadPeer(format!(
                "{} headers for {} samples",
                headers.len(),
                count
            )));
        }
        for (i, header) in headers.iter().enumerate() {
            let want = from + i as u64 * stride;
            if header.number != want {
                return Err(SyncError::InvalidChain(format!(
                    "sample {} has number {}, requested {}",
                    i, header.number, want
                )));
            }
        }

        for header in headers.iter().rev() {
            if header.number < from || header.number > ceil {
                continue;
            }
            if self.chain.has_header(&header.hash(), header.number) {
                if header.number > height {
                    debug!(reported = height, found = header.number, "Lied about chain head");
                    return Err(SyncError::StallingPeer);
                }
                return self.check_ancestor(header.number);
            }
        }

        // No sample matched: binary search between the floor and the lower head
        let mut start = floor;
        let mut end = ceil.min(height);
        while start + 1 < end {
            let check = start + (end - start) / 2;
            peer.request_headers_by_number(check, 1, 0, false)?;

            let headers = self.wait_headers(peer.id(), deliveries, cancel).await?;
            let [header] = <[Header; 1]>::try_from(headers).map_err(|headers| {
                SyncError::BadPeer(format!("{} headers for single request", headers.len()))
            })?;
            if header.number != check {
                return Err(SyncError::BadPeer(format!(
                    "received header {} for request {}",
                    header.number, check
                )));
            }
            if self.chain.has_header(&header.hash(), header.number) {
                start = check;
            } else {
                end = check;
            }
        }
        self.check_ancestor(start)
    }

    /// Send the next skeleton or direct request to the master.
    fn request_headers(&self, peer: &Peer, from: u64, skeleton: bool) -> SyncResult<()> {
        let fetch = self.config.max_header_fetch;
        if skeleton {
            debug!(from, count = self.config.max_skeleton_size, "Fetching skeleton headers");
            peer.request_headers_by_number(from + fetch - 1, self.config.max_skeleton_size, fetch - 1, false)?;
        } else {
            debug!(from, count = fetch, "Fetching full headers");
            peer.request_headers_by_number(from, fetch, 0, false)?;
        }
        Ok(())
    }

    /// Pull headers from the master until it has no more, filling skeletons
    /// from all idle peers on the way.
    async fn fetch_headers(
        &self,
        peer: &Peer,
        mut from: u64,
        pivot: Option<u64>,
        deliveries: &mut mpsc::Receiver<HeaderPack>,
        proc_tx: &mpsc::Sender<Vec<Header>>,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        debug!(origin = from, "Directing header downloads");
        let fetch = self.config.max_header_fetch;
        let mut skeleton = true;

        self.request_headers(peer, from, skeleton)?;
        let mut ttl = self.qos.request_ttl();
        let mut deadline = tokio::time::Instant::now() + ttl;

        loop {
            let packet = tokio::select! {
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                packet = deliveries.recv() => packet.ok_or(SyncError::Cancelled)?,
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(peer = %peer.id(), ttl = ?ttl, "Header request timed out");
                    return Err(SyncError::Timeout);
                }
            };
            if &packet.peer != peer.id() {
                debug!(peer = %packet.peer, "Received skeleton from incorrect peer");
                continue;
            }
            let mut headers = packet.headers;

            // Skeleton exhausted: pull the remaining headers directly
            if headers.is_empty() && skeleton {
                skeleton = false;
                self.request_headers(peer, from, skeleton)?;
                ttl = self.qos.request_ttl();
                deadline = tokio::time::Instant::now() + ttl;
                continue;
            }

            if headers.is_empty() {
                let waiting = !self.committed.load(Ordering::SeqCst) && pivot.map_or(false, |p| p <= from);
                if waiting {
                    debug!(from, "No headers, waiting for pivot commit");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                        _ = tokio::time::sleep(self.config.header_cont_check) => {}
                    }
                    self.request_headers(peer, from, skeleton)?;
                    ttl = self.qos.request_ttl();
                    deadline = tokio::time::Instant::now() + ttl;
                    continue;
                }
                debug!(from, "No more headers available");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                    sent = proc_tx.send(Vec::new()) => {
                        sent.map_err(|_| SyncError::Cancelled)?;
                    }
                }
                return Ok(());
            }

            if skeleton {
                if headers.len() as u64 > self.config.max_skeleton_size {
                    return Err(SyncError::BadPeer(format!(
                        "{} skeleton headers",
                        headers.len()
                    )));
                }
                for (i, header) in headers.iter().enumerate() {
                    let want = from + fetch - 1 + i as u64 * fetch;
                    if header.number != want {
                        return Err(SyncError::InvalidChain(format!(
                            "skeleton header {} has number {}, requested {}",
                            i, header.number, want
                        )));
                    }
                }
                let (filled, proced) = self
                    .fill_skeleton(from, &headers, deliveries, proc_tx, cancel)
                    .await?;
                from += proced as u64;
                headers = filled.into_iter().skip(proced).collect();
            } else if headers.len() as u64 > fetch || headers[0].number != from {
                return Err(SyncError::BadPeer(format!(
                    "batch of {} from {} for request at {}",
                    headers.len(),
                    headers[0].number,
                    from
                )));
            }

            if !headers.is_empty() {
                let count = headers.len() as u64;
                debug!(from, count, "Scheduling new headers");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                    sent = proc_tx.send(headers) => {
                        sent.map_err(|_| SyncError::Cancelled)?;
                    }
                }
                from += count;
            }

            self.request_headers(peer, from, skeleton)?;
            ttl = self.qos.request_ttl();
            deadline = tokio::time::Instant::now() + ttl;
        }
    }

    /// Fill the gaps of a skeleton concurrently. Returns the filled headers
    /// and how many of them were already handed to the processor.
    async fn fill_skeleton(
        &self,
        from: u64,
        skeleton: &[Header],
        deliveries: &mut mpsc::Receiver<HeaderPack>,
        proc_tx: &mpsc::Sender<Vec<Header>>,
        cancel: &CancellationToken,
    ) -> SyncResult<(Vec<Header>, usize)> {
        debug!(from, "Filling up skeleton");
        self.queue.schedule_skeleton(from, skeleton);

        let fetcher = HeaderFetcher {
            queue: &self.queue,
            qos: &self.qos,
            registry: &self.registry,
            proc_tx,
            max_header_fetch: self.config.max_header_fetch,
            measurement_impact: self.config.measurement_impact,
        };
        let ctx = FetchContext {
            registry: &self.registry,
            dropper: self.dropper.as_ref(),
            cancel,
            tick: self.config.fetch_tick,
            timeout_grace: self.config.timeout_grace,
        };
        let result = fetch_parts(&fetcher, deliveries, &ctx).await;
        let (filled, proced) = self.queue.retrieve_headers();

        match result {
            Ok(()) => Ok((filled, proced)),
            Err(SyncError::Cancelled) => Err(SyncError::Cancelled),
            Err(SyncError::NoPeers) => Err(SyncError::NoPeers),
            Err(e) => {
                debug!(error = %e, "Skeleton fill terminated");
                Err(SyncError::InvalidChain(format!("skeleton fill failed: {}", e)))
            }
        }
    }

    /// Import header batches in order until the fetcher signals the end.
    async fn process_headers(
        &self,
        mut origin: u64,
        pivot: Option<u64>,
        td: Weight,
        mode: SyncMode,
        mut proc_rx: mpsc::Receiver<Vec<Header>>,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        loop {
            let headers = tokio::select! {
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                batch = proc_rx.recv() => batch.ok_or(SyncError::Cancelled)?,
            };

            if headers.is_empty() {
                // Header-only modes must end at the weight the peer promised
                if matches!(mode, SyncMode::Fast | SyncMode::Light) {
                    let head = self.chain.current_header();
                    let local = self
                        .chain
                        .total_difficulty(&head.hash(), head.number)
                        .unwrap_or_default();
                    if td > local {
                        return Err(SyncError::StallingPeer);
                    }
                }
                return Ok(());
            }

            for chunk in headers.chunks(self.config.max_headers_process.max(1)) {
                if cancel.is_cancelled() {
                    return Err(SyncError::Cancelled);
                }
                if let Err(e) = self
                    .chain
                    .insert_header_chain(chunk, self.config.header_check_frequency)
                {
                    let index = e.index().unwrap_or(0).min(chunk.len() - 1);
                    debug!(
                        number = chunk[index].number,
                        hash = ?chunk[index].hash(),
                        error = %e,
                        "Invalid header encountered"
                    );
                    return Err(SyncError::InvalidChain(e.to_string()));
                }
                let last = chunk[chunk.len() - 1].number;
                if pivot.map_or(false, |p| last >= p) {
                    self.committed.store(true, Ordering::SeqCst);
                }
                origin += chunk.len() as u64;
            }

            {
                let mut stats = self.stats.write();
                if stats.height < origin {
                    stats.height = origin - 1;
                }
            }
        }
    }
}

/// Run all tasks to completion, cancelling the rest on the first error.
async fn spawn_sync(tasks: Vec<SyncTask>, cancel: &CancellationToken) -> SyncResult<()> {
    let mut set = JoinSet::new();
    for task in tasks {
        set.spawn(task);
    }

    let mut first_error = None;
    while let Some(joined) = set.join_next().await {
        let result = joined.unwrap_or_else(|e| Err(SyncError::Internal(format!("sync task failed: {}", e))));
        if let Err(e) = result {
            if first_error.is_none() {
                cancel.cancel();
                first_error = Some(e);
            }
        }
    }
    cancel.cancel();

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Track registry churn: new peers lower QoS confidence, losing the
/// master cancels the session.
async fn watch_membership(
    mut events: broadcast::Receiver<RegistryEvent>,
    qos: Arc<QosTuner>,
    active: SessionSlot,
    quit: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = quit.cancelled() => return,
            event = events.recv() => event,
        };
        match event {
            Ok(RegistryEvent::Added { count, .. }) => qos.reduce_confidence(count),
            Ok(RegistryEvent::Removed { peer, .. }) => {
                let master: Option<ActiveSession> = active.read().clone();
                if let Some(session) = master.filter(|s| s.master == peer) {
                    info!(peer = %peer, "Master peer removed, cancelling sync");
                    session.cancel.cancel();
                }
            }
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "Membership watcher lagged");
            }
            Err(RecvError::Closed) => return,
        }
    }
}
