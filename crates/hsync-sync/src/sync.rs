//! Sync driver.
//!
//! Watches the registry for a peer heavier than the local chain, runs a
//! downloader session against it and paces the next attempt by the
//! outcome. Network events carrying headers are forwarded to the
//! downloader.

use crate::{Downloader, RecoveryAction, SyncError, SyncResult, SyncerConfig};
use hsync_chain::{ChainStore, Weight};
use hsync_network::{NetworkEvent, PeerRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Drives the downloader against the best known peer.
pub struct Syncer {
    config: SyncerConfig,
    downloader: Downloader,
    chain: Arc<dyn ChainStore>,
    registry: Arc<PeerRegistry>,
}

impl Syncer {
    pub fn new(
        config: SyncerConfig,
        downloader: Downloader,
        chain: Arc<dyn ChainStore>,
        registry: Arc<PeerRegistry>,
    ) -> Self {
        Self {
            config,
            downloader,
            chain,
            registry,
        }
    }

    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    /// Total difficulty of the local head.
    pub fn local_td(&self) -> Weight {
        let head = self.chain.current_header();
        self.chain
            .total_difficulty(&head.hash(), head.number)
            .unwrap_or_default()
    }

    /// Run one session against the best peer if it is heavier than us.
    /// Returns `None` when there was nothing to do.
    pub async fn sync_once(&self) -> Option<SyncResult<()>> {
        let peer = self.registry.best_peer()?;
        let (head, td) = peer.head();
        if td <= self.local_td() {
            trace!(peer = %peer.id(), "Best peer is not ahead");
            return None;
        }
        Some(
            self.downloader
                .synchronise(peer.id(), head, td, self.config.mode)
                .await,
        )
    }

    /// Delay before the next attempt after `result`.
    fn next_delay(&self, result: Option<&SyncResult<()>>) -> Duration {
        match result {
            None => self.config.idle_interval,
            Some(Ok(())) => self.config.retry_interval,
            Some(Err(e)) => match e.action() {
                RecoveryAction::BackOff => self.config.backoff_interval,
                _ => self.config.retry_interval,
            },
        }
    }

    async fn drive(&self, cancel: &CancellationToken) {
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.sync_once() => result,
            };
            if let Some(Err(e)) = &result {
                debug!(error = %e, "Sync attempt failed");
            } else if result.is_some() {
                let progress = self.downloader.progress();
                info!(
                    head = progress.current_block,
                    highest = progress.highest_block,
                    "Sync attempt finished"
                );
            }

            let delay = self.next_delay(result.as_ref());
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.downloader.cancel();
    }

    async fn forward(&self, events: &mut mpsc::Receiver<NetworkEvent>, cancel: &CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                debug!("Network event stream closed");
                return;
            };
            match event {
                NetworkEvent::HeadersReceived { peer, headers } => {
                    let count = headers.len();
                    match self.downloader.deliver_headers(peer.clone(), headers).await {
                        Ok(()) => {}
                        Err(SyncError::NoSyncActive) => {
                            trace!(peer = %peer, count, "Headers outside a sync session dropped");
                        }
                        Err(e) => debug!(peer = %peer, error = %e, "Header delivery failed"),
                    }
                }
                NetworkEvent::PeerConnected { peer, .. } => debug!(peer = %peer, "Peer connected"),
                NetworkEvent::PeerDisconnected { peer } => debug!(peer = %peer, "Peer disconnected"),
                NetworkEvent::HandshakeFailed { peer, reason } => {
                    debug!(peer = %peer, reason = %reason, "Handshake failed")
                }
            }
        }
    }

    /// Drive sessions and forward deliveries until `cancel` fires.
    pub async fn run(&self, mut events: mpsc::Receiver<NetworkEvent>, cancel: CancellationToken) {
        info!(mode = %self.config.mode, "Starting header sync driver");
        tokio::join!(self.drive(&cancel), self.forward(&mut events, &cancel));
        info!("Header sync driver stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DownloaderConfig;
    use hsync_chain::{BlockHash, Header, MemoryChainStore};
    use hsync_network::{Message, Peer, PeerId};

    fn setup() -> (Syncer, Arc<PeerRegistry>) {
        let chain: Arc<dyn ChainStore> =
            Arc::new(MemoryChainStore::new(Header::new(BlockHash::ZERO, 0, 0, 1)));
        let registry = Arc::new(PeerRegistry::new());
        let downloader = Downloader::new(
            DownloaderConfig::default(),
            chain.clone(),
            registry.clone(),
            registry.clone(),
        );
        let syncer = Syncer::new(SyncerConfig::default(), downloader, chain, registry.clone());
        (syncer, registry)
    }

    fn peer(id: u8, td: u32) -> (Arc<Peer>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(8);
        let peer = Peer::new(PeerId::from_bytes(vec![id]), 63, BlockHash([id; 32]), Weight::from(td), tx);
        (Arc::new(peer), rx)
    }

    #[tokio::test]
    async fn test_nothing_to_do_without_better_peer() {
        let (syncer, registry) = setup();
        assert!(syncer.sync_once().await.is_none());

        // Same weight as the local anchor
        let (p, _rx) = peer(1, 1);
        registry.add(p).unwrap();
        assert!(syncer.sync_once().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_times_out_and_is_dropped() {
        let (syncer, registry) = setup();
        let (p, mut rx) = peer(1, 500);
        registry.add(p.clone()).unwrap();

        let result = syncer.sync_once().await;
        assert!(matches!(result, Some(Err(SyncError::Timeout))));
        assert!(matches!(rx.recv().await, Some(Message::GetBlockHeaders(_))));
        assert!(registry.is_empty());
        assert!(p.is_closed());
    }

    #[test]
    fn test_delay_follows_recovery_action() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = rt.enter();
        let (syncer, _) = setup();
        let config = SyncerConfig::default();
        assert_eq!(syncer.next_delay(None), config.idle_interval);
        assert_eq!(syncer.next_delay(Some(&Ok(()))), config.retry_interval);
        assert_eq!(
            syncer.next_delay(Some(&Err(SyncError::NoPeers))),
            config.backoff_interval
        );
        assert_eq!(
            syncer.next_delay(Some(&Err(SyncError::Timeout))),
            config.retry_interval
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_forwards_and_stops() {
        let (syncer, _) = setup();
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        tx.send(NetworkEvent::HeadersReceived {
            peer: PeerId::from_bytes(vec![1]),
            headers: Vec::new(),
        })
        .await
        .unwrap();

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            stopper.cancel();
        });
        syncer.run(rx, cancel).await;
        assert!(!syncer.downloader().is_synchronising());
    }
}
