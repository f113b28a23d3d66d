//! Node implementation.

use crate::config::NodeConfig;
use anyhow::{Context, Result};
use hsync_chain::{ChainStore, MemoryChainStore};
use hsync_network::{NetworkEvent, NetworkService, PeerRegistry, ScoringSink, TracingSink};
use hsync_sync::{Downloader, Syncer};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Wires the chain store, network service and sync driver together.
pub struct Node {
    chain: Arc<MemoryChainStore>,
    network: Arc<NetworkService>,
    syncer: Arc<Syncer>,
    events: Mutex<Option<mpsc::Receiver<NetworkEvent>>>,
    shutdown: CancellationToken,
}

impl Node {
    /// Create a new node. Must be called inside the runtime.
    pub fn new(config: NodeConfig) -> Result<Arc<Self>> {
        let anchor = config.anchor();
        info!(hash = %anchor.hash(), "Chain anchored");
        let chain = Arc::new(MemoryChainStore::new(anchor));
        let store: Arc<dyn ChainStore> = chain.clone();

        let registry = Arc::new(PeerRegistry::new());
        let scoring: Arc<dyn ScoringSink> = Arc::new(TracingSink);
        let network_config = config.network_config().context("Invalid network configuration")?;
        let (network, events) = NetworkService::new(network_config, store.clone(), registry.clone(), scoring);

        let downloader = Downloader::new(
            config.downloader_config(),
            store.clone(),
            registry.clone(),
            registry.clone(),
        );
        let syncer_config = config.syncer_config().context("Invalid sync configuration")?;
        let syncer = Arc::new(Syncer::new(syncer_config, downloader, store, registry));

        Ok(Arc::new(Self {
            chain,
            network,
            syncer,
            events: Mutex::new(Some(events)),
            shutdown: CancellationToken::new(),
        }))
    }

    /// Run until shutdown.
    pub async fn run(&self) -> Result<()> {
        let events = self
            .events
            .lock()
            .take()
            .context("Node is already running")?;

        // A failed listener stops the whole node
        let network = {
            let service = self.network.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                let result = service.run(shutdown.clone()).await;
                shutdown.cancel();
                result
            })
        };
        let syncer = self.syncer.clone();
        let cancel = self.shutdown.clone();
        let driver = tokio::spawn(async move { syncer.run(events, cancel).await });

        self.shutdown.cancelled().await;
        self.syncer.downloader().terminate();

        match network.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Network service error: {}", e),
            Err(e) => error!("Network task failed: {}", e),
        }
        driver.await.context("Sync driver task failed")?;

        let head = self.chain.current_header();
        info!(number = head.number, hash = %head.hash(), td = %self.chain.current_td(), "Final chain head");
        Ok(())
    }

    /// Request a graceful shutdown.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
