//! Test harness for sync scenarios.
//!
//! A simulated remote peer is a registered `Peer` whose outbound queue is
//! drained by a task answering `GetBlockHeaders` from its own chain. The
//! answers are routed back either straight into the downloader or through
//! a network event channel, the way the network service would.

use crate::generators::{chain_td, peer_id, store};
use hsync_chain::{BlockHash, ChainStore, Header, MemoryChainStore};
use hsync_network::{
    GetBlockHeaders, HashOrNumber, Message, NetworkEvent, Peer, PeerId, PeerRegistry,
    PROTOCOL_VERSION,
};
use hsync_sync::{Downloader, DownloaderConfig, SyncMode, SyncResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How a simulated peer answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Serves its chain faithfully.
    Honest,
    /// Never answers.
    Silent,
    /// Serves nothing above the given number, except by-hash lookups.
    Withholding(u64),
    /// Scrambles every contiguous batch of more than one header.
    Corrupt,
}

/// Where a simulated peer sends its answers.
#[derive(Clone)]
pub enum Route {
    Downloader(Downloader),
    Events(mpsc::Sender<NetworkEvent>),
}

impl Route {
    async fn deliver(&self, peer: PeerId, headers: Vec<Header>) {
        match self {
            Route::Downloader(downloader) => {
                let _ = downloader.deliver_headers(peer, headers).await;
            }
            Route::Events(tx) => {
                let _ = tx.send(NetworkEvent::HeadersReceived { peer, headers }).await;
            }
        }
    }
}

/// Requests received by a simulated peer.
#[derive(Debug, Clone, Default)]
pub struct RequestLog(Arc<Mutex<Vec<GetBlockHeaders>>>);

impl RequestLog {
    fn push(&self, request: GetBlockHeaders) {
        self.0.lock().push(request);
    }

    pub fn all(&self) -> Vec<GetBlockHeaders> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.all().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Single-header requests by number, as issued by the binary search.
    pub fn single_number_requests(&self) -> usize {
        self.all()
            .iter()
            .filter(|r| r.amount == 1 && matches!(r.origin, HashOrNumber::Number(_)))
            .count()
    }
}

/// Answer a header request from an indexed chain.
pub fn serve_request(chain: &[Header], request: &GetBlockHeaders) -> Vec<Header> {
    let start = match request.origin {
        HashOrNumber::Number(number) => number,
        HashOrNumber::Hash(hash) => match chain.iter().find(|h| h.hash() == hash) {
            Some(header) => header.number,
            None => return Vec::new(),
        },
    };

    let mut headers = Vec::new();
    let mut next = Some(start);
    while let Some(number) = next {
        if headers.len() as u64 >= request.amount {
            break;
        }
        let Some(header) = chain.get(number as usize) else {
            break;
        };
        headers.push(header.clone());
        next = if request.reverse {
            number.checked_sub(request.skip + 1)
        } else {
            number.checked_add(request.skip + 1)
        };
    }
    headers
}

fn answer(behaviour: Behaviour, chain: &[Header], request: &GetBlockHeaders) -> Option<Vec<Header>> {
    match behaviour {
        Behaviour::Silent => None,
        Behaviour::Honest => Some(serve_request(chain, request)),
        Behaviour::Withholding(limit) => {
            let mut headers = serve_request(chain, request);
            if matches!(request.origin, HashOrNumber::Number(_)) {
                headers.retain(|h| h.number <= limit);
            }
            Some(headers)
        }
        Behaviour::Corrupt => {
            let mut headers = serve_request(chain, request);
            if request.skip == 0 && headers.len() > 1 {
                headers.reverse();
            }
            Some(headers)
        }
    }
}

/// A registered simulated peer.
pub struct RemotePeer {
    pub peer: Arc<Peer>,
    pub log: RequestLog,
}

impl RemotePeer {
    /// Create the peer and start answering its requests. `head` is what
    /// the peer advertised at handshake.
    pub fn spawn(
        id: PeerId,
        chain: Arc<Vec<Header>>,
        head: &Header,
        behaviour: Behaviour,
        route: Route,
    ) -> Self {
        let td = chain_td(&chain[..=head.number as usize]);
        let (tx, mut rx) = mpsc::channel(256);
        let peer = Arc::new(Peer::new(id.clone(), PROTOCOL_VERSION, head.hash(), td, tx));
        let log = RequestLog::default();

        let requests = log.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let Message::GetBlockHeaders(request) = message else {
                    continue;
                };
                requests.push(request.clone());
                if let Some(headers) = answer(behaviour, &chain, &request) {
                    route.deliver(id.clone(), headers).await;
                }
            }
        });

        Self { peer, log }
    }
}

/// Downloader settings sized for small generated chains.
pub fn test_config() -> DownloaderConfig {
    DownloaderConfig {
        max_header_fetch: 16,
        max_skeleton_size: 8,
        ancestor_stride: 4,
        ancestor_floor: 0,
        checkpoint: Some(0),
        max_headers_process: 64,
        min_full_blocks: 32,
        fetch_tick: Duration::from_millis(10),
        header_cont_check: Duration::from_millis(50),
        ..Default::default()
    }
}

/// Local node under test: chain store, registry and downloader.
pub struct TestNet {
    pub chain: Arc<MemoryChainStore>,
    pub registry: Arc<PeerRegistry>,
    pub downloader: Downloader,
}

impl TestNet {
    /// Start from an indexed local chain (at least the genesis).
    pub fn new(config: DownloaderConfig, local: &[Header]) -> Self {
        let chain = store(local);
        let registry = Arc::new(PeerRegistry::new());
        let downloader = Downloader::new(config, chain.clone(), registry.clone(), registry.clone());
        Self {
            chain,
            registry,
            downloader,
        }
    }

    /// Register a peer serving `remote` and advertising its tip.
    pub fn add_peer(&self, seed: u8, remote: &Arc<Vec<Header>>, behaviour: Behaviour) -> RemotePeer {
        let head = remote[remote.len() - 1].clone();
        self.add_peer_at(seed, remote, &head, behaviour)
    }

    /// Register a peer serving `remote` and advertising `head`.
    pub fn add_peer_at(
        &self,
        seed: u8,
        remote: &Arc<Vec<Header>>,
        head: &Header,
        behaviour: Behaviour,
    ) -> RemotePeer {
        let remote_peer = RemotePeer::spawn(
            peer_id(seed),
            remote.clone(),
            head,
            behaviour,
            Route::Downloader(self.downloader.clone()),
        );
        self.registry
            .add(remote_peer.peer.clone())
            .expect("peer ids are unique per test");
        remote_peer
    }

    /// Synchronise against `peer` using its advertised head.
    pub async fn sync(&self, peer: &Peer, mode: SyncMode) -> SyncResult<()> {
        let (head, td) = peer.head();
        self.downloader.synchronise(peer.id(), head, td, mode).await
    }

    pub fn head(&self) -> Header {
        self.chain.current_header()
    }

    pub fn has(&self, header: &Header) -> bool {
        self.chain.has_header(&header.hash(), header.number)
    }

    pub fn head_hash(&self) -> BlockHash {
        self.head().hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::chain;

    fn by_number(origin: u64, amount: u64, skip: u64, reverse: bool) -> GetBlockHeaders {
        GetBlockHeaders {
            origin: HashOrNumber::Number(origin),
            amount,
            skip,
            reverse,
        }
    }

    #[test]
    fn test_serve_request_shapes() {
        let headers = chain(40);
        let numbers = |r: &GetBlockHeaders| -> Vec<u64> {
            serve_request(&headers, r).iter().map(|h| h.number).collect()
        };

        assert_eq!(numbers(&by_number(5, 3, 0, false)), vec![5, 6, 7]);
        assert_eq!(numbers(&by_number(0, 4, 3, false)), vec![0, 4, 8, 12]);
        assert_eq!(numbers(&by_number(10, 5, 2, true)), vec![10, 7, 4, 1]);
        assert_eq!(numbers(&by_number(38, 10, 0, false)), vec![38, 39, 40]);
        assert!(numbers(&by_number(41, 1, 0, false)).is_empty());

        let by_hash = GetBlockHeaders {
            origin: HashOrNumber::Hash(headers[40].hash()),
            amount: 1,
            skip: 0,
            reverse: false,
        };
        assert_eq!(numbers(&by_hash), vec![40]);
    }

    #[test]
    fn test_faulty_answers() {
        let headers = chain(40);
        let request = by_number(20, 10, 0, false);

        assert!(answer(Behaviour::Silent, &headers, &request).is_none());
        let withheld = answer(Behaviour::Withholding(24), &headers, &request).unwrap();
        assert_eq!(withheld.last().unwrap().number, 24);
        let corrupt = answer(Behaviour::Corrupt, &headers, &request).unwrap();
        assert_eq!(corrupt[0].number, 29);
    }
}
