//! Network service for qualifying peers and routing header traffic.
//!
//! This module provides:
//! - TCP listener and bootnode dialing
//! - Status handshake and optional checkpoint check per connection
//! - Registration of qualified peers in the shared registry
//! - Forwarding of header responses to the sync engine

use crate::{
    handshake, HashOrNumber, Message, MessageCodec, NetworkError, NetworkResult, Peer, PeerId,
    PeerRegistry, PeerStatus, ScoringSink, Status, DEFAULT_NETWORK_ID, DEFAULT_PORT,
    HANDSHAKE_TIMEOUT, MAX_MESSAGE_SIZE, PROTOCOL_MAGIC, PROTOCOL_VERSION,
};
use futures::stream::StreamExt;
use futures::{Sink, SinkExt, Stream};
use hsync_chain::{BlockHash, ChainStore, Header};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capacity of the event channel towards the application.
const EVENT_CHANNEL_SIZE: usize = 1000;

/// Network service configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Listen address; `None` disables inbound connections.
    pub listen_addr: Option<SocketAddr>,
    /// Peers dialed at startup.
    pub bootnodes: Vec<SocketAddr>,
    /// Network identifier.
    pub network_id: u64,
    /// Genesis hash announced in the status.
    pub genesis: BlockHash,
    /// Protocol version announced in the status.
    pub protocol_version: u32,
    /// Status exchange timeout.
    pub handshake_timeout: Duration,
    /// Maximum frame payload in either direction.
    pub max_message_size: usize,
    /// Maximum number of registered peers.
    pub max_peers: usize,
    /// Block every new peer must serve before registration.
    pub checkpoint: Option<(u64, BlockHash)>,
    /// Time allowed for the checkpoint answer.
    pub checkpoint_timeout: Duration,
    /// Outbound message queue per peer.
    pub outbound_queue: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: Some(SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT))),
            bootnodes: Vec::new(),
            network_id: DEFAULT_NETWORK_ID,
            genesis: BlockHash::ZERO,
            protocol_version: PROTOCOL_VERSION,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            max_message_size: MAX_MESSAGE_SIZE,
            max_peers: 50,
            checkpoint: None,
            checkpoint_timeout: Duration::from_secs(15),
            outbound_queue: 64,
        }
    }
}

/// Events emitted by the network service.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// A peer completed qualification and joined the registry.
    PeerConnected { peer: PeerId, status: Status },
    /// A registered peer left.
    PeerDisconnected { peer: PeerId },
    /// Header response from a registered peer.
    HeadersReceived { peer: PeerId, headers: Vec<Header> },
    /// A connection failed the status handshake.
    HandshakeFailed { peer: PeerId, reason: String },
}

/// TCP service that turns connections into registered peers.
pub struct NetworkService {
    config: NetworkConfig,
    chain: Arc<dyn ChainStore>,
    registry: Arc<PeerRegistry>,
    scoring: Arc<dyn ScoringSink>,
    event_tx: mpsc::Sender<NetworkEvent>,
}

impl NetworkService {
    /// Create a new network service and the receiver of its events.
    pub fn new(
        config: NetworkConfig,
        chain: Arc<dyn ChainStore>,
        registry: Arc<PeerRegistry>,
        scoring: Arc<dyn ScoringSink>,
    ) -> (Arc<Self>, mpsc::Receiver<NetworkEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let service = Arc::new(Self {
            config,
            chain,
            registry,
            scoring,
            event_tx,
        });
        (service, event_rx)
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Status describing the local chain head.
    pub fn local_status(&self) -> Status {
        let head = self.chain.current_header();
        let hash = head.hash();
        Status {
            protocol_version: self.config.protocol_version,
            network_id: self.config.network_id,
            total_difficulty: self
                .chain
                .total_difficulty(&hash, head.number)
                .unwrap_or_default(),
            head: hash,
            genesis: self.config.genesis,
        }
    }

    fn codec(&self) -> MessageCodec {
        MessageCodec::new(PROTOCOL_MAGIC)
            .with_max_size(self.config.max_message_size)
    }

    /// Run the service until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> NetworkResult<()> {
        for addr in self.config.bootnodes.clone() {
            let service = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { service.dial(addr, cancel).await });
        }

        let Some(listen_addr) = self.config.listen_addr else {
            cancel.cancelled().await;
            return Ok(());
        };

        let listener = TcpListener::bind(listen_addr).await?;
        info!(addr = %listen_addr, "Network service listening");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Network service shutting down");
                    break;
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.handle_incoming(stream, addr, cancel.clone()),
                        Err(e) => error!("Accept error: {}", e),
                    }
                }
            }
        }

        Ok(())
    }

    fn handle_incoming(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr, cancel: CancellationToken) {
        let peer_id = PeerId::from_addr(&addr);
        if self.registry.len() >= self.config.max_peers {
            warn!(addr = %addr, "Max peers reached, rejecting");
            self.scoring
                .report(&peer_id, PeerStatus::ConnectionSetupFailed, "too many peers");
            return;
        }

        debug!(addr = %addr, "Incoming connection");
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service
                .handle_connection(stream, Some(addr), peer_id, cancel)
                .await
            {
                debug!(addr = %addr, error = %e, "Connection ended");
            }
        });
    }

    /// Dial a remote node and serve the connection until it ends.
    pub async fn dial(self: Arc<Self>, addr: SocketAddr, cancel: CancellationToken) {
        let peer_id = PeerId::from_addr(&addr);
        self.scoring.report(&peer_id, PeerStatus::Dialing, "");
        info!(addr = %addr, "Connecting to peer");

        let stream = tokio::select! {
            _ = cancel.cancelled() => return,
            result = TcpStream::connect(addr) => result,
        };

        match stream {
            Ok(stream) => {
                if let Err(e) = self
                    .clone()
                    .handle_connection(stream, Some(addr), peer_id, cancel)
                    .await
                {
                    warn!(addr = %addr, error = %e, "Outgoing connection failed");
                }
            }
            Err(e) => {
                warn!(addr = %addr, error = %e, "Dial failed");
                self.scoring
                    .report(&peer_id, PeerStatus::DialFailed, &e.to_string());
            }
        }
    }

    /// Qualify a connection, register the peer and serve it until either
    /// side closes.
    pub async fn handle_connection<T>(
        self: Arc<Self>,
        io: T,
        addr: Option<SocketAddr>,
        peer_id: PeerId,
        cancel: CancellationToken,
    ) -> NetworkResult<()>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let framed = Framed::new(io, self.codec());
        let (mut sink, mut stream) = framed.split();

        let local = self.local_status();
        let status = match handshake(&mut sink, &mut stream, &local, self.config.handshake_timeout).await {
            Ok(status) => status,
            Err(e) => {
                warn!(peer = %peer_id, reason = e.reason(), error = %e, "Handshake failed");
                self.scoring
                    .report(&peer_id, PeerStatus::HandshakeFailed, e.reason());
                let _ = self
                    .event_tx
                    .send(NetworkEvent::HandshakeFailed {
                        peer: peer_id,
                        reason: e.reason().to_string(),
                    })
                    .await;
                return Err(e.into());
            }
        };

        if let Some((number, hash)) = self.config.checkpoint {
            if let Err(e) = self
                .check_checkpoint(&mut sink, &mut stream, number, hash)
                .await
            {
                warn!(peer = %peer_id, error = %e, "Checkpoint check failed");
                self.scoring
                    .report(&peer_id, PeerStatus::CheckpointCheckFailed, &e.to_string());
                return Err(e);
            }
        }

        let (tx, mut rx) = mpsc::channel::<Message>(self.config.outbound_queue.max(1));
        let mut peer = Peer::new(
            peer_id.clone(),
            status.protocol_version,
            status.head,
            status.total_difficulty.clone(),
            tx,
        );
        if let Some(addr) = addr {
            peer = peer.with_addr(addr);
        }
        let peer = Arc::new(peer);
        if self.config.checkpoint.is_some() {
            self.scoring
                .report(&peer_id, PeerStatus::CheckpointCheckPassed, "");
        }

        if self.registry.len() >= self.config.max_peers {
            self.scoring
                .report(&peer_id, PeerStatus::ConnectionSetupFailed, "too many peers");
            return Err(NetworkError::ConnectionFailed("too many peers".into()));
        }
        if let Err(e) = self.registry.add(peer.clone()) {
            self.scoring
                .report(&peer_id, PeerStatus::ConnectionSetupFailed, &e.to_string());
            return Err(e);
        }

        info!(
            peer = %peer_id,
            addr = ?peer.addr(),
            version = status.protocol_version,
            td = %status.total_difficulty,
            "Peer connected"
        );
        let _ = self
            .event_tx
            .send(NetworkEvent::PeerConnected {
                peer: peer_id.clone(),
                status,
            })
            .await;

        let closed = peer.closed_token();
        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                _ = closed.cancelled() => {
                    debug!(peer = %peer_id, "Peer link closed locally");
                    break Ok(());
                }
                Some(message) = rx.recv() => {
                    if let Err(e) = sink.send(message).await {
                        warn!(peer = %peer_id, error = %e, "Send error");
                        break Err(e);
                    }
                }
                result = stream.next() => {
                    match result {
                        Some(Ok(message)) => {
                            if let Err(e) = self.handle_message(&peer, &mut sink, message).await {
                                warn!(peer = %peer_id, error = %e, "Dropping peer");
                                break Err(e);
                            }
                        }
                        Some(Err(e)) => {
                            warn!(peer = %peer_id, error = %e, "Receive error");
                            break Err(e);
                        }
                        None => {
                            debug!(peer = %peer_id, "Connection closed by peer");
                            break Ok(());
                        }
                    }
                }
            }
        };

        // Only unregister our own link; a reconnect may already own the id
        if self
            .registry
            .get(&peer_id)
            .map_or(false, |p| Arc::ptr_eq(&p, &peer))
        {
            self.registry.remove(&peer_id);
        }
        peer.disconnect();
        let _ = self
            .event_tx
            .send(NetworkEvent::PeerDisconnected { peer: peer_id })
            .await;

        result
    }

    async fn handle_message<S>(&self, peer: &Arc<Peer>, sink: &mut S, message: Message) -> NetworkResult<()>
    where
        S: Sink<Message, Error = NetworkError> + Unpin,
    {
        match message {
            Message::Status(_) => Err(NetworkError::ProtocolViolation(
                "status after handshake".into(),
            )),
            Message::GetBlockHeaders(req) => {
                debug!(peer = %peer.id(), origin = ?req.origin, amount = req.amount, "Serving empty header response");
                sink.send(Message::BlockHeaders(Vec::new())).await
            }
            Message::BlockHeaders(headers) => {
                peer.mark_response();
                self.event_tx
                    .send(NetworkEvent::HeadersReceived {
                        peer: peer.id().clone(),
                        headers,
                    })
                    .await
                    .map_err(|_| NetworkError::ConnectionClosed)
            }
        }
    }

    /// Ask for the checkpoint block and require exactly that header back.
    async fn check_checkpoint<S, R>(
        &self,
        sink: &mut S,
        stream: &mut R,
        number: u64,
        hash: BlockHash,
    ) -> NetworkResult<()>
    where
        S: Sink<Message, Error = NetworkError> + Unpin,
        R: Stream<Item = NetworkResult<Message>> + Unpin,
    {
        sink.send(Message::GetBlockHeaders(crate::GetBlockHeaders {
            origin: HashOrNumber::Number(number),
            amount: 1,
            skip: 0,
            reverse: false,
        }))
        .await?;

        let deadline = tokio::time::sleep(self.config.checkpoint_timeout);
        tokio::pin!(deadline);

        loop {
            let message = tokio::select! {
                _ = &mut deadline => {
                    return Err(NetworkError::Timeout("checkpoint response".into()));
                }
                next = stream.next() => next.ok_or(NetworkError::ConnectionClosed)??,
            };

            match message {
                Message::BlockHeaders(headers) => {
                    return match headers.as_slice() {
                        [header] if header.number == number && header.hash() == hash => Ok(()),
                        _ => Err(NetworkError::ProtocolViolation(format!(
                            "checkpoint {} not served ({} headers)",
                            number,
                            headers.len()
                        ))),
                    };
                }
                Message::GetBlockHeaders(_) => {
                    sink.send(Message::BlockHeaders(Vec::new())).await?;
                }
                Message::Status(_) => {
                    return Err(NetworkError::ProtocolViolation(
                        "status after handshake".into(),
                    ));
                }
            }
        }
    }
}
