//! # hsync-network
//!
//! P2P layer of the header synchronizer.
//!
//! This crate provides:
//! - Framed wire protocol (status, header requests and responses)
//! - Status handshake with classified failures
//! - Peer links with request primitives and download statistics
//! - The peer registry ranked by total difficulty
//! - The TCP service that qualifies peers and routes header deliveries
//! - Peer scoring sinks

mod codec;
mod error;
mod handshake;
mod message;
mod peer;
mod registry;
mod scoring;
mod service;

pub use codec::{MessageCodec, PROTOCOL_MAGIC};
pub use error::{HandshakeError, NetworkError, NetworkResult};
pub use handshake::{handshake, verify_status, HANDSHAKE_TIMEOUT};
pub use message::{GetBlockHeaders, HashOrNumber, Message, MessageType, Status};
pub use peer::{Peer, PeerId};
pub use registry::{PeerDropper, PeerRegistry, RegistryEvent};
pub use scoring::{ChannelSink, NoopSink, PeerReport, PeerStatus, ScoringSink, TracingSink};
pub use service::{NetworkConfig, NetworkEvent, NetworkService};

/// Default P2P port.
pub const DEFAULT_PORT: u16 = 30313;

/// Default network identifier.
pub const DEFAULT_NETWORK_ID: u64 = 1;

/// Maximum message size.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024; // 10 MB

/// Protocol version spoken by this node.
pub const PROTOCOL_VERSION: u32 = 63;
