//! Network error types.

use thiserror::Error;

/// Network errors.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Handshake failed.
    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Invalid message.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Message too large.
    #[error("Message too large: {size} bytes, max {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    /// Peer broke the protocol after the handshake.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Peer not found.
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Peer already registered.
    #[error("Peer already registered: {0}")]
    AlreadyRegistered(String),

    /// Outbound queue of a peer is full or closed.
    #[error("Failed to queue message for {peer}: {reason}")]
    SendFailed { peer: String, reason: String },

    /// Timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classified reasons for a failed status handshake.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// No status exchange within the handshake timeout.
    #[error("handshake timed out")]
    Timeout,

    /// First message was not a status message.
    #[error("first message has code {0:#04x}, want status")]
    UnexpectedMessage(u8),

    /// Status message exceeded the size limit.
    #[error("message too large: {size} > {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// Status payload could not be decoded.
    #[error("status decode: {0}")]
    StatusDecode(String),

    /// Remote runs a different network.
    #[error("network id mismatch: {remote} (!= {local})")]
    NetworkMismatch { remote: u64, local: u64 },

    /// Remote has a different genesis block.
    #[error("genesis block mismatch: {remote} (!= {local})")]
    GenesisMismatch { remote: String, local: String },

    /// Remote speaks another protocol version.
    #[error("protocol version mismatch: {remote} (!= {local})")]
    ProtocolVersionMismatch { remote: u32, local: u32 },

    /// Stream ended before the status arrived.
    #[error("connection closed during handshake")]
    Closed,

    /// Transport failure.
    #[error("i/o: {0}")]
    Io(String),
}

impl HandshakeError {
    /// Short classification used by the scoring sink.
    pub fn reason(&self) -> &'static str {
        match self {
            HandshakeError::Timeout => "timeout",
            HandshakeError::UnexpectedMessage(_) => "status message",
            HandshakeError::MessageTooLarge { .. } => "message too large",
            HandshakeError::StatusDecode(_) => "decoding",
            HandshakeError::NetworkMismatch { .. } => "network mismatch",
            HandshakeError::GenesisMismatch { .. } => "genesis block mismatch",
            HandshakeError::ProtocolVersionMismatch { .. } => "protocol mismatch",
            HandshakeError::Closed => "closed",
            HandshakeError::Io(_) => "io",
        }
    }
}

/// Result type for network operations.
pub type NetworkResult<T> = Result<T, NetworkError>;
