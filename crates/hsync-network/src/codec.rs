//! Message framing codec.
//!
//! Every message travels in a frame:
//!
//! ```text
//! +----------+----------+----------+----------+
//! |  Magic   |   Type   |  Length  | Checksum |
//! | 4 bytes  | 1 byte   | 4 bytes  | 4 bytes  |
//! +----------+----------+----------+----------+
//! |                 Payload                   |
//! |              (Length bytes)               |
//! +-------------------------------------------+
//! ```
//!
//! - Magic: fixed protocol identifier
//! - Length: payload length in bytes (big-endian)
//! - Checksum: first 4 bytes of Blake2b256(payload)
//!
//! The size ceiling is enforced on every frame in both directions,
//! before any payload is buffered.

use crate::{Message, NetworkError, MAX_MESSAGE_SIZE};
use blake2::{Blake2b, Digest};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Header size: magic (4) + type (1) + length (4) + checksum (4) = 13 bytes
const HEADER_SIZE: usize = 13;

/// Frame magic shared by every network. Networks are told apart by the
/// `Status` exchange, not by framing.
pub const PROTOCOL_MAGIC: [u8; 4] = *b"hsyn";

/// Message codec for the header-sync protocol.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    /// Network magic bytes.
    magic: [u8; 4],
    /// Maximum allowed payload size.
    max_size: usize,
}

impl MessageCodec {
    /// Create a codec for the given magic with the default size limit.
    pub fn new(magic: [u8; 4]) -> Self {
        Self {
            magic,
            max_size: MAX_MESSAGE_SIZE,
        }
    }

    /// Override the payload size limit.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Calculate checksum for payload (first 4 bytes of Blake2b256).
    fn checksum(payload: &[u8]) -> [u8; 4] {
        let hash = Blake2b::<typenum::U32>::digest(payload);
        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&hash[0..4]);
        checksum
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = NetworkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        if src[0..4] != self.magic {
            return Err(NetworkError::InvalidMessage(format!(
                "Invalid magic: expected {:?}, got {:?}",
                self.magic,
                &src[0..4]
            )));
        }

        let msg_type = src[4];
        let length = u32::from_be_bytes([src[5], src[6], src[7], src[8]]) as usize;
        let checksum: [u8; 4] = [src[9], src[10], src[11], src[12]];

        if length > self.max_size {
            return Err(NetworkError::MessageTooLarge {
                size: length,
                max: self.max_size,
            });
        }

        let total_size = HEADER_SIZE + length;
        if src.len() < total_size {
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(length);

        if Self::checksum(&payload) != checksum {
            return Err(NetworkError::InvalidMessage("Checksum mismatch".to_string()));
        }

        let mut msg_bytes = BytesMut::with_capacity(length + 1);
        msg_bytes.put_u8(msg_type);
        msg_bytes.extend_from_slice(&payload);

        Message::decode(msg_bytes.freeze()).map(Some)
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = NetworkError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let encoded = item.encode()?;
        let msg_type = encoded[0];
        let payload = &encoded[1..];
        let length = payload.len();

        if length > self.max_size {
            return Err(NetworkError::MessageTooLarge {
                size: length,
                max: self.max_size,
            });
        }

        dst.reserve(HEADER_SIZE + length);
        dst.put_slice(&self.magic);
        dst.put_u8(msg_type);
        dst.put_u32(length as u32);
        dst.put_slice(&Self::checksum(payload));
        dst.put_slice(payload);

        Ok(())
    }
}
