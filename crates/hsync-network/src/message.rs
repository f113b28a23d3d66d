//! P2P protocol messages.
//!
//! Only the header-sync subset of the protocol is modelled: the status
//! handshake, header requests and header responses. An encoded message
//! starts with its type byte followed by the payload.

use crate::{NetworkError, NetworkResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use hsync_chain::{BlockHash, Header, Weight, HASH_SIZE};

/// Upper bound on the encoded size of total difficulty.
const MAX_TD_BYTES: usize = 64;

/// Smallest possible encoded header, used to bound list allocations.
const MIN_HEADER_SIZE: usize = HASH_SIZE + 34;

/// Message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Status handshake.
    Status = 0x00,
    /// Header request.
    GetBlockHeaders = 0x03,
    /// Header response.
    BlockHeaders = 0x04,
}

impl TryFrom<u8> for MessageType {
    type Error = NetworkError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(MessageType::Status),
            0x03 => Ok(MessageType::GetBlockHeaders),
            0x04 => Ok(MessageType::BlockHeaders),
            _ => Err(NetworkError::InvalidMessage(format!(
                "Unknown message type: {:#04x}",
                value
            ))),
        }
    }
}

/// Status message exchanged during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Protocol version.
    pub protocol_version: u32,
    /// Network identifier.
    pub network_id: u64,
    /// Total difficulty of the sender's head.
    pub total_difficulty: Weight,
    /// Hash of the sender's head.
    pub head: BlockHash,
    /// Genesis hash.
    pub genesis: BlockHash,
}

/// Request origin: a block hash or a block number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashOrNumber {
    Hash(BlockHash),
    Number(u64),
}

/// Header request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetBlockHeaders {
    /// First header to return.
    pub origin: HashOrNumber,
    /// Maximum number of headers.
    pub amount: u64,
    /// Blocks to skip between consecutive headers.
    pub skip: u64,
    /// Walk towards genesis instead of towards the head.
    pub reverse: bool,
}

/// Protocol messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Status(Status),
    GetBlockHeaders(GetBlockHeaders),
    BlockHeaders(Vec<Header>),
}

impl Message {
    /// Message type of this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Status(_) => MessageType::Status,
            Message::GetBlockHeaders(_) => MessageType::GetBlockHeaders,
            Message::BlockHeaders(_) => MessageType::BlockHeaders,
        }
    }

    /// Encode as type byte followed by payload.
    pub fn encode(&self) -> NetworkResult<Bytes> {
        let mut buf = BytesMut::new();
        buf.put_u8(self.message_type() as u8);

        match self {
            Message::Status(status) => {
                let td = status.total_difficulty.to_bytes_be();
                if td.len() > MAX_TD_BYTES {
                    return Err(NetworkError::InvalidMessage(format!(
                        "Total difficulty too large: {} bytes",
                        td.len()
                    )));
                }
                buf.put_u32(status.protocol_version);
                buf.put_u64(status.network_id);
                buf.put_u8(td.len() as u8);
                buf.put_slice(&td);
                buf.put_slice(status.head.as_bytes());
                buf.put_slice(status.genesis.as_bytes());
            }
            Message::GetBlockHeaders(req) => {
                match req.origin {
                    HashOrNumber::Hash(hash) => {
                        buf.put_u8(0);
                        buf.put_slice(hash.as_bytes());
                    }
                    HashOrNumber::Number(number) => {
                        buf.put_u8(1);
                        buf.put_u64(number);
                    }
                }
                buf.put_u64(req.amount);
                buf.put_u64(req.skip);
                buf.put_u8(req.reverse as u8);
            }
            Message::BlockHeaders(headers) => {
                buf.put_u32(headers.len() as u32);
                for header in headers {
                    header.encode_to(&mut buf);
                }
            }
        }

        Ok(buf.freeze())
    }

    /// Decode from type byte followed by payload.
    pub fn decode(mut data: Bytes) -> NetworkResult<Self> {
        if data.is_empty() {
            return Err(NetworkError::InvalidMessage("Empty message".into()));
        }
        let msg_type = MessageType::try_from(data.get_u8())?;

        let message = match msg_type {
            MessageType::Status => {
                need(&data, 4 + 8 + 1, "status")?;
                let protocol_version = data.get_u32();
                let network_id = data.get_u64();
                let td_len = data.get_u8() as usize;
                if td_len > MAX_TD_BYTES {
                    return Err(NetworkError::InvalidMessage(format!(
                        "Total difficulty too large: {} bytes",
                        td_len
                    )));
                }
                need(&data, td_len + 2 * HASH_SIZE, "status")?;
                let total_difficulty = Weight::from_bytes_be(&data.split_to(td_len));
                let head = read_hash(&mut data)?;
                let genesis = read_hash(&mut data)?;
                Message::Status(Status {
                    protocol_version,
                    network_id,
                    total_difficulty,
                    head,
                    genesis,
                })
            }
            MessageType::GetBlockHeaders => {
                need(&data, 1, "header request")?;
                let origin = match data.get_u8() {
                    0 => HashOrNumber::Hash(read_hash(&mut data)?),
                    1 => {
                        need(&data, 8, "header request")?;
                        HashOrNumber::Number(data.get_u64())
                    }
                    tag => {
                        return Err(NetworkError::InvalidMessage(format!(
                            "Invalid origin tag: {}",
                            tag
                        )))
                    }
                };
                need(&data, 17, "header request")?;
                let amount = data.get_u64();
                let skip = data.get_u64();
                let reverse = data.get_u8() != 0;
                Message::GetBlockHeaders(GetBlockHeaders {
                    origin,
                    amount,
                    skip,
                    reverse,
                })
            }
            MessageType::BlockHeaders => {
                need(&data, 4, "headers")?;
                let count = data.get_u32() as usize;
                if count.saturating_mul(MIN_HEADER_SIZE) > data.remaining() {
                    return Err(NetworkError::InvalidMessage(format!(
                        "Header count {} exceeds payload",
                        count
                    )));
                }
                let mut headers = Vec::with_capacity(count);
                for _ in 0..count {
                    let header = Header::decode(&mut data)
                        .map_err(|e| NetworkError::InvalidMessage(e.to_string()))?;
                    headers.push(header);
                }
                Message::BlockHeaders(headers)
            }
        };

        if data.has_remaining() {
            return Err(NetworkError::InvalidMessage(format!(
                "{} trailing bytes after {:?}",
                data.remaining(),
                msg_type
            )));
        }
        Ok(message)
    }
}

fn need(data: &Bytes, len: usize, what: &str) -> NetworkResult<()> {
    if data.remaining() < len {
        return Err(NetworkError::InvalidMessage(format!(
            "Truncated {}: need {} bytes, have {}",
            what,
            len,
            data.remaining()
        )));
    }
    Ok(())
}

fn read_hash(data: &mut Bytes) -> NetworkResult<BlockHash> {
    need(data, HASH_SIZE, "hash")?;
    BlockHash::from_slice(&data.split_to(HASH_SIZE))
        .map_err(|e| NetworkError::InvalidMessage(e.to_string()))
}
