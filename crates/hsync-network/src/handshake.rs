//! Status handshake.
//!
//! Both sides send their status and read the counterpart's status at the
//! same time, under a single timeout. The remote status must be the first
//! message, fit the size limit, and agree on genesis, network id and
//! protocol version.

use crate::{HandshakeError, Message, NetworkError, NetworkResult, Status};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::time::Duration;
use tracing::{debug, instrument};

/// Default handshake timeout.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

fn classify(err: NetworkError) -> HandshakeError {
    match err {
        NetworkError::MessageTooLarge { size, max } => HandshakeError::MessageTooLarge { size, max },
        NetworkError::InvalidMessage(msg) => HandshakeError::StatusDecode(msg),
        NetworkError::ConnectionClosed => HandshakeError::Closed,
        other => HandshakeError::Io(other.to_string()),
    }
}

async fn send_status<S>(sink: &mut S, local: &Status) -> Result<(), HandshakeError>
where
    S: Sink<Message, Error = NetworkError> + Unpin,
{
    sink.send(Message::Status(local.clone()))
        .await
        .map_err(classify)
}

async fn read_status<R>(stream: &mut R) -> Result<Status, HandshakeError>
where
    R: Stream<Item = NetworkResult<Message>> + Unpin,
{
    match stream.next().await {
        None => Err(HandshakeError::Closed),
        Some(Err(e)) => Err(classify(e)),
        Some(Ok(Message::Status(status))) => Ok(status),
        Some(Ok(other)) => Err(HandshakeError::UnexpectedMessage(
            other.message_type() as u8,
        )),
    }
}

/// Check a remote status against ours.
pub fn verify_status(local: &Status, remote: &Status) -> Result<(), HandshakeError> {
    if remote.genesis != local.genesis {
        return Err(HandshakeError::GenesisMismatch {
            remote: remote.genesis.to_string(),
            local: local.genesis.to_string(),
        });
    }
    if remote.network_id != local.network_id {
        return Err(HandshakeError::NetworkMismatch {
            remote: remote.network_id,
            local: local.network_id,
        });
    }
    if remote.protocol_version != local.protocol_version {
        return Err(HandshakeError::ProtocolVersionMismatch {
            remote: remote.protocol_version,
            local: local.protocol_version,
        });
    }
    Ok(())
}

/// Run the status exchange over a framed connection's two halves.
#[instrument(skip_all, fields(network_id = local.network_id))]
pub async fn handshake<S, R>(
    sink: &mut S,
    stream: &mut R,
    local: &Status,
    timeout: Duration,
) -> Result<Status, HandshakeError>
where
    S: Sink<Message, Error = NetworkError> + Unpin,
    R: Stream<Item = NetworkResult<Message>> + Unpin,
{
    let exchange = async {
        let ((), remote) = tokio::try_join!(send_status(sink, local), read_status(stream))?;
        Ok::<_, HandshakeError>(remote)
    };

    let remote = tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| HandshakeError::Timeout)??;

    verify_status(local, &remote)?;
    debug!(
        version = remote.protocol_version,
        head = ?remote.head,
        td = %remote.total_difficulty,
        "Status handshake complete"
    );
    Ok(remote)
}
