//! Transfer sessions
//!
//! One session per client conversation, each owning an ephemeral UDP
//! socket and driving the stop-and-wait block exchange against the shared
//! [`FileStore`]. Write sessions receive blocks under a 30 second receive
//! timeout with a small retry budget for stray packets; read sessions send
//! blocks and wait one second per acknowledgment with no retry.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::protocol::{self, ErrorCode, Packet};
use crate::store::{FileStore, StoreError};

/// Fixed TFTP block size. The final block of a transfer is shorter.
pub const BLOCK_SIZE: usize = 512;

/// Receive buffer size; comfortably above the largest legal datagram.
const RECV_BUFFER_SIZE: usize = 1024;

const WRITE_TIMEOUT_SECS: u64 = 30;
const READ_ACK_TIMEOUT_SECS: u64 = 1;
const MAX_WRITE_RETRIES: usize = 5;

/// Per-session configuration.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub block_size: usize,
    /// How long a write session waits for the next data block.
    pub write_timeout: Duration,
    /// How long a read session waits for an acknowledgment.
    pub read_timeout: Duration,
    /// Stray or out-of-order packets tolerated before a write gives up.
    pub max_retries: usize,
    /// Local address for session sockets on multihomed hosts.
    pub local_bind: Option<IpAddr>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            write_timeout: Duration::from_secs(WRITE_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_ACK_TIMEOUT_SECS),
            max_retries: MAX_WRITE_RETRIES,
            local_bind: None,
        }
    }
}

/// Handle a TFTP write request (WRQ) to completion or failure.
///
/// Claims the filename in the store, acknowledges block 0, then accepts
/// data blocks in strict sequence until a short block completes the file.
/// Every failure path aborts the claim so the filename can be rewritten.
pub async fn handle_write_request(
    client: SocketAddr,
    filename: String,
    store: Arc<FileStore>,
    config: &TransferConfig,
) -> Result<()> {
    let sock = create_session_socket(client, config.local_bind).await?;

    let mut handle = match store.begin_write(&filename) {
        Ok(handle) => handle,
        Err(conflict) => {
            tracing::debug!("Rejecting write of '{}' from {}: {}", filename, client, conflict);
            send_packet(
                &sock,
                client,
                &Packet::error(ErrorCode::FileAlreadyExists, conflict.to_string()),
            )
            .await?;
            return Ok(());
        }
    };

    tracing::debug!("Accepting write of '{}' from {}", filename, client);
    send_packet(&sock, client, &Packet::Ack { block: 0 }).await?;

    let mut expected: u16 = 1;
    let mut retries = 0usize;

    loop {
        let (buf, src) = match timeout(config.write_timeout, recv_datagram(&sock)).await {
            Ok(Ok(datagram)) => datagram,
            // Timeout or socket failure: the claim is released so the
            // client can retry the whole transfer later.
            _ => {
                store.abort_write(handle);
                send_packet(
                    &sock,
                    client,
                    &Packet::error(ErrorCode::Undefined, "Timeout during write operation"),
                )
                .await?;
                bail!("write of '{}' from {} timed out waiting for block {}", filename, client, expected);
            }
        };

        match protocol::decode(&buf) {
            Packet::Error { code, message } => {
                store.abort_write(handle);
                send_packet(
                    &sock,
                    client,
                    &Packet::Error {
                        code,
                        message: message.clone(),
                    },
                )
                .await?;
                bail!("client {} aborted write of '{}': error {} - {}", client, filename, code, message);
            }
            Packet::Data { block, payload } if block == expected && src == client => {
                let payload_len = payload.len();
                if let Err(err) = store.put_chunk(&mut handle, block, payload) {
                    store.abort_write(handle);
                    let reply = match err {
                        StoreError::CapacityExceeded(_) => Packet::error(ErrorCode::DiskFull, "Disk is full"),
                        ref other => Packet::error(ErrorCode::Undefined, other.to_string()),
                    };
                    send_packet(&sock, client, &reply).await?;
                    bail!("write of '{}' from {} aborted: {}", filename, client, err);
                }

                send_packet(&sock, client, &Packet::Ack { block: expected }).await?;
                expected = expected.wrapping_add(1);
                retries = 0;

                // A short block is the end-of-file marker.
                if payload_len < config.block_size {
                    let total = handle.received();
                    store.finish_write(handle);
                    tracing::info!("Finished receiving '{}' from {}: {} bytes", filename, client, total);
                    return Ok(());
                }
            }
            other => {
                // Duplicate, out-of-order, or wrong-sender packet: no ack,
                // no NACK. The client's retransmission timer drives
                // recovery; the retry budget bounds how long we indulge it.
                tracing::debug!(
                    "Ignoring {} from {} during write of '{}' (expecting block {})",
                    other.opcode(),
                    src,
                    filename,
                    expected
                );
                retries += 1;
                if retries > config.max_retries {
                    store.abort_write(handle);
                    send_packet(
                        &sock,
                        client,
                        &Packet::error(ErrorCode::Undefined, "Timeout during write operation"),
                    )
                    .await?;
                    bail!("write of '{}' from {} exceeded retry budget", filename, client);
                }
            }
        }
    }
}

/// Handle a TFTP read request (RRQ) to completion or failure.
///
/// Sends stored blocks in sequence, each gated on the client's
/// acknowledgment. There is no retry on a missed acknowledgment; the
/// session reports a timeout error and terminates.
pub async fn handle_read_request(
    client: SocketAddr,
    filename: String,
    store: Arc<FileStore>,
    config: &TransferConfig,
) -> Result<()> {
    let sock = create_session_socket(client, config.local_bind).await?;

    let mut block: u16 = 1;
    let mut chunk = match store.read_chunk(&filename, block) {
        Ok(chunk) => chunk,
        Err(missing) => {
            tracing::debug!("Rejecting read of '{}' by {}: {}", filename, client, missing);
            send_packet(&sock, client, &Packet::error(ErrorCode::FileNotFound, missing.to_string())).await?;
            return Ok(());
        }
    };

    let mut sent: u64 = 0;
    while let Some(payload) = chunk {
        sent += payload.len() as u64;
        send_packet(&sock, client, &Packet::Data { block, payload }).await?;

        let buf = match timeout(config.read_timeout, recv_from_client(&sock, client)).await {
            Ok(Ok(buf)) => buf,
            _ => {
                send_packet(
                    &sock,
                    client,
                    &Packet::error(ErrorCode::Undefined, "Error reading during read operation"),
                )
                .await?;
                bail!("read of '{}' by {} timed out waiting for ack of block {}", filename, client, block);
            }
        };

        match protocol::decode(&buf) {
            Packet::Ack { block: acked } if acked == block => {
                block = block.wrapping_add(1);
                // Completed files are immutable, so a lookup past the
                // first block can only miss at end-of-file.
                chunk = store.read_chunk(&filename, block).ok().flatten();
            }
            Packet::Error { code, message } => {
                send_packet(
                    &sock,
                    client,
                    &Packet::Error {
                        code,
                        message: message.clone(),
                    },
                )
                .await?;
                bail!("client {} aborted read of '{}': error {} - {}", client, filename, code, message);
            }
            other => {
                // No recovery path is defined for an unexpected packet
                // from the client mid-read; give up and let it start over.
                tracing::debug!("Unexpected {} from {} during read of '{}'; giving up", other.opcode(), client, filename);
                return Ok(());
            }
        }
    }

    tracing::info!("Finished sending '{}' to {}: {} bytes", filename, client, sent);
    Ok(())
}

/// Bind an ephemeral UDP socket for one session, matched to the client's
/// address family unless an explicit local address is configured.
async fn create_session_socket(client: SocketAddr, local_bind: Option<IpAddr>) -> Result<UdpSocket> {
    let bind_addr = if let Some(ip) = local_bind {
        match ip {
            IpAddr::V4(v4) => format!("{}:0", v4),
            IpAddr::V6(v6) => format!("[{}]:0", v6),
        }
    } else {
        match client {
            SocketAddr::V4(_) => "0.0.0.0:0".to_string(),
            SocketAddr::V6(_) => "[::]:0".to_string(),
        }
    };

    let sock = UdpSocket::bind(&bind_addr)
        .await
        .context("failed to bind session socket")?;

    tracing::debug!("Session socket bound to {}", sock.local_addr()?);
    Ok(sock)
}

async fn send_packet(sock: &UdpSocket, client: SocketAddr, packet: &Packet) -> Result<()> {
    sock.send_to(&protocol::encode(packet), client)
        .await
        .context("failed to send packet")?;
    Ok(())
}

async fn recv_datagram(sock: &UdpSocket) -> Result<(Vec<u8>, SocketAddr)> {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    let (n, src) = sock.recv_from(&mut buf).await.context("failed to receive datagram")?;
    buf.truncate(n);
    Ok((buf, src))
}

/// Receive a datagram from the session's client, skipping datagrams from
/// any other source. A third party that learns the ephemeral port must
/// not be able to end someone else's transfer.
async fn recv_from_client(sock: &UdpSocket, client: SocketAddr) -> Result<Vec<u8>> {
    loop {
        let (buf, src) = recv_datagram(sock).await?;
        if src == client {
            return Ok(buf);
        }
        tracing::debug!("Ignoring datagram from {} (session client is {})", src, client);
    }
}
