//! TFTP server dispatcher
//!
//! Owns the well-known listening socket. Each inbound datagram is decoded
//! once; read and write requests spawn independent transfer sessions on
//! their own ephemeral sockets, and everything else is dropped without a
//! reply: a stray data, ack, or error packet here belongs to no session
//! by construction.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tokio::net::UdpSocket;

use crate::protocol::{Packet, decode};
use crate::store::{DEFAULT_CAPACITY, FileStore};
use crate::transfer::{TransferConfig, handle_read_request, handle_write_request};

/// Size of the dispatcher's receive buffer.
const RECV_BUFFER_SIZE: usize = 1024;

/// TFTP server configuration.
#[derive(Debug, Clone)]
pub struct TftpServerConfig {
    pub bind_address: String,
    /// Ceiling on the aggregate size of stored files.
    pub store_capacity: u64,
    pub transfer_config: TransferConfig,
}

impl Default for TftpServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:6969".to_string(),
            store_capacity: DEFAULT_CAPACITY,
            transfer_config: TransferConfig::default(),
        }
    }
}

/// In-memory TFTP server.
pub struct TftpServer {
    config: TftpServerConfig,
    store: Arc<FileStore>,
    socket: Option<UdpSocket>,
}

impl TftpServer {
    /// Create a server with the given configuration.
    pub fn new(config: TftpServerConfig) -> Self {
        let store = Arc::new(FileStore::new(config.store_capacity));
        Self {
            config,
            store,
            socket: None,
        }
    }

    /// Create a server with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(TftpServerConfig::default())
    }

    /// Get the server's configuration.
    pub fn config(&self) -> &TftpServerConfig {
        &self.config
    }

    /// The file store backing this server.
    pub fn store(&self) -> &Arc<FileStore> {
        &self.store
    }

    /// Local address of the listening socket, once bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Bind the listening socket without starting the receive loop.
    pub async fn bind(&mut self) -> Result<()> {
        let socket = UdpSocket::bind(&self.config.bind_address)
            .await
            .context("failed to bind TFTP server socket")?;

        let local_addr = socket.local_addr().context("failed to get local address")?;
        tracing::info!(
            "TFTP server listening on {} (capacity {} bytes)",
            local_addr,
            self.config.store_capacity
        );

        self.socket = Some(socket);
        Ok(())
    }

    /// Bind and run the receive loop until a socket error.
    pub async fn run(&mut self) -> Result<()> {
        self.bind().await?;
        self.serve().await
    }

    /// Receive loop. Requires [`bind`](Self::bind) to have succeeded.
    pub async fn serve(&self) -> Result<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| anyhow!("server must be bound before serving"))?;

        let mut buffer = [0u8; RECV_BUFFER_SIZE];

        loop {
            let (len, client) = socket.recv_from(&mut buffer).await?;
            if len < 2 {
                tracing::debug!("Dropping runt datagram from {}", client);
                continue;
            }

            match decode(&buffer[..len]) {
                Packet::ReadRequest { filename, mode } => {
                    if filename.is_empty() {
                        tracing::debug!("Dropping malformed RRQ from {}", client);
                        continue;
                    }
                    tracing::info!("RRQ for '{}' in {} mode from {}", filename, mode, client);
                    self.spawn_session(client, filename, false);
                }
                Packet::WriteRequest { filename, mode } => {
                    if filename.is_empty() {
                        tracing::debug!("Dropping malformed WRQ from {}", client);
                        continue;
                    }
                    tracing::info!("WRQ for '{}' in {} mode from {}", filename, mode, client);
                    self.spawn_session(client, filename, true);
                }
                other => {
                    // Not a session-opening packet; no live session can
                    // match it on this socket, so it is silently dropped.
                    tracing::debug!("Ignoring {} from {} on listening socket", other.opcode(), client);
                }
            }
        }
    }

    /// Launch one transfer session as an independent task. The dispatcher
    /// never joins on it; the session bounds its own lifetime through its
    /// receive timeouts.
    fn spawn_session(&self, client: SocketAddr, filename: String, write: bool) {
        let store = Arc::clone(&self.store);
        let config = self.config.transfer_config.clone();

        tokio::spawn(async move {
            let result = if write {
                handle_write_request(client, filename.clone(), store, &config).await
            } else {
                handle_read_request(client, filename.clone(), store, &config).await
            };
            if let Err(e) = result {
                tracing::warn!("Transfer of '{}' with {} failed: {}", filename, client, e);
            }
        });
    }
}

/// Run a TFTP server with the given bind address.
///
/// Convenience wrapper that creates and runs a server with default
/// transfer settings.
pub async fn run_tftp_server(bind_address: String, local_bind: Option<std::net::IpAddr>) -> Result<()> {
    let mut config = TftpServerConfig {
        bind_address,
        ..Default::default()
    };
    config.transfer_config.local_bind = local_bind;

    let mut server = TftpServer::new(config);
    server.run().await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::sleep;

    use super::*;

    #[test]
    fn config_defaults() {
        let config = TftpServerConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0:6969");
        assert_eq!(config.store_capacity, DEFAULT_CAPACITY);
    }

    #[tokio::test]
    async fn serve_requires_bind() {
        let server = TftpServer::with_defaults();
        assert!(server.local_addr().is_none());
        assert!(server.serve().await.is_err());
    }

    #[tokio::test]
    async fn bind_exposes_local_addr() {
        let mut server = TftpServer::new(TftpServerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            ..Default::default()
        });

        server.bind().await.unwrap();
        let addr = server.local_addr().expect("bound server has an address");
        assert_eq!(addr.ip(), "127.0.0.1".parse::<std::net::IpAddr>().unwrap());
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn server_survives_garbage_datagrams() {
        let mut server = TftpServer::new(TftpServerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            ..Default::default()
        });
        server.bind().await.unwrap();
        let addr = server.local_addr().unwrap();

        let task = tokio::spawn(async move { server.serve().await });

        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for payload in [&b"\x00"[..], b"\x00\x63junk", b"\x00\x03\x00", b"\x00\x04\x00\x05"] {
            sock.send_to(payload, addr).await.unwrap();
        }

        // Still alive and accepting after the garbage.
        sleep(Duration::from_millis(100)).await;
        assert!(!task.is_finished());
        task.abort();
    }
}
