//! In-memory TFTP server
//!
//! A minimal RFC 1350 TFTP server that keeps transferred files in memory
//! for the lifetime of the process. Supports:
//! - Read requests (RRQ) against previously uploaded files
//! - Write requests (WRQ) with stop-and-wait acknowledgment flow control
//! - Concurrent transfers, one task and one ephemeral socket per session
//! - A capacity-bounded shared file store (1 MiB by default)
//!
//! Out of scope: durable storage, authentication, and option negotiation
//! (RFC 2347/2348/2349); transfers use the fixed 512-byte block size.
//!
//! # Basic usage
//!
//! ```rust,no_run
//! use tftp::{TftpServer, TftpServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut server = TftpServer::new(TftpServerConfig {
//!         bind_address: "127.0.0.1:6969".to_string(),
//!         ..Default::default()
//!     });
//!     server.run().await
//! }
//! ```

mod protocol;
mod server;
mod store;
mod transfer;

pub use protocol::*;
pub use server::*;
pub use store::*;
pub use transfer::*;
