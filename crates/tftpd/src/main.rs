//! tftpd - In-memory TFTP server daemon
//!
//! Binds the well-known UDP port and serves RFC 1350 read and write
//! requests against a process-lifetime in-memory file store.

use std::net::IpAddr;

use anyhow::Result;
use argh::FromArgs;
use tftp::run_tftp_server;

const DEFAULT_BIND: &str = "0.0.0.0:6969"; // use 6969 for non-root testing; redirect or run as root for :69

#[derive(FromArgs, Debug)]
#[argh(
    description = "In-memory TFTP server",
    example = "Serve on the default port:\n  {command_name}",
    example = "Custom bind address on a multihomed host:\n  {command_name} --bind 10.0.1.50:69 --ip 10.0.1.50"
)]
struct CliConfig {
    #[argh(
        option,
        short = 'b',
        description = "server bind address",
        default = "DEFAULT_BIND.to_string()"
    )]
    bind: String,

    #[argh(option, short = 'i', description = "local IP address for per-transfer sockets")]
    ip: Option<IpAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli: CliConfig = argh::from_env();
    run_tftp_server(cli.bind, cli.ip).await
}
