//! Entry point for `reldat`.
//!
//! Parses CLI arguments and dispatches into listener, connector or relay
//! mode.  All protocol work is delegated to library modules; this file owns
//! only process setup (logging, argument parsing, exit codes).
//!
//! Only configuration errors are fatal: an invalid port or an
//! unresolvable address surfaces to the operator and exits non-zero.
//! Everything the network does — loss, corruption, reordering — is
//! absorbed by the transport engine.

use std::net::{SocketAddr, ToSocketAddrs};

use anyhow::Context;
use clap::{Parser, Subcommand};

use reldat::connection::Connection;
use reldat::simulator::{FaultConfig, Relay};
use reldat::socket::Socket;

/// RELDAT: a reliable byte stream over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Wait for a peer, then serve: each received message is sent back
    /// uppercased.
    Listen {
        /// UDP port to listen on.
        #[arg(short, long)]
        port: u16,
        /// Receive window size, in packets.
        #[arg(short, long, default_value_t = 4)]
        window: u32,
    },
    /// Connect to a listener, send a message, print the transformed reply.
    Connect {
        /// Listener host name or IP address.
        #[arg(long)]
        host: String,
        /// Listener UDP port.
        #[arg(short, long)]
        port: u16,
        /// Send window size, in packets.
        #[arg(short, long, default_value_t = 4)]
        window: u32,
        /// Message to send; read from stdin when omitted.
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Run a fault-injecting UDP relay between two endpoints.
    Relay {
        /// UDP port to listen on.
        #[arg(short, long)]
        port: u16,
        /// Upstream address to forward to (host:port).
        #[arg(short, long)]
        upstream: String,
        /// Datagram loss probability in [0.0, 1.0].
        #[arg(long, default_value_t = 0.1)]
        loss: f64,
        /// Datagram duplication probability in [0.0, 1.0].
        #[arg(long, default_value_t = 0.0)]
        duplicate: f64,
        /// RNG seed for reproducible fault sequences.
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Set RUST_LOG to control verbosity.
    env_logger::init();

    match Cli::parse().mode {
        Mode::Listen { port, window } => listen(port, window).await,
        Mode::Connect {
            host,
            port,
            window,
            message,
        } => connect(&host, port, window, message).await,
        Mode::Relay {
            port,
            upstream,
            loss,
            duplicate,
            seed,
        } => relay(port, &upstream, loss, duplicate, seed).await,
    }
}

/// Passive side: accept one connection and uppercase every message until
/// the peer disconnects.
async fn listen(port: u16, window: u32) -> anyhow::Result<()> {
    let bind: SocketAddr = ([0, 0, 0, 0], port).into();
    let socket = Socket::bind(bind)
        .await
        .with_context(|| format!("failed to bind UDP port {port}"))?;

    let mut conn = Connection::accept(socket, window)
        .await
        .context("accept failed")?;

    loop {
        match conn.recv().await.context("receive failed")? {
            Some(data) => {
                log::info!("received {} byte(s); replying uppercased", data.len());
                let reply = data.to_ascii_uppercase();
                conn.send(&reply).await.context("reply failed")?;
            }
            // Peer closed; the four-way teardown already completed.
            None => break,
        }
    }
    Ok(())
}

/// Active side: send one message and print the transformed reply.
async fn connect(
    host: &str,
    port: u16,
    window: u32,
    message: Option<String>,
) -> anyhow::Result<()> {
    let peer = resolve(host, port)?;

    let message = match message {
        Some(m) => m.into_bytes(),
        None => {
            use std::io::Read;
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("failed to read message from stdin")?;
            buf
        }
    };

    let socket = Socket::bind(([0, 0, 0, 0], 0).into())
        .await
        .context("failed to bind an ephemeral UDP port")?;
    let mut conn = Connection::connect(socket, peer, window)
        .await
        .with_context(|| format!("could not connect to {peer}"))?;

    conn.send(&message).await.context("send failed")?;
    let reply = conn
        .recv()
        .await
        .context("receive failed")?
        .context("peer closed before replying")?;
    println!("{}", String::from_utf8_lossy(&reply));

    conn.close().await.context("close failed")?;
    Ok(())
}

/// Fault-injection mode: forward datagrams with seeded loss/duplication.
async fn relay(port: u16, upstream: &str, loss: f64, duplicate: f64, seed: u64) -> anyhow::Result<()> {
    anyhow::ensure!(
        (0.0..=1.0).contains(&loss) && (0.0..=1.0).contains(&duplicate),
        "fault probabilities must be within [0.0, 1.0]"
    );
    let upstream = upstream
        .to_socket_addrs()
        .with_context(|| format!("unresolvable upstream address {upstream}"))?
        .next()
        .with_context(|| format!("upstream address {upstream} resolved to nothing"))?;

    let relay = Relay::bind(
        ([0, 0, 0, 0], port).into(),
        upstream,
        FaultConfig {
            loss_rate: loss,
            duplicate_rate: duplicate,
            seed,
        },
    )
    .await
    .with_context(|| format!("failed to bind UDP port {port}"))?;

    relay.run().await.context("relay failed")?;
    Ok(())
}

/// Resolve `host:port`, failing fast on configuration errors.
fn resolve(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("unresolvable address {host}:{port}"))?
        .next()
        .with_context(|| format!("address {host}:{port} resolved to nothing"))
}
