//! Fault-injecting network simulator.
//!
//! Real networks drop, reorder and duplicate datagrams.  To exercise the
//! reliability machinery without depending on actual network conditions,
//! [`Relay`] is a UDP man-in-the-middle: both endpoints talk to the relay
//! address, and the relay forwards datagrams between them while applying a
//! configurable fault model:
//!
//! | Fault       | Description                                         |
//! |-------------|-----------------------------------------------------|
//! | Loss        | Drop a datagram with probability `loss_rate`.       |
//! | Duplication | Deliver a datagram twice with `duplicate_rate`.     |
//!
//! Faults are driven by a **seeded** RNG so a failing test run is exactly
//! reproducible from its seed.
//!
//! The relay learns the downstream endpoint from the first datagram that
//! does not come from the upstream address; everything from upstream is
//! forwarded down and vice versa.  One relay serves one endpoint pair.

use std::net::SocketAddr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;

use crate::packet::MAX_PACKET_SIZE;

/// Fault model configuration.  All probabilities are in `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct FaultConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a forwarded datagram is sent twice.
    pub duplicate_rate: f64,
    /// RNG seed; the same seed replays the same fault sequence.
    pub seed: u64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        // Transparent pass-through unless faults are asked for.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            seed: 0,
        }
    }
}

/// A lossy UDP forwarder between one downstream and one upstream endpoint.
pub struct Relay {
    socket: UdpSocket,
    /// Address the endpoints should send to.
    pub local_addr: SocketAddr,
    upstream: SocketAddr,
    config: FaultConfig,
}

impl Relay {
    /// Bind a relay on `listen` that forwards to `upstream`.
    pub async fn bind(
        listen: SocketAddr,
        upstream: SocketAddr,
        config: FaultConfig,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(listen).await?;
        let local_addr = socket.local_addr()?;
        Ok(Self {
            socket,
            local_addr,
            upstream,
            config,
        })
    }

    /// Forward datagrams until cancelled.
    ///
    /// Meant to run as a background task; tests abort it when done.
    pub async fn run(self) -> std::io::Result<()> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut downstream: Option<SocketAddr> = None;
        let mut buf = vec![0u8; MAX_PACKET_SIZE];

        log::info!(
            "[relay] {} ↔ {} (loss {:.0}%, dup {:.0}%)",
            self.local_addr,
            self.upstream,
            self.config.loss_rate * 100.0,
            self.config.duplicate_rate * 100.0
        );

        loop {
            let (n, from) = self.socket.recv_from(&mut buf).await?;

            let dest = if from == self.upstream {
                match downstream {
                    Some(d) => d,
                    // Nothing has introduced itself yet; nowhere to send.
                    None => continue,
                }
            } else {
                downstream = Some(from);
                self.upstream
            };

            if rng.gen::<f64>() < self.config.loss_rate {
                log::debug!("[relay] ✗ dropped {n} byte(s) {from} → {dest}");
                continue;
            }

            self.socket.send_to(&buf[..n], dest).await?;
            if rng.gen::<f64>() < self.config.duplicate_rate {
                log::debug!("[relay] ⧉ duplicated {n} byte(s) {from} → {dest}");
                self.socket.send_to(&buf[..n], dest).await?;
            }
        }
    }
}
