//! Async UDP socket capability.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` providing
//! exactly the three capabilities the transport engine needs: a local
//! address, "send these bytes to that address", and "receive bytes with a
//! bounded wait".  A receive timeout is an expected outcome (it drives the
//! retransmission sweep), so it surfaces as `Ok(None)` rather than an
//! error.  Decoding happens in the connection loop, where a corrupt
//! datagram is an explicit discard-and-continue branch.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::packet::{Packet, MAX_PACKET_SIZE};

/// An async, datagram-oriented UDP socket.
///
/// All methods take `&self`; each send is one atomic datagram write.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (resolved after the OS assigns an
    /// ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port 0 lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> std::io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Encode `packet` and send it as a single datagram to `dest`.
    ///
    /// All outbound bytes pass through [`Packet::encode`]; no caller
    /// writes wire bytes directly.
    pub async fn send_packet(&self, packet: &Packet, dest: SocketAddr) -> std::io::Result<()> {
        let bytes = packet.encode();
        self.inner.send_to(&bytes, dest).await?;
        Ok(())
    }

    /// Receive the next datagram, waiting at most `wait`.
    ///
    /// Returns `Ok(None)` when the wait elapses with nothing to read.
    pub async fn recv_raw(
        &self,
        wait: Duration,
    ) -> std::io::Result<Option<(Vec<u8>, SocketAddr)>> {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        match tokio::time::timeout(wait, self.inner.recv_from(&mut buf)).await {
            Ok(Ok((n, addr))) => {
                buf.truncate(n);
                Ok(Some((buf, addr)))
            }
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => Ok(None),
        }
    }
}
