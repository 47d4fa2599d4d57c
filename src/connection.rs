//! Per-connection state machine and control loop.
//!
//! A [`Connection`] owns the complete state for one logical peer-to-peer
//! session: the handshake, the steady-state data-transfer loop and the
//! four-way teardown.  It composes the leaf components — the
//! [packetizer](crate::packetizer), the [reorder buffer](crate::reorder)
//! and the [retransmission timer set](crate::retransmit) — and drives them
//! from a single step-driven loop:
//!
//! ```text
//!  loop:
//!    1. bounded-wait receive (default 1 s)      ← suspension point
//!    2. decode; corrupt datagrams are dropped
//!    3. dispatch on (state, flags); emit ACKs / replies
//!    4. retransmission sweep                    ← runs every iteration
//! ```
//!
//! One loop per endpoint, no background tasks: no two packets are ever
//! processed concurrently, so the reorder buffer and timer set need no
//! locking.
//!
//! # Handshake
//!
//! ```text
//!  1. active  → passive   OPEN        seq 0   payload: window size
//!  2. passive → active    OPEN|ACK    seq 1   payload: window size
//!  3. active  → passive   ACK         seq 2   ack 1
//! ```
//!
//! Data sequence numbers start at 3, one number per packet.
//!
//! # Teardown (four-way)
//!
//! ```text
//!  initiator → peer   CLOSE
//!  peer → initiator   CLOSE|ACK, then its own CLOSE
//!  initiator → peer   CLOSE|ACK
//! ```
//!
//! Either side resets to `Closed` after sending/receiving its final
//! CLOSE-ACK; a side whose final CLOSE-ACK is lost force-closes after a
//! bounded number of CLOSE retransmissions.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::packet::{Flags, Packet};
use crate::packetizer::Packetizer;
use crate::reorder::ReorderBuffer;
use crate::retransmit::{RetransmitSet, TimerConfig};
use crate::socket::Socket;

// Fixed handshake sequence numbers; data numbering starts after them.
const SYN_SEQ: u32 = 0;
const SYNACK_SEQ: u32 = 1;
const HANDSHAKE_ACK_SEQ: u32 = 2;
const FIRST_DATA_SEQ: u32 = 3;

// ---------------------------------------------------------------------------
// State and errors
// ---------------------------------------------------------------------------

/// Connection FSM states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    /// No connection; initial and final state.
    #[default]
    Closed,
    /// OPEN sent; waiting for OPEN|ACK (active opener).
    SynSent,
    /// OPEN received, OPEN|ACK sent; waiting for ACK (passive opener).
    SynReceived,
    /// Handshake complete; data transfer allowed.
    Established,
    /// CLOSE exchanged in at least one direction; teardown in progress.
    Closing,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Errors surfaced to callers of the connection API.
///
/// Expected, frequent conditions (receive timeout, corrupt datagram,
/// packets inconsistent with the current state) never appear here; they
/// are absorbed by the control loop.
#[derive(Debug, Error)]
pub enum ConnError {
    /// Underlying socket I/O failure.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The peer never completed the open handshake.
    #[error("handshake failed after {0} attempts")]
    HandshakeFailed(u32),
    /// A configured retransmission bound was hit.
    #[error("gave up retransmitting an unacknowledged packet")]
    TooManyRetransmits,
    /// The operation is not valid in the connection's current state.
    #[error("operation invalid in state {0}")]
    BadState(State),
}

/// Tunable parameters for one connection.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bounded wait of each control-loop receive.
    pub poll_timeout: Duration,
    /// Retransmission timing (see [`TimerConfig`]).
    pub timers: TimerConfig,
    /// Poll iterations (handshake) / CLOSE transmissions (teardown) before
    /// giving up on control packets.
    pub max_control_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            timers: TimerConfig::default(),
            max_control_retries: 6,
        }
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// One reliable RELDAT connection to a single peer.
pub struct Connection {
    socket: Socket,
    peer: SocketAddr,
    /// Current FSM state.
    pub state: State,

    /// Our advertised receive window, in packets (reorder capacity).
    local_window: u32,
    /// The peer's advertised window; bounds our in-flight packet count.
    remote_window: u32,

    /// Sequence number for the next ACK-requiring packet we originate.
    next_seq: u32,
    /// Unacknowledged outbound packets.
    outstanding: RetransmitSet,
    /// Out-of-order inbound packets for the current window.
    reorder: ReorderBuffer,
    /// First sequence number of the receive window currently being filled.
    rcv_base: u32,

    /// In-order bytes delivered by window flushes, awaiting `recv`.
    inbox: Vec<u8>,
    /// Set when an END_OF_DATA completed the current inbound message.
    message_done: bool,
    /// Latched on the first END_OF_DATA received from the peer.
    pub end_of_data_received: bool,
    /// Sequence number of the last END_OF_DATA we acknowledged, so a
    /// retransmitted EOD re-elicits the same ACK.
    last_eod_acked: Option<u32>,

    /// Sequence number of our in-flight END_OF_DATA, if any.
    eod_seq: Option<u32>,
    eod_acked: bool,

    /// Teardown bookkeeping for the four-way close.
    close_seq: Option<u32>,
    our_close_acked: bool,
    their_close_seen: bool,
    /// When this side entered `Closing`; bounds the whole teardown.
    closing_since: Option<Instant>,

    /// OPEN|ACK kept for re-sending while in `SynReceived`.
    pending_synack: Option<Packet>,

    config: Config,
}

impl Connection {
    // -----------------------------------------------------------------------
    // Open
    // -----------------------------------------------------------------------

    /// Active open: connect to `peer`, advertising a receive window of
    /// `window` packets.
    pub async fn connect(socket: Socket, peer: SocketAddr, window: u32) -> Result<Self, ConnError> {
        Self::connect_with(socket, peer, window, Config::default()).await
    }

    /// Active open with explicit configuration.
    pub async fn connect_with(
        socket: Socket,
        peer: SocketAddr,
        window: u32,
        config: Config,
    ) -> Result<Self, ConnError> {
        let syn = Packet::new(
            Flags::OPEN,
            SYN_SEQ,
            0,
            window.to_string().into_bytes(),
        );

        log::info!("[conn] connecting to {peer} (window {window})");

        for attempt in 0..config.max_control_retries {
            let pkt = if attempt == 0 { syn.clone() } else { syn.retransmission() };
            socket.send_packet(&pkt, peer).await?;
            log::debug!("[conn] → OPEN seq={SYN_SEQ} (attempt {})", attempt + 1);

            let Some((bytes, addr)) = socket.recv_raw(config.poll_timeout).await? else {
                continue;
            };
            if addr != peer {
                continue;
            }
            let synack = match Packet::decode(&bytes) {
                Ok(p) => p,
                Err(e) => {
                    log::debug!("[conn] dropping corrupt datagram during handshake: {e}");
                    continue;
                }
            };
            if !synack.header.flags.contains(Flags::OPEN | Flags::ACK) {
                log::debug!("[conn] unexpected flags {} in SynSent", synack.header.flags);
                continue;
            }
            let Some(remote_window) = parse_window(&synack.payload) else {
                log::debug!("[conn] OPEN|ACK with unparsable window payload");
                continue;
            };

            log::debug!("[conn] ← OPEN|ACK seq={} window={remote_window}", synack.header.seq);

            let ack = Packet::new(Flags::ACK, HANDSHAKE_ACK_SEQ, synack.header.seq, Vec::new());
            socket.send_packet(&ack, peer).await?;
            log::debug!("[conn] → ACK ack={}", synack.header.seq);
            log::info!("[conn] established with {peer} (remote window {remote_window})");

            return Ok(Self::established(socket, peer, window, remote_window, config));
        }

        Err(ConnError::HandshakeFailed(config.max_control_retries))
    }

    /// Passive open: wait for a peer's OPEN on `socket`, advertising a
    /// receive window of `window` packets.
    ///
    /// Blocks until a peer initiates; the wait for the peer's final ACK is
    /// bounded and a lost ACK is healed by the first in-window DATA packet.
    pub async fn accept(socket: Socket, window: u32) -> Result<Self, ConnError> {
        Self::accept_with(socket, window, Config::default()).await
    }

    /// Passive open with explicit configuration.
    pub async fn accept_with(
        socket: Socket,
        window: u32,
        config: Config,
    ) -> Result<Self, ConnError> {
        log::info!(
            "[conn] listening on {} (window {window})",
            socket.local_addr
        );

        let (peer, remote_window) = loop {
            let Some((bytes, addr)) = socket.recv_raw(config.poll_timeout).await? else {
                continue;
            };
            let pkt = match Packet::decode(&bytes) {
                Ok(p) => p,
                Err(e) => {
                    log::debug!("[conn] dropping corrupt datagram while listening: {e}");
                    continue;
                }
            };
            let f = pkt.header.flags;
            if f.contains(Flags::OPEN) && !f.contains(Flags::ACK) {
                match parse_window(&pkt.payload) {
                    Some(w) => break (addr, w),
                    None => log::debug!("[conn] OPEN with unparsable window payload"),
                }
            } else {
                log::debug!("[conn] ignoring {} while closed", f);
            }
        };

        log::debug!("[conn] ← OPEN from {peer} window={remote_window}");

        let mut conn = Self::established(socket, peer, window, remote_window, config);
        conn.state = State::SynReceived;

        let synack = Packet::new(
            Flags::OPEN | Flags::ACK,
            SYNACK_SEQ,
            SYN_SEQ,
            window.to_string().into_bytes(),
        );
        conn.socket.send_packet(&synack, peer).await?;
        log::debug!("[conn] → OPEN|ACK seq={SYNACK_SEQ} window={window}");
        conn.pending_synack = Some(synack);

        for _ in 0..conn.config.max_control_retries {
            conn.poll_step().await?;
            if conn.state == State::Established {
                conn.pending_synack = None;
                log::info!("[conn] established with {peer} (remote window {remote_window})");
                return Ok(conn);
            }
        }
        Err(ConnError::HandshakeFailed(conn.config.max_control_retries))
    }

    /// Common construction once both windows are known.
    fn established(
        socket: Socket,
        peer: SocketAddr,
        local_window: u32,
        remote_window: u32,
        config: Config,
    ) -> Self {
        Self {
            socket,
            peer,
            state: State::Established,
            local_window,
            remote_window,
            next_seq: FIRST_DATA_SEQ,
            outstanding: RetransmitSet::new(config.timers.clone()),
            reorder: ReorderBuffer::new(local_window as usize),
            rcv_base: FIRST_DATA_SEQ,
            inbox: Vec::new(),
            message_done: false,
            end_of_data_received: false,
            last_eod_acked: None,
            eod_seq: None,
            eod_acked: false,
            close_seq: None,
            our_close_acked: false,
            their_close_seen: false,
            closing_since: None,
            pending_synack: None,
            config,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// The peer's advertised window (our in-flight bound), in packets.
    pub fn remote_window(&self) -> u32 {
        self.remote_window
    }

    /// Our advertised receive window, in packets.
    pub fn local_window(&self) -> u32 {
        self.local_window
    }

    /// Remote peer address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Local socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    // -----------------------------------------------------------------------
    // Data transfer
    // -----------------------------------------------------------------------

    /// Send one logical message reliably.
    ///
    /// Packetizes `data`, keeps at most `remote_window` packets in flight,
    /// and returns once every DATA packet *and* the trailing END_OF_DATA
    /// marker have been acknowledged.  The marker is only sent after the
    /// outstanding set drains, so a forced flush at the receiver can never
    /// observe a gap left by a lost packet.
    ///
    /// An empty `data` sends just the END_OF_DATA marker.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), ConnError> {
        if self.state != State::Established {
            return Err(ConnError::BadState(self.state));
        }

        let mut next = self.next_seq;
        let mut packetizer = Packetizer::new(data, || {
            let seq = next;
            next = next.wrapping_add(1);
            seq
        });
        log::debug!(
            "[conn] sending {} byte(s) in {} packet(s)",
            data.len(),
            packetizer.packet_count()
        );

        let mut done_slicing = false;
        loop {
            // Fill the window.
            while !done_slicing && self.outstanding.len() < self.remote_window as usize {
                match packetizer.next() {
                    Some(pkt) => {
                        self.socket.send_packet(&pkt, self.peer).await?;
                        log::debug!(
                            "[conn] → DATA seq={} len={} in_flight={}",
                            pkt.header.seq,
                            pkt.payload.len(),
                            self.outstanding.len() + 1
                        );
                        self.next_seq = pkt.header.seq.wrapping_add(1);
                        self.outstanding.record(pkt);
                    }
                    None => done_slicing = true,
                }
            }
            if done_slicing && self.outstanding.is_empty() {
                break;
            }
            self.poll_step().await?;
            // A CLOSE can cross with the tail of the exchange; keep
            // delivering through `Closing`, the peer still ACKs.
            if !matches!(self.state, State::Established | State::Closing) {
                return Err(ConnError::BadState(self.state));
            }
        }
        drop(packetizer);
        self.next_seq = next;

        // All data acknowledged; mark the end of this message.
        let eod_seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        let eod = Packet::new(Flags::END_OF_DATA, eod_seq, 0, Vec::new());
        self.socket.send_packet(&eod, self.peer).await?;
        log::debug!("[conn] → END_OF_DATA seq={eod_seq}");
        self.outstanding.record(eod);
        self.eod_seq = Some(eod_seq);
        self.eod_acked = false;

        while !self.eod_acked {
            self.poll_step().await?;
            if !matches!(self.state, State::Established | State::Closing) {
                return Err(ConnError::BadState(self.state));
            }
        }
        self.eod_seq = None;
        Ok(())
    }

    /// Receive one complete logical message.
    ///
    /// Runs the control loop until an END_OF_DATA marker completes the
    /// inbound message, returning the reassembled bytes.  Returns
    /// `Ok(None)` when the peer closes the connection instead (the four-way
    /// teardown has already completed by then).
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>, ConnError> {
        loop {
            if self.message_done {
                self.message_done = false;
                return Ok(Some(std::mem::take(&mut self.inbox)));
            }
            match self.state {
                State::Established | State::Closing => {}
                State::Closed => return Ok(None),
                other => return Err(ConnError::BadState(other)),
            }
            self.poll_step().await?;
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Initiate (or finish driving) the four-way close.
    ///
    /// Idempotent: closing an already-closed connection is a no-op.
    pub async fn close(&mut self) -> Result<(), ConnError> {
        match self.state {
            State::Closed => return Ok(()),
            State::Closing => {} // peer-initiated teardown already underway
            State::Established => {
                let seq = self.next_seq;
                self.next_seq = self.next_seq.wrapping_add(1);
                let close = Packet::new(Flags::CLOSE, seq, 0, Vec::new());
                self.socket.send_packet(&close, self.peer).await?;
                log::debug!("[conn] → CLOSE seq={seq}");
                self.outstanding.record(close);
                self.close_seq = Some(seq);
                self.state = State::Closing;
                self.closing_since = Some(Instant::now());
            }
            other => return Err(ConnError::BadState(other)),
        }

        while self.state != State::Closed {
            self.poll_step().await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Control loop
    // -----------------------------------------------------------------------

    /// One control-loop iteration: bounded receive, dispatch, timer sweep.
    ///
    /// Exactly one inbound datagram is processed per iteration (or none on
    /// timeout); the retransmission sweep runs unconditionally afterwards.
    async fn poll_step(&mut self) -> Result<(), ConnError> {
        match self.socket.recv_raw(self.config.poll_timeout).await? {
            Some((bytes, addr)) if addr == self.peer => match Packet::decode(&bytes) {
                Ok(pkt) => self.handle_packet(pkt).await?,
                // Corrupt datagram: discard without an ACK; the sender's
                // retransmission timer restores delivery.
                Err(e) => log::debug!("[conn] dropping corrupt datagram: {e}"),
            },
            Some((_, addr)) => log::debug!("[conn] ignoring datagram from unknown peer {addr}"),
            None => {} // receive timeout: expected, fall through to the sweep
        }
        self.sweep_timers().await
    }

    /// Retransmit every outstanding packet older than the timeout.
    async fn sweep_timers(&mut self) -> Result<(), ConnError> {
        let due = self.outstanding.due_for_retransmit(Instant::now());
        for pkt in &due {
            log::debug!("[conn] ↻ retransmit seq={}", pkt.header.seq);
            self.socket.send_packet(pkt, self.peer).await?;
        }
        if self.outstanding.exhausted() {
            return Err(ConnError::TooManyRetransmits);
        }

        // A peer that vanished mid-teardown must not wedge us, whether its
        // CLOSE-ACK or its own CLOSE is the thing that never arrives.
        if self.state == State::Closing {
            let bound =
                self.config.timers.retransmit_timeout * (self.config.max_control_retries + 1);
            if self.closing_since.is_some_and(|since| since.elapsed() >= bound) {
                log::warn!("[conn] teardown incomplete after {bound:?}; force-closing");
                if let Some(seq) = self.close_seq {
                    self.outstanding.acknowledge(seq);
                }
                self.state = State::Closed;
            }
        }
        Ok(())
    }

    /// Dispatch one well-formed inbound packet on (state, flags).
    async fn handle_packet(&mut self, pkt: Packet) -> Result<(), ConnError> {
        let f = pkt.header.flags;

        if self.state == State::SynReceived {
            if f == Flags::ACK && pkt.header.ack == SYNACK_SEQ {
                log::debug!("[conn] ← ACK ack={SYNACK_SEQ}; handshake complete");
                self.state = State::Established;
                return Ok(());
            }
            if f.contains(Flags::OPEN) && !f.contains(Flags::ACK) {
                // Our OPEN|ACK was lost; answer the retransmitted OPEN.
                if let Some(synack) = self.pending_synack.clone() {
                    self.socket.send_packet(&synack.retransmission(), self.peer).await?;
                    log::debug!("[conn] ↻ OPEN|ACK (duplicate OPEN)");
                }
                return Ok(());
            }
            if f.intersects(Flags::DATA | Flags::END_OF_DATA) {
                // The final handshake ACK was lost but the peer moved on;
                // the in-window packet implies it.
                log::debug!("[conn] handshake completed implicitly by {}", f);
                self.state = State::Established;
                // fall through to the established dispatch below
            } else {
                log::debug!("[conn] dropping {} in state {}", f, self.state);
                return Ok(());
            }
        }

        if !matches!(self.state, State::Established | State::Closing) {
            log::debug!("[conn] dropping {} in state {}", f, self.state);
            return Ok(());
        }

        // Stale handshake retransmissions are tolerated, not fatal.
        if f.contains(Flags::OPEN) {
            log::debug!("[conn] dropping {} in state {}", f, self.state);
            return Ok(());
        }

        if f.contains(Flags::CLOSE) {
            return self.on_close(pkt).await;
        }
        if f.contains(Flags::END_OF_DATA) {
            return self.on_end_of_data(pkt).await;
        }
        if f.contains(Flags::DATA) {
            return self.on_data(pkt).await;
        }
        if f.contains(Flags::ACK) {
            self.on_ack(&pkt);
            return Ok(());
        }

        log::debug!("[conn] dropping {} in state {}", f, self.state);
        Ok(())
    }

    /// Inbound DATA: buffer it and acknowledge its sequence number.
    async fn on_data(&mut self, pkt: Packet) -> Result<(), ConnError> {
        let seq = pkt.header.seq;
        let delta = seq.wrapping_sub(self.rcv_base);
        let behind_window = delta > u32::MAX / 2;

        // Ahead of the window: not yet acceptable and must NOT be ACKed —
        // an ACK would release the sender's timer for bytes we never
        // stored.  The sender offers it again once the window slides.
        if !behind_window && delta >= self.reorder.capacity() as u32 {
            log::debug!(
                "[conn] ← DATA seq={seq} ahead of window base {}; dropped",
                self.rcv_base
            );
            return Ok(());
        }

        let inserted = if behind_window {
            // Already delivered in an earlier window; only the ACK matters.
            false
        } else {
            if self.reorder.base().is_none() {
                self.reorder.set_base(self.rcv_base);
            }
            self.reorder.insert(pkt)
        };

        // ACK idempotently: duplicates and already-flushed packets get the
        // same answer, which is what lets the sender drop its timer.
        let ack = Packet::new(Flags::ACK, self.next_seq, seq, Vec::new());
        self.socket.send_packet(&ack, self.peer).await?;
        log::debug!("[conn] ← DATA seq={seq} inserted={inserted}; → ACK ack={seq}");

        if self.reorder.is_full() {
            let bytes = self.reorder.flush();
            log::debug!("[conn] window full; delivering {} byte(s)", bytes.len());
            self.inbox.extend_from_slice(&bytes);
            self.rcv_base = self.rcv_base.wrapping_add(self.reorder.capacity() as u32);
            self.reorder.set_base(self.rcv_base);
        }
        Ok(())
    }

    /// Inbound END_OF_DATA (the marker itself or the peer's ACK of ours).
    async fn on_end_of_data(&mut self, pkt: Packet) -> Result<(), ConnError> {
        if pkt.header.flags.contains(Flags::ACK) {
            // Peer acknowledged our END_OF_DATA.
            self.outstanding.acknowledge(pkt.header.ack);
            if self.eod_seq == Some(pkt.header.ack) {
                log::debug!("[conn] ← END_OF_DATA|ACK ack={}", pkt.header.ack);
                self.eod_acked = true;
            }
            return Ok(());
        }

        let seq = pkt.header.seq;

        // A retransmitted marker for a message we already delivered: our
        // earlier ACK was lost, repeat it and change nothing else.
        // Sequence numbers are monotonic, so a match can only be that.
        if self.last_eod_acked == Some(seq) {
            let ack = Packet::new(Flags::END_OF_DATA | Flags::ACK, self.next_seq, seq, Vec::new());
            self.socket.send_packet(&ack, self.peer).await?;
            log::debug!("[conn] ↻ END_OF_DATA|ACK ack={seq} (duplicate marker)");
            return Ok(());
        }

        // Forced flush of the partial final window.  The sender only emits
        // the marker once all its DATA was acknowledged, so the slots up to
        // here are gap-free.
        let bytes = self.reorder.flush();
        self.inbox.extend_from_slice(&bytes);
        self.message_done = true;
        self.end_of_data_received = true;
        self.last_eod_acked = Some(seq);
        self.rcv_base = seq.wrapping_add(1);

        let ack = Packet::new(Flags::END_OF_DATA | Flags::ACK, self.next_seq, seq, Vec::new());
        self.socket.send_packet(&ack, self.peer).await?;
        log::debug!(
            "[conn] ← END_OF_DATA seq={seq}; delivered {} byte(s); → END_OF_DATA|ACK",
            self.inbox.len()
        );
        Ok(())
    }

    /// Inbound plain ACK: release the matching retransmission timer.
    fn on_ack(&mut self, pkt: &Packet) {
        let released = self.outstanding.acknowledge(pkt.header.ack);
        if released {
            log::debug!(
                "[conn] ← ACK ack={} in_flight={}",
                pkt.header.ack,
                self.outstanding.len()
            );
        }
        if self.close_seq == Some(pkt.header.ack) {
            // Plain ACK of our CLOSE (peer variant of CLOSE|ACK).
            self.our_close_acked = true;
            self.maybe_finish_close();
        }
    }

    /// Inbound CLOSE or CLOSE|ACK: advance the four-way teardown.
    async fn on_close(&mut self, pkt: Packet) -> Result<(), ConnError> {
        if pkt.header.flags.contains(Flags::ACK) {
            // Peer acknowledged our CLOSE.
            if self.close_seq == Some(pkt.header.ack) {
                self.outstanding.acknowledge(pkt.header.ack);
                self.our_close_acked = true;
                log::debug!("[conn] ← CLOSE|ACK ack={}", pkt.header.ack);
                self.maybe_finish_close();
            }
            return Ok(());
        }

        // The peer's own CLOSE.  Reply CLOSE|ACK (idempotently), and send
        // our own CLOSE if we have not already.
        let seq = pkt.header.seq;
        self.their_close_seen = true;

        // A closing peer has finished receiving; its CLOSE subsumes a lost
        // acknowledgement of our END_OF_DATA marker.
        if let Some(eod) = self.eod_seq {
            self.outstanding.acknowledge(eod);
            self.eod_acked = true;
        }

        let closeack = Packet::new(Flags::CLOSE | Flags::ACK, self.next_seq, seq, Vec::new());
        self.socket.send_packet(&closeack, self.peer).await?;
        log::debug!("[conn] ← CLOSE seq={seq}; → CLOSE|ACK");

        if self.close_seq.is_none() {
            let our_seq = self.next_seq;
            self.next_seq = self.next_seq.wrapping_add(1);
            let close = Packet::new(Flags::CLOSE, our_seq, 0, Vec::new());
            self.socket.send_packet(&close, self.peer).await?;
            log::debug!("[conn] → CLOSE seq={our_seq}");
            self.outstanding.record(close);
            self.close_seq = Some(our_seq);
        }
        self.state = State::Closing;
        self.closing_since.get_or_insert_with(Instant::now);
        self.maybe_finish_close();
        Ok(())
    }

    /// Reset to `Closed` once both half-closes completed.
    fn maybe_finish_close(&mut self) {
        if self.close_seq.is_some() && self.our_close_acked && self.their_close_seen {
            self.state = State::Closed;
            log::info!("[conn] connection to {} closed", self.peer);
        }
    }
}

/// Parse a handshake window advertisement (decimal ASCII, >= 1).
fn parse_window(payload: &[u8]) -> Option<u32> {
    std::str::from_utf8(payload)
        .ok()?
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|w| *w >= 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_advertisement_parses_decimal_ascii() {
        assert_eq!(parse_window(b"4"), Some(4));
        assert_eq!(parse_window(b"128"), Some(128));
        assert_eq!(parse_window(b" 7 "), Some(7));
    }

    #[test]
    fn malformed_window_advertisements_rejected() {
        assert_eq!(parse_window(b""), None);
        assert_eq!(parse_window(b"0"), None);
        assert_eq!(parse_window(b"-3"), None);
        assert_eq!(parse_window(b"abc"), None);
        assert_eq!(parse_window(&[0xFF, 0xFE]), None);
    }

    #[test]
    fn state_display_matches_debug() {
        assert_eq!(State::Established.to_string(), "Established");
        assert_eq!(State::default(), State::Closed);
    }
}
