//! Receive-side reorder buffer.
//!
//! Packets within one advertised window may arrive in any order.  The
//! [`ReorderBuffer`] holds them in a fixed array of slots indexed by
//! `sequence_number − window_base` until the window fills or an
//! END_OF_DATA marker forces delivery of a partial final window, at which
//! point [`flush`] hands the payloads to the application in strict
//! sequence order.
//!
//! Inserts are idempotent: a duplicate of an already-buffered packet, or a
//! packet outside the current window, is silently ignored, which makes the
//! buffer safe against network-level duplication and stale retransmits.
//! Memory is bounded to one window of packets.
//!
//! [`flush`]: ReorderBuffer::flush

use crate::packet::Packet;

/// Fixed-capacity window of out-of-order packets awaiting delivery.
#[derive(Debug)]
pub struct ReorderBuffer {
    slots: Vec<Option<Packet>>,
    /// Sequence number mapped to slot 0; `None` while the buffer is empty
    /// and no window start has been pinned.
    window_base: Option<u32>,
}

impl ReorderBuffer {
    /// Create a buffer holding one window of `capacity` packets.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "window capacity must be at least 1");
        Self {
            slots: vec![None; capacity],
            window_base: None,
        }
    }

    /// Number of slots (the advertised window size, in packets).
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Pin the sequence number of slot 0.
    ///
    /// The connection calls this with the known start of the next window,
    /// so indexing stays correct even when the first packet of the window
    /// is not the first to arrive.
    pub fn set_base(&mut self, seq: u32) {
        self.window_base = Some(seq);
    }

    /// Sequence number of slot 0, when set.
    pub fn base(&self) -> Option<u32> {
        self.window_base
    }

    /// Store a packet at its window position.
    ///
    /// When no base is pinned yet, the packet's own sequence number
    /// becomes the base.  Returns `true` when the packet was newly stored;
    /// duplicates and out-of-window packets return `false` and change
    /// nothing.
    pub fn insert(&mut self, packet: Packet) -> bool {
        let base = *self.window_base.get_or_insert(packet.header.seq);

        let index = packet.header.seq.wrapping_sub(base) as usize;
        if index >= self.slots.len() {
            return false;
        }
        if self.slots[index].is_some() {
            return false;
        }

        self.slots[index] = Some(packet);
        true
    }

    /// `true` when every slot is occupied.
    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// `true` when no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Deliver all buffered payloads in sequence order.
    ///
    /// Concatenates occupied slots in slot order, clears every slot and
    /// unsets the base.  The connection layer guarantees a forced (partial)
    /// flush can only happen once every earlier packet was acknowledged,
    /// so slot order is delivery order.
    pub fn flush(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        for slot in self.slots.iter_mut() {
            if let Some(pkt) = slot.take() {
                out.extend_from_slice(&pkt.payload);
            }
        }
        self.window_base = None;
        out
    }
}
