//! Retransmission timer set.
//!
//! Every packet that requires an acknowledgement (DATA, END_OF_DATA,
//! CLOSE) is recorded here immediately after its first transmission.  On
//! each scheduling tick the connection sweeps the set: entries older than
//! the retransmission timeout yield a fresh [`Flags::RETRANSMIT`]-flagged
//! copy to put back on the wire, and their timers are refreshed so a stuck
//! link retransmits once per timeout period rather than in a tight loop.
//!
//! Acknowledging an unknown or already-removed sequence number is a
//! harmless no-op, which makes duplicate ACKs from a lossy, duplicating
//! channel safe.
//!
//! Retransmission is indefinite unless a give-up bound is configured; the
//! connection checks [`RetransmitSet::exhausted`] after each sweep.
//!
//! [`Flags::RETRANSMIT`]: crate::packet::Flags::RETRANSMIT

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::packet::Packet;

/// Timeout parameters for one connection.
#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// Age after which an unacknowledged packet is retransmitted.
    pub retransmit_timeout: Duration,
    /// Transmission count (first send included) after which the connection
    /// gives up on an entry; `None` retransmits forever.
    pub max_transmissions: Option<u32>,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            retransmit_timeout: Duration::from_millis(1000),
            max_transmissions: None,
        }
    }
}

/// One unacknowledged outbound packet.
#[derive(Debug, Clone)]
struct Outstanding {
    packet: Packet,
    /// Wall-clock time of the most recent transmission.
    sent_at: Instant,
    /// Total number of transmissions so far.
    tx_count: u32,
}

/// Tracks every unacknowledged outbound packet for one connection.
#[derive(Debug)]
pub struct RetransmitSet {
    entries: BTreeMap<u32, Outstanding>,
    config: TimerConfig,
}

impl RetransmitSet {
    pub fn new(config: TimerConfig) -> Self {
        Self {
            entries: BTreeMap::new(),
            config,
        }
    }

    /// Record a just-transmitted packet, keyed by its sequence number.
    ///
    /// Call immediately after every first send of an ACK-requiring packet.
    pub fn record(&mut self, packet: Packet) {
        self.entries.insert(
            packet.header.seq,
            Outstanding {
                packet,
                sent_at: Instant::now(),
                tx_count: 1,
            },
        );
    }

    /// Drop the entry for `seq` on receipt of its ACK.
    ///
    /// Returns `true` when an entry was removed; a duplicate or unknown
    /// ACK returns `false` and changes nothing.
    pub fn acknowledge(&mut self, seq: u32) -> bool {
        self.entries.remove(&seq).is_some()
    }

    /// Collect a fresh retransmission copy of every entry older than the
    /// configured timeout, refreshing each entry's timer to `now`.
    pub fn due_for_retransmit(&mut self, now: Instant) -> Vec<Packet> {
        let timeout = self.config.retransmit_timeout;
        let mut due = Vec::new();

        for entry in self.entries.values_mut() {
            if now.duration_since(entry.sent_at) >= timeout {
                entry.sent_at = now;
                entry.tx_count += 1;
                due.push(entry.packet.retransmission());
            }
        }
        due
    }

    /// `true` when some entry has hit the configured transmission bound.
    ///
    /// Always `false` when no bound is configured.
    pub fn exhausted(&self) -> bool {
        match self.config.max_transmissions {
            Some(max) => self.entries.values().any(|e| e.tx_count >= max),
            None => false,
        }
    }

    /// `true` when every sent packet has been acknowledged.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of packets awaiting acknowledgement.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Flags;

    fn data_packet(seq: u32) -> Packet {
        Packet::new(Flags::DATA, seq, 0, vec![seq as u8; 4])
    }

    fn short_timeout() -> TimerConfig {
        TimerConfig {
            retransmit_timeout: Duration::from_millis(10),
            max_transmissions: None,
        }
    }

    #[test]
    fn record_and_acknowledge() {
        let mut set = RetransmitSet::new(TimerConfig::default());
        set.record(data_packet(3));
        set.record(data_packet(4));
        assert_eq!(set.len(), 2);

        assert!(set.acknowledge(3));
        assert_eq!(set.len(), 1);
        assert!(set.acknowledge(4));
        assert!(set.is_empty());
    }

    #[test]
    fn duplicate_ack_is_a_noop() {
        let mut set = RetransmitSet::new(TimerConfig::default());
        set.record(data_packet(7));

        assert!(set.acknowledge(7));
        assert!(!set.acknowledge(7));
        assert!(!set.acknowledge(99));
        assert!(set.is_empty());
    }

    #[test]
    fn nothing_due_before_timeout() {
        let mut set = RetransmitSet::new(TimerConfig::default());
        set.record(data_packet(3));

        let due = set.due_for_retransmit(Instant::now());
        assert!(due.is_empty());
    }

    #[test]
    fn due_entries_carry_the_retransmit_flag() {
        let mut set = RetransmitSet::new(short_timeout());
        set.record(data_packet(3));
        set.record(data_packet(4));

        let later = Instant::now() + Duration::from_millis(50);
        let due = set.due_for_retransmit(later);

        assert_eq!(due.len(), 2);
        for pkt in &due {
            assert!(pkt.header.flags.contains(Flags::RETRANSMIT));
            assert!(pkt.header.flags.contains(Flags::DATA));
        }
        // Ordered by sequence number.
        assert_eq!(due[0].header.seq, 3);
        assert_eq!(due[1].header.seq, 4);
    }

    #[test]
    fn sweep_refreshes_timers() {
        let mut set = RetransmitSet::new(short_timeout());
        set.record(data_packet(3));

        let first_sweep = Instant::now() + Duration::from_millis(50);
        assert_eq!(set.due_for_retransmit(first_sweep).len(), 1);

        // Immediately after the sweep the entry's timer restarted, so it
        // is not due again.
        assert!(set.due_for_retransmit(first_sweep).is_empty());

        // One timeout later it is.
        let second_sweep = first_sweep + Duration::from_millis(50);
        assert_eq!(set.due_for_retransmit(second_sweep).len(), 1);
    }

    #[test]
    fn acknowledged_entries_are_never_due() {
        let mut set = RetransmitSet::new(short_timeout());
        set.record(data_packet(3));
        set.acknowledge(3);

        let later = Instant::now() + Duration::from_millis(50);
        assert!(set.due_for_retransmit(later).is_empty());
    }

    #[test]
    fn unbounded_set_never_exhausts() {
        let mut set = RetransmitSet::new(short_timeout());
        set.record(data_packet(3));

        let mut tick = Instant::now();
        for _ in 0..10 {
            tick += Duration::from_millis(50);
            set.due_for_retransmit(tick);
        }
        assert!(!set.exhausted());
    }

    #[test]
    fn bounded_set_exhausts_after_max_transmissions() {
        let mut set = RetransmitSet::new(TimerConfig {
            retransmit_timeout: Duration::from_millis(10),
            max_transmissions: Some(3),
        });
        set.record(data_packet(3));
        assert!(!set.exhausted());

        let mut tick = Instant::now();
        tick += Duration::from_millis(50);
        set.due_for_retransmit(tick); // tx_count = 2
        assert!(!set.exhausted());

        tick += Duration::from_millis(50);
        set.due_for_retransmit(tick); // tx_count = 3
        assert!(set.exhausted());
    }
}
