//! Slices an outbound byte payload into DATA packets.
//!
//! [`Packetizer`] is a finite, lazy iterator: each call to `next` carves the
//! next chunk of at most [`MAX_PAYLOAD_SIZE`] bytes off the payload and
//! wraps it in a [`Packet`] carrying the [`Flags::DATA`] flag.  Sequence
//! numbers are pulled from a caller-supplied generator so they stay
//! globally monotonic across multiple sends on the same connection.
//!
//! The iterator is exhausted after `ceil(len / MAX_PAYLOAD_SIZE)` packets
//! and is not restartable: a caller that needs to resend must reuse the
//! bytes retained by the retransmission timer set, not re-iterate.

use crate::packet::{Flags, Packet, MAX_PAYLOAD_SIZE};

/// Lazy payload → DATA-packet iterator.
pub struct Packetizer<'d, F> {
    data: &'d [u8],
    offset: usize,
    next_seq: F,
}

impl<'d, F> Packetizer<'d, F>
where
    F: FnMut() -> u32,
{
    /// Create a packetizer over `data`.
    ///
    /// `next_seq` is invoked once per emitted packet, in order.
    pub fn new(data: &'d [u8], next_seq: F) -> Self {
        Self {
            data,
            offset: 0,
            next_seq,
        }
    }

    /// Number of packets this payload will produce in total.
    pub fn packet_count(&self) -> usize {
        self.data.len().div_ceil(MAX_PAYLOAD_SIZE)
    }
}

impl<F> Iterator for Packetizer<'_, F>
where
    F: FnMut() -> u32,
{
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        if self.offset >= self.data.len() {
            return None;
        }

        let end = (self.offset + MAX_PAYLOAD_SIZE).min(self.data.len());
        let chunk = self.data[self.offset..end].to_vec();
        self.offset = end;

        let seq = (self.next_seq)();
        Some(Packet::new(Flags::DATA, seq, 0, chunk))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.data.len() - self.offset).div_ceil(MAX_PAYLOAD_SIZE);
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: a generator counting up from `start`.
    fn counter(start: u32) -> impl FnMut() -> u32 {
        let mut next = start;
        move || {
            let seq = next;
            next = next.wrapping_add(1);
            seq
        }
    }

    #[test]
    fn empty_payload_yields_nothing() {
        let mut p = Packetizer::new(b"", counter(3));
        assert_eq!(p.packet_count(), 0);
        assert!(p.next().is_none());
    }

    #[test]
    fn short_payload_yields_one_packet() {
        let pkts: Vec<_> = Packetizer::new(b"HELLO WORLD", counter(3)).collect();
        assert_eq!(pkts.len(), 1);
        assert_eq!(pkts[0].payload, b"HELLO WORLD");
        assert_eq!(pkts[0].header.seq, 3);
        assert!(pkts[0].header.flags.contains(Flags::DATA));
    }

    #[test]
    fn chunks_are_window_bounded_and_last_is_short() {
        // 3.5 payloads worth of bytes must produce exactly 4 packets, the
        // last one half-sized.
        let data = vec![7u8; MAX_PAYLOAD_SIZE * 3 + MAX_PAYLOAD_SIZE / 2];
        let pkts: Vec<_> = Packetizer::new(&data, counter(0)).collect();

        assert_eq!(pkts.len(), 4);
        for pkt in &pkts[..3] {
            assert_eq!(pkt.payload.len(), MAX_PAYLOAD_SIZE);
        }
        assert_eq!(pkts[3].payload.len(), MAX_PAYLOAD_SIZE / 2);
    }

    #[test]
    fn order_is_preserved() {
        let data: Vec<u8> = (0..MAX_PAYLOAD_SIZE * 2 + 10)
            .map(|i| (i % 251) as u8)
            .collect();
        let pkts: Vec<_> = Packetizer::new(&data, counter(0)).collect();

        let reassembled: Vec<u8> = pkts.iter().flat_map(|p| p.payload.clone()).collect();
        assert_eq!(reassembled, data);
    }

    #[test]
    fn sequence_numbers_come_from_the_generator() {
        let data = vec![0u8; MAX_PAYLOAD_SIZE * 3];
        let seqs: Vec<u32> = Packetizer::new(&data, counter(40))
            .map(|p| p.header.seq)
            .collect();
        assert_eq!(seqs, vec![40, 41, 42]);
    }

    #[test]
    fn numbering_is_monotonic_across_sends() {
        // Two packetize calls sharing one generator must not reuse numbers.
        let mut next = counter(3);
        let first: Vec<u32> = Packetizer::new(&vec![0u8; MAX_PAYLOAD_SIZE * 2], &mut next)
            .map(|p| p.header.seq)
            .collect();
        let second: Vec<u32> = Packetizer::new(b"tail", &mut next)
            .map(|p| p.header.seq)
            .collect();

        assert_eq!(first, vec![3, 4]);
        assert_eq!(second, vec![5]);
    }

    #[test]
    fn packet_count_matches_iteration() {
        for len in [0, 1, MAX_PAYLOAD_SIZE, MAX_PAYLOAD_SIZE + 1, 4 * MAX_PAYLOAD_SIZE] {
            let data = vec![0u8; len];
            let p = Packetizer::new(&data, counter(0));
            let expected = p.packet_count();
            assert_eq!(p.count(), expected, "len={len}");
        }
    }
}
