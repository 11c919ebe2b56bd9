use std::time::Instant;

use crate::sequence::PacketId;

/// Ring buffer remembering when recent packets were sent, indexed by `id & mask`.
/// Used by the connection to turn incoming acks into lag samples.
#[derive(Debug)]
pub struct LagRing {
    entries: Box<[Option<(PacketId, Instant)>]>,
    mask: usize,
}

impl LagRing {
    /// Creates a ring with `size` slots, rounded up to a power of two.
    pub fn with_capacity(size: usize) -> Self {
        let size = size.max(1).next_power_of_two();
        Self { entries: vec![None; size].into_boxed_slice(), mask: size - 1 }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn index(&self, packet_id: PacketId) -> usize {
        packet_id as usize & self.mask
    }

    /// Records the send time of `packet_id`, evicting whatever shared its slot.
    pub fn record(&mut self, packet_id: PacketId, sent_at: Instant) {
        let index = self.index(packet_id);
        self.entries[index] = Some((packet_id, sent_at));
    }

    /// Returns the send time of `packet_id` if its slot has not been reused since.
    pub fn sent_at(&self, packet_id: PacketId) -> Option<Instant> {
        match self.entries[self.index(packet_id)] {
            Some((id, sent_at)) if id == packet_id => Some(sent_at),
            _ => None,
        }
    }

    /// Forgets every recorded packet.
    pub fn clear(&mut self) {
        self.entries.iter_mut().for_each(|entry| *entry = None);
    }
}
