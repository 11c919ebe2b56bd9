//! Fixed-capacity slot table holding a connection's channels.

use bunchnet_core::error::{ErrorKind, Result};

use crate::channel::{Channel, ReliableCounters};

const WORD_BITS: usize = u64::BITS as usize;

/// Channel slots indexed by channel index, with an in-use bitset and
/// sequence counters that survive the channels themselves.
#[derive(Debug)]
pub struct ChannelTable {
    slots: Vec<Option<Channel>>,
    in_use: Vec<u64>,
    retired: Vec<ReliableCounters>,
    open_order: Vec<usize>,
}

impl ChannelTable {
    /// Creates a table with `capacity` empty slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            in_use: vec![0; capacity.div_ceil(WORD_BITS)],
            retired: vec![ReliableCounters::default(); capacity],
            open_order: Vec::new(),
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of live channels.
    pub fn len(&self) -> usize {
        self.open_order.len()
    }

    /// Returns true if no channel is live.
    pub fn is_empty(&self) -> bool {
        self.open_order.is_empty()
    }

    /// Returns true if a channel lives at `index`.
    pub fn contains(&self, index: usize) -> bool {
        index < self.capacity() && self.in_use[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }

    /// Channel at `index`.
    pub fn get(&self, index: usize) -> Option<&Channel> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Mutable channel at `index`.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Channel> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// Sequence counters for `index`, live or retained from an earlier channel.
    pub fn counters(&self, index: usize) -> ReliableCounters {
        match self.get(index) {
            Some(channel) => channel.counters(),
            None => self.retired.get(index).copied().unwrap_or_default(),
        }
    }

    /// Lowest free index at or above `from`.
    pub fn first_free(&self, from: usize) -> Option<usize> {
        (from..self.capacity()).find(|&index| !self.contains(index))
    }

    /// Live channel indices, most recently opened first.
    pub fn open_indices(&self) -> Vec<usize> {
        self.open_order.iter().rev().copied().collect()
    }

    /// Places `channel` in its slot.
    pub fn insert(&mut self, channel: Channel) -> Result<()> {
        let index = channel.index();
        if index >= self.capacity() {
            return Err(ErrorKind::ChannelIndexOutOfRange(index));
        }
        if self.contains(index) {
            return Err(ErrorKind::ChannelInUse(index));
        }
        self.in_use[index / WORD_BITS] |= 1 << (index % WORD_BITS);
        self.slots[index] = Some(channel);
        self.open_order.push(index);
        Ok(())
    }

    /// Takes the channel out of its slot, remembering its sequence counters.
    pub fn remove(&mut self, index: usize) -> Option<Channel> {
        let channel = self.slots.get_mut(index)?.take()?;
        self.in_use[index / WORD_BITS] &= !(1 << (index % WORD_BITS));
        self.open_order.retain(|&open| open != index);
        self.retired[index] = channel.counters();
        Some(channel)
    }

    /// Takes every live channel out, most recently opened first.
    pub fn drain(&mut self) -> Vec<Channel> {
        self.open_indices().into_iter().filter_map(|index| self.remove(index)).collect()
    }
}

#[cfg(test)]
mod tests {
    use bunchnet_protocol::ChannelType;

    use super::*;
    use crate::handler::DiscardHandler;

    fn channel(index: usize) -> Channel {
        Channel::new(
            index,
            ChannelType::ACTOR,
            true,
            ReliableCounters::default(),
            Box::new(DiscardHandler),
        )
    }

    #[test]
    fn test_insert_and_remove() {
        let mut table = ChannelTable::new(130);
        table.insert(channel(0)).unwrap();
        table.insert(channel(129)).unwrap();
        assert!(table.contains(0));
        assert!(table.contains(129));
        assert!(!table.contains(64));
        assert_eq!(table.len(), 2);

        assert!(table.remove(129).is_some());
        assert!(!table.contains(129));
        assert!(table.remove(129).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_index_in_use_is_rejected() {
        let mut table = ChannelTable::new(4);
        table.insert(channel(2)).unwrap();
        assert!(matches!(table.insert(channel(2)), Err(ErrorKind::ChannelInUse(2))));
        assert!(matches!(table.insert(channel(4)), Err(ErrorKind::ChannelIndexOutOfRange(4))));
    }

    #[test]
    fn test_first_free_skips_used_slots() {
        let mut table = ChannelTable::new(4);
        table.insert(channel(1)).unwrap();
        table.insert(channel(2)).unwrap();
        assert_eq!(table.first_free(1), Some(3));
        assert_eq!(table.first_free(0), Some(0));
        table.insert(channel(3)).unwrap();
        assert_eq!(table.first_free(1), None);
    }

    #[test]
    fn test_open_indices_newest_first() {
        let mut table = ChannelTable::new(8);
        table.insert(channel(0)).unwrap();
        table.insert(channel(5)).unwrap();
        table.insert(channel(2)).unwrap();
        assert_eq!(table.open_indices(), vec![2, 5, 0]);
        assert_eq!(table.drain().len(), 3);
        assert!(table.is_empty());
    }

    #[test]
    fn test_counters_survive_removal() {
        let mut table = ChannelTable::new(4);
        assert!(!table.counters(1).was_used());
        let counters = ReliableCounters { in_reliable: 3, out_reliable: 9 };
        table
            .insert(Channel::new(1, ChannelType::ACTOR, true, counters, Box::new(DiscardHandler)))
            .unwrap();
        table.remove(1);
        assert_eq!(table.counters(1), counters);
        assert!(table.get(1).is_none());
    }
}
