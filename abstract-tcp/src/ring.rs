//! Fixed-capacity ring addressed by logical offset from its head.
//!
//! Both per-connection buffers are rings:
//! - the send buffer appends one packet per slot and pops acknowledged
//!   packets off the front;
//! - the receive reorder store places each early packet at the offset of its
//!   first byte relative to the start of the contiguous run, and advances the
//!   head by the payload length once that packet has been delivered.
//!
//! ```text
//!  head (offset 0)                          capacity
//!   │                                          │
//!   ▼                                          ▼
//!   [Some][None][None][Some][None] .. .. .. ..|
//!   └──────── materialised slots ─────┘
//! ```
//!
//! Slots are materialised lazily, so a ring with a large capacity costs
//! nothing until it is written to.  Every write checks the capacity and fails
//! with a [`RingError`] instead of wrapping.

use std::collections::VecDeque;

use thiserror::Error;

/// Errors returned when a write would break the ring's occupancy bound.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    #[error("ring is full ({capacity} slots)")]
    Full { capacity: usize },
    #[error("offset {offset} is outside a ring of {capacity} slots")]
    OutOfRange { offset: usize, capacity: usize },
    #[error("slot at offset {0} is already occupied")]
    Occupied(usize),
}

#[derive(Debug, Clone)]
pub struct Ring<T> {
    slots: VecDeque<Option<T>>,
    capacity: usize,
}

impl<T> Ring<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: VecDeque::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of materialised slots, occupied or not.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Append `item` after the last materialised slot.
    pub fn push_back(&mut self, item: T) -> Result<(), RingError> {
        if self.slots.len() >= self.capacity {
            return Err(RingError::Full {
                capacity: self.capacity,
            });
        }
        self.slots.push_back(Some(item));
        Ok(())
    }

    /// Place `item` at `offset` from the head.
    pub fn insert(&mut self, offset: usize, item: T) -> Result<(), RingError> {
        if offset >= self.capacity {
            return Err(RingError::OutOfRange {
                offset,
                capacity: self.capacity,
            });
        }
        if offset >= self.slots.len() {
            self.slots.resize_with(offset + 1, || None);
        }
        let slot = &mut self.slots[offset];
        if slot.is_some() {
            return Err(RingError::Occupied(offset));
        }
        *slot = Some(item);
        Ok(())
    }

    pub fn get(&self, offset: usize) -> Option<&T> {
        self.slots.get(offset).and_then(Option::as_ref)
    }

    /// Remove and return the item at `offset`, leaving the slot empty.
    pub fn take(&mut self, offset: usize) -> Option<T> {
        self.slots.get_mut(offset).and_then(Option::take)
    }

    /// Remove the head slot and shift every offset down by one.
    pub fn pop_front(&mut self) -> Option<T> {
        self.slots.pop_front().flatten()
    }

    /// Discard `n` slots from the head, dropping anything they held.
    pub fn advance(&mut self, n: usize) {
        let n = n.min(self.slots.len());
        self.slots.drain(..n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_back_fails_cleanly_when_full() {
        let mut r = Ring::with_capacity(2);
        r.push_back('a').unwrap();
        r.push_back('b').unwrap();
        assert_eq!(r.push_back('c'), Err(RingError::Full { capacity: 2 }));
        assert_eq!(r.len(), 2);
        assert_eq!(r.get(1), Some(&'b'));
    }

    #[test]
    fn pop_front_shifts_offsets() {
        let mut r = Ring::with_capacity(4);
        for c in ['a', 'b', 'c'] {
            r.push_back(c).unwrap();
        }
        assert_eq!(r.pop_front(), Some('a'));
        assert_eq!(r.get(0), Some(&'b'));
        assert_eq!(r.get(1), Some(&'c'));
        // freed slot can be reused
        r.push_back('d').unwrap();
        r.push_back('e').unwrap();
        assert!(r.push_back('f').is_err());
    }

    #[test]
    fn insert_leaves_holes_and_rejects_duplicates() {
        let mut r = Ring::with_capacity(8);
        r.insert(5, "five").unwrap();
        assert_eq!(r.len(), 6);
        assert_eq!(r.get(0), None);
        assert!(!r.is_empty());
        assert_eq!(r.insert(5, "again"), Err(RingError::Occupied(5)));
        assert_eq!(r.get(5), Some(&"five"));
    }

    #[test]
    fn insert_beyond_capacity_is_rejected() {
        let mut r: Ring<u8> = Ring::with_capacity(8);
        assert_eq!(
            r.insert(8, 1),
            Err(RingError::OutOfRange {
                offset: 8,
                capacity: 8
            })
        );
        assert!(r.is_empty());
    }

    #[test]
    fn take_then_advance_walks_a_byte_indexed_run() {
        // Two 3-byte packets stored at their byte offsets.
        let mut r = Ring::with_capacity(16);
        r.insert(3, vec![4u8, 5, 6]).unwrap();
        r.insert(0, vec![1u8, 2, 3]).unwrap();

        let mut delivered = Vec::new();
        while let Some(p) = r.take(0) {
            let n = p.len();
            delivered.extend(p);
            r.advance(n);
        }
        assert_eq!(delivered, vec![1, 2, 3, 4, 5, 6]);
        assert!(r.is_empty());
        assert_eq!(r.len(), 0);
    }
}
