//! Outbound packet buffer for one connection.
//!
//! [`SendBuffer`] holds every application payload from the moment it is
//! enqueued until it is cumulatively acknowledged.  Payloads are never split
//! or coalesced: one [`SendSlot`] is one segment on the wire, and it keeps the
//! sequence number it was given at enqueue time across retransmissions.
//!
//! # Slot layout
//!
//! ```text
//!   head (oldest unacked)     cursor (next to send)        tail
//!     │                          │                           │
//!     ▼                          ▼                           ▼
//!   [seq 1 ][seq 1025][seq 2049][seq 3073][seq 4097]  .. .. ..
//!   └────── sent, awaiting ACK ─┘└──── not yet sent ─┘
//! ```
//!
//! A retransmission timeout rewinds the cursor to the head; a cumulative ACK
//! pops covered slots off the head and pulls the cursor back with them.
//!
//! Sequence numbers start at 1 for every session and do not wrap: a session
//! moves far less than 4 GiB through one connection.
//!
//! This module only manages state; building and handing segments to the
//! network is the caller's responsibility.

use crate::ring::Ring;
use crate::transport::TcpError;

// ---------------------------------------------------------------------------
// SendSlot
// ---------------------------------------------------------------------------

/// One enqueued payload and the sequence number of its first byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendSlot {
    pub seq: u32,
    pub payload: Vec<u8>,
}

impl SendSlot {
    /// First sequence number after this slot's payload.
    pub fn end(&self) -> u32 {
        self.seq + self.payload.len() as u32
    }
}

// ---------------------------------------------------------------------------
// SendBuffer
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SendBuffer {
    slots: Ring<SendSlot>,
    /// Configured capacity in bytes.
    capacity: usize,
    /// Bytes currently held (sent or not).
    cached: usize,
    /// Offset from the head of the next slot to (re)transmit.
    cursor: usize,
    /// Sequence number the next enqueued payload will receive.
    next_seq: u32,
    /// Size of the most recently enqueued payload.
    last_len: usize,
}

impl SendBuffer {
    /// `iss` is the sequence number of the first payload.
    pub fn new(capacity: usize, iss: u32) -> Self {
        Self {
            // Every payload is at least one byte, so this many slots can
            // never be exhausted before the byte budget is.
            slots: Ring::with_capacity(capacity),
            capacity,
            cached: 0,
            cursor: 0,
            next_seq: iss,
            last_len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn cached(&self) -> usize {
        self.cached
    }

    pub fn is_empty(&self) -> bool {
        self.cached == 0
    }

    /// `true` while another payload of `mss` bytes would still fit.
    pub fn has_room_for(&self, mss: usize) -> bool {
        self.cached + mss <= self.capacity
    }

    pub fn last_len(&self) -> usize {
        self.last_len
    }

    /// Append `payload` as a new slot and return its sequence number.
    ///
    /// Fails without side effects when `payload` is larger than `mss` or would
    /// push occupancy past the capacity.  An empty payload occupies no
    /// sequence space and is not stored.
    pub fn enqueue(&mut self, payload: Vec<u8>, mss: usize) -> Result<u32, TcpError> {
        let len = payload.len();
        if len == 0 {
            return Ok(self.next_seq);
        }
        if len > mss {
            return Err(TcpError::PayloadTooLarge { len, mss });
        }
        if self.cached + len > self.capacity {
            return Err(TcpError::SendBufferFull {
                len,
                free: self.capacity - self.cached,
            });
        }
        let seq = self.next_seq;
        self.slots
            .push_back(SendSlot { seq, payload })
            .map_err(|_| TcpError::SendBufferFull {
                len,
                free: self.capacity - self.cached,
            })?;
        self.cached += len;
        self.next_seq += len as u32;
        self.last_len = len;
        Ok(seq)
    }

    /// Oldest unacknowledged slot.
    pub fn head(&self) -> Option<&SendSlot> {
        self.slots.get(0)
    }

    /// Slot under the send cursor, if anything is left to send.
    pub fn next_unsent(&self) -> Option<&SendSlot> {
        self.slots.get(self.cursor)
    }

    /// Move the cursor past the slot [`next_unsent`](Self::next_unsent)
    /// returned.
    pub fn advance_cursor(&mut self) {
        self.cursor += 1;
    }

    /// Point the cursor back at the oldest unacknowledged slot.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Drop every slot whose payload ends at or before `ack`.
    ///
    /// Returns the number of bytes released.
    pub fn release_through(&mut self, ack: u32) -> usize {
        let mut released = 0;
        let mut popped = 0;
        while let Some(head) = self.slots.get(0) {
            if head.end() > ack {
                break;
            }
            if let Some(slot) = self.slots.pop_front() {
                released += slot.payload.len();
                popped += 1;
            }
        }
        self.cached -= released;
        self.cursor = self.cursor.saturating_sub(popped);
        released
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
