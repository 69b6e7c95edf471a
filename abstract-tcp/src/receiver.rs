//! Inbound sequencing and out-of-order reassembly.
//!
//! The [`Receiver`] decides what happens to each data segment *before* its
//! payload reaches the application:
//! - the first packet of a session (sequence 1) opens the receive space;
//! - an in-order packet is delivered straight away;
//! - an early packet is parked in the reorder store at the byte offset of its
//!   sequence number relative to the start of the contiguous run, and handed
//!   over once the gap in front of it is filled;
//! - anything below `rcv_nxt` is a duplicate.
//!
//! ```text
//!          run_start = rcv_nxt                 last_seq
//!               │                                 │
//!  ─────────────┼──────┬────────┬─────────────────┼────────▶ seq space
//!   delivered   │ gap  │ parked │      gap        │ parked
//! ```
//!
//! The [`Receiver`] does **not** send ACKs itself; it reports the values the
//! input path puts into ACK segments ([`Receiver::rcv_nxt`],
//! [`Receiver::window`]).

use crate::congestion::MAX_WIN;
use crate::ring::{Ring, RingError};

/// How [`Receiver::classify`] sees an inbound data segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// Sequence 1 while nothing has been received or parked yet.
    First,
    /// Exactly the next expected sequence, with nothing parked beyond it.
    InOrder,
    /// At or beyond `rcv_nxt` but not directly deliverable.
    Early,
    /// Entirely below `rcv_nxt`.
    Duplicate,
}

/// Result of parking an early segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parked {
    Stored,
    /// The same sequence is already parked.
    AlreadyHeld,
    /// Parking it would overrun the receive buffer.
    NoRoom,
}

#[derive(Debug)]
pub struct Receiver {
    /// Next sequence number expected from the peer.
    pub rcv_nxt: u32,
    /// Highest sequence number parked out of order (or `rcv_nxt` when the
    /// store holds nothing beyond the run).
    pub last_seq: u32,
    /// Sequence number at offset 0 of the reorder store.
    pub run_start: u32,
    /// Duplicate data segments since the last in-order arrival.
    pub dups: u32,
    store: Ring<Vec<u8>>,
    /// Bytes parked in `store`.
    held: usize,
}

impl Receiver {
    pub fn new(capacity: usize) -> Self {
        Self {
            rcv_nxt: 1,
            last_seq: 1,
            run_start: 1,
            dups: 0,
            store: Ring::with_capacity(capacity),
            held: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    /// Bytes of receive buffer still free, as advertised to the peer.
    pub fn window(&self) -> u16 {
        (self.capacity() - self.held).min(MAX_WIN as usize) as u16
    }

    pub fn held(&self) -> usize {
        self.held
    }

    pub fn classify(&self, seq: u32) -> Arrival {
        if seq == 1 && self.rcv_nxt <= 1 && self.held == 0 {
            Arrival::First
        } else if seq == self.rcv_nxt && seq == self.last_seq {
            Arrival::InOrder
        } else if seq >= self.rcv_nxt {
            Arrival::Early
        } else {
            Arrival::Duplicate
        }
    }

    /// Open the receive space with the session's first payload.
    pub fn accept_first(&mut self, seq: u32, len: usize) {
        self.last_seq += len as u32;
        self.run_start = self.last_seq;
        self.rcv_nxt = seq + len as u32;
    }

    /// Account for a delivered in-order payload.
    pub fn accept_in_order(&mut self, len: usize) {
        let len = len as u32;
        self.rcv_nxt += len;
        self.last_seq += len;
        self.run_start += len;
        self.dups = 0;
    }

    pub fn record_duplicate(&mut self) {
        self.dups += 1;
    }

    /// Park an early segment at its offset from the run start.
    pub fn park(&mut self, seq: u32, payload: Vec<u8>) -> Parked {
        let offset = (seq - self.run_start) as usize;
        let len = payload.len();
        if offset + len > self.capacity() {
            return Parked::NoRoom;
        }
        match self.store.insert(offset, payload) {
            Ok(()) => {
                self.held += len;
                self.last_seq = self.last_seq.max(seq);
                Parked::Stored
            }
            Err(RingError::Occupied(_)) => Parked::AlreadyHeld,
            Err(RingError::OutOfRange { .. }) | Err(RingError::Full { .. }) => Parked::NoRoom,
        }
    }

    /// Hand over every payload now contiguous with the run start, in
    /// sequence order, and advance the run past them.
    pub fn reassemble(&mut self) -> Vec<Vec<u8>> {
        let mut ready = Vec::new();
        let mut aggregated = 0u32;
        while let Some(payload) = self.store.take(0) {
            let len = payload.len();
            self.held -= len;
            aggregated += len as u32;
            self.store.advance(len);
            ready.push(payload);
        }
        self.run_start += aggregated;
        self.rcv_nxt += aggregated;
        if self.last_seq < self.rcv_nxt {
            self.last_seq = self.rcv_nxt;
        }
        self.dups = 0;
        ready
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
