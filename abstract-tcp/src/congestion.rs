//! Reno congestion control.
//!
//! [`Congestion`] holds the congestion window, the slow-start threshold and
//! the consecutive duplicate-ACK counter for one connection, and applies the
//! Reno transitions to them.  Sending the retransmission that a transition
//! calls for is the caller's job.
//!
//! ```text
//!            new ACK, cwnd ≤ ssthresh: cwnd += mss
//!   ┌───────────┐                    ┌──────────────────────┐
//!   │ slow start│───cwnd > ssthresh─▶│ congestion avoidance │  cwnd += mss²/cwnd
//!   └─────▲─────┘                    └──────────┬───────────┘
//!         │ timeout: cwnd = mss                 │ 3rd dup ACK
//!         │                          ┌──────────▼───────────┐
//!         └──────────────────────────│    fast recovery     │  cwnd += mss per dup
//!                                    └──────────────────────┘
//!                                      new ACK: cwnd = ssthresh
//! ```

/// Duplicate ACKs that trigger a fast retransmit.
pub const REXMT_THRESH: u32 = 3;

/// Largest window the header can advertise, and the initial `ssthresh`.
pub const MAX_WIN: u32 = 65535;

/// What the caller must do after a duplicate ACK has been counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DupAckAction {
    /// Fewer than [`REXMT_THRESH`] duplicates so far.
    Count,
    /// This was the [`REXMT_THRESH`]-th duplicate: resend the oldest segment.
    FastRetransmit,
    /// Past the threshold; the window was inflated by one segment.
    Inflate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Congestion {
    pub cwnd: u32,
    pub ssthresh: u32,
    pub dupacks: u32,
    mss: u32,
}

impl Congestion {
    pub fn new(mss: u32) -> Self {
        Self {
            cwnd: mss,
            ssthresh: MAX_WIN,
            dupacks: 0,
            mss,
        }
    }

    pub fn reset_dupacks(&mut self) {
        self.dupacks = 0;
    }

    /// Count one duplicate ACK and apply the matching transition.
    pub fn on_duplicate_ack(&mut self) -> DupAckAction {
        self.dupacks += 1;
        if self.dupacks == REXMT_THRESH {
            let win = (self.cwnd / 2 / self.mss).max(2);
            self.ssthresh = win * self.mss;
            self.cwnd = self.ssthresh + self.dupacks * self.mss;
            DupAckAction::FastRetransmit
        } else if self.dupacks > REXMT_THRESH {
            self.cwnd += self.mss;
            DupAckAction::Inflate
        } else {
            DupAckAction::Count
        }
    }

    /// Leave fast recovery (deflating the window) if we were in it.
    pub fn on_new_ack(&mut self) {
        if self.dupacks >= REXMT_THRESH && self.cwnd > self.ssthresh {
            self.cwnd = self.ssthresh;
        }
        self.dupacks = 0;
    }

    /// Open the window after new data was acknowledged, never past `limit`.
    pub fn grow(&mut self, limit: u32) {
        let incr = if self.cwnd > self.ssthresh {
            let incr = u64::from(self.mss) * u64::from(self.mss) / u64::from(self.cwnd);
            (incr as u32).max(1)
        } else {
            self.mss
        };
        self.cwnd = (self.cwnd + incr).min(limit);
    }

    /// Collapse to one segment after a retransmission timeout.  `in_flight`
    /// is the amount of data outstanding when the timer fired.
    pub fn on_timeout(&mut self, in_flight: u32) {
        let win = (in_flight.min(self.cwnd) / 2 / self.mss).max(2);
        self.cwnd = self.mss;
        self.ssthresh = win * self.mss;
        self.dupacks = 0;
    }
}
