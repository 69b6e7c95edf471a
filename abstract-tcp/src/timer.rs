//! Retransmit and keep-alive timer management.
//!
//! Timers are not wall-clock deadlines.  Every connection owns a small array
//! of tick countdowns ([`Timers`]), and the transport instance ages all of them
//! once per [`SLOW_TIMER_INTERVAL`].  A slot holding `0` is inactive; a slot
//! that counts down to `0` has fired.
//!
//! RTO is computed with Jacobson's algorithm in scaled fixed-point arithmetic
//! ([`RttEstimator`]):
//!
//! ```text
//!   srtt   is stored × 32   (RTT_SHIFT    = 5)
//!   rttvar is stored × 16   (RTTVAR_SHIFT = 4)
//!   REXMTVAL = ((srtt >> 3) + rttvar) >> 2        (≈ SRTT + 4 × RTTVAR, ticks)
//! ```
//!
//! and is multiplied by [`BACKOFF`]`[shift]` on each consecutive timeout, up
//! to [`MAX_RXT_SHIFT`].

use std::time::Duration;

/// Period of the per-instance timer tick.
pub const SLOW_TIMER_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound of the random jitter added to every re-armed tick.
pub const TICK_JITTER: Duration = Duration::from_millis(1);

pub const RTT_SHIFT: u32 = 5;
pub const RTTVAR_SHIFT: u32 = 4;
pub const DELTA_SHIFT: u32 = 2;

/// Smoothed RTT before any sample (ticks × 32).
pub const SRTT_BASE: i32 = 0;
/// Smoothed variance before any sample: 6 ticks (3 s), scaled.
pub const RTTVAR_BASE: i32 = 6 << RTTVAR_SHIFT;
/// Initial retransmission timeout in ticks (6 s).
pub const RXTCUR_INIT: u32 = 12;
/// Lower bound on the retransmission timeout (1 s).
pub const RTT_MIN: u32 = 2;
/// Upper bound on the retransmission timeout (64 s).
pub const REXMT_MAX: u32 = 128;
/// Connection-establishment timeout for an active open (75 s).
pub const KEEP_INIT: u32 = 150;

pub const MAX_RXT_SHIFT: usize = 12;

/// Exponential backoff multipliers, indexed by consecutive-timeout count.
pub const BACKOFF: [u32; MAX_RXT_SHIFT + 1] = [1, 2, 4, 8, 16, 32, 64, 64, 64, 64, 64, 64, 64];

// ---------------------------------------------------------------------------
// Timer slots
// ---------------------------------------------------------------------------

/// The timers a connection can have armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Retransmission of the oldest unacknowledged segment.
    Rexmt,
    /// Expiry of an active open that never had data acknowledged.
    Keep,
}

impl TimerKind {
    /// Every kind, in the order they are serviced on a tick.
    pub const ALL: [TimerKind; 2] = [TimerKind::Rexmt, TimerKind::Keep];

    fn index(self) -> usize {
        match self {
            TimerKind::Rexmt => 0,
            TimerKind::Keep => 1,
        }
    }
}

/// One tick countdown per [`TimerKind`]; `0` means inactive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timers {
    slots: [u32; 2],
}

impl Timers {
    pub fn arm(&mut self, kind: TimerKind, ticks: u32) {
        self.slots[kind.index()] = ticks;
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.slots[kind.index()] = 0;
    }

    pub fn cancel_all(&mut self) {
        self.slots = [0; 2];
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.slots[kind.index()] != 0
    }

    pub fn remaining(&self, kind: TimerKind) -> u32 {
        self.slots[kind.index()]
    }

    /// Age `kind` by one tick.  Returns `true` when this tick made it fire.
    pub fn expire(&mut self, kind: TimerKind) -> bool {
        let slot = &mut self.slots[kind.index()];
        if *slot == 0 {
            return false;
        }
        *slot -= 1;
        *slot == 0
    }
}

// ---------------------------------------------------------------------------
// RttEstimator
// ---------------------------------------------------------------------------

/// The single round-trip measurement a connection may have in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RttSample {
    /// Sequence number of the segment being timed.
    pub seq: u32,
    /// Ticks elapsed since transmission, starting at 1.
    pub ticks: u32,
}

/// Smoothed RTT state and the retransmission timeout derived from it.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// Smoothed RTT, ticks × 32.  `0` means "no estimate yet".
    pub srtt: i32,
    /// Smoothed mean deviation, ticks × 16.
    pub rttvar: i32,
    /// Current retransmission timeout, in ticks.
    pub rxtcur: u32,
    /// Floor for `rxtcur`, in ticks.
    pub rttmin: u32,
    /// Consecutive retransmission timeouts, capped at [`MAX_RXT_SHIFT`].
    pub rxtshift: usize,
    sample: Option<RttSample>,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self {
            srtt: SRTT_BASE,
            rttvar: RTTVAR_BASE,
            rxtcur: RXTCUR_INIT,
            rttmin: RTT_MIN,
            rxtshift: 0,
            sample: None,
        }
    }
}

impl RttEstimator {
    pub fn sample(&self) -> Option<RttSample> {
        self.sample
    }

    /// Start timing `seq` unless a measurement is already running.
    pub fn start_sample(&mut self, seq: u32) {
        if self.sample.is_none() {
            self.sample = Some(RttSample { seq, ticks: 1 });
        }
    }

    pub fn clear_sample(&mut self) {
        self.sample = None;
    }

    /// Called once per timer tick.
    pub fn age_sample(&mut self) {
        if let Some(s) = self.sample.as_mut() {
            s.ticks += 1;
        }
    }

    /// `((srtt >> 3) + rttvar) >> 2`, in ticks.
    pub fn rexmtval(&self) -> u32 {
        let v = ((self.srtt >> (RTT_SHIFT - DELTA_SHIFT)) + self.rttvar) >> DELTA_SHIFT;
        v.max(0) as u32
    }

    /// Fold a completed measurement of `rtt` ticks into the estimate and
    /// recompute the retransmission timeout.  Ends the running sample.
    pub fn record(&mut self, rtt: u32) {
        let rtt = rtt as i32;
        if self.srtt != 0 {
            // srtt is × 8 relative to delta's × 4 scale, hence the shift by 3.
            let mut delta = ((rtt - 1) << DELTA_SHIFT) - (self.srtt >> (RTT_SHIFT - DELTA_SHIFT));
            self.srtt += delta;
            if self.srtt <= 0 {
                self.srtt = 1;
            }
            delta = delta.abs() - (self.rttvar >> (RTTVAR_SHIFT - DELTA_SHIFT));
            self.rttvar += delta;
            if self.rttvar <= 0 {
                self.rttvar = 1;
            }
        } else {
            self.srtt = rtt << RTT_SHIFT;
            self.rttvar = rtt << (RTTVAR_SHIFT - 1);
        }
        self.sample = None;
        self.rxtshift = 0;

        let floor = self.rttmin.max(rtt as u32 + 2).min(REXMT_MAX);
        self.rxtcur = clamp(self.rexmtval(), floor, REXMT_MAX);
    }

    /// Apply one retransmission timeout to the backoff shift and the RTO.
    /// After more than three consecutive timeouts the smoothed RTT is dropped.
    ///
    /// Returns `true` the first time the shift reaches [`MAX_RXT_SHIFT`].
    pub fn back_off(&mut self) -> bool {
        let capped_now = self.rxtshift + 1 == MAX_RXT_SHIFT;
        self.rxtshift = (self.rxtshift + 1).min(MAX_RXT_SHIFT);

        let rexmt = self.rexmtval().saturating_mul(BACKOFF[self.rxtshift]);
        self.rxtcur = clamp(rexmt, self.rttmin, REXMT_MAX);

        if self.rxtshift > MAX_RXT_SHIFT / 4 {
            self.rttvar += self.srtt >> RTT_SHIFT;
            self.srtt = 0;
        }
        self.sample = None;
        capped_now
    }
}

fn clamp(value: u32, min: u32, max: u32) -> u32 {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}
