//! The per-node transport instance and its boundary with the simulator.
//!
//! [`Transport`] owns every connection of one simulated node together with
//! the tick counter, statistics and configuration.  It performs no I/O and
//! keeps no clock of its own: every entry point borrows a [`Host`] and talks
//! to the outside world only through it.
//!
//! ```text
//!            application                         scheduler
//!   open / listen / send / close ▲ AppEvent        │ tick
//!               │                │                 │   ▲ schedule_tick
//!          ┌────▼────────────────┴─────────────────▼───┴──┐
//!          │                  Transport                   │
//!          │  lifecycle ── output ── input ── timers      │
//!          └────────────────────┬─────────────▲───────────┘
//!                  send_segment │             │ input(bytes)
//!                               ▼             │
//!                             network layer (Host)
//! ```
//!
//! Entry points are spread over several files by concern: [`crate::lifecycle`]
//! (open, listen, close), [`crate::output`] (send and the drain loop),
//! [`crate::input`] (segment arrival) and this module (instance state and the
//! periodic tick).

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::ccb::{AppType, Ccb, CcbTable, ConnectionId, FourTuple};
use crate::config::{ConfigError, TcpConfig, VERIFICATION_DROP_SEQS};
use crate::segment::Endpoint;
use crate::stats::TcpStats;
use crate::timer::{TimerKind, SLOW_TIMER_INTERVAL, TICK_JITTER};
use crate::trace::Tracer;

/// Added to the initial-sequence seed on every tick.
const ISS_INCR: u32 = 64_000;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TcpError {
    #[error("a connection for {0} already exists")]
    AlreadyConnected(FourTuple),
    #[error("{0} is already being listened on")]
    AlreadyListening(Endpoint),
    #[error("no connection with handle {0}")]
    UnknownConnection(ConnectionId),
    #[error("no connection for {0}")]
    NoConnection(FourTuple),
    #[error("send buffer full: {len} bytes offered, {free} free")]
    SendBufferFull { len: usize, free: usize },
    #[error("payload of {len} bytes exceeds the MSS of {mss}")]
    PayloadTooLarge { len: usize, mss: usize },
    #[error("connection {0} is not established")]
    NotEstablished(ConnectionId),
}

// ---------------------------------------------------------------------------
// Host boundary
// ---------------------------------------------------------------------------

/// A segment handed down to the network layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundSegment {
    pub src: u32,
    pub dst: u32,
    pub interface: Option<u32>,
    pub priority: u8,
    /// Encoded header and payload.
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenKind {
    Active,
    Passive,
}

/// Notifications delivered upward to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    OpenResult {
        kind: OpenKind,
        app_type: AppType,
        local: Endpoint,
        remote: Endpoint,
        unique_id: Option<u32>,
        result: Result<ConnectionId, TcpError>,
    },
    ListenResult {
        app_type: AppType,
        local: Endpoint,
        result: Result<ConnectionId, TcpError>,
    },
    /// Buffer space was freed; `len` is the size of the last payload the
    /// application enqueued.
    DataSent {
        id: ConnectionId,
        app_type: AppType,
        len: usize,
    },
    DataReceived {
        id: ConnectionId,
        app_type: AppType,
        payload: Vec<u8>,
    },
    CloseResult {
        id: ConnectionId,
        app_type: AppType,
    },
    /// An active open never had any data acknowledged.
    OpenExpired {
        id: ConnectionId,
        app_type: AppType,
        unique_id: Option<u32>,
    },
}

/// Everything the engine needs from the simulator it runs in.
pub trait Host {
    /// Current virtual time.
    fn now(&self) -> Duration;
    /// Hand a segment to the network layer.  Fire-and-forget.
    fn send_segment(&mut self, segment: OutboundSegment);
    /// Deliver a notification to the application layer.
    fn notify(&mut self, event: AppEvent);
    /// Call [`Transport::tick`] once `delay` has elapsed.
    fn schedule_tick(&mut self, delay: Duration);
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

pub struct Transport {
    pub(crate) config: TcpConfig,
    pub(crate) ccbs: CcbTable,
    pub(crate) stats: TcpStats,
    pub(crate) tracer: Tracer,
    pub(crate) rng: StdRng,
    /// Which verification drops have already happened.
    pub(crate) verification_dropped: [bool; VERIFICATION_DROP_SEQS.len()],
    tcp_now: u32,
    iss_seed: u32,
    started: bool,
}

impl Transport {
    pub fn new(config: TcpConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            tracer: Tracer::from_config(&config),
            rng: StdRng::seed_from_u64(config.seed),
            config,
            ccbs: CcbTable::new(),
            stats: TcpStats::default(),
            verification_dropped: [false; VERIFICATION_DROP_SEQS.len()],
            tcp_now: 0,
            iss_seed: 1,
            started: false,
        })
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    pub fn stats(&self) -> &TcpStats {
        &self.stats
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Ccb> {
        self.ccbs.get(id)
    }

    /// Live connections, newest first.
    pub fn connections(&self) -> impl Iterator<Item = &Ccb> {
        self.ccbs.iter()
    }

    /// Ticks elapsed since the instance was created.
    pub fn tcp_now(&self) -> u32 {
        self.tcp_now
    }

    pub fn iss_seed(&self) -> u32 {
        self.iss_seed
    }

    /// Request the first tick, at a random offset into the first period.
    pub(crate) fn start_timers(&mut self, host: &mut dyn Host) {
        if self.started {
            return;
        }
        self.started = true;
        let offset = self.rng.random_range(0..SLOW_TIMER_INTERVAL.as_nanos() as u64);
        host.schedule_tick(Duration::from_nanos(offset));
    }

    /// Age every armed timer on every connection by one tick, fire those
    /// that expire, and ask for the next tick.
    pub fn tick(&mut self, host: &mut dyn Host) {
        for id in self.ccbs.ids() {
            for kind in TimerKind::ALL {
                let fired = match self.ccbs.get_mut(id) {
                    Some(ccb) => ccb.timers.expire(kind),
                    None => break,
                };
                if fired {
                    match kind {
                        TimerKind::Rexmt => self.rexmt_timeout(host, id),
                        TimerKind::Keep => self.keep_timeout(host, id),
                    }
                }
            }
            if let Some(ccb) = self.ccbs.get_mut(id) {
                ccb.rtt.age_sample();
            }
        }
        self.iss_seed = self.iss_seed.wrapping_add(ISS_INCR);
        self.tcp_now = self.tcp_now.wrapping_add(1);

        let jitter = self.rng.random_range(0..=TICK_JITTER.as_nanos() as u64);
        host.schedule_tick(SLOW_TIMER_INTERVAL + Duration::from_nanos(jitter));
    }

    fn rexmt_timeout(&mut self, host: &mut dyn Host, id: ConnectionId) {
        let Some(ccb) = self.ccbs.get_mut(id) else {
            return;
        };
        if ccb.rtt.back_off() {
            log::warn!(
                "[tcp] {} reached maximum backoff; retransmitting at {} ticks",
                ccb.id,
                ccb.rtt.rxtcur
            );
        }
        ccb.timers.arm(TimerKind::Rexmt, ccb.rtt.rxtcur);
        ccb.cc.on_timeout(ccb.snd_wnd);

        ccb.snd_nxt = ccb.snd_una;
        ccb.send.rewind();
        ccb.snd_max = ccb.snd_una + ccb.usable_window();
        log::debug!(
            "[tcp] {} RTO shift={} rxtcur={} cwnd={} ssthresh={} una={}",
            ccb.id,
            ccb.rtt.rxtshift,
            ccb.rtt.rxtcur,
            ccb.cc.cwnd,
            ccb.cc.ssthresh,
            ccb.snd_una
        );
        self.output(host, id);
    }

    fn keep_timeout(&mut self, host: &mut dyn Host, id: ConnectionId) {
        let Some(ccb) = self.ccbs.get_mut(id) else {
            return;
        };
        if ccb.snd_una > ccb.iss {
            return;
        }
        ccb.timers.cancel_all();
        log::debug!("[tcp] {} open expired with nothing acknowledged", ccb.id);
        host.notify(AppEvent::OpenExpired {
            id,
            app_type: ccb.app_type,
            unique_id: ccb.unique_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Clock {
        ticks: Vec<Duration>,
    }

    impl Host for Clock {
        fn now(&self) -> Duration {
            Duration::ZERO
        }
        fn send_segment(&mut self, _segment: OutboundSegment) {}
        fn notify(&mut self, _event: AppEvent) {}
        fn schedule_tick(&mut self, delay: Duration) {
            self.ticks.push(delay);
        }
    }

    #[test]
    fn new_rejects_invalid_config() {
        let cfg = TcpConfig {
            mss: 16,
            ..TcpConfig::default()
        };
        assert!(matches!(
            Transport::new(cfg),
            Err(ConfigError::MssBelowMinimum(16))
        ));
    }

    #[test]
    fn first_tick_requested_once_within_one_period() {
        let mut t = Transport::new(TcpConfig::default()).unwrap();
        let mut host = Clock::default();
        t.start_timers(&mut host);
        t.start_timers(&mut host);
        assert_eq!(host.ticks.len(), 1);
        assert!(host.ticks[0] < SLOW_TIMER_INTERVAL);
    }

    #[test]
    fn tick_advances_clock_and_rearms_with_jitter() {
        let mut t = Transport::new(TcpConfig::default()).unwrap();
        let mut host = Clock::default();
        let seed = t.iss_seed();
        t.tick(&mut host);
        t.tick(&mut host);
        assert_eq!(t.tcp_now(), 2);
        assert_eq!(t.iss_seed(), seed.wrapping_add(2 * ISS_INCR));
        for delay in host.ticks {
            assert!(delay >= SLOW_TIMER_INTERVAL);
            assert!(delay <= SLOW_TIMER_INTERVAL + TICK_JITTER);
        }
    }
}
