//! tcpdump-style segment trace.
//!
//! When enabled, every traced segment produces one line on the
//! `abstract_tcp::trace` log target:
//!
//! ```text
//! 0:0:1.250000000 10.0.0.1.1024 > 10.0.0.2.21  :  1025:2049(1024) win 16384 cwnd:2048 ssthresh:65535 una:1025 nxt:2049 max:3073
//! ```
//!
//! The `seq:end(len)` part only appears when the segment carries data, and
//! `ack N` only when the acknowledgment field is non-zero.

use std::fmt::Write as _;
use std::time::Duration;

use crate::ccb::Ccb;
use crate::config::{TcpConfig, TraceDirection};
use crate::segment::Segment;

pub const TRACE_TARGET: &str = "abstract_tcp::trace";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tracer {
    direction: Option<TraceDirection>,
}

impl Tracer {
    pub fn from_config(config: &TcpConfig) -> Self {
        Self {
            direction: config.trace.then_some(config.trace_direction),
        }
    }

    pub fn input(&self, now: Duration, seg: &Segment, ccb: &Ccb) {
        if self.direction.is_some_and(TraceDirection::includes_input) {
            log::info!(target: TRACE_TARGET, "{}", format_line(now, seg, ccb));
        }
    }

    pub fn output(&self, now: Duration, seg: &Segment, ccb: &Ccb) {
        if self.direction.is_some_and(TraceDirection::includes_output) {
            log::info!(target: TRACE_TARGET, "{}", format_line(now, seg, ccb));
        }
    }
}

/// Render `now` as `H:M:S.fraction`.
fn clock(now: Duration) -> String {
    let secs = now.as_secs();
    format!(
        "{}:{}:{}.{:09}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        now.subsec_nanos()
    )
}

pub fn format_line(now: Duration, seg: &Segment, ccb: &Ccb) -> String {
    let h = &seg.header;
    let mut line = format!(
        "{} {}.{:<4} > {}.{:<4}:  ",
        clock(now),
        std::net::Ipv4Addr::from(h.src.addr),
        h.src.port,
        std::net::Ipv4Addr::from(h.dst.addr),
        h.dst.port,
    );
    let len = seg.payload.len() as u32;
    if len > 0 {
        let _ = write!(line, "{}:{}({}) ", h.seq, h.seq + len, len);
    }
    if h.ack != 0 {
        let _ = write!(line, "ack {} ", h.ack);
    }
    let _ = write!(
        line,
        "win {} cwnd:{} ssthresh:{} una:{} nxt:{} max:{}",
        h.window, ccb.cc.cwnd, ccb.cc.ssthresh, ccb.snd_una, ccb.snd_nxt, ccb.snd_max
    );
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ccb::{AppType, AttachParams, CcbTable, FourTuple};
    use crate::segment::Endpoint;

    fn ccb_table() -> (CcbTable, TcpConfig) {
        let cfg = TcpConfig::default();
        let mut t = CcbTable::new();
        t.attach(
            AttachParams {
                tuple: FourTuple::new(Endpoint::new(0x0a00_0001, 1024), Endpoint::new(0x0a00_0002, 21)),
                app_type: AppType(1),
                unique_id: Some(1),
                priority: 0,
                interface: None,
            },
            &cfg,
        );
        (t, cfg)
    }

    #[test]
    fn clock_is_hours_minutes_seconds() {
        assert_eq!(clock(Duration::from_millis(3_723_500)), "1:2:3.500000000");
    }

    #[test]
    fn data_line_has_range_and_no_ack() {
        let (t, _) = ccb_table();
        let ccb = t.iter().next().unwrap();
        let seg = Segment::data(ccb.tuple.local, ccb.tuple.remote, 1, 16384, vec![0; 1024]);
        let line = format_line(Duration::ZERO, &seg, ccb);
        assert_eq!(
            line,
            "0:0:0.000000000 10.0.0.1.1024 > 10.0.0.2.21  :  1:1025(1024) win 16384 \
             cwnd:1024 ssthresh:65535 una:1 nxt:1 max:1025"
        );
    }

    #[test]
    fn ack_line_has_ack_and_no_range() {
        let (t, _) = ccb_table();
        let ccb = t.iter().next().unwrap();
        let seg = Segment::ack(ccb.tuple.local, ccb.tuple.remote, 1025, 15360);
        let line = format_line(Duration::ZERO, &seg, ccb);
        assert!(line.contains(":  ack 1025 win 15360 "));
        assert!(!line.contains('('));
    }

    #[test]
    fn disabled_tracer_has_no_direction() {
        let tracer = Tracer::from_config(&TcpConfig::default());
        assert_eq!(tracer.direction, None);
        let on = Tracer::from_config(&TcpConfig {
            trace: true,
            trace_direction: TraceDirection::Output,
            ..TcpConfig::default()
        });
        assert_eq!(on.direction, Some(TraceDirection::Output));
    }
}
