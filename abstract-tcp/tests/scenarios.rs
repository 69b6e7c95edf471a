//! Protocol scenarios driven by hand.
//!
//! Each test owns one or two `Transport` instances and a recording host per
//! node, and moves encoded segments between them explicitly, so every
//! segment on the wire can be inspected.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use abstract_tcp::timer::{TimerKind, KEEP_INIT, MAX_RXT_SHIFT, REXMT_MAX};
use abstract_tcp::{
    AppEvent, AppType, ConnectionId, ConnectionState, Endpoint, Host, OpenKind, OpenRequest,
    OutboundSegment, Segment, SegmentKind, TcpConfig, TcpError, Transport,
};

const A: Endpoint = Endpoint::new(0x0a00_0001, 1024);
const B: Endpoint = Endpoint::new(0x0a00_0002, 21);
const APP: AppType = AppType(21);
const MSS: u32 = 1024;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Recorder {
    sent: Vec<OutboundSegment>,
    events: Vec<AppEvent>,
}

impl Host for Recorder {
    fn now(&self) -> Duration {
        Duration::ZERO
    }
    fn send_segment(&mut self, segment: OutboundSegment) {
        self.sent.push(segment);
    }
    fn notify(&mut self, event: AppEvent) {
        self.events.push(event);
    }
    fn schedule_tick(&mut self, _delay: Duration) {}
}

impl Recorder {
    fn segments(&self) -> Vec<Segment> {
        self.sent
            .iter()
            .map(|o| Segment::decode(&o.bytes).expect("engine emitted a malformed segment"))
            .collect()
    }

    fn received(&self) -> Vec<Vec<u8>> {
        self.events
            .iter()
            .filter_map(|e| match e {
                AppEvent::DataReceived { payload, .. } => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&AppEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

fn transport() -> Transport {
    Transport::new(TcpConfig::default()).unwrap()
}

fn open(t: &mut Transport, host: &mut Recorder) -> ConnectionId {
    t.open(
        host,
        OpenRequest {
            local: A,
            remote: B,
            app_type: APP,
            priority: 0,
            unique_id: 1,
            interface: None,
        },
    )
    .unwrap()
}

/// Deliver everything `from` has sent into `to`, in order.
fn deliver(from: &mut Recorder, to: &mut Transport, to_host: &mut Recorder) -> usize {
    let batch = std::mem::take(&mut from.sent);
    for seg in &batch {
        to.input(to_host, &seg.bytes, seg.priority).unwrap();
    }
    batch.len()
}

fn data(seq: u32, payload: Vec<u8>) -> Vec<u8> {
    Segment::data(A, B, seq, 16384, payload).encode()
}

fn ack(n: u32) -> Vec<u8> {
    Segment::ack(B, A, n, 16384).encode()
}

fn tick(t: &mut Transport, host: &mut Recorder, n: u32) {
    for _ in 0..n {
        t.tick(host);
    }
}

// ---------------------------------------------------------------------------
// Open, send, acknowledge
// ---------------------------------------------------------------------------

#[test]
fn first_segment_is_accepted_delivered_and_acknowledged() {
    let (mut a, mut ha) = (transport(), Recorder::default());
    let (mut b, mut hb) = (transport(), Recorder::default());
    b.listen(&mut hb, B, APP, 0).unwrap();
    let id = open(&mut a, &mut ha);

    a.send(&mut ha, id, b"X".to_vec()).unwrap();
    let out = ha.segments();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].kind(), SegmentKind::Data);
    assert_eq!(out[0].header.seq, 1);
    assert_eq!(out[0].header.ack, 0);
    assert_eq!(out[0].payload, b"X");
    assert!(a.connection(id).unwrap().timers.is_armed(TimerKind::Rexmt));
    assert_eq!(
        ha.count(|e| matches!(e, AppEvent::DataSent { len: 1, .. })),
        1
    );

    deliver(&mut ha, &mut b, &mut hb);
    assert!(matches!(
        hb.events[1],
        AppEvent::OpenResult { kind: OpenKind::Passive, unique_id: None, result: Ok(_), .. }
    ));
    assert_eq!(hb.received(), vec![b"X".to_vec()]);
    let acks = hb.segments();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].kind(), SegmentKind::Ack);
    assert_eq!(acks[0].header.ack, 2);

    deliver(&mut hb, &mut a, &mut ha);
    let ccb = a.connection(id).unwrap();
    assert_eq!(ccb.snd_una, 2);
    assert!(ccb.send.is_empty());
    assert!(!ccb.timers.is_armed(TimerKind::Rexmt));
    assert_eq!(a.stats().rcv_ack_pack, 1);
}

#[test]
fn passive_connection_inherits_listener_app_type_and_priority() {
    let (mut b, mut hb) = (transport(), Recorder::default());
    b.listen(&mut hb, B, AppType(9), 0).unwrap();
    b.input(&mut hb, &data(1, vec![7; 10]), 3).unwrap();

    let ccb = b
        .connections()
        .find(|c| !c.is_listener())
        .expect("accepted connection");
    assert_eq!(ccb.app_type, AppType(9));
    assert_eq!(ccb.priority, 3);
    assert_eq!(ccb.tuple.remote, A);
    assert_eq!(hb.sent[0].priority, 3);
}

#[test]
fn first_segment_without_listener_is_counted() {
    let (mut b, mut hb) = (transport(), Recorder::default());
    b.input(&mut hb, &data(1, vec![1; 10]), 0).unwrap();
    assert_eq!(b.stats().rcv_no_listener, 1);
    assert_eq!(b.connections().count(), 0);
    assert!(hb.sent.is_empty());
}

#[test]
fn stray_segments_report_no_connection() {
    let (mut b, mut hb) = (transport(), Recorder::default());
    b.listen(&mut hb, B, APP, 0).unwrap();
    let err = b.input(&mut hb, &data(1025, vec![1; 10]), 0).unwrap_err();
    assert!(matches!(err, TcpError::NoConnection(_)));
    let err = b
        .input(&mut hb, &Segment::ack(A, B, 5, 100).encode(), 0)
        .unwrap_err();
    assert!(matches!(err, TcpError::NoConnection(_)));
}

#[test]
fn malformed_segments_are_counted_and_dropped() {
    let (mut b, mut hb) = (transport(), Recorder::default());
    b.input(&mut hb, &[0; 10], 0).unwrap();
    b.input(&mut hb, &data(0, vec![1]), 0).unwrap();
    let stats = b.stats();
    assert_eq!(stats.rcv_total, 2);
    assert_eq!(stats.rcv_short, 1);
    assert_eq!(stats.rcv_bad, 1);
}

// ---------------------------------------------------------------------------
// Loss recovery
// ---------------------------------------------------------------------------

#[test]
fn three_duplicate_acks_trigger_one_fast_retransmit() {
    let (mut a, mut ha) = (transport(), Recorder::default());
    let id = open(&mut a, &mut ha);
    a.send(&mut ha, id, vec![0; MSS as usize]).unwrap();
    ha.sent.clear();

    for _ in 0..3 {
        a.input(&mut ha, &ack(1), 0).unwrap();
    }
    let resent = ha.segments();
    assert_eq!(resent.len(), 1);
    assert_eq!(resent[0].header.seq, 1);

    let ccb = a.connection(id).unwrap();
    assert_eq!(ccb.cc.ssthresh, 2 * MSS);
    assert_eq!(ccb.cc.cwnd, ccb.cc.ssthresh + 3 * MSS);
    let stats = a.stats();
    assert_eq!(stats.rcv_dup_ack, 3);
    assert_eq!(stats.snd_fast_rexmit, 1);
    assert_eq!(stats.snd_rexmit_pack, 1);

    // Further duplicates only inflate the window.
    a.input(&mut ha, &ack(1), 0).unwrap();
    assert_eq!(ha.sent.len(), 1);
    assert_eq!(a.connection(id).unwrap().cc.cwnd, 6 * MSS);
    assert_eq!(a.stats().snd_fast_rexmit, 1);
}

#[test]
fn jumbo_mss_opens_the_window_on_first_ack() {
    let cfg = TcpConfig {
        mss: 70_000,
        send_buffer: 140_000,
        recv_buffer: 65_535,
        ..TcpConfig::default()
    };
    let (mut a, mut ha) = (Transport::new(cfg).unwrap(), Recorder::default());
    let id = open(&mut a, &mut ha);
    a.send(&mut ha, id, vec![1; 70_000]).unwrap();
    a.input(&mut ha, &ack(70_001), 0).unwrap();

    let ccb = a.connection(id).unwrap();
    assert_eq!(ccb.snd_una, 70_001);
    assert_eq!(ccb.cc.cwnd, 140_000);
}

#[test]
fn new_ack_deflates_after_fast_recovery() {
    let (mut a, mut ha) = (transport(), Recorder::default());
    let id = open(&mut a, &mut ha);
    a.send(&mut ha, id, vec![0; MSS as usize]).unwrap();
    for _ in 0..4 {
        a.input(&mut ha, &ack(1), 0).unwrap();
    }
    a.input(&mut ha, &ack(1 + MSS), 0).unwrap();

    let ccb = a.connection(id).unwrap();
    assert_eq!(ccb.cc.dupacks, 0);
    // deflated to ssthresh, then one slow-start step
    assert_eq!(ccb.cc.cwnd, 3 * MSS);
}

#[test]
fn duplicate_acks_without_outstanding_data_do_not_count() {
    let (mut a, mut ha) = (transport(), Recorder::default());
    let id = open(&mut a, &mut ha);
    for _ in 0..5 {
        a.input(&mut ha, &ack(1), 0).unwrap();
    }
    assert_eq!(a.connection(id).unwrap().cc.dupacks, 0);
    assert_eq!(a.stats().snd_fast_rexmit, 0);
    assert!(ha.sent.is_empty());
}

#[test]
fn retransmission_timeout_collapses_window_and_rewinds() {
    let (mut a, mut ha) = (transport(), Recorder::default());
    let id = open(&mut a, &mut ha);
    a.send(&mut ha, id, vec![0; MSS as usize]).unwrap();
    ha.sent.clear();

    let rxtcur = a.connection(id).unwrap().rtt.rxtcur;
    tick(&mut a, &mut ha, rxtcur);

    let ccb = a.connection(id).unwrap();
    assert_eq!(ccb.cc.cwnd, MSS);
    assert_eq!(ccb.cc.ssthresh, 2 * MSS);
    assert_eq!(ccb.rtt.rxtshift, 1);
    assert_eq!(ccb.snd_una, 1);
    assert_eq!(ccb.snd_nxt, 1 + MSS);
    assert_eq!(ccb.send.cursor(), 1);

    let resent = ha.segments();
    assert_eq!(resent.len(), 1);
    assert_eq!(resent[0].header.seq, 1);
    assert_eq!(a.stats().snd_rexmit_pack, 1);
}

#[test]
fn backoff_caps_and_keeps_retransmitting() {
    let (mut a, mut ha) = (transport(), Recorder::default());
    let id = open(&mut a, &mut ha);
    a.send(&mut ha, id, vec![0; 100]).unwrap();
    a.input(&mut ha, &ack(101), 0).unwrap();
    a.send(&mut ha, id, vec![0; 100]).unwrap();
    ha.sent.clear();

    tick(&mut a, &mut ha, 4000);

    let ccb = a.connection(id).unwrap();
    assert_eq!(ccb.rtt.rxtshift, MAX_RXT_SHIFT);
    assert_eq!(ccb.rtt.rxtcur, REXMT_MAX);
    assert_eq!(ccb.cc.cwnd, MSS);
    assert_eq!(ccb.state, ConnectionState::Established);
    assert!(ccb.timers.is_armed(TimerKind::Rexmt));
    assert!(ha.sent.len() > MAX_RXT_SHIFT);
}

#[test]
fn open_with_nothing_acknowledged_expires() {
    let (mut a, mut ha) = (transport(), Recorder::default());
    let id = open(&mut a, &mut ha);
    tick(&mut a, &mut ha, KEEP_INIT);
    assert!(matches!(
        ha.events.last(),
        Some(AppEvent::OpenExpired { id: got, unique_id: Some(1), .. }) if *got == id
    ));
    tick(&mut a, &mut ha, KEEP_INIT);
    assert_eq!(
        ha.count(|e| matches!(e, AppEvent::OpenExpired { .. })),
        1
    );
}

// ---------------------------------------------------------------------------
// Receive sequencing
// ---------------------------------------------------------------------------

#[test]
fn reverse_order_arrivals_are_delivered_in_order() {
    let (mut b, mut hb) = (transport(), Recorder::default());
    b.listen(&mut hb, B, APP, 0).unwrap();
    let (p1, p2, p3) = (vec![1; 100], vec![2; 100], vec![3; 100]);

    b.input(&mut hb, &data(1, p1.clone()), 0).unwrap();
    b.input(&mut hb, &data(201, p3.clone()), 0).unwrap();
    assert_eq!(hb.received().len(), 1);
    b.input(&mut hb, &data(101, p2.clone()), 0).unwrap();

    assert_eq!(hb.received(), vec![p1, p2, p3]);
    let acks: Vec<u32> = hb.segments().iter().map(|s| s.header.ack).collect();
    assert_eq!(acks, vec![101, 101, 301]);
}

#[test]
fn empty_data_segment_does_not_disturb_reassembly() {
    let (mut b, mut hb) = (transport(), Recorder::default());
    b.listen(&mut hb, B, APP, 0).unwrap();
    let (p1, p2, p3) = (vec![1; 100], vec![2; 100], vec![3; 100]);

    b.input(&mut hb, &data(1, p1.clone()), 0).unwrap();
    b.input(&mut hb, &data(201, p3.clone()), 0).unwrap();
    b.input(&mut hb, &data(101, Vec::new()), 0).unwrap();
    b.input(&mut hb, &data(101, p2.clone()), 0).unwrap();

    assert_eq!(hb.received(), vec![p1, p2, p3]);
    assert_eq!(b.stats().rcv_bad, 1);
    let ccb = b
        .connections()
        .find(|c| !c.is_listener())
        .expect("accepted connection");
    assert_eq!(ccb.recv.rcv_nxt, 301);
    assert_eq!(ccb.recv.held(), 0);
}

#[test]
fn redelivered_segment_is_acknowledged_not_delivered() {
    let (mut b, mut hb) = (transport(), Recorder::default());
    b.listen(&mut hb, B, APP, 0).unwrap();
    let seg = data(1, vec![5; 100]);
    b.input(&mut hb, &seg, 0).unwrap();
    b.input(&mut hb, &seg, 0).unwrap();

    assert_eq!(hb.received().len(), 1);
    assert_eq!(b.stats().rcv_dup_pack, 1);
    let acks: Vec<u32> = hb.segments().iter().map(|s| s.header.ack).collect();
    assert_eq!(acks, vec![101, 101]);
}

#[test]
fn any_arrival_order_after_the_first_reassembles() {
    for seed in 0..20 {
        let mut rng = StdRng::seed_from_u64(seed);
        let (mut b, mut hb) = (transport(), Recorder::default());
        b.listen(&mut hb, B, APP, 0).unwrap();

        let payloads: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i; 100]).collect();
        let mut order: Vec<usize> = (1..payloads.len()).collect();
        order.shuffle(&mut rng);

        b.input(&mut hb, &data(1, payloads[0].clone()), 0).unwrap();
        for i in order {
            let seq = 1 + 100 * i as u32;
            b.input(&mut hb, &data(seq, payloads[i].clone()), 0).unwrap();
        }

        assert_eq!(hb.received(), payloads, "seed {seed}");
        let last = hb.segments().last().map(|s| s.header.ack);
        assert_eq!(last, Some(1001), "seed {seed}");
    }
}

#[test]
fn delayed_ack_skips_odd_segments() {
    let cfg = TcpConfig {
        delayed_ack: true,
        ..TcpConfig::default()
    };
    let (mut b, mut hb) = (Transport::new(cfg).unwrap(), Recorder::default());
    b.listen(&mut hb, B, APP, 0).unwrap();
    for k in 0..4u32 {
        b.input(&mut hb, &data(1 + k * MSS, vec![0; MSS as usize]), 0)
            .unwrap();
    }
    let acks: Vec<u32> = hb.segments().iter().map(|s| s.header.ack).collect();
    assert_eq!(acks, vec![1 + MSS, 1 + 3 * MSS]);
}

// ---------------------------------------------------------------------------
// Close
// ---------------------------------------------------------------------------

#[test]
fn close_waits_for_buffer_to_drain() {
    let (mut a, mut ha) = (transport(), Recorder::default());
    let (mut b, mut hb) = (transport(), Recorder::default());
    b.listen(&mut hb, B, APP, 0).unwrap();
    let id = open(&mut a, &mut ha);

    for i in 0..3u8 {
        a.send(&mut ha, id, vec![i; MSS as usize]).unwrap();
    }
    a.close(&mut ha, id).unwrap();
    assert_eq!(a.connection(id).unwrap().state, ConnectionState::FinWait1);

    while !ha.sent.is_empty() || !hb.sent.is_empty() {
        deliver(&mut ha, &mut b, &mut hb);
        deliver(&mut hb, &mut a, &mut ha);
    }

    assert_eq!(a.connection(id).unwrap().state, ConnectionState::Closed);
    assert_eq!(
        ha.count(|e| matches!(e, AppEvent::CloseResult { .. })),
        1
    );
    assert_eq!(
        hb.count(|e| matches!(e, AppEvent::CloseResult { .. })),
        1
    );
    assert_eq!(hb.received().concat().len(), 3 * MSS as usize);
    assert!(b
        .connections()
        .filter(|c| !c.is_listener())
        .all(|c| c.state.is_closed()));
}

#[test]
fn send_on_closed_connection_is_refused() {
    let (mut a, mut ha) = (transport(), Recorder::default());
    let id = open(&mut a, &mut ha);
    a.close(&mut ha, id).unwrap();
    assert_eq!(
        a.send(&mut ha, id, vec![1]).unwrap_err(),
        TcpError::NotEstablished(id)
    );
}

// ---------------------------------------------------------------------------
// Send buffer limits
// ---------------------------------------------------------------------------

#[test]
fn oversize_and_overflowing_payloads_are_rejected() {
    let cfg = TcpConfig {
        send_buffer: 2048,
        ..TcpConfig::default()
    };
    let (mut a, mut ha) = (Transport::new(cfg).unwrap(), Recorder::default());
    let id = open(&mut a, &mut ha);

    assert_eq!(
        a.send(&mut ha, id, vec![0; 2000]).unwrap_err(),
        TcpError::PayloadTooLarge { len: 2000, mss: 1024 }
    );
    a.send(&mut ha, id, vec![0; 1024]).unwrap();
    a.send(&mut ha, id, vec![0; 1000]).unwrap();
    assert_eq!(
        a.send(&mut ha, id, vec![0; 100]).unwrap_err(),
        TcpError::SendBufferFull { len: 100, free: 24 }
    );
    assert_eq!(a.connection(id).unwrap().send.cached(), 2024);
}

#[test]
fn data_sent_is_deferred_until_room_frees() {
    let cfg = TcpConfig {
        send_buffer: 2048,
        ..TcpConfig::default()
    };
    let (mut a, mut ha) = (Transport::new(cfg).unwrap(), Recorder::default());
    let id = open(&mut a, &mut ha);

    a.send(&mut ha, id, vec![0; 1024]).unwrap();
    a.send(&mut ha, id, vec![0; 512]).unwrap();
    let sent = |h: &Recorder| h.count(|e| matches!(e, AppEvent::DataSent { .. }));
    assert_eq!(sent(&ha), 1);

    a.input(&mut ha, &ack(1 + MSS), 0).unwrap();
    assert_eq!(sent(&ha), 2);
    assert!(matches!(
        ha.events.last(),
        Some(AppEvent::DataSent { len: 512, .. })
    ));

    a.input(&mut ha, &ack(1 + MSS + 512), 0).unwrap();
    assert_eq!(sent(&ha), 2);
}
