//! Inbound path: segment decode, ACK processing and data processing.
//!
//! ```text
//!  input(bytes)
//!     │ decode (too short / malformed: count, drop)
//!     ├── Ack ───────────────────────▶ handle_ack (dup-ACK / Reno)
//!     ├── Data ── diagnostic drops ──┐
//!     └── Close ─────────────────────┴▶ handle_data
//!                                        ├ Close   → close connection
//!                                        ├ First   → passive accept, deliver, ACK
//!                                        ├ InOrder → deliver, ACK (maybe delayed)
//!                                        ├ Early   → park, reassemble, ACK
//!                                        └ Dup     → count, ACK
//! ```

use rand::Rng;

use crate::ccb::{AttachParams, ConnectionId, FourTuple};
use crate::config::VERIFICATION_DROP_SEQS;
use crate::congestion::DupAckAction;
use crate::output::{send_ack, transmit};
use crate::receiver::{Arrival, Parked};
use crate::segment::{Segment, SegmentError, SegmentKind};
use crate::state::ConnectionState;
use crate::timer::TimerKind;
use crate::transport::{AppEvent, Host, OpenKind, TcpError, Transport};

impl Transport {
    /// Process one segment delivered by the network layer.
    ///
    /// `priority` is the traffic class the segment travelled with; a
    /// connection created by passive accept inherits it.
    ///
    /// Malformed segments and diagnostic drops are counted and yield `Ok`.
    /// A segment that belongs to no connection yields
    /// [`TcpError::NoConnection`].
    pub fn input(&mut self, host: &mut dyn Host, bytes: &[u8], priority: u8) -> Result<(), TcpError> {
        self.stats.rcv_total += 1;
        let seg = match Segment::decode(bytes) {
            Ok(seg) => seg,
            Err(err) => {
                match err {
                    SegmentError::BufferTooShort(_) => self.stats.rcv_short += 1,
                    SegmentError::ZeroSequence | SegmentError::EmptyData => {
                        self.stats.rcv_bad += 1
                    }
                }
                log::debug!("[tcp] ← dropping malformed segment: {err}");
                return Ok(());
            }
        };
        if !seg.payload.is_empty() {
            self.stats.rcv_pack += 1;
        }

        match seg.kind() {
            SegmentKind::Ack => self.handle_ack(host, &seg),
            SegmentKind::Data if self.diagnostic_drop(&seg) => Ok(()),
            SegmentKind::Data | SegmentKind::Close => self.handle_data(host, seg, priority),
        }
    }

    /// Random and verification drops, for exercising loss recovery.
    fn diagnostic_drop(&mut self, seg: &Segment) -> bool {
        let pct = self.config.random_drop_percent;
        if pct > 0.0 && self.rng.random::<f64>() < pct / 100.0 {
            self.stats.rcv_total -= 1;
            self.stats.rcv_dropped += 1;
            log::debug!("[tcp] ← random drop seq={}", seg.header.seq);
            return true;
        }

        let active = self.config.verification_drop_count;
        for (i, &drop_seq) in VERIFICATION_DROP_SEQS.iter().take(active).enumerate() {
            if seg.header.seq == drop_seq && !self.verification_dropped[i] {
                self.verification_dropped[i] = true;
                self.stats.rcv_total -= 1;
                self.stats.rcv_dropped += 1;
                log::debug!("[tcp] ← verification drop seq={drop_seq}");
                return true;
            }
        }
        false
    }

    // -----------------------------------------------------------------------
    // ACK processing
    // -----------------------------------------------------------------------

    fn handle_ack(&mut self, host: &mut dyn Host, seg: &Segment) -> Result<(), TcpError> {
        let h = &seg.header;
        let tuple = FourTuple::new(h.dst, h.src);
        let Some(id) = self.ccbs.lookup(tuple.local, tuple.remote, false) else {
            log::warn!("[tcp] ← ACK for unknown connection {tuple}");
            return Err(TcpError::NoConnection(tuple));
        };

        let Transport {
            ccbs,
            stats,
            tracer,
            ..
        } = self;
        let Some(ccb) = ccbs.get_mut(id) else {
            return Err(TcpError::UnknownConnection(id));
        };
        tracer.input(host.now(), seg, ccb);

        if ccb.state.is_closed() {
            stats.rcv_ack_pack += 1;
            log::debug!("[tcp] {id} ← ACK ack={} on closed connection", h.ack);
            return Ok(());
        }

        let ack = h.ack;
        if ack <= ccb.snd_una {
            stats.rcv_dup_ack += 1;
            if !ccb.timers.is_armed(TimerKind::Rexmt) || ack != ccb.snd_una {
                ccb.cc.reset_dupacks();
            } else {
                match ccb.cc.on_duplicate_ack() {
                    DupAckAction::Count => {}
                    DupAckAction::FastRetransmit => {
                        log::debug!(
                            "[tcp] {id} fast retransmit una={} ssthresh={}",
                            ccb.snd_una,
                            ccb.cc.ssthresh
                        );
                        ccb.rtt.clear_sample();
                        stats.snd_fast_rexmit += 1;
                        if let Some(head) = ccb.send.head() {
                            let (seq, payload) = (head.seq, head.payload.clone());
                            transmit(host, stats, *tracer, ccb, seq, payload);
                        }
                        ccb.timers.arm(TimerKind::Rexmt, ccb.rtt.rxtcur);
                        if ccb.cc.cwnd < ccb.send.capacity() as u32 {
                            ccb.snd_max = ccb.snd_nxt.max(ccb.snd_una + ccb.cc.cwnd);
                        }
                    }
                    DupAckAction::Inflate => {
                        log::debug!("[tcp] {id} inflating cwnd to {}", ccb.cc.cwnd);
                        if ccb.cc.cwnd < ccb.send.capacity() as u32 {
                            ccb.snd_max = ccb.snd_nxt.max(ccb.snd_una + ccb.cc.cwnd);
                        }
                        ccb.peer_wnd = u32::from(h.window);
                        self.output(host, id);
                        return Ok(());
                    }
                }
            }
            ccb.peer_wnd = u32::from(h.window);
            log::debug!("[tcp] {id} ← dup ACK ack={ack} dupacks={}", ccb.cc.dupacks);
            return Ok(());
        }

        ccb.cc.on_new_ack();
        if ack > ccb.snd_high {
            log::debug!("[tcp] {id} ← ACK ack={ack} beyond anything sent");
            return Ok(());
        }
        stats.rcv_ack_pack += 1;
        log::debug!("[tcp] {id} ← ACK ack={ack}");

        let released = ccb.send.release_through(ack);
        if released > 0
            && ccb.data_sent_pending
            && ccb.send.has_room_for(ccb.mss as usize)
        {
            ccb.data_sent_pending = false;
            host.notify(AppEvent::DataSent {
                id,
                app_type: ccb.app_type,
                len: ccb.send.last_len(),
            });
        }

        if let Some(sample) = ccb.rtt.sample() {
            if ack > sample.seq {
                ccb.rtt.record(sample.ticks);
            }
        }

        ccb.snd_una = ack;
        ccb.refresh_in_flight();
        if ccb.snd_wnd == 0 {
            ccb.timers.cancel(TimerKind::Rexmt);
        } else {
            ccb.timers.arm(TimerKind::Rexmt, ccb.rtt.rxtcur);
        }

        let limit = ccb.send.capacity() as u32;
        ccb.cc.grow(limit);
        ccb.peer_wnd = u32::from(h.window);
        ccb.snd_nxt = ccb.snd_nxt.max(ccb.snd_una);
        ccb.snd_max = ccb.snd_nxt.max(ccb.snd_una + ccb.usable_window());

        if ccb.send.is_empty() && ccb.state == ConnectionState::FinWait1 {
            self.close(host, id)
        } else {
            self.output(host, id);
            Ok(())
        }
    }

    // -----------------------------------------------------------------------
    // Data processing
    // -----------------------------------------------------------------------

    fn handle_data(&mut self, host: &mut dyn Host, seg: Segment, priority: u8) -> Result<(), TcpError> {
        let h = &seg.header;
        let tuple = FourTuple::new(h.dst, h.src);
        let existing = self.ccbs.lookup(tuple.local, tuple.remote, false);

        if seg.kind() == SegmentKind::Close {
            let Some(id) = existing else {
                log::warn!("[tcp] ← CLOSE for unknown connection {tuple}");
                return Err(TcpError::NoConnection(tuple));
            };
            let open = match self.ccbs.get(id) {
                Some(ccb) if !ccb.state.is_closed() => {
                    self.tracer.input(host.now(), &seg, ccb);
                    true
                }
                _ => false,
            };
            if !open {
                return Ok(());
            }
            log::debug!("[tcp] {id} ← CLOSE");
            return self.complete_close(host, id, false);
        }

        let id = match existing {
            Some(id) => id,
            None if h.seq == 1 => match self.passive_accept(host, tuple, priority) {
                Some(id) => id,
                None => return Ok(()),
            },
            None => {
                log::warn!("[tcp] ← DATA seq={} for unknown connection {tuple}", h.seq);
                return Err(TcpError::NoConnection(tuple));
            }
        };
        self.receive(host, id, seg)
    }

    /// Create a connection for the first packet of a session addressed to a
    /// listener.  Returns `None` when nobody is listening.
    fn passive_accept(&mut self, host: &mut dyn Host, tuple: FourTuple, priority: u8) -> Option<ConnectionId> {
        let Some(listener) = self.ccbs.lookup(tuple.local, tuple.remote, true) else {
            self.stats.rcv_no_listener += 1;
            log::warn!("[tcp] ← first packet for {tuple} but nothing is listening");
            return None;
        };
        let app_type = self.ccbs.get(listener)?.app_type;

        let ccb = self.ccbs.attach(
            AttachParams {
                tuple,
                app_type,
                unique_id: None,
                priority,
                interface: None,
            },
            &self.config,
        );
        let id = ccb.id;
        ccb.timers.cancel(TimerKind::Keep);
        ccb.snd_wnd = 0;
        log::debug!("[tcp] {id} passive open {tuple}");

        host.notify(AppEvent::OpenResult {
            kind: OpenKind::Passive,
            app_type,
            local: tuple.local,
            remote: tuple.remote,
            unique_id: None,
            result: Ok(id),
        });
        Some(id)
    }

    /// Sequence an inbound data segment on an existing connection.
    fn receive(&mut self, host: &mut dyn Host, id: ConnectionId, seg: Segment) -> Result<(), TcpError> {
        let Transport {
            ccbs,
            stats,
            tracer,
            config,
            ..
        } = self;
        let Some(ccb) = ccbs.get_mut(id) else {
            return Err(TcpError::UnknownConnection(id));
        };
        if ccb.state.is_closed() {
            log::debug!("[tcp] {id} ← DATA seq={} on closed connection", seg.header.seq);
            return Ok(());
        }
        tracer.input(host.now(), &seg, ccb);

        let seq = seg.header.seq;
        let len = seg.payload.len();
        let app_type = ccb.app_type;
        match ccb.recv.classify(seq) {
            Arrival::First => {
                log::debug!("[tcp] {id} ← DATA seq={seq} len={len} (first)");
                host.notify(AppEvent::DataReceived {
                    id,
                    app_type,
                    payload: seg.payload,
                });
                ccb.recv.accept_first(seq, len);
                send_ack(host, stats, *tracer, ccb);
            }
            Arrival::InOrder => {
                log::debug!("[tcp] {id} ← DATA seq={seq} len={len}");
                host.notify(AppEvent::DataReceived {
                    id,
                    app_type,
                    payload: seg.payload,
                });
                ccb.recv.accept_in_order(len);
                let mss = ccb.mss.max(1);
                if !config.delayed_ack || ((seq - 1) / mss) % 2 == 0 {
                    send_ack(host, stats, *tracer, ccb);
                }
            }
            Arrival::Early => {
                match ccb.recv.park(seq, seg.payload) {
                    Parked::NoRoom => {
                        log::debug!("[tcp] {id} ← DATA seq={seq} len={len} beyond receive buffer");
                        return Ok(());
                    }
                    Parked::AlreadyHeld => {
                        log::debug!("[tcp] {id} ← DATA seq={seq} already parked");
                    }
                    Parked::Stored => {
                        log::debug!("[tcp] {id} ← DATA seq={seq} len={len} parked out of order");
                    }
                }
                for payload in ccb.recv.reassemble() {
                    host.notify(AppEvent::DataReceived {
                        id,
                        app_type,
                        payload,
                    });
                }
                send_ack(host, stats, *tracer, ccb);
            }
            Arrival::Duplicate => {
                ccb.recv.record_duplicate();
                stats.rcv_dup_pack += 1;
                log::debug!("[tcp] {id} ← duplicate DATA seq={seq}");
                send_ack(host, stats, *tracer, ccb);
            }
        }
        Ok(())
    }
}
