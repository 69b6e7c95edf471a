//! Outbound path: enqueueing application data and draining it to the wire.
//!
//! ```text
//!  send(payload) ──▶ SendBuffer::enqueue ──▶ output()
//!                                              │
//!                     while snd_nxt < snd_max  │  and a slot is under the cursor
//!                                              ▼
//!                                        transmit(slot) ──▶ Host::send_segment
//! ```
//!
//! Data segments never carry an acknowledgment; ACKs are separate empty
//! segments built by [`send_ack`].

use crate::ccb::{Ccb, ConnectionId};
use crate::segment::Segment;
use crate::state::ConnectionState;
use crate::stats::TcpStats;
use crate::timer::TimerKind;
use crate::trace::Tracer;
use crate::transport::{AppEvent, Host, OutboundSegment, TcpError, Transport};

impl Transport {
    /// Queue `payload` on connection `id` and transmit whatever the window
    /// allows.
    ///
    /// A payload larger than the MSS, or one that does not fit in the send
    /// buffer, is logged and discarded.  If at least one more full segment
    /// still fits afterwards, [`AppEvent::DataSent`] fires immediately;
    /// otherwise it fires once acknowledgments free the space.  At most one
    /// `DataSent` fires per accepted payload: an ACK that frees room raises
    /// it only when this call deferred it.
    pub fn send(
        &mut self,
        host: &mut dyn Host,
        id: ConnectionId,
        payload: Vec<u8>,
    ) -> Result<(), TcpError> {
        let ccb = self
            .ccbs
            .get_mut(id)
            .ok_or(TcpError::UnknownConnection(id))?;
        if ccb.state != ConnectionState::Established || ccb.is_listener() {
            return Err(TcpError::NotEstablished(id));
        }

        let len = payload.len();
        let mss = ccb.mss as usize;
        if let Err(err) = ccb.send.enqueue(payload, mss) {
            log::warn!("[tcp] {id} dropping {len}-byte payload: {err}");
            return Err(err);
        }
        log::debug!(
            "[tcp] {id} queued {len} bytes, {} of {} cached",
            ccb.send.cached(),
            ccb.send.capacity()
        );

        if ccb.send.has_room_for(mss) {
            host.notify(AppEvent::DataSent {
                id,
                app_type: ccb.app_type,
                len,
            });
        } else {
            ccb.data_sent_pending = true;
        }

        if !ccb.send.is_empty() {
            self.output(host, id);
        }
        Ok(())
    }

    /// Transmit every queued slot the window allows, then make sure the
    /// retransmission timer covers whatever is in flight.
    pub(crate) fn output(&mut self, host: &mut dyn Host, id: ConnectionId) {
        let Transport {
            ccbs,
            stats,
            tracer,
            ..
        } = self;
        let Some(ccb) = ccbs.get_mut(id) else {
            return;
        };
        if ccb.state.is_closed() {
            return;
        }

        while ccb.snd_max > ccb.snd_nxt {
            let Some(slot) = ccb.send.next_unsent() else {
                break;
            };
            let seq = slot.seq;
            let payload = slot.payload.clone();
            let end = slot.end();
            ccb.send.advance_cursor();

            transmit(host, stats, *tracer, ccb, seq, payload);

            ccb.snd_nxt = end;
            ccb.snd_high = ccb.snd_high.max(ccb.snd_nxt);
            ccb.snd_max = ccb.snd_max.max(ccb.snd_nxt);
        }

        ccb.refresh_in_flight();
        if !ccb.timers.is_armed(TimerKind::Rexmt) && ccb.snd_wnd > 0 {
            ccb.timers.arm(TimerKind::Rexmt, ccb.rtt.rxtcur);
        }
    }
}

// ---------------------------------------------------------------------------
// Segment emitters
// ---------------------------------------------------------------------------

/// Send one data segment for `seq`, starting an RTT sample if none is
/// running.
pub(crate) fn transmit(
    host: &mut dyn Host,
    stats: &mut TcpStats,
    tracer: Tracer,
    ccb: &mut Ccb,
    seq: u32,
    payload: Vec<u8>,
) {
    if seq < ccb.snd_high {
        stats.snd_rexmit_pack += 1;
    } else {
        stats.snd_pack += 1;
    }
    ccb.rtt.start_sample(seq);
    log::debug!("[tcp] {} → DATA seq={} len={}", ccb.id, seq, payload.len());

    let seg = Segment::data(
        ccb.tuple.local,
        ccb.tuple.remote,
        seq,
        ccb.recv.window(),
        payload,
    );
    emit(host, stats, tracer, ccb, &seg);
}

/// Acknowledge everything received in order so far.
pub(crate) fn send_ack(host: &mut dyn Host, stats: &mut TcpStats, tracer: Tracer, ccb: &Ccb) {
    stats.snd_acks += 1;
    log::debug!(
        "[tcp] {} → ACK ack={} win={}",
        ccb.id,
        ccb.recv.rcv_nxt,
        ccb.recv.window()
    );
    let seg = Segment::ack(
        ccb.tuple.local,
        ccb.tuple.remote,
        ccb.recv.rcv_nxt,
        ccb.recv.window(),
    );
    emit(host, stats, tracer, ccb, &seg);
}

/// Tell the peer this session is over.
pub(crate) fn send_close(host: &mut dyn Host, stats: &mut TcpStats, tracer: Tracer, ccb: &Ccb) {
    log::debug!("[tcp] {} → CLOSE", ccb.id);
    let seg = Segment::close(ccb.tuple.local, ccb.tuple.remote, ccb.recv.window());
    emit(host, stats, tracer, ccb, &seg);
}

fn emit(host: &mut dyn Host, stats: &mut TcpStats, tracer: Tracer, ccb: &Ccb, seg: &Segment) {
    tracer.output(host.now(), seg, ccb);
    stats.snd_total += 1;
    host.send_segment(OutboundSegment {
        src: seg.header.src.addr,
        dst: seg.header.dst.addr,
        interface: ccb.interface,
        priority: ccb.priority,
        bytes: seg.encode(),
    });
}
