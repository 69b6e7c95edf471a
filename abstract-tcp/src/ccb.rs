//! Connection control blocks and the per-instance table that owns them.
//!
//! A [`Ccb`] is everything the engine knows about one connection: its
//! identity (4-tuple, application tag, handle), the send and receive sequence
//! state, congestion and RTT state, both buffers, and its timers.
//!
//! [`CcbTable`] stores CCBs keyed by [`ConnectionId`] and remembers creation
//! order separately.  Lookups by 4-tuple scan newest first, so when a
//! listener and a fully specified connection share a local endpoint the
//! specific one created later wins.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use crate::config::TcpConfig;
use crate::congestion::Congestion;
use crate::receiver::Receiver;
use crate::segment::Endpoint;
use crate::sender::SendBuffer;
use crate::state::ConnectionState;
use crate::timer::{RttEstimator, Timers};
use crate::transport::TcpError;

/// Initial send sequence number of every session.
pub const ISS: u32 = 1;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Locally unique connection handle, allocated from 1 upwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque application tag, echoed back to the application untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AppType(pub u16);

/// Local and remote endpoints of a connection.  A listener's remote is
/// [`Endpoint::ANY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourTuple {
    pub local: Endpoint,
    pub remote: Endpoint,
}

impl FourTuple {
    pub fn new(local: Endpoint, remote: Endpoint) -> Self {
        Self { local, remote }
    }

    pub fn listener(local: Endpoint) -> Self {
        Self {
            local,
            remote: Endpoint::ANY,
        }
    }
}

impl fmt::Display for FourTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.remote.is_any() {
            write!(f, "{} > *", self.local)
        } else {
            write!(f, "{} > {}", self.local, self.remote)
        }
    }
}

/// Everything [`CcbTable::attach`] needs besides configuration.
#[derive(Debug, Clone, Copy)]
pub struct AttachParams {
    pub tuple: FourTuple,
    pub app_type: AppType,
    /// Caller-supplied id of an active open; passive connections have none.
    pub unique_id: Option<u32>,
    pub priority: u8,
    /// Outgoing interface requested by the application, if any.
    pub interface: Option<u32>,
}

// ---------------------------------------------------------------------------
// Ccb
// ---------------------------------------------------------------------------

/// Connection control block.
///
/// # Send sequence space
///
/// ```text
///   snd_una        snd_nxt               snd_max
///      │              │                     │
///  ────┼──────────────┼─────────────────────┼──────▶
///      │<─ in flight ▶│<── may send now ───▶│
/// ```
///
/// `snd_high` is the highest sequence ever transmitted; it stays put when a
/// timeout rewinds `snd_nxt`, and acknowledgments beyond it are bogus.
#[derive(Debug)]
pub struct Ccb {
    pub id: ConnectionId,
    pub tuple: FourTuple,
    pub app_type: AppType,
    pub unique_id: Option<u32>,
    pub priority: u8,
    pub interface: Option<u32>,
    pub state: ConnectionState,
    pub mss: u32,

    pub iss: u32,
    pub snd_una: u32,
    pub snd_nxt: u32,
    pub snd_max: u32,
    pub snd_high: u32,
    /// Bytes in flight (`snd_high - snd_una`).
    pub snd_wnd: u32,
    /// Window last advertised by the peer.
    pub peer_wnd: u32,
    pub cc: Congestion,
    pub rtt: RttEstimator,
    pub timers: Timers,

    pub send: SendBuffer,
    pub recv: Receiver,

    /// A "data sent" notification is owed once the buffer drains below one
    /// segment of headroom.
    pub data_sent_pending: bool,
}

impl Ccb {
    fn new(id: ConnectionId, params: AttachParams, config: &TcpConfig) -> Self {
        let mss = config.mss as u32;
        let peer_wnd = config.recv_buffer as u32;
        let cc = Congestion::new(mss);
        let snd_max = ISS + cc.cwnd.min(peer_wnd);
        Self {
            id,
            tuple: params.tuple,
            app_type: params.app_type,
            unique_id: params.unique_id,
            priority: params.priority,
            interface: params.interface,
            state: ConnectionState::Established,
            mss,
            iss: ISS,
            snd_una: ISS,
            snd_nxt: ISS,
            snd_max,
            snd_high: ISS,
            snd_wnd: 0,
            peer_wnd,
            cc,
            rtt: RttEstimator::default(),
            timers: Timers::default(),
            send: SendBuffer::new(config.send_buffer, ISS),
            recv: Receiver::new(config.recv_buffer),
            data_sent_pending: false,
        }
    }

    pub fn is_listener(&self) -> bool {
        self.tuple.remote.is_any()
    }

    /// Window the peer and the congestion state together allow past
    /// `snd_una`.
    pub fn usable_window(&self) -> u32 {
        self.cc.cwnd.min(self.peer_wnd)
    }

    pub(crate) fn refresh_in_flight(&mut self) {
        self.snd_wnd = self.snd_high - self.snd_una;
    }
}

// ---------------------------------------------------------------------------
// CcbTable
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct CcbTable {
    ccbs: HashMap<ConnectionId, Ccb>,
    /// Newest first.
    order: VecDeque<ConnectionId>,
    next_id: u32,
}

impl CcbTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ccbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ccbs.is_empty()
    }

    /// Create a CCB in ESTABLISHED with default sequence, window and timer
    /// state.  Buffer sizes come from `config`, which must already have been
    /// validated.
    pub fn attach(&mut self, params: AttachParams, config: &TcpConfig) -> &mut Ccb {
        self.next_id += 1;
        let id = ConnectionId(self.next_id);
        self.order.push_front(id);
        self.ccbs
            .entry(id)
            .or_insert_with(|| Ccb::new(id, params, config))
    }

    /// First CCB, newest first, whose local endpoint is `local` and whose
    /// remote is `remote`, or, with `wildcard`, the "any" sentinel.
    pub fn lookup(&self, local: Endpoint, remote: Endpoint, wildcard: bool) -> Option<ConnectionId> {
        self.order.iter().copied().find(|id| {
            self.ccbs.get(id).is_some_and(|ccb| {
                ccb.tuple.local == local
                    && (ccb.tuple.remote == remote || (wildcard && ccb.tuple.remote.is_any()))
            })
        })
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Ccb> {
        self.ccbs.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Ccb> {
        self.ccbs.get_mut(&id)
    }

    /// Unlink a CCB, releasing its buffers and timers.
    pub fn drop_ccb(&mut self, id: ConnectionId) -> Result<Ccb, TcpError> {
        let ccb = self
            .ccbs
            .remove(&id)
            .ok_or(TcpError::UnknownConnection(id))?;
        self.order.retain(|other| *other != id);
        Ok(ccb)
    }

    /// Handles in service order (newest first).
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.order.iter().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ccb> {
        self.order.iter().filter_map(|id| self.ccbs.get(id))
    }
}
