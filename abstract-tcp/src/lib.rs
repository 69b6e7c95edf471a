//! `abstract-tcp`: a simplified TCP transport engine for discrete-event
//! network simulation.
//!
//! There is no handshake and no real close exchange: a connection is usable
//! the moment it is opened, its peer learns of it from the first data
//! segment, and reliability comes from cumulative ACKs, retransmission
//! timers and Reno congestion control.
//!
//! # Architecture
//!
//! ```text
//!        application            scheduler
//!             │  ▲                 │  ▲
//!   open/send │  │ AppEvent   tick │  │ schedule_tick
//!  ┌──────────▼──┴─────────────────▼──┴──────────┐
//!  │                 Transport                   │
//!  │  ┌───────────┐  ┌────────┐  ┌────────────┐  │
//!  │  │ lifecycle │  │ output │  │   input    │  │
//!  │  └─────┬─────┘  └───┬────┘  └─────┬──────┘  │
//!  │        └──────┬─────┴─────────────┘         │
//!  │          ┌────▼─────┐                       │
//!  │          │ CcbTable │ Ccb: SendBuffer,      │
//!  │          └──────────┘ Receiver, Congestion, │
//!  │                       RttEstimator, Timers  │
//!  └──────────────────────┬──────────────▲───────┘
//!             send_segment │              │ input(bytes)
//!                      network layer (Host)
//! ```
//!
//! Each module has a single responsibility:
//! - [`segment`]      wire format (encode / decode, segment kinds)
//! - [`ccb`]          connection control blocks and their table
//! - [`transport`]    per-node instance, `Host` boundary, timer tick
//! - [`lifecycle`]    open, listen, close
//! - [`output`]       send and the window-limited drain loop
//! - [`input`]        ACK processing, data sequencing, passive accept
//! - [`sender`]       send buffer of unacknowledged payloads
//! - [`receiver`]     in-order delivery and out-of-order reassembly
//! - [`ring`]         fixed-capacity offset-addressed slot ring
//! - [`congestion`]   Reno slow start, avoidance, fast retransmit
//! - [`timer`]        tick countdowns and the fixed-point RTT estimator
//! - [`state`]        connection states
//! - [`config`]       node configuration and validation
//! - [`stats`]        per-instance counters
//! - [`trace`]        tcpdump-style segment trace
//! - [`simulator`]    deterministic in-memory scheduler and network

pub mod ccb;
pub mod config;
pub mod congestion;
pub mod input;
pub mod lifecycle;
pub mod output;
pub mod receiver;
pub mod ring;
pub mod segment;
pub mod sender;
pub mod simulator;
pub mod state;
pub mod stats;
pub mod timer;
pub mod trace;
pub mod transport;

pub use ccb::{AppType, Ccb, ConnectionId, FourTuple};
pub use config::{ConfigError, TcpConfig, TraceDirection};
pub use lifecycle::OpenRequest;
pub use segment::{Endpoint, Segment, SegmentError, SegmentKind};
pub use state::ConnectionState;
pub use stats::TcpStats;
pub use transport::{AppEvent, Host, OpenKind, OutboundSegment, TcpError, Transport};
