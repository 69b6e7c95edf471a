//! Connection finite-state machine (FSM) types.
//!
//! There is no handshake and no half-close in this protocol, so only three
//! states are ever entered.  The classical SYN/TIME_WAIT family is not
//! modelled at all.
//!
//! ```text
//!   open / listen / passive accept
//!              │
//!              ▼
//!        ESTABLISHED ──close, buffer empty──────────────▶ CLOSED
//!              │                                            ▲
//!              │ close, data still buffered                 │
//!              ▼                                            │
//!         FIN_WAIT_1 ──last byte acknowledged───────────────┘
//! ```
//!
//! A Close segment from the peer moves ESTABLISHED or FIN_WAIT_1 straight to
//! CLOSED.

use std::fmt;

/// All states a connection control block can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Closed, either actively or by the peer.  Segments for a closed
    /// connection are discarded.
    Closed,
    /// Data may flow in both directions.
    #[default]
    Established,
    /// Close requested while the send buffer still held data; the buffer keeps
    /// draining and the close completes on the final acknowledgment.
    FinWait1,
}

impl ConnectionState {
    pub fn is_closed(self) -> bool {
        self == ConnectionState::Closed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Closed => "CLOSED",
            ConnectionState::Established => "ESTABLISHED",
            ConnectionState::FinWait1 => "FIN_WAIT_1",
        };
        f.write_str(name)
    }
}
