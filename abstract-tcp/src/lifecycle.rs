//! Application-initiated lifecycle: active open, passive listen and close.
//!
//! There is no handshake.  An active open is ESTABLISHED the moment it
//! returns; the peer learns of the session from its first data segment.
//! Closing is a single `Close` segment, deferred while queued data remains
//! unacknowledged (FIN_WAIT_1).

use crate::ccb::{AppType, AttachParams, ConnectionId, FourTuple};
use crate::output::send_close;
use crate::segment::Endpoint;
use crate::state::ConnectionState;
use crate::timer::{TimerKind, KEEP_INIT};
use crate::transport::{AppEvent, Host, OpenKind, TcpError, Transport};

/// Parameters of an active open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenRequest {
    pub local: Endpoint,
    pub remote: Endpoint,
    pub app_type: AppType,
    pub priority: u8,
    /// Caller's correlation id, echoed in the open result.
    pub unique_id: u32,
    /// Outgoing interface, or `None` to let routing decide.
    pub interface: Option<u32>,
}

impl Transport {
    /// Create a connection to `req.remote` and report the outcome through
    /// [`AppEvent::OpenResult`].
    ///
    /// The keep-alive timer is armed so an open that never gets anything
    /// acknowledged is eventually reported as expired.
    pub fn open(&mut self, host: &mut dyn Host, req: OpenRequest) -> Result<ConnectionId, TcpError> {
        self.start_timers(host);

        let tuple = FourTuple::new(req.local, req.remote);
        if self.ccbs.lookup(req.local, req.remote, false).is_some() {
            let err = TcpError::AlreadyConnected(tuple);
            log::warn!("[tcp] open {tuple} refused: {err}");
            host.notify(AppEvent::OpenResult {
                kind: OpenKind::Active,
                app_type: req.app_type,
                local: req.local,
                remote: req.remote,
                unique_id: Some(req.unique_id),
                result: Err(err.clone()),
            });
            return Err(err);
        }

        let ccb = self.ccbs.attach(
            AttachParams {
                tuple,
                app_type: req.app_type,
                unique_id: Some(req.unique_id),
                priority: req.priority,
                interface: req.interface,
            },
            &self.config,
        );
        ccb.timers.arm(TimerKind::Keep, KEEP_INIT);
        ccb.snd_wnd = 0;
        let id = ccb.id;
        log::info!("[tcp] {id} active open {tuple}");

        host.notify(AppEvent::OpenResult {
            kind: OpenKind::Active,
            app_type: req.app_type,
            local: req.local,
            remote: req.remote,
            unique_id: Some(req.unique_id),
            result: Ok(id),
        });
        Ok(id)
    }

    /// Register a listener on `local`.  The first data segment of any new
    /// session addressed to `local` creates a connection inheriting
    /// `app_type`.
    pub fn listen(
        &mut self,
        host: &mut dyn Host,
        local: Endpoint,
        app_type: AppType,
        priority: u8,
    ) -> Result<ConnectionId, TcpError> {
        self.start_timers(host);

        if self.ccbs.lookup(local, Endpoint::ANY, false).is_some() {
            let err = TcpError::AlreadyListening(local);
            log::warn!("[tcp] listen on {local} refused: {err}");
            host.notify(AppEvent::ListenResult {
                app_type,
                local,
                result: Err(err.clone()),
            });
            return Err(err);
        }

        let id = self
            .ccbs
            .attach(
                AttachParams {
                    tuple: FourTuple::listener(local),
                    app_type,
                    unique_id: None,
                    priority,
                    interface: None,
                },
                &self.config,
            )
            .id;
        log::info!("[tcp] {id} listening on {local}");
        host.notify(AppEvent::ListenResult {
            app_type,
            local,
            result: Ok(id),
        });
        Ok(id)
    }

    /// Close connection `id`.
    ///
    /// With data still queued the connection moves to FIN_WAIT_1 and the
    /// close completes once the last byte is acknowledged.  Otherwise a
    /// `Close` segment is sent to the peer and [`AppEvent::CloseResult`] is
    /// delivered.  Closing an already closed connection is a no-op.
    pub fn close(&mut self, host: &mut dyn Host, id: ConnectionId) -> Result<(), TcpError> {
        let ccb = self
            .ccbs
            .get_mut(id)
            .ok_or(TcpError::UnknownConnection(id))?;
        if !ccb.send.is_empty() {
            if ccb.state == ConnectionState::Established {
                log::debug!("[tcp] {id} {} bytes queued, deferring close", ccb.send.cached());
                ccb.state = ConnectionState::FinWait1;
            }
            return Ok(());
        }
        self.complete_close(host, id, true)
    }

    /// Tear the connection down now.  `active` is false when the close was
    /// initiated by the peer, in which case no `Close` segment is echoed.
    pub(crate) fn complete_close(
        &mut self,
        host: &mut dyn Host,
        id: ConnectionId,
        active: bool,
    ) -> Result<(), TcpError> {
        let Transport {
            ccbs,
            stats,
            tracer,
            config,
            ..
        } = self;
        let ccb = ccbs.get_mut(id).ok_or(TcpError::UnknownConnection(id))?;
        if ccb.state.is_closed() {
            return Ok(());
        }

        ccb.state = ConnectionState::Closed;
        ccb.timers.cancel_all();
        if active && !ccb.is_listener() {
            send_close(host, stats, *tracer, ccb);
        }
        let app_type = ccb.app_type;
        log::info!("[tcp] {id} closed ({})", if active { "local" } else { "peer" });
        host.notify(AppEvent::CloseResult { id, app_type });

        if config.release_on_close.contains(&app_type) {
            ccbs.drop_ccb(id)?;
            log::debug!("[tcp] {id} released");
        }
        Ok(())
    }
}
