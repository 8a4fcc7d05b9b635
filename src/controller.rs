//! `SyncController`: the per-tick driver that ties everything together.
//!
//! ## State machine
//!
//! ```text
//!                 connect()                 ConnectionAccepted
//!  Disconnected ───────────► Connecting ───────────────────────► Online
//!       ▲                       │                                  │
//!       │   Failed / Denied     │                                  │
//!       ├───────────────────────┘                                  │
//!       │                        Disconnect (world reset)          │
//!       └──────────────────────────────────────────────────────────┤
//!                                                                  │
//!                      LoadGame not caused by us                   ▼
//!                      (session closed, one-way)                Offline
//! ```
//!
//! ## Tick order
//!
//! | Step | Action                                   | Skipped when      |
//! |------|------------------------------------------|-------------------|
//! | 1    | swap a queued view in, destroy the old   | nothing queued    |
//! | 2    | drain session events, dispatch messages  | offline           |
//! | 3    | run the outbound pipeline                | not `Online`      |
//! | 4    | render the view from the world model     | offline           |
//!
//! Connection failures are returned to the caller; retrying is the caller's
//! decision (see [`SyncController::reconnect`]).

use std::time::Instant;

use log::{debug, error, info, warn};

use crate::config::{ClientSettings, ServerTarget};
use crate::context::SessionContext;
use crate::engine::{EngineEvent, HostEngine};
use crate::error::SyncError;
use crate::outbound::OutboundPipeline;
use crate::transport::{ConnectionState, Connector, Session, SessionEvent};
use crate::types::PLAYER_FORM_ID;
use crate::view::{ViewSlot, WorldView};
use crate::world::{RemoteServer, WorldModel};

/// Notification shown when a save is loaded while connected.
pub const OFFLINE_NOTICE: &str =
    "Save has been loaded in multiplayer, switching to the single-player mode";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Disconnected,
    Connecting,
    Online,
    Offline,
}

/// Whether this controller still takes part in multiplayer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Online,
    /// Single-player fallback.  Never left for the controller's lifetime.
    Offline,
}

pub struct SyncController<C: Connector, E: HostEngine> {
    session: Session<C>,
    remote: RemoteServer,
    views: ViewSlot,
    pipeline: OutboundPipeline,
    engine: E,
    target: ServerTarget,
    state: ControllerState,
    mode: Mode,
}

impl<C: Connector, E: HostEngine> SyncController<C, E> {
    /// Build a controller from whatever `context` kept alive.
    ///
    /// - No stored session: a new one is made from `connector` and connects.
    /// - Stored session: reused; it only reconnects when `settings` name a
    ///   different target.  `connector` is dropped.
    /// - Stored world: kept, with fresh handlers (see [`RemoteServer::merge`]).
    /// - Stored view: keeps rendering until the next tick, when `view`
    ///   replaces it.
    pub fn new(
        context: SessionContext<C>,
        settings: &ClientSettings,
        connector: C,
        engine: E,
        view: Box<dyn WorldView>,
    ) -> Self {
        let SessionContext {
            session,
            remote,
            view: previous_view,
        } = context;

        let target = settings.target();
        let mut session = session.unwrap_or_else(|| Session::new(connector));
        let state = if session.connect(&target) {
            ControllerState::Connecting
        } else {
            match session.state() {
                ConnectionState::Connected => ControllerState::Online,
                ConnectionState::Connecting => ControllerState::Connecting,
                ConnectionState::Disconnected => ControllerState::Disconnected,
            }
        };

        let remote = RemoteServer::merge(remote, RemoteServer::new());

        let views = match previous_view {
            Some(previous) => {
                let mut slot = ViewSlot::with_current(previous);
                slot.replace(view);
                slot
            }
            None => ViewSlot::with_current(view),
        };

        Self {
            session,
            remote,
            views,
            pipeline: OutboundPipeline::new(settings.movement_interval()),
            engine,
            target,
            state,
            mode: Mode::Online,
        }
    }

    // ------------------------------------------------------------------
    // Engine hooks
    // ------------------------------------------------------------------

    pub fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Equip { actor } | EngineEvent::Unequip { actor } => {
                if actor == PLAYER_FORM_ID {
                    self.pipeline.mark_equipment_dirty();
                }
            }
            EngineEvent::LoadGame { caused_by_platform } => {
                if !caused_by_platform && self.mode == Mode::Online {
                    self.go_offline();
                }
            }
        }
    }

    fn go_offline(&mut self) {
        warn!("save loaded outside multiplayer, switching to single-player");
        self.engine.message_box(OFFLINE_NOTICE);
        self.session.close();
        self.mode = Mode::Offline;
        self.state = ControllerState::Offline;
        self.engine.leave_character_creation();
    }

    // ------------------------------------------------------------------
    // Per-tick work
    // ------------------------------------------------------------------

    /// Apply every pending session event in arrival order.
    ///
    /// Returns connection-setup failures for the caller to act on.
    pub fn pump(&mut self) -> Vec<SyncError> {
        if self.mode == Mode::Offline {
            return Vec::new();
        }

        let mut failures = Vec::new();
        for event in self.session.poll_events() {
            match event {
                SessionEvent::ConnectionAccepted => {
                    info!("Connected to {}", self.target);
                    self.state = ControllerState::Online;
                    self.remote.connection_accepted();
                }
                SessionEvent::ConnectionDenied(reason) => {
                    error!("Connection denied: {}", reason);
                    self.state = ControllerState::Disconnected;
                    failures.push(SyncError::ConnectionDenied { reason });
                }
                SessionEvent::ConnectionFailed => {
                    error!("Connection failed");
                    self.state = ControllerState::Disconnected;
                    failures.push(SyncError::ConnectionFailed {
                        target: self.target.clone(),
                    });
                }
                SessionEvent::Disconnect => {
                    info!("Disconnected from {}", self.target);
                    self.state = ControllerState::Disconnected;
                    self.remote.connection_lost();
                }
                SessionEvent::Message(text) => {
                    self.remote.dispatch_raw(&text);
                }
            }
        }
        failures
    }

    /// One host tick.  Returns the connection failures seen this tick.
    pub fn tick(&mut self, now: Instant) -> Vec<SyncError> {
        self.views.swap_at_boundary();

        let failures = self.pump();
        if self.mode == Mode::Offline {
            return failures;
        }

        if self.state == ControllerState::Online {
            let sent = self
                .pipeline
                .run(now, &mut self.engine, &mut self.session);
            if sent > 0 {
                debug!("sent {} updates", sent);
            }
        }

        self.views.render(self.remote.world());
        failures
    }

    /// Queue `view` to replace the current one at the next tick.
    pub fn replace_view(&mut self, view: Box<dyn WorldView>) {
        self.views.replace(view);
    }

    /// Retry the stored target.  Refused once offline.
    pub fn reconnect(&mut self) -> bool {
        if self.mode == Mode::Offline {
            debug!("reconnect refused: offline");
            return false;
        }
        let started = self.session.reconnect();
        if started {
            self.state = ControllerState::Connecting;
        }
        started
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn world(&self) -> &WorldModel {
        self.remote.world()
    }

    pub fn session(&self) -> &Session<C> {
        &self.session
    }

    pub fn pipeline(&self) -> &OutboundPipeline {
        &self.pipeline
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Give back the long-lived state for the next controller.
    pub fn into_context(self) -> SessionContext<C> {
        SessionContext {
            session: Some(self.session),
            remote: Some(self.remote),
            view: self.views.into_surviving(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::HeadlessEngine;
    use crate::transport::{loopback, LoopbackConnector, LoopbackServer, RemotePeer};
    use crate::view::LoggingView;
    use std::time::Duration;

    fn online() -> (
        SyncController<LoopbackConnector, HeadlessEngine>,
        LoopbackServer,
        RemotePeer,
    ) {
        let (connector, server) = loopback();
        let mut ctl = SyncController::new(
            SessionContext::new(),
            &ClientSettings::default(),
            connector,
            HeadlessEngine::new(),
            Box::new(LoggingView::new()),
        );
        let peer = server.try_accept().expect("connection opened");
        peer.accept();
        ctl.pump();
        (ctl, server, peer)
    }

    // ---------------------------------------------------------------
    // Connection lifecycle
    // ---------------------------------------------------------------

    #[test]
    fn new_controller_connects_to_settings_target() {
        let (connector, server) = loopback();
        let ctl = SyncController::new(
            SessionContext::new(),
            &ClientSettings::default(),
            connector,
            HeadlessEngine::new(),
            Box::new(LoggingView::new()),
        );
        assert_eq!(ctl.state(), ControllerState::Connecting);
        let peer = server.try_accept().expect("connection opened");
        assert_eq!(peer.target, ServerTarget::new("127.0.0.1", 7777));
    }

    #[test]
    fn accept_goes_online() {
        let (ctl, _server, _peer) = online();
        assert_eq!(ctl.state(), ControllerState::Online);
        assert_eq!(ctl.mode(), Mode::Online);
    }

    #[test]
    fn denied_is_reported_to_caller() {
        let (connector, server) = loopback();
        let mut ctl = SyncController::new(
            SessionContext::new(),
            &ClientSettings::default(),
            connector,
            HeadlessEngine::new(),
            Box::new(LoggingView::new()),
        );
        server.try_accept().expect("opened").deny("server full");
        let failures = ctl.pump();
        assert!(matches!(
            failures.as_slice(),
            [SyncError::ConnectionDenied { reason }] if reason == "server full"
        ));
        assert_eq!(ctl.state(), ControllerState::Disconnected);
    }

    #[test]
    fn reconnect_after_failure_opens_new_connection() {
        let (connector, server) = loopback();
        let mut ctl = SyncController::new(
            SessionContext::new(),
            &ClientSettings::default(),
            connector,
            HeadlessEngine::new(),
            Box::new(LoggingView::new()),
        );
        server.try_accept().expect("opened").fail();
        assert_eq!(ctl.pump().len(), 1);

        assert!(ctl.reconnect());
        assert_eq!(ctl.state(), ControllerState::Connecting);
        assert!(server.try_accept().is_some());
    }

    // ---------------------------------------------------------------
    // Engine events
    // ---------------------------------------------------------------

    #[test]
    fn only_player_equip_marks_dirty() {
        let (mut ctl, _server, _peer) = online();
        ctl.handle_engine_event(EngineEvent::Equip { actor: 0x0001_2345 });
        ctl.handle_engine_event(EngineEvent::Unequip { actor: 0x15 });
        assert!(!ctl.pipeline().equipment().is_dirty());

        ctl.handle_engine_event(EngineEvent::Unequip { actor: PLAYER_FORM_ID });
        assert!(ctl.pipeline().equipment().is_dirty());
    }

    #[test]
    fn platform_caused_load_is_ignored() {
        let (mut ctl, _server, _peer) = online();
        ctl.handle_engine_event(EngineEvent::LoadGame {
            caused_by_platform: true,
        });
        assert_eq!(ctl.mode(), Mode::Online);
        assert!(ctl.engine().message_boxes.is_empty());
    }

    #[test]
    fn user_load_goes_offline_once() {
        let (mut ctl, _server, _peer) = online();
        for _ in 0..2 {
            ctl.handle_engine_event(EngineEvent::LoadGame {
                caused_by_platform: false,
            });
        }
        assert_eq!(ctl.mode(), Mode::Offline);
        assert_eq!(ctl.state(), ControllerState::Offline);
        assert_eq!(ctl.engine().message_boxes, vec![OFFLINE_NOTICE.to_string()]);
        assert_eq!(ctl.engine().chargen_exits, 1);
        assert!(!ctl.reconnect());
    }

    // ---------------------------------------------------------------
    // Tick
    // ---------------------------------------------------------------

    #[test]
    fn tick_sends_movement_only_when_online() {
        let (connector, server) = loopback();
        let mut ctl = SyncController::new(
            SessionContext::new(),
            &ClientSettings::default(),
            connector,
            HeadlessEngine::new(),
            Box::new(LoggingView::new()),
        );
        let peer = server.try_accept().expect("opened");
        let t0 = Instant::now();

        ctl.tick(t0);
        assert!(peer.frames().is_empty());

        peer.accept();
        ctl.tick(t0 + Duration::from_millis(10));
        assert_eq!(peer.frames().len(), 1);
    }

    #[test]
    fn disconnect_clears_world() {
        let (mut ctl, _server, peer) = online();
        peer.send_json(serde_json::json!({ "type": "createActor", "idx": 1 }));
        ctl.tick(Instant::now());
        assert_eq!(ctl.world().form_count(), 1);

        peer.disconnect();
        ctl.tick(Instant::now());
        assert_eq!(ctl.world().form_count(), 0);
        assert_eq!(ctl.state(), ControllerState::Disconnected);
    }
}
