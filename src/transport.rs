//! Session / transport layer – one connection to the remote authority.
//!
//! ## Threading model
//!
//! ```text
//! Tick thread (SyncController)   │  Connection worker (Connector impl)
//! ────────────────────────────── │ ───────────────────────────────────
//! Session::poll_events()         │
//!   → events.try_recv()          │   ← SessionEvent (accepted, message…)
//!                                │
//! Session::send(msg, hint)       │
//!   → outgoing.try_send(Frame)   │   → socket write
//! Session::close()               │
//!   → outgoing.try_send(Close)   │   → shutdown, worker exits
//! ```
//!
//! Both queues are bounded.  The tick thread never blocks: every read is
//! `try_recv` and every write is `try_send`, so a full outbound queue drops
//! the frame with [`SyncError::ChannelFull`].

use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use log::{debug, info, warn};

use crate::config::{ServerTarget, DEFAULT_EVENT_BUFFER, DEFAULT_OUTGOING_BUFFER};
use crate::error::{Result, SyncError};
use crate::outbound::SendTarget;
use crate::protocol::{OutboundMessage, Reliability};

// ---------------------------------------------------------------------------
// Events and frames
// ---------------------------------------------------------------------------

/// Lifecycle signal or inbound frame delivered by a connection worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ConnectionAccepted,
    ConnectionDenied(String),
    ConnectionFailed,
    Disconnect,
    /// One raw inbound frame (JSON text).
    Message(String),
}

/// One serialised outbound message plus its delivery hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: String,
    pub reliability: Reliability,
}

/// Tick thread → worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Frame(Frame),
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

// ---------------------------------------------------------------------------
// Handle + connector
// ---------------------------------------------------------------------------

/// Channel pair for one connection attempt.
pub struct ConnectionHandle {
    /// Lifecycle events and inbound frames, in arrival order.
    pub events: Receiver<SessionEvent>,
    /// Outbound frames and the close request.
    pub outgoing: Sender<Outgoing>,
    _worker: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    pub fn new(events: Receiver<SessionEvent>, outgoing: Sender<Outgoing>) -> Self {
        Self {
            events,
            outgoing,
            _worker: None,
        }
    }

    /// Keep the worker thread's join handle alive alongside the channels.
    pub fn with_worker(mut self, worker: JoinHandle<()>) -> Self {
        self._worker = Some(worker);
        self
    }
}

/// Opens connections.  Never blocks: failures are reported as
/// [`SessionEvent::ConnectionFailed`] on the returned handle.
pub trait Connector {
    fn open(&mut self, target: &ServerTarget) -> ConnectionHandle;
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Connection to the remote authority, guarded against redundant reconnects.
pub struct Session<C: Connector> {
    connector: C,
    target: Option<ServerTarget>,
    state: ConnectionState,
    handle: Option<ConnectionHandle>,
}

impl<C: Connector> Session<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            target: None,
            state: ConnectionState::Disconnected,
            handle: None,
        }
    }

    /// Connect to `target` unless it equals the stored target.
    ///
    /// Returns `true` when a connection attempt was started.
    pub fn connect(&mut self, target: &ServerTarget) -> bool {
        if self.target.as_ref() == Some(target) {
            info!("Reconnect is not required");
            return false;
        }
        self.target = Some(target.clone());
        self.open();
        true
    }

    /// Start a fresh attempt to the stored target.  Caller-driven retry.
    pub fn reconnect(&mut self) -> bool {
        if self.target.is_none() {
            warn!("reconnect requested without a stored target");
            return false;
        }
        self.open();
        true
    }

    /// Close the connection.  No further events are observed afterwards.
    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            // A full queue or a gone worker both still end the connection:
            // dropping the handle disconnects the worker's receiver.
            let _ = handle.outgoing.try_send(Outgoing::Close);
            info!("Session closed");
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Drain pending events without blocking, in arrival order.
    pub fn poll_events(&mut self) -> Vec<SessionEvent> {
        let Some(handle) = &self.handle else {
            return Vec::new();
        };

        let mut events = Vec::new();
        let mut worker_gone = false;
        loop {
            match handle.events.try_recv() {
                Ok(ev) => events.push(ev),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    worker_gone = true;
                    break;
                }
            }
        }

        for ev in &events {
            match ev {
                SessionEvent::ConnectionAccepted => self.state = ConnectionState::Connected,
                SessionEvent::ConnectionDenied(_)
                | SessionEvent::ConnectionFailed
                | SessionEvent::Disconnect => self.state = ConnectionState::Disconnected,
                SessionEvent::Message(_) => {}
            }
        }

        if worker_gone {
            // Report a silent worker exit as the matching lifecycle signal.
            match self.state {
                ConnectionState::Connecting => events.push(SessionEvent::ConnectionFailed),
                ConnectionState::Connected => events.push(SessionEvent::Disconnect),
                ConnectionState::Disconnected => {}
            }
            debug!("connection worker exited");
            self.handle = None;
            self.state = ConnectionState::Disconnected;
        }

        events
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn target(&self) -> Option<&ServerTarget> {
        self.target.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    fn open(&mut self) {
        self.close();
        let Some(target) = self.target.clone() else {
            return;
        };
        info!("Connecting to {}", target);
        self.handle = Some(self.connector.open(&target));
        self.state = ConnectionState::Connecting;
    }
}

impl<C: Connector> SendTarget for Session<C> {
    fn send(&mut self, msg: &OutboundMessage, reliability: Reliability) -> Result<()> {
        let handle = match &self.handle {
            Some(h) if self.state == ConnectionState::Connected => h,
            _ => return Err(SyncError::NotConnected),
        };
        let frame = Frame {
            payload: msg.to_wire()?,
            reliability,
        };
        handle
            .outgoing
            .try_send(Outgoing::Frame(frame))
            .map_err(|e| match e {
                TrySendError::Full(_) => SyncError::ChannelFull,
                TrySendError::Disconnected(_) => SyncError::ChannelClosed,
            })
    }
}

// ---------------------------------------------------------------------------
// Loopback connector (in-memory)
// ---------------------------------------------------------------------------

/// Create an in-memory connector and the server side that observes it.
pub fn loopback() -> (LoopbackConnector, LoopbackServer) {
    loopback_with_buffers(DEFAULT_EVENT_BUFFER, DEFAULT_OUTGOING_BUFFER)
}

/// [`loopback`] with explicit queue capacities for every connection.
pub fn loopback_with_buffers(
    event_buffer: usize,
    outgoing_buffer: usize,
) -> (LoopbackConnector, LoopbackServer) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let connector = LoopbackConnector {
        peers: tx,
        event_buffer,
        outgoing_buffer,
    };
    (connector, LoopbackServer { peers: rx })
}

/// Connector whose connections terminate in a [`LoopbackServer`].
#[derive(Clone)]
pub struct LoopbackConnector {
    peers: Sender<RemotePeer>,
    event_buffer: usize,
    outgoing_buffer: usize,
}

impl Connector for LoopbackConnector {
    fn open(&mut self, target: &ServerTarget) -> ConnectionHandle {
        let (event_tx, event_rx) = crossbeam_channel::bounded(self.event_buffer.max(1));
        let (out_tx, out_rx) = crossbeam_channel::bounded(self.outgoing_buffer.max(1));
        let peer = RemotePeer {
            target: target.clone(),
            events: event_tx,
            outgoing: out_rx,
        };
        if self.peers.send(peer).is_err() {
            warn!("[loopback] server side dropped – connection to {target} goes nowhere");
        }
        ConnectionHandle::new(event_rx, out_tx)
    }
}

/// Receives one [`RemotePeer`] per `open` call.
pub struct LoopbackServer {
    peers: Receiver<RemotePeer>,
}

impl LoopbackServer {
    /// Next opened connection, if any.
    pub fn try_accept(&self) -> Option<RemotePeer> {
        self.peers.try_recv().ok()
    }

    /// Number of connections opened and not yet accepted.
    pub fn pending(&self) -> usize {
        self.peers.len()
    }
}

/// Authority end of one loopback connection.
pub struct RemotePeer {
    pub target: ServerTarget,
    events: Sender<SessionEvent>,
    outgoing: Receiver<Outgoing>,
}

impl RemotePeer {
    /// Queue one event for the client.  Dropped with a warning when the
    /// client has fallen `event_buffer` events behind.
    pub fn push(&self, event: SessionEvent) {
        if let Err(TrySendError::Full(event)) = self.events.try_send(event) {
            warn!("[loopback] event queue full, dropping {:?}", event);
        }
    }

    pub fn accept(&self) {
        self.push(SessionEvent::ConnectionAccepted);
    }

    pub fn deny(&self, reason: &str) {
        self.push(SessionEvent::ConnectionDenied(reason.into()));
    }

    pub fn fail(&self) {
        self.push(SessionEvent::ConnectionFailed);
    }

    pub fn disconnect(&self) {
        self.push(SessionEvent::Disconnect);
    }

    /// Deliver one inbound JSON frame.
    pub fn send_json(&self, value: serde_json::Value) {
        self.push(SessionEvent::Message(value.to_string()));
    }

    /// Drain everything the client queued, including `Close`.
    pub fn drain(&self) -> Vec<Outgoing> {
        self.outgoing.try_iter().collect()
    }

    /// Drain only data frames.
    pub fn frames(&self) -> Vec<Frame> {
        self.drain()
            .into_iter()
            .filter_map(|o| match o {
                Outgoing::Frame(f) => Some(f),
                Outgoing::Close => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Animation, OutboundMessage};

    fn target(port: u16) -> ServerTarget {
        ServerTarget::new("127.0.0.1", port)
    }

    // ---------------------------------------------------------------
    // Reconnect guard
    // ---------------------------------------------------------------

    #[test]
    fn same_target_is_not_reconnected() {
        let (connector, server) = loopback();
        let mut session = Session::new(connector);

        assert!(session.connect(&target(7777)));
        assert!(!session.connect(&target(7777)));

        assert_eq!(server.pending(), 1);
        assert_eq!(session.target(), Some(&target(7777)));
    }

    #[test]
    fn different_target_connects_once_and_updates_storage() {
        let (connector, server) = loopback();
        let mut session = Session::new(connector);

        session.connect(&target(7777));
        assert!(session.connect(&target(7778)));

        let first = server.try_accept().unwrap();
        let second = server.try_accept().unwrap();
        assert_eq!(first.target, target(7777));
        assert_eq!(second.target, target(7778));
        assert!(server.try_accept().is_none());
        assert_eq!(session.target(), Some(&target(7778)));
        // Replacing the connection closes the old one.
        assert_eq!(first.drain(), vec![Outgoing::Close]);
    }

    #[test]
    fn reconnect_without_target_is_refused() {
        let (connector, server) = loopback();
        let mut session = Session::new(connector);
        assert!(!session.reconnect());
        assert_eq!(server.pending(), 0);
    }

    #[test]
    fn reconnect_reopens_stored_target() {
        let (connector, server) = loopback();
        let mut session = Session::new(connector);
        session.connect(&target(1));
        assert!(session.reconnect());
        assert_eq!(server.pending(), 2);
    }

    // ---------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------

    #[test]
    fn accepted_then_disconnect_updates_state() {
        let (connector, server) = loopback();
        let mut session = Session::new(connector);
        session.connect(&target(1));
        assert_eq!(session.state(), ConnectionState::Connecting);

        let peer = server.try_accept().unwrap();
        peer.accept();
        assert_eq!(session.poll_events(), vec![SessionEvent::ConnectionAccepted]);
        assert!(session.is_connected());

        peer.disconnect();
        assert_eq!(session.poll_events(), vec![SessionEvent::Disconnect]);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn events_arrive_in_order() {
        let (connector, server) = loopback();
        let mut session = Session::new(connector);
        session.connect(&target(1));
        let peer = server.try_accept().unwrap();

        peer.accept();
        for i in 0..5 {
            peer.send_json(serde_json::json!({ "n": i }));
        }
        let events = session.poll_events();
        assert_eq!(events.len(), 6);
        for (i, ev) in events[1..].iter().enumerate() {
            assert_eq!(ev, &SessionEvent::Message(format!("{{\"n\":{i}}}")));
        }
    }

    #[test]
    fn dropped_worker_while_connecting_reports_failure() {
        let (connector, server) = loopback();
        let mut session = Session::new(connector);
        session.connect(&target(1));
        drop(server.try_accept().unwrap());

        assert_eq!(session.poll_events(), vec![SessionEvent::ConnectionFailed]);
        assert!(session.poll_events().is_empty());
    }

    #[test]
    fn dropped_worker_after_failure_is_not_reported_twice() {
        let (connector, server) = loopback();
        let mut session = Session::new(connector);
        session.connect(&target(1));
        let peer = server.try_accept().unwrap();
        peer.fail();
        drop(peer);

        assert_eq!(session.poll_events(), vec![SessionEvent::ConnectionFailed]);
    }

    #[test]
    fn close_stops_inbound_events() {
        let (connector, server) = loopback();
        let mut session = Session::new(connector);
        session.connect(&target(1));
        let peer = server.try_accept().unwrap();
        peer.accept();
        session.poll_events();

        session.close();
        peer.send_json(serde_json::json!({ "type": "createActor" }));
        assert!(session.poll_events().is_empty());
        assert_eq!(peer.drain(), vec![Outgoing::Close]);
    }

    // ---------------------------------------------------------------
    // Sending
    // ---------------------------------------------------------------

    #[test]
    fn send_requires_accepted_connection() {
        let (connector, server) = loopback();
        let mut session = Session::new(connector);
        let msg = OutboundMessage::UpdateAnimation(Animation::default());

        assert!(matches!(
            session.send(&msg, Reliability::Unreliable),
            Err(SyncError::NotConnected)
        ));

        session.connect(&target(1));
        assert!(matches!(
            session.send(&msg, Reliability::Unreliable),
            Err(SyncError::NotConnected)
        ));

        let peer = server.try_accept().unwrap();
        peer.accept();
        session.poll_events();
        session.send(&msg, Reliability::Unreliable).unwrap();

        let frames = peer.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].reliability, Reliability::Unreliable);
        assert_eq!(OutboundMessage::from_wire(&frames[0].payload).unwrap(), msg);
    }

    // ---------------------------------------------------------------
    // Queue bounds
    // ---------------------------------------------------------------

    fn accepted_session(
        event_buffer: usize,
        outgoing_buffer: usize,
    ) -> (Session<LoopbackConnector>, RemotePeer) {
        let (connector, server) = loopback_with_buffers(event_buffer, outgoing_buffer);
        let mut session = Session::new(connector);
        session.connect(&target(1));
        let peer = server.try_accept().unwrap();
        peer.accept();
        session.poll_events();
        (session, peer)
    }

    #[test]
    fn full_outbound_queue_refuses_instead_of_blocking() {
        let (mut session, peer) = accepted_session(8, 2);
        let msg = OutboundMessage::UpdateAnimation(Animation::default());

        session.send(&msg, Reliability::Reliable).unwrap();
        session.send(&msg, Reliability::Reliable).unwrap();
        assert!(matches!(
            session.send(&msg, Reliability::Reliable),
            Err(SyncError::ChannelFull)
        ));

        // Draining frees the queue again.
        assert_eq!(peer.frames().len(), 2);
        session.send(&msg, Reliability::Reliable).unwrap();
        assert_eq!(peer.frames().len(), 1);
    }

    #[test]
    fn close_on_full_queue_still_ends_the_connection() {
        let (mut session, peer) = accepted_session(8, 1);
        let msg = OutboundMessage::UpdateAnimation(Animation::default());
        session.send(&msg, Reliability::Reliable).unwrap();

        session.close();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        // The queued frame is still delivered, then the channel reads as closed.
        assert_eq!(peer.frames().len(), 1);
        assert!(matches!(
            peer.outgoing.try_recv(),
            Err(TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn inbound_events_beyond_capacity_are_dropped() {
        let (mut session, peer) = accepted_session(3, 8);
        for i in 0..5 {
            peer.send_json(serde_json::json!({ "n": i }));
        }
        let events = session.poll_events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2], SessionEvent::Message("{\"n\":2}".into()));
    }
}
