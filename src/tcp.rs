//! TCP connector: newline-delimited JSON over a plain socket.
//!
//! ## Threading model
//!
//! ```text
//! Tick thread                 │  Connection thread (Tokio current_thread)
//! ─────────────────────────── │ ──────────────────────────────────────────
//! Session::poll_events        │ run_connection()
//!   → events.try_recv()       │   connect, read handshake line
//!                             │   → events.send(SessionEvent)
//! Session::send               │
//!   → outgoing.try_send(Frame)│   every 8 ms: outgoing.try_recv()
//!                             │   → write_all(payload + '\n')
//! ```
//!
//! The event queue holds `event_buffer` entries.  When the tick thread falls
//! that far behind, the connection thread blocks on `send` and stops reading
//! the socket until there is room again.
//!
//! ## Handshake
//!
//! The first line the server writes decides the connection:
//!
//! | Line                                           | Event               |
//! |------------------------------------------------|---------------------|
//! | `{"handshake":"accepted"}`                     | `ConnectionAccepted`|
//! | `{"handshake":"denied","reason":"…"}`          | `ConnectionDenied`  |
//! | anything else, EOF, or a connect error         | `ConnectionFailed`  |
//! | no line within the handshake timeout           | `ConnectionFailed`  |
//!
//! A `Close` (or a dropped session) while waiting for the handshake ends the
//! attempt without an event.
//!
//! Every later line is one `Message`.  EOF or a read error after the
//! handshake is a `Disconnect`.  TCP is ordered and reliable, so both
//! reliability hints travel the same way.

use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;

use crate::config::{
    ClientSettings, ServerTarget, DEFAULT_EVENT_BUFFER, DEFAULT_OUTGOING_BUFFER,
};
use crate::transport::{ConnectionHandle, Connector, Outgoing, SessionEvent};

/// How often the connection thread drains queued outbound frames.
const OUTGOING_POLL: Duration = Duration::from_millis(8);

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    Accepted,
    Denied(String),
}

#[derive(Serialize, Deserialize)]
struct HandshakeLine {
    handshake: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl Handshake {
    /// Parse the server's first line.  `None` when it is not a handshake.
    pub fn parse(line: &str) -> Option<Self> {
        let parsed: HandshakeLine = serde_json::from_str(line.trim()).ok()?;
        match parsed.handshake.as_str() {
            "accepted" => Some(Handshake::Accepted),
            "denied" => Some(Handshake::Denied(parsed.reason.unwrap_or_default())),
            _ => None,
        }
    }

    /// Wire form, without the trailing newline.
    pub fn to_line(&self) -> String {
        let line = match self {
            Handshake::Accepted => HandshakeLine {
                handshake: "accepted".into(),
                reason: None,
            },
            Handshake::Denied(reason) => HandshakeLine {
                handshake: "denied".into(),
                reason: Some(reason.clone()),
            },
        };
        serde_json::to_string(&line).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
    handshake_timeout: Duration,
    event_buffer: usize,
    outgoing_buffer: usize,
}

impl TcpConnector {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            event_buffer: DEFAULT_EVENT_BUFFER,
            outgoing_buffer: DEFAULT_OUTGOING_BUFFER,
        }
    }

    /// Queue capacities taken from the loaded settings.
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self::new().with_buffers(settings.event_buffer, settings.outgoing_buffer)
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// How long the server may take to send its handshake line.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_buffers(mut self, event_buffer: usize, outgoing_buffer: usize) -> Self {
        self.event_buffer = event_buffer;
        self.outgoing_buffer = outgoing_buffer;
        self
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for TcpConnector {
    fn open(&mut self, target: &ServerTarget) -> ConnectionHandle {
        let (event_tx, event_rx) =
            crossbeam_channel::bounded::<SessionEvent>(self.event_buffer.max(1));
        let (out_tx, out_rx) = crossbeam_channel::bounded::<Outgoing>(self.outgoing_buffer.max(1));
        let handle = ConnectionHandle::new(event_rx, out_tx);

        let target = target.clone();
        let timeouts = Timeouts {
            connect: self.connect_timeout,
            handshake: self.handshake_timeout,
        };
        let spawned = thread::Builder::new()
            .name("world-sync-net".into())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!("[net] Failed to create Tokio runtime: {}", e);
                        let _ = event_tx.send(SessionEvent::ConnectionFailed);
                        return;
                    }
                };
                rt.block_on(run_connection(target, timeouts, event_tx, out_rx));
            });

        match spawned {
            Ok(worker) => handle.with_worker(worker),
            Err(e) => {
                // The event sender died with the closure; the session sees a
                // closed channel and reports the attempt as failed.
                error!("[net] Failed to spawn connection thread: {}", e);
                handle
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Timeouts {
    connect: Duration,
    handshake: Duration,
}

enum Flush {
    Idle,
    Closed,
    Failed(std::io::Error),
}

async fn run_connection(
    target: ServerTarget,
    timeouts: Timeouts,
    events: Sender<SessionEvent>,
    outgoing: Receiver<Outgoing>,
) {
    let addr = target.to_string();
    let stream = match tokio::time::timeout(timeouts.connect, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!("[net] Connect to {} failed: {}", addr, e);
            let _ = events.send(SessionEvent::ConnectionFailed);
            return;
        }
        Err(_) => {
            warn!("[net] Connect to {} timed out", addr);
            let _ = events.send(SessionEvent::ConnectionFailed);
            return;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!("[net] set_nodelay failed: {}", e);
    }

    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let handshake = tokio::select! {
        read = tokio::time::timeout(timeouts.handshake, lines.next_line()) => read,
        _ = wait_for_close(&outgoing) => {
            debug!("[net] Closed while waiting for the handshake from {}", addr);
            let _ = write_half.shutdown().await;
            return;
        }
    };

    let handshake = match handshake {
        Ok(read) => read,
        Err(_) => {
            warn!("[net] No handshake from {} within {:?}", addr, timeouts.handshake);
            let _ = events.send(SessionEvent::ConnectionFailed);
            let _ = write_half.shutdown().await;
            return;
        }
    };

    match handshake {
        Ok(Some(line)) => match Handshake::parse(&line) {
            Some(Handshake::Accepted) => {
                info!("[net] Handshake accepted by {}", addr);
                if events.send(SessionEvent::ConnectionAccepted).is_err() {
                    return;
                }
            }
            Some(Handshake::Denied(reason)) => {
                let _ = events.send(SessionEvent::ConnectionDenied(reason));
                return;
            }
            None => {
                warn!("[net] Unexpected handshake line from {}: {}", addr, line);
                let _ = events.send(SessionEvent::ConnectionFailed);
                return;
            }
        },
        Ok(None) => {
            warn!("[net] {} closed the connection before the handshake", addr);
            let _ = events.send(SessionEvent::ConnectionFailed);
            return;
        }
        Err(e) => {
            warn!("[net] Handshake read from {} failed: {}", addr, e);
            let _ = events.send(SessionEvent::ConnectionFailed);
            return;
        }
    }

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if events.send(SessionEvent::Message(line)).is_err() {
                        debug!("[net] Session dropped, closing");
                        break;
                    }
                }
                Ok(None) => {
                    info!("[net] {} closed the connection", addr);
                    let _ = events.send(SessionEvent::Disconnect);
                    break;
                }
                Err(e) => {
                    warn!("[net] Read from {} failed: {}", addr, e);
                    let _ = events.send(SessionEvent::Disconnect);
                    break;
                }
            },
            _ = tokio::time::sleep(OUTGOING_POLL) => {}
        }

        // Writes happen outside the select so a frame is never half sent.
        match flush_outgoing(&outgoing, &mut write_half).await {
            Flush::Idle => {}
            Flush::Closed => {
                debug!("[net] Close requested");
                break;
            }
            Flush::Failed(e) => {
                warn!("[net] Write to {} failed: {}", addr, e);
                let _ = events.send(SessionEvent::Disconnect);
                break;
            }
        }
    }

    let _ = write_half.shutdown().await;
    debug!("[net] Connection to {} finished", addr);
}

/// Resolve once the session asks to close or drops its sender.  Frames
/// queued before the handshake have nowhere to go and are discarded.
async fn wait_for_close(rx: &Receiver<Outgoing>) {
    loop {
        tokio::time::sleep(OUTGOING_POLL).await;
        loop {
            match rx.try_recv() {
                Ok(Outgoing::Frame(frame)) => {
                    debug!("[net] Dropping frame sent before the handshake: {}", frame.payload)
                }
                Ok(Outgoing::Close) | Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => break,
            }
        }
    }
}

/// Write every queued frame.  Stops at `Close` or when the session is gone.
async fn flush_outgoing(rx: &Receiver<Outgoing>, writer: &mut OwnedWriteHalf) -> Flush {
    loop {
        match rx.try_recv() {
            Ok(Outgoing::Frame(frame)) => {
                trace!(
                    "[net] -> {} ({})",
                    frame.payload,
                    if frame.reliability.is_reliable() { "reliable" } else { "unreliable" }
                );
                let mut line = frame.payload.into_bytes();
                line.push(b'\n');
                if let Err(e) = writer.write_all(&line).await {
                    return Flush::Failed(e);
                }
            }
            Ok(Outgoing::Close) | Err(TryRecvError::Disconnected) => return Flush::Closed,
            Err(TryRecvError::Empty) => return Flush::Idle,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
