//! World Sync
//!
//! Client-side multiplayer state synchronization: pushes the local player's
//! state to a remote authority and mirrors the remote world locally.
//!
//! ## Architecture
//!
//! ```text
//! SyncController  (controller.rs)   ← one call per rendered frame
//!   ├── Session<C>        (transport.rs)  ← connect / events / send
//!   │     └── Connector   (tcp.rs, loopback)
//!   ├── RemoteServer      (world.rs)      ← WorldModel + MsgHandler
//!   │     └── dispatch    (dispatcher.rs) ← type | t → handler method
//!   ├── OutboundPipeline  (outbound.rs)   ← movement, animation, look, equipment
//!   ├── ViewSlot          (view.rs)       ← deferred view replacement
//!   └── HostEngine        (engine.rs)     ← local game state
//! ```
//!
//! Everything that must survive a controller rebuild lives in a
//! [`SessionContext`] owned by the host.

// Always available: protocol, model and controller.
pub mod config;
pub mod context;
pub mod controller;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod outbound;
pub mod protocol;
pub mod transport;
pub mod types;
pub mod view;
pub mod world;

// Socket transport requires the `net` feature.
#[cfg(feature = "net")]
pub mod tcp;

// Convenience re-exports
pub use config::{ClientSettings, ServerTarget};
pub use context::SessionContext;
pub use controller::{ControllerState, Mode, SyncController};
pub use dispatcher::MsgHandler;
pub use engine::{EngineEvent, HeadlessEngine, HostEngine};
pub use error::{Result, SyncError};
pub use outbound::OutboundPipeline;
pub use protocol::{InboundMessage, MessageKind, MsgType, OutboundMessage, Reliability};
pub use transport::{
    loopback, loopback_with_buffers, ConnectionState, Connector, Session, SessionEvent,
};
pub use types::{FormIdx, Vec3, PLAYER_FORM_ID};
pub use view::{LoggingView, ViewSlot, WorldView};
pub use world::{FormModel, RemoteServer, WorldModel, WorldReconciler};

#[cfg(feature = "net")]
pub use tcp::TcpConnector;
