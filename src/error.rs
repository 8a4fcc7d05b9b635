//! Error types for world-sync.

use thiserror::Error;

use crate::config::ServerTarget;
use crate::protocol::MessageKind;

/// Every failure the sync engine can report.
///
/// None of these are fatal: connection failures leave the controller
/// disconnected, message failures drop the offending message.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network-level failure while establishing the connection.
    #[error("connection to {target} failed")]
    ConnectionFailed { target: ServerTarget },

    /// The remote authority rejected the connection.
    #[error("connection denied: {reason}")]
    ConnectionDenied { reason: String },

    /// Send attempted without an open connection.
    #[error("not connected")]
    NotConnected,

    /// The connection worker dropped its end of the channel.
    #[error("connection channel closed")]
    ChannelClosed,

    /// The outbound queue is at capacity; the frame was not queued.
    #[error("outbound queue full")]
    ChannelFull,

    /// Neither `type` nor `t` resolved to a known message kind.
    #[error("unknown message type {0}")]
    UnknownMessageType(String),

    /// The type resolved but the payload did not match its schema.
    #[error("malformed {kind} message: {source}")]
    MalformedMessage {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },

    /// Inbound frame was not valid JSON.
    #[error("invalid JSON frame: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("failed to encode outbound message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;
