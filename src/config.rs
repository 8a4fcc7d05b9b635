//! Client settings and the server target they describe.
//!
//! ## Sources (later wins)
//!
//! | Source                     | Example                              |
//! |----------------------------|--------------------------------------|
//! | built-in defaults          | `127.0.0.1:7777`, 130 ms movement    |
//! | TOML file (optional)       | `server_port = 10000`                |
//! | `WORLD_SYNC_*` environment | `WORLD_SYNC_SERVER_IP=10.0.0.5`      |
//!
//! `event_buffer` and `outgoing_buffer` bound the two queues between the
//! tick thread and a connection worker.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const DEFAULT_SERVER_IP: &str = "127.0.0.1";
pub const DEFAULT_SERVER_PORT: u16 = 7777;
pub const DEFAULT_MOVEMENT_INTERVAL_MS: u64 = 130;
pub const DEFAULT_EVENT_BUFFER: usize = 1024;
pub const DEFAULT_OUTGOING_BUFFER: usize = 64;

const ENV_PREFIX: &str = "WORLD_SYNC";

// ---------------------------------------------------------------------------
// ServerTarget
// ---------------------------------------------------------------------------

/// Address + port of the remote authority.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerTarget {
    pub ip: String,
    pub port: u16,
}

impl ServerTarget {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }
}

impl std::fmt::Display for ServerTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

// ---------------------------------------------------------------------------
// ClientSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    pub server_ip: String,
    pub server_port: u16,
    /// Minimum gap between two movement updates.
    pub movement_interval_ms: u64,
    /// Inbound events buffered before the connection worker stops reading.
    pub event_buffer: usize,
    /// Outbound frames buffered before sends are refused.
    pub outgoing_buffer: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_ip: DEFAULT_SERVER_IP.into(),
            server_port: DEFAULT_SERVER_PORT,
            movement_interval_ms: DEFAULT_MOVEMENT_INTERVAL_MS,
            event_buffer: DEFAULT_EVENT_BUFFER,
            outgoing_buffer: DEFAULT_OUTGOING_BUFFER,
        }
    }
}

impl ClientSettings {
    /// Layer defaults, an optional TOML file and `WORLD_SYNC_*` env vars.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("server_ip", DEFAULT_SERVER_IP)?
            .set_default("server_port", i64::from(DEFAULT_SERVER_PORT))?
            .set_default("movement_interval_ms", DEFAULT_MOVEMENT_INTERVAL_MS as i64)?
            .set_default("event_buffer", DEFAULT_EVENT_BUFFER as i64)?
            .set_default("outgoing_buffer", DEFAULT_OUTGOING_BUFFER as i64)?;

        if let Some(path) = file {
            builder = builder.add_source(config::File::new(
                &path.to_string_lossy(),
                config::FileFormat::Toml,
            ));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    pub fn target(&self) -> ServerTarget {
        ServerTarget::new(self.server_ip.clone(), self.server_port)
    }

    pub fn movement_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.movement_interval_ms)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
