//! world-sync-client binary
//!
//! Headless client: connects to a server over TCP, walks a simulated player
//! in a circle and logs what the server tells it about the world.
//!
//! ## Configuration (TOML via `--config`, env via `config` crate, CLI flags)
//!
//! | Key                               | Default     | Description                  |
//! |-----------------------------------|-------------|------------------------------|
//! | `WORLD_SYNC_SERVER_IP`            | `127.0.0.1` | Server address               |
//! | `WORLD_SYNC_SERVER_PORT`          | `7777`      | Server port                  |
//! | `WORLD_SYNC_MOVEMENT_INTERVAL_MS` | `130`       | Movement send interval       |
//! | `WORLD_SYNC_EVENT_BUFFER`         | `1024`      | Inbound event queue capacity |
//! | `WORLD_SYNC_OUTGOING_BUFFER`      | `64`        | Outbound frame queue capacity|
//!
//! CLI flags win over the file and the environment.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use world_sync::{
    engine::RACE_MENU, ClientSettings, EngineEvent, HeadlessEngine, LoggingView, Mode,
    SessionContext, SyncController, TcpConnector, Vec3, PLAYER_FORM_ID,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "world-sync-client", about = "World Sync headless client", version)]
struct Args {
    /// TOML settings file
    #[arg(long, env = "WORLD_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Server address (overrides settings)
    #[arg(long)]
    server_ip: Option<String>,

    /// Server port (overrides settings)
    #[arg(long)]
    server_port: Option<u16>,

    /// Tick rate (Hz)
    #[arg(long, default_value_t = 60.0)]
    tick_rate_hz: f32,

    /// Stop after this many ticks (0 = run forever)
    #[arg(long, default_value_t = 0)]
    ticks: u64,

    /// Retry a failed connection after this many milliseconds
    #[arg(long)]
    retry_after_ms: Option<u64>,

    /// Connect timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    connect_timeout_ms: u64,

    /// Handshake timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    handshake_timeout_ms: u64,
}

// ---------------------------------------------------------------------------
// Simulated player
// ---------------------------------------------------------------------------

/// Walk in a circle, jump every few seconds, swap gear now and then.
fn simulate(engine: &mut HeadlessEngine, tick: u64, tick_rate_hz: f32) -> Option<EngineEvent> {
    let t = tick as f32 / tick_rate_hz;
    let angle = t * 0.5;
    engine.movement.pos = Vec3::new(angle.cos() * 200.0, angle.sin() * 200.0, 0.0);
    engine.movement.rot = Vec3::new(0.0, 0.0, angle.to_degrees() + 90.0);
    engine.movement.direction = 0.0;
    engine.movement.health_percentage = 1.0;

    let every = |secs: f32| tick > 0 && tick % ((secs * tick_rate_hz).max(1.0) as u64) == 0;
    if every(3.0) {
        engine.play_animation("JumpStandingStart");
    }
    if every(20.0) {
        engine.open_menu(RACE_MENU);
    } else if every(21.0) {
        engine.close_menu(RACE_MENU);
    }
    if every(10.0) {
        engine.inventory = serde_json::json!({ "entries": [{ "baseId": 0x12eb7, "count": 1, "worn": tick % 2 == 0 }] });
        return Some(EngineEvent::Equip {
            actor: PLAYER_FORM_ID,
        });
    }
    None
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    // Initialise logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("world_sync=debug".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut settings =
        ClientSettings::load(args.config.as_deref()).context("failed to load settings")?;
    if let Some(ip) = args.server_ip {
        settings.server_ip = ip;
    }
    if let Some(port) = args.server_port {
        settings.server_port = port;
    }

    log::info!(
        "Starting world-sync-client (server={}, movement_interval={}ms, tick_rate={}Hz)",
        settings.target(),
        settings.movement_interval_ms,
        args.tick_rate_hz,
    );

    let connector = TcpConnector::from_settings(&settings)
        .with_connect_timeout(Duration::from_millis(args.connect_timeout_ms))
        .with_handshake_timeout(Duration::from_millis(args.handshake_timeout_ms));
    let mut controller = SyncController::new(
        SessionContext::new(),
        &settings,
        connector,
        HeadlessEngine::new(),
        Box::new(LoggingView::new()),
    );

    let tick_period = Duration::from_secs_f32(1.0 / args.tick_rate_hz.max(1.0));
    let mut retry_at: Option<Instant> = None;
    let mut tick: u64 = 0;

    while args.ticks == 0 || tick < args.ticks {
        let now = Instant::now();

        if let Some(event) = simulate(controller.engine_mut(), tick, args.tick_rate_hz) {
            controller.handle_engine_event(event);
        }

        let failures = controller.tick(now);
        for failure in &failures {
            eprintln!("world-sync-client: {failure}");
        }
        if !failures.is_empty() {
            retry_at = args
                .retry_after_ms
                .map(|ms| now + Duration::from_millis(ms));
        }
        if retry_at.is_some_and(|at| now >= at) {
            retry_at = None;
            controller.reconnect();
        }

        if controller.mode() == Mode::Offline {
            log::info!("Offline; stopping");
            break;
        }

        tick += 1;
        thread::sleep(tick_period.saturating_sub(now.elapsed()));
    }

    log::info!(
        "Stopped after {} ticks ({} forms known)",
        tick,
        controller.world().form_count()
    );
    Ok(())
}
