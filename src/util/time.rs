//! Time utilities for game simulation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Tick rate configuration
pub const SIMULATION_TPS: u32 = 60; // fixed-timestep simulation
pub const SNAPSHOT_TPS: u32 = 20; // state broadcasts per second
pub const TICK_DURATION_MICROS: u64 = 1_000_000 / SIMULATION_TPS as u64;

/// Calculate delta time for physics (in seconds)
pub fn tick_delta() -> f32 {
    1.0 / SIMULATION_TPS as f32
}

/// Serve delay before the ball is (re)launched
pub const SERVE_DELAY: Duration = Duration::from_secs(1);

/// Grace period for a disconnected player to reconnect before forfeiting
pub const DISCONNECT_GRACE: Duration = Duration::from_secs(60);

/// Tournament rooms: how long a lone player waits before winning by forfeit
pub const NO_SHOW_TIMEOUT: Duration = Duration::from_secs(120);

/// Tournament matches with both players assigned but never started
pub const STALLED_MATCH_TIMEOUT_SECS: i64 = 120;
