//! Match server tuning.

use shared::{ABORT_SECONDS, PROTOCOL_VERSION, START_CLOCK_SECONDS};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Period of the match loop
    pub tick_duration: Duration,
    /// Per-player budget handed out at match start, in seconds
    pub start_clock_seconds: f64,
    /// How long White may take over the first move before the match is aborted
    pub abort_after: Duration,
    /// Time between the terminal state and closing the connections
    pub cleanup_grace: Duration,
    /// Only clients announcing this version complete the handshake
    pub client_version: u32,
    pub max_clients: usize,
    /// Emit a debug status line every N ticks
    pub status_interval_ticks: u64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            tick_duration: Duration::from_millis(100),
            start_clock_seconds: START_CLOCK_SECONDS,
            abort_after: Duration::from_secs_f64(ABORT_SECONDS),
            cleanup_grace: Duration::from_secs(60),
            client_version: PROTOCOL_VERSION,
            max_clients: 2,
            status_interval_ticks: 30,
        }
    }
}

impl MatchConfig {
    /// Builds a config from the CLI's seconds-based knobs. Negative values
    /// clamp to zero.
    pub fn from_seconds(tick_rate: u32, clock: f64, abort: f64, grace: f64) -> Self {
        let tick_rate = tick_rate.max(1);
        Self {
            tick_duration: Duration::from_secs_f64(1.0 / tick_rate as f64),
            start_clock_seconds: clock.max(0.0),
            abort_after: Duration::from_secs_f64(abort.max(0.0)),
            cleanup_grace: Duration::from_secs_f64(grace.max(0.0)),
            status_interval_ticks: u64::from(tick_rate) * 3,
            ..Self::default()
        }
    }
}
