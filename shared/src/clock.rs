//! Two-sided chess clock.
//!
//! The clock counts down whichever colour is active. It is driven by explicit
//! `tick` calls rather than a background timer, so the server match loop and
//! the client mirror each advance their own copy once per tick. Server
//! snapshots overwrite both values wholesale through
//! [`Clock::set_authoritative`].

use crate::ChessColor;

#[derive(Debug, Clone, PartialEq)]
pub struct Clock {
    white_time: f64,
    black_time: f64,
    active: Option<ChessColor>,
    running: bool,
}

impl Clock {
    /// A stopped clock with no time on either side.
    pub fn new() -> Self {
        Self {
            white_time: 0.0,
            black_time: 0.0,
            active: None,
            running: false,
        }
    }

    /// Gives both sides the same budget and starts the clock with no side active.
    pub fn start(&mut self, initial_seconds: f64) {
        let initial = initial_seconds.max(0.0);
        self.white_time = initial;
        self.black_time = initial;
        self.active = None;
        self.running = true;
    }

    pub fn tick(&mut self, delta_seconds: f64) {
        if !self.running || delta_seconds <= 0.0 {
            return;
        }

        match self.active {
            Some(ChessColor::White) => {
                self.white_time = (self.white_time - delta_seconds).max(0.0);
            }
            Some(ChessColor::Black) => {
                self.black_time = (self.black_time - delta_seconds).max(0.0);
            }
            None => {}
        }
    }

    /// Hands the countdown to the other side. The first switch activates Black,
    /// since White's first move is played before any clock runs.
    pub fn switch_active(&mut self) {
        if !self.running {
            return;
        }

        self.active = match self.active {
            None | Some(ChessColor::White) => Some(ChessColor::Black),
            Some(ChessColor::Black) => Some(ChessColor::White),
        };
    }

    pub fn set_authoritative(&mut self, white_seconds: f64, black_seconds: f64) {
        self.white_time = white_seconds.max(0.0);
        self.black_time = black_seconds.max(0.0);
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn remaining(&self, color: ChessColor) -> f64 {
        match color {
            ChessColor::White => self.white_time,
            ChessColor::Black => self.black_time,
        }
    }

    pub fn active(&self) -> Option<ChessColor> {
        self.active
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Formats seconds the way the board clock shows them: `mm:ss`, or
/// `mm:ss.f` once under a minute.
pub fn format_clock(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    if seconds < 60.0 {
        let tenths = (seconds * 10.0).floor() as u64;
        format!("00:{:02}.{}", tenths / 10, tenths % 10)
    } else {
        let whole = seconds.floor() as u64;
        format!("{:02}:{:02}", whole / 60, whole % 60)
    }
}
