//! Per-match player sessions.

use shared::{ChessColor, PlayerId};

/// One seated participant. Owned exclusively by the match controller.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSession {
    pub id: PlayerId,
    pub color: ChessColor,
    /// Remaining budget in seconds, never negative.
    pub time_left: f64,
    pub requesting_draw: bool,
    pub connected: bool,
}

impl PlayerSession {
    pub fn new(id: PlayerId, color: ChessColor, time_left: f64) -> Self {
        Self {
            id,
            color,
            time_left: time_left.max(0.0),
            requesting_draw: false,
            connected: true,
        }
    }

    pub fn charge(&mut self, seconds: f64) {
        self.time_left = (self.time_left - seconds).max(0.0);
    }
}

/// The two seated sessions, indexed by colour.
#[derive(Debug, Clone)]
pub struct Players {
    white: PlayerSession,
    black: PlayerSession,
}

impl Players {
    /// Seats two sessions.
    ///
    /// # Panics
    ///
    /// Panics if the colours are not complementary; pairing must never
    /// produce two sessions of the same colour.
    pub fn pair(a: PlayerSession, b: PlayerSession) -> Self {
        assert_ne!(a.color, b.color, "paired sessions must have opposite colours");
        assert_ne!(a.id, b.id, "a connection cannot play against itself");

        match a.color {
            ChessColor::White => Self { white: a, black: b },
            ChessColor::Black => Self { white: b, black: a },
        }
    }

    pub fn get(&self, color: ChessColor) -> &PlayerSession {
        match color {
            ChessColor::White => &self.white,
            ChessColor::Black => &self.black,
        }
    }

    pub fn get_mut(&mut self, color: ChessColor) -> &mut PlayerSession {
        match color {
            ChessColor::White => &mut self.white,
            ChessColor::Black => &mut self.black,
        }
    }

    pub fn color_of(&self, id: PlayerId) -> Option<ChessColor> {
        if self.white.id == id {
            Some(ChessColor::White)
        } else if self.black.id == id {
            Some(ChessColor::Black)
        } else {
            None
        }
    }

    pub fn by_id_mut(&mut self, id: PlayerId) -> Option<&mut PlayerSession> {
        let color = self.color_of(id)?;
        Some(self.get_mut(color))
    }

    pub fn opponent_of(&self, id: PlayerId) -> Option<&PlayerSession> {
        self.color_of(id).map(|color| self.get(color.opponent()))
    }

    pub fn both_requesting_draw(&self) -> bool {
        self.white.requesting_draw && self.black.requesting_draw
    }

    pub fn clear_draw_requests(&mut self) {
        self.white.requesting_draw = false;
        self.black.requesting_draw = false;
    }

    pub fn connected(&self) -> impl Iterator<Item = &PlayerSession> {
        [&self.white, &self.black].into_iter().filter(|s| s.connected)
    }

    pub fn times(&self) -> (f64, f64) {
        (self.white.time_left, self.black.time_left)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn players() -> Players {
        Players::pair(
            PlayerSession::new(1, ChessColor::Black, 300.0),
            PlayerSession::new(2, ChessColor::White, 300.0),
        )
    }

    #[test]
    fn test_pair_indexes_by_color() {
        let players = players();
        assert_eq!(players.get(ChessColor::White).id, 2);
        assert_eq!(players.get(ChessColor::Black).id, 1);
        assert_eq!(players.color_of(1), Some(ChessColor::Black));
        assert_eq!(players.color_of(3), None);
        assert_eq!(players.opponent_of(1).map(|s| s.id), Some(2));
    }

    #[test]
    #[should_panic(expected = "opposite colours")]
    fn test_pair_same_color_panics() {
        Players::pair(
            PlayerSession::new(1, ChessColor::White, 300.0),
            PlayerSession::new(2, ChessColor::White, 300.0),
        );
    }

    #[test]
    fn test_charge_clamps_at_zero() {
        let mut session = PlayerSession::new(1, ChessColor::White, 1.0);
        session.charge(0.25);
        assert_eq!(session.time_left, 0.75);
        session.charge(5.0);
        assert_eq!(session.time_left, 0.0);
    }

    #[test]
    fn test_draw_flags() {
        let mut players = players();
        players.by_id_mut(1).unwrap().requesting_draw = true;
        assert!(!players.both_requesting_draw());

        players.by_id_mut(2).unwrap().requesting_draw = true;
        assert!(players.both_requesting_draw());

        players.clear_draw_requests();
        assert!(!players.get(ChessColor::White).requesting_draw);
        assert!(!players.get(ChessColor::Black).requesting_draw);
    }

    #[test]
    fn test_connected_sessions() {
        let mut players = players();
        assert_eq!(players.connected().count(), 2);

        players.by_id_mut(2).unwrap().connected = false;
        let remaining: Vec<_> = players.connected().map(|s| s.id).collect();
        assert_eq!(remaining, vec![1]);
    }
}
