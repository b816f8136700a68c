//! Protocol and domain types shared by the chess server and client.
//!
//! Both sides agree on colours, squares, moves, results and the [`Packet`]
//! enum that travels over the wire. The [`Clock`] and the [`RuleEngine`]
//! seam live here too, since the server runs them authoritatively and the
//! client runs them as a local projection.

pub mod clock;
pub mod codec;
pub mod rules;

pub use clock::Clock;
pub use rules::{RuleEngine, RulesError, StandardRules};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const PROTOCOL_VERSION: u32 = 1;
pub const START_CLOCK_SECONDS: f64 = 10.0 * 60.0;
pub const ABORT_SECONDS: f64 = 30.0;

/// Stable connection identifier assigned by the server.
pub type PlayerId = u32;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChessColor {
    White,
    Black,
}

impl ChessColor {
    pub fn opponent(self) -> Self {
        match self {
            ChessColor::White => ChessColor::Black,
            ChessColor::Black => ChessColor::White,
        }
    }
}

impl fmt::Display for ChessColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChessColor::White => write!(f, "White"),
            ChessColor::Black => write!(f, "Black"),
        }
    }
}

/// Board square as a 0..64 index, a1 = 0 and h8 = 63.
///
/// The inner byte is public so it can cross the wire unchanged; anything
/// decoded from a peer must be checked with [`Square::is_valid`].
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Square(pub u8);

impl Square {
    pub fn new(index: u8) -> Option<Self> {
        (index < 64).then_some(Self(index))
    }

    pub fn from_coords(file: u8, rank: u8) -> Option<Self> {
        if file > 7 || rank > 7 {
            return None;
        }
        Some(Self(rank * 8 + file))
    }

    /// Parses algebraic notation such as `e4`.
    pub fn from_algebraic(s: &str) -> Option<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != 2 {
            return None;
        }
        let file = bytes[0].checked_sub(b'a')?;
        let rank = bytes[1].checked_sub(b'1')?;
        Self::from_coords(file, rank)
    }

    pub fn is_valid(self) -> bool {
        self.0 < 64
    }

    pub fn index(self) -> u8 {
        self.0
    }

    pub fn file(self) -> u8 {
        self.0 % 8
    }

    pub fn rank(self) -> u8 {
        self.0 / 8
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return write!(f, "#{}", self.0);
        }
        write!(f, "{}{}", (b'a' + self.file()) as char, self.rank() + 1)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PieceKind {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromotionPiece {
    Queen,
    Rook,
    Bishop,
    Knight,
}

impl PromotionPiece {
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'q' => Some(Self::Queen),
            'r' => Some(Self::Rook),
            'b' => Some(Self::Bishop),
            'n' => Some(Self::Knight),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::Queen => 'q',
            Self::Rook => 'r',
            Self::Bishop => 'b',
            Self::Knight => 'n',
        }
    }
}

/// A move request: origin, destination and the optional promotion piece.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ChessMove {
    pub start: Square,
    pub target: Square,
    pub promotion: Option<PromotionPiece>,
}

impl ChessMove {
    pub fn new(start: Square, target: Square, promotion: Option<PromotionPiece>) -> Self {
        Self {
            start,
            target,
            promotion,
        }
    }

    /// Both squares are on the board and the move goes somewhere.
    pub fn is_well_formed(&self) -> bool {
        self.start.is_valid() && self.target.is_valid() && self.start != self.target
    }
}

impl fmt::Display for ChessMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.start, self.target)?;
        if let Some(piece) = self.promotion {
            write!(f, "{}", piece.as_char())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid move notation: {0}")]
pub struct ParseMoveError(pub String);

impl FromStr for ChessMove {
    type Err = ParseMoveError;

    /// Parses coordinate notation: `e2e4`, `e7e8q`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ParseMoveError(s.to_string());
        if !s.is_ascii() || (s.len() != 4 && s.len() != 5) {
            return Err(invalid());
        }

        let start = Square::from_algebraic(&s[0..2]).ok_or_else(invalid)?;
        let target = Square::from_algebraic(&s[2..4]).ok_or_else(invalid)?;
        let promotion = match s[4..].chars().next() {
            Some(c) => Some(PromotionPiece::from_char(c).ok_or_else(invalid)?),
            None => None,
        };

        Ok(ChessMove::new(start, target, promotion))
    }
}

/// Outcome of a move accepted by the rule engine.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveResult {
    #[default]
    None,
    Check,
    WhiteCheckmated,
    BlackCheckmated,
    Stalemate,
}

impl MoveResult {
    pub fn is_game_over(self) -> bool {
        matches!(
            self,
            MoveResult::WhiteCheckmated | MoveResult::BlackCheckmated | MoveResult::Stalemate
        )
    }

    pub fn game_result(self) -> Option<GameResult> {
        match self {
            MoveResult::WhiteCheckmated => Some(GameResult::WhiteCheckmated),
            MoveResult::BlackCheckmated => Some(GameResult::BlackCheckmated),
            MoveResult::Stalemate => Some(GameResult::Stalemate),
            MoveResult::None | MoveResult::Check => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum GameResult {
    WhiteCheckmated,
    BlackCheckmated,
    Resignation,
    Stalemate,
    AgreedDraw,
    OutOfTime,
    Walkover,
    Aborted,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    // client -> server
    Connect {
        client_version: u32,
    },
    RequestMove {
        player_id: PlayerId,
        start: Square,
        target: Square,
        promotion: Option<PromotionPiece>,
    },
    RequestResign {
        player_id: PlayerId,
    },
    RequestDraw {
        player_id: PlayerId,
    },
    Disconnect,

    // server -> client
    Connected {
        client_id: PlayerId,
    },
    StartGame {
        color: ChessColor,
        time_left: f64,
        start_time: u64,
    },
    InitGame,
    Move {
        mover_id: PlayerId,
        start: Square,
        target: Square,
        promotion: Option<PromotionPiece>,
        white_time_left: f64,
        black_time_left: f64,
    },
    PlayerRequestedDraw {
        requester_id: PlayerId,
    },
    PresentResult {
        winner_id: Option<PlayerId>,
        result: GameResult,
    },
    Disconnected {
        reason: String,
    },
}

/// Current wall-clock time in unix milliseconds.
pub fn timestamp_millis() -> u64 {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or(std::time::Duration::from_secs(0))
        .as_millis();
    (millis.min(u64::MAX as u128)) as u64
}
