//! Chess rules collaborator.
//!
//! The match logic never derives chess rules itself; it asks a [`RuleEngine`]
//! whether a move is legal and what it caused. [`StandardRules`] is the stock
//! implementation, backed by `shakmaty` and starting from the initial
//! position.

use crate::{ChessColor, ChessMove, MoveResult, PieceKind, PromotionPiece, Square};
use shakmaty::{Chess, Color, Move, Position, Role};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RulesError {
    #[error("square {0} is off the board")]
    InvalidSquare(Square),
    #[error("illegal move {0}")]
    IllegalMove(ChessMove),
    #[error("move {0} needs a promotion piece")]
    MissingPromotion(ChessMove),
    #[error("move {0} does not promote")]
    UnexpectedPromotion(ChessMove),
}

/// Synchronous move validation and application.
pub trait RuleEngine {
    /// Applies the move if it is legal and reports what it caused.
    fn try_move(&mut self, mv: &ChessMove) -> Result<MoveResult, RulesError>;

    fn is_legal_move(&self, start: Square, target: Square) -> bool;

    fn is_promoting_move(&self, start: Square, target: Square) -> bool;

    fn piece_at(&self, square: Square) -> Option<(PieceKind, ChessColor)>;

    fn side_to_move(&self) -> ChessColor;
}

#[derive(Debug, Clone, Default)]
pub struct StandardRules {
    position: Chess,
}

impl StandardRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Legal moves whose king-move endpoints match `start` and `target`.
    /// Castling is matched by the king's destination, not the rook square.
    fn matching_moves(&self, start: Square, target: Square) -> Vec<Move> {
        if !start.is_valid() || !target.is_valid() {
            return Vec::new();
        }

        self.position
            .legal_moves()
            .into_iter()
            .filter(|m| endpoints(m) == Some((start, target)))
            .collect()
    }

    fn evaluate_position(&self) -> MoveResult {
        if self.position.is_checkmate() {
            match self.position.turn() {
                Color::White => MoveResult::WhiteCheckmated,
                Color::Black => MoveResult::BlackCheckmated,
            }
        } else if self.position.is_stalemate() {
            MoveResult::Stalemate
        } else if self.position.is_check() {
            MoveResult::Check
        } else {
            MoveResult::None
        }
    }
}

impl RuleEngine for StandardRules {
    fn try_move(&mut self, mv: &ChessMove) -> Result<MoveResult, RulesError> {
        for square in [mv.start, mv.target] {
            if !square.is_valid() {
                return Err(RulesError::InvalidSquare(square));
            }
        }

        let candidates = self.matching_moves(mv.start, mv.target);
        if candidates.is_empty() {
            return Err(RulesError::IllegalMove(*mv));
        }

        let wanted = mv.promotion.map(promotion_role);
        let chosen = candidates.iter().find(|m| m.promotion() == wanted);

        match chosen {
            Some(m) => {
                self.position.play_unchecked(m);
                Ok(self.evaluate_position())
            }
            None if mv.promotion.is_none() => Err(RulesError::MissingPromotion(*mv)),
            None => Err(RulesError::UnexpectedPromotion(*mv)),
        }
    }

    fn is_legal_move(&self, start: Square, target: Square) -> bool {
        !self.matching_moves(start, target).is_empty()
    }

    fn is_promoting_move(&self, start: Square, target: Square) -> bool {
        self.matching_moves(start, target)
            .iter()
            .any(|m| m.promotion().is_some())
    }

    fn piece_at(&self, square: Square) -> Option<(PieceKind, ChessColor)> {
        if !square.is_valid() {
            return None;
        }

        let board_square = shakmaty::Square::new(u32::from(square.index()));
        self.position
            .board()
            .piece_at(board_square)
            .map(|piece| (piece_kind(piece.role), chess_color(piece.color)))
    }

    fn side_to_move(&self) -> ChessColor {
        chess_color(self.position.turn())
    }
}

fn to_square(square: shakmaty::Square) -> Square {
    Square(u32::from(square) as u8)
}

fn endpoints(m: &Move) -> Option<(Square, Square)> {
    match m {
        Move::Castle { king, rook } => {
            let king = to_square(*king);
            let rook = to_square(*rook);
            let file = if rook.file() > king.file() { 6 } else { 2 };
            Some((king, Square::from_coords(file, king.rank())?))
        }
        _ => Some((to_square(m.from()?), to_square(m.to()))),
    }
}

fn promotion_role(piece: PromotionPiece) -> Role {
    match piece {
        PromotionPiece::Queen => Role::Queen,
        PromotionPiece::Rook => Role::Rook,
        PromotionPiece::Bishop => Role::Bishop,
        PromotionPiece::Knight => Role::Knight,
    }
}

fn piece_kind(role: Role) -> PieceKind {
    match role {
        Role::Pawn => PieceKind::Pawn,
        Role::Knight => PieceKind::Knight,
        Role::Bishop => PieceKind::Bishop,
        Role::Rook => PieceKind::Rook,
        Role::Queen => PieceKind::Queen,
        Role::King => PieceKind::King,
    }
}

fn chess_color(color: Color) -> ChessColor {
    match color {
        Color::White => ChessColor::White,
        Color::Black => ChessColor::Black,
    }
}
