//! Console rendering of mirror view events

use crate::mirror::ViewEvent;
use shared::clock::format_clock;
use shared::{ChessColor, PieceKind, RuleEngine, Square};

pub struct ConsoleView {
    perspective: ChessColor,
    white_time: f64,
    black_time: f64,
}

impl ConsoleView {
    pub fn new() -> Self {
        Self {
            perspective: ChessColor::White,
            white_time: 0.0,
            black_time: 0.0,
        }
    }

    /// Prints one event. Board-changing events redraw `board`.
    pub fn render<E: RuleEngine>(&mut self, event: &ViewEvent, board: &E) {
        match event {
            ViewEvent::ShowMessage(text) => println!("{}", text),
            ViewEvent::HideMessage => {}
            ViewEvent::GameStarted { color } => {
                self.perspective = *color;
                println!("You play {}.", color);
                println!("{}", render_board(board, self.perspective));
            }
            ViewEvent::ShowTime { color, seconds } => match color {
                ChessColor::White => self.white_time = *seconds,
                ChessColor::Black => self.black_time = *seconds,
            },
            ViewEvent::CurrentPlayer(color) => {
                println!(
                    "{} to move  [White {} | Black {}]",
                    color,
                    format_clock(self.white_time),
                    format_clock(self.black_time)
                );
            }
            ViewEvent::MoveApplied { color, mv } => {
                println!("{} played {}", color, mv);
                println!("{}", render_board(board, self.perspective));
            }
            ViewEvent::DrawOffered => {
                println!("Your opponent offers a draw. Type 'draw' to accept.")
            }
            ViewEvent::DrawOfferSent => println!("Draw offer sent."),
            ViewEvent::DrawOfferCleared => {}
            ViewEvent::BoardRefresh => {
                println!("Move not confirmed by the server, try again.");
                println!("{}", render_board(board, self.perspective));
            }
            ViewEvent::BoardCorrected => println!("Board corrected by the server."),
            ViewEvent::Stopped => println!("Game over."),
        }
    }
}

impl Default for ConsoleView {
    fn default() -> Self {
        Self::new()
    }
}

fn piece_char(kind: PieceKind, color: ChessColor) -> char {
    let c = match kind {
        PieceKind::Pawn => 'p',
        PieceKind::Knight => 'n',
        PieceKind::Bishop => 'b',
        PieceKind::Rook => 'r',
        PieceKind::Queen => 'q',
        PieceKind::King => 'k',
    };
    match color {
        ChessColor::White => c.to_ascii_uppercase(),
        ChessColor::Black => c,
    }
}

/// ASCII board seen from `perspective`'s side, white pieces in upper case.
pub fn render_board<E: RuleEngine>(board: &E, perspective: ChessColor) -> String {
    let ranks: Vec<u8> = match perspective {
        ChessColor::White => (0..8).rev().collect(),
        ChessColor::Black => (0..8).collect(),
    };
    let files: Vec<u8> = match perspective {
        ChessColor::White => (0..8).collect(),
        ChessColor::Black => (0..8).rev().collect(),
    };

    let mut out = String::new();
    for &rank in &ranks {
        out.push_str(&format!("{} ", rank + 1));
        for &file in &files {
            let c = Square::from_coords(file, rank)
                .and_then(|sq| board.piece_at(sq))
                .map_or('.', |(kind, color)| piece_char(kind, color));
            out.push(' ');
            out.push(c);
        }
        out.push('\n');
    }

    out.push_str("  ");
    for &file in &files {
        out.push(' ');
        out.push((b'a' + file) as char);
    }
    out
}
