//! Console command input

use shared::ChessMove;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

/// One action typed by the player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerCommand {
    Move(ChessMove),
    Resign,
    Draw,
    Board,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("unknown command '{0}', type 'help' for the list of commands")]
    Unknown(String),
}

pub const HELP: &str =
    "Commands: <from><to>[promotion] (e.g. e2e4, e7e8q), draw, resign, board, help, quit";

/// Parses one line of player input. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Option<Result<PlayerCommand, InputError>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let command = match line.to_ascii_lowercase().as_str() {
        "resign" => Ok(PlayerCommand::Resign),
        "draw" => Ok(PlayerCommand::Draw),
        "board" => Ok(PlayerCommand::Board),
        "help" | "?" => Ok(PlayerCommand::Help),
        "quit" | "exit" => Ok(PlayerCommand::Quit),
        other => other
            .parse::<ChessMove>()
            .map(PlayerCommand::Move)
            .map_err(|_| InputError::Unknown(line.to_string())),
    };
    Some(command)
}

/// Turns lines from a reader (stdin in the binary) into player commands
pub struct InputManager<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> InputManager<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }

    /// Waits for the next non-blank line. Returns `None` once input is closed.
    ///
    /// Cancel safe, so it can be used as a `select!` branch.
    pub async fn next_command(&mut self) -> Option<Result<PlayerCommand, InputError>> {
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(command) = parse_command(&line) {
                        return Some(command);
                    }
                }
                Ok(None) | Err(_) => return None,
            }
        }
    }
}
