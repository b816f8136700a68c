//! Client-side projection of the authoritative match.
//!
//! The mirror never decides anything. Packets from the server set flags and
//! apply confirmed moves; [`ClientMatchMirror::tick`] evaluates the guards of
//! the active state and runs one-time entry actions on each transition. What
//! the player should see is queued as [`ViewEvent`]s for the view layer.
//!
//! Local moves are predicted: they are applied to a copy of the confirmed
//! board right away and reconciled when the server's `Move` arrives. If no
//! confirmation arrives in time the prediction is thrown away and the board
//! re-renders from the last confirmed position.

use log::{debug, info, warn};
use shared::clock::format_clock;
use shared::{
    ChessColor, ChessMove, Clock, GameResult, Packet, PlayerId, PromotionPiece, RuleEngine,
    RulesError, Square, ABORT_SECONDS,
};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connecting,
    WaitingForOpponent,
    WaitingForFirstMove,
    Playing,
    EndOfGame,
    Aborted,
    ConnectionError,
}

impl ClientState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ClientState::EndOfGame | ClientState::Aborted | ClientState::ConnectionError
        )
    }
}

/// What the view layer should show. Drained with [`ClientMatchMirror::take_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    ShowMessage(String),
    HideMessage,
    GameStarted { color: ChessColor },
    ShowTime { color: ChessColor, seconds: f64 },
    CurrentPlayer(ChessColor),
    /// A move was applied to the displayed board
    MoveApplied { color: ChessColor, mv: ChessMove },
    /// The opponent offered a draw; requesting a draw now accepts it
    DrawOffered,
    /// Our own offer reached the server
    DrawOfferSent,
    DrawOfferCleared,
    /// Redraw from the confirmed board after an unconfirmed prediction was dropped
    BoardRefresh,
    /// The server's move differed from our prediction and replaced it
    BoardCorrected,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MirrorError {
    #[error("not connected to a match")]
    NotConnected,
    #[error("the game is not in progress")]
    NotPlaying,
    #[error("it is not your turn")]
    NotYourTurn,
    #[error("still waiting for the server to confirm the previous move")]
    AwaitingConfirmation,
    #[error("{0} is not a legal move")]
    IllegalMove(ChessMove),
    #[error("{0} promotes, add a piece letter (q, r, b, n)")]
    PromotionRequired(ChessMove),
    #[error(transparent)]
    Rules(#[from] RulesError),
}

#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// How long a predicted move waits for the server before it is dropped
    pub confirm_timeout: Duration,
    /// First move deadline announced by the server, in seconds
    pub abort_seconds: f64,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            confirm_timeout: Duration::from_secs(1),
            abort_seconds: ABORT_SECONDS,
        }
    }
}

impl MirrorConfig {
    /// Builds a config from the CLI knobs. The abort threshold must match the
    /// server's; negative values clamp to zero.
    pub fn from_cli(confirm_timeout_ms: u64, abort_seconds: f64) -> Self {
        Self {
            confirm_timeout: Duration::from_millis(confirm_timeout_ms),
            abort_seconds: abort_seconds.max(0.0),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingMove {
    mv: ChessMove,
    sent_at: Instant,
}

pub struct ClientMatchMirror<E: RuleEngine + Clone> {
    config: MirrorConfig,
    state: ClientState,

    // Flags set from server packets, read by the state guards
    connected: bool,
    lost: bool,
    client_id: Option<PlayerId>,
    game_started: bool,
    game_initialized: bool,
    result: Option<(Option<PlayerId>, GameResult)>,

    color: ChessColor,
    is_my_turn: bool,
    time_left: f64,
    start_time_ms: u64,
    clock: Clock,
    last_tick_at: Option<Instant>,

    confirmed: E,
    predicted: E,
    pending: Option<PendingMove>,
    draw_offer_pending: bool,

    stopped: bool,
    last_message: Option<String>,
    shown_time: Option<(ChessColor, String)>,
    events: Vec<ViewEvent>,
}

impl<E: RuleEngine + Clone> ClientMatchMirror<E> {
    pub fn new(config: MirrorConfig, rules: E) -> Self {
        let mut mirror = Self {
            config,
            state: ClientState::Connecting,
            connected: false,
            lost: false,
            client_id: None,
            game_started: false,
            game_initialized: false,
            result: None,
            color: ChessColor::White,
            is_my_turn: false,
            time_left: 0.0,
            start_time_ms: 0,
            clock: Clock::new(),
            last_tick_at: None,
            predicted: rules.clone(),
            confirmed: rules,
            pending: None,
            draw_offer_pending: false,
            stopped: false,
            last_message: None,
            shown_time: None,
            events: Vec::new(),
        };
        mirror.on_enter(ClientState::Connecting);
        mirror
    }

    /// Applies one packet from the server. Never changes state directly.
    pub fn handle_packet(&mut self, packet: Packet) {
        match packet {
            Packet::Connected { client_id } => {
                info!("Connected! Client ID: {}", client_id);
                self.client_id = Some(client_id);
                self.connected = true;
            }

            Packet::StartGame {
                color,
                time_left,
                start_time,
            } => {
                info!("Match started, playing {}", color);
                self.color = color;
                self.time_left = time_left;
                self.start_time_ms = start_time;
                self.is_my_turn = color == ChessColor::White;
                self.clock.start(time_left);
                self.game_started = true;
                self.events.push(ViewEvent::GameStarted { color });
            }

            Packet::InitGame => {
                self.game_initialized = true;
            }

            Packet::Move {
                mover_id,
                start,
                target,
                promotion,
                white_time_left,
                black_time_left,
            } => {
                let mv = ChessMove::new(start, target, promotion);
                self.apply_server_move(mover_id, mv, white_time_left, black_time_left);
            }

            Packet::PlayerRequestedDraw { requester_id } => {
                if Some(requester_id) == self.client_id {
                    self.events.push(ViewEvent::DrawOfferSent);
                } else {
                    self.draw_offer_pending = true;
                    self.events.push(ViewEvent::DrawOffered);
                }
            }

            Packet::PresentResult { winner_id, result } => {
                if self.result.is_none() {
                    self.result = Some((winner_id, result));
                }
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.connected = false;
                self.lost = true;
            }

            other => warn!("Unexpected packet from server: {:?}", other),
        }
    }

    /// The transport lost the connection.
    pub fn on_disconnected(&mut self) {
        self.connected = false;
        self.lost = true;
    }

    fn apply_server_move(&mut self, mover_id: PlayerId, mv: ChessMove, white: f64, black: f64) {
        if let Err(e) = self.confirmed.try_move(&mv) {
            // The server is authoritative; a local rejection means our board drifted
            warn!("Server move {} rejected by local rules: {}", mv, e);
        }

        let mine = Some(mover_id) == self.client_id;
        let mover_color = if mine { self.color } else { self.color.opponent() };

        self.clock.switch_active();
        self.clock.set_authoritative(white, black);
        self.time_left = self.clock.remaining(self.color);
        self.is_my_turn = !mine;

        let correction = match self.pending.take() {
            Some(pending) => !(mine && pending.mv == mv),
            None => false,
        };
        self.predicted = self.confirmed.clone();

        if correction {
            debug!("Prediction replaced by server move {}", mv);
            self.events.push(ViewEvent::BoardCorrected);
        }
        self.events.push(ViewEvent::MoveApplied {
            color: mover_color,
            mv,
        });
        self.events.push(ViewEvent::ShowTime {
            color: ChessColor::White,
            seconds: white,
        });
        self.events.push(ViewEvent::ShowTime {
            color: ChessColor::Black,
            seconds: black,
        });
        self.events
            .push(ViewEvent::CurrentPlayer(mover_color.opponent()));

        self.draw_offer_pending = false;
        self.events.push(ViewEvent::DrawOfferCleared);
    }

    /// Re-evaluates guards, runs entry actions and per-tick updates.
    /// `unix_ms` is the wall clock used for the first-move countdown.
    pub fn tick(&mut self, now: Instant, unix_ms: u64) {
        if let Some(last) = self.last_tick_at {
            self.clock
                .tick(now.saturating_duration_since(last).as_secs_f64());
        }
        self.last_tick_at = Some(now);

        while let Some(next) = self.next_state() {
            info!("Client state {:?} -> {:?}", self.state, next);
            self.state = next;
            self.on_enter(next);
        }

        match self.state {
            ClientState::WaitingForFirstMove => self.show_countdown(unix_ms),
            ClientState::Playing => {
                let color = self.current_color();
                let seconds = self.clock.remaining(color);
                let text = format_clock(seconds);
                if self.shown_time.as_ref() != Some(&(color, text.clone())) {
                    self.shown_time = Some((color, text));
                    self.events.push(ViewEvent::ShowTime { color, seconds });
                }
            }
            _ => {}
        }

        self.expire_pending(now);
    }

    fn next_state(&self) -> Option<ClientState> {
        if self.state.is_terminal() {
            return None;
        }

        if let Some((_, result)) = self.result {
            return Some(if result == GameResult::Aborted {
                ClientState::Aborted
            } else {
                ClientState::EndOfGame
            });
        }

        match self.state {
            ClientState::Connecting if self.connected => Some(ClientState::WaitingForOpponent),
            ClientState::Connecting if self.lost => Some(ClientState::ConnectionError),
            ClientState::WaitingForOpponent if self.game_started => {
                Some(ClientState::WaitingForFirstMove)
            }
            ClientState::WaitingForFirstMove if self.game_initialized => Some(ClientState::Playing),
            ClientState::WaitingForOpponent
            | ClientState::WaitingForFirstMove
            | ClientState::Playing
                if !self.connected =>
            {
                Some(ClientState::ConnectionError)
            }
            _ => None,
        }
    }

    fn on_enter(&mut self, state: ClientState) {
        match state {
            ClientState::Connecting => self.show_message("Connecting..."),
            ClientState::WaitingForOpponent => self.show_message("Waiting for an opponent..."),
            ClientState::WaitingForFirstMove => {
                self.events.push(ViewEvent::ShowTime {
                    color: ChessColor::White,
                    seconds: self.time_left,
                });
                self.events.push(ViewEvent::ShowTime {
                    color: ChessColor::Black,
                    seconds: self.time_left,
                });
                self.events.push(ViewEvent::CurrentPlayer(ChessColor::White));
            }
            ClientState::Playing => {
                self.last_message = None;
                self.events.push(ViewEvent::HideMessage);
            }
            ClientState::EndOfGame => {
                if let Some((winner, result)) = self.result {
                    let text = result_text(result, self.winner_color(winner));
                    self.show_message(&text);
                }
                self.stop_game();
            }
            ClientState::Aborted => {
                self.show_message("The game was aborted.");
                self.stop_game();
            }
            ClientState::ConnectionError => {
                self.show_message("Connection error. Try again.");
                self.stop_game();
            }
        }
    }

    fn show_countdown(&mut self, unix_ms: u64) {
        let deadline_ms = self.start_time_ms as f64 + self.config.abort_seconds * 1000.0;
        let seconds_left = ((deadline_ms - unix_ms as f64) / 1000.0).ceil() as i64;

        let text = if seconds_left <= -5 {
            "You have probably lost connection or gotten out of sync...".to_string()
        } else {
            let who = if self.color == ChessColor::Black {
                "White has"
            } else {
                "You have"
            };
            let shown = seconds_left.clamp(0, self.config.abort_seconds.max(0.0) as i64);
            format!("{} {} seconds to play the first move", who, shown)
        };
        self.show_message(&text);
    }

    fn expire_pending(&mut self, now: Instant) {
        let Some(pending) = self.pending else {
            return;
        };
        if now.saturating_duration_since(pending.sent_at) < self.config.confirm_timeout {
            return;
        }

        warn!("Move {} was not confirmed in time", pending.mv);
        self.pending = None;
        self.predicted = self.confirmed.clone();
        self.events.push(ViewEvent::BoardRefresh);
    }

    /// Checks a move locally, predicts it and returns the request to send.
    pub fn attempt_move(
        &mut self,
        start: Square,
        target: Square,
        promotion: Option<PromotionPiece>,
        now: Instant,
    ) -> Result<Packet, MirrorError> {
        let player_id = self.client_id.ok_or(MirrorError::NotConnected)?;
        if !matches!(
            self.state,
            ClientState::WaitingForFirstMove | ClientState::Playing
        ) {
            return Err(MirrorError::NotPlaying);
        }
        if !self.is_my_turn {
            return Err(MirrorError::NotYourTurn);
        }
        if self.pending.is_some() {
            return Err(MirrorError::AwaitingConfirmation);
        }

        let mv = ChessMove::new(start, target, promotion);
        if !mv.is_well_formed() || !self.confirmed.is_legal_move(start, target) {
            return Err(MirrorError::IllegalMove(mv));
        }
        if promotion.is_none() && self.confirmed.is_promoting_move(start, target) {
            return Err(MirrorError::PromotionRequired(mv));
        }

        let mut predicted = self.confirmed.clone();
        predicted.try_move(&mv)?;
        self.predicted = predicted;
        self.pending = Some(PendingMove { mv, sent_at: now });

        Ok(Packet::RequestMove {
            player_id,
            start,
            target,
            promotion,
        })
    }

    pub fn request_resign(&self) -> Result<Packet, MirrorError> {
        let player_id = self.client_id.ok_or(MirrorError::NotConnected)?;
        if !matches!(
            self.state,
            ClientState::WaitingForFirstMove | ClientState::Playing
        ) {
            return Err(MirrorError::NotPlaying);
        }
        Ok(Packet::RequestResign { player_id })
    }

    /// Offers a draw, or accepts the opponent's pending offer.
    pub fn request_draw(&self) -> Result<Packet, MirrorError> {
        let player_id = self.client_id.ok_or(MirrorError::NotConnected)?;
        if self.state != ClientState::Playing {
            return Err(MirrorError::NotPlaying);
        }
        Ok(Packet::RequestDraw { player_id })
    }

    /// Halts the local clock. Safe to call repeatedly.
    pub fn stop_game(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.clock.stop();
        self.events.push(ViewEvent::Stopped);
    }

    fn show_message(&mut self, text: &str) {
        if self.last_message.as_deref() == Some(text) {
            return;
        }
        self.last_message = Some(text.to_string());
        self.events.push(ViewEvent::ShowMessage(text.to_string()));
    }

    fn current_color(&self) -> ChessColor {
        if self.is_my_turn {
            self.color
        } else {
            self.color.opponent()
        }
    }

    fn winner_color(&self, winner: Option<PlayerId>) -> Option<ChessColor> {
        let winner = winner?;
        if Some(winner) == self.client_id {
            Some(self.color)
        } else {
            Some(self.color.opponent())
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn client_id(&self) -> Option<PlayerId> {
        self.client_id
    }

    pub fn color(&self) -> Option<ChessColor> {
        self.game_started.then_some(self.color)
    }

    pub fn is_my_turn(&self) -> bool {
        self.is_my_turn
    }

    pub fn time_left(&self) -> f64 {
        self.time_left
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn has_pending_move(&self) -> bool {
        self.pending.is_some()
    }

    pub fn draw_offer_pending(&self) -> bool {
        self.draw_offer_pending
    }

    pub fn result(&self) -> Option<(Option<PlayerId>, GameResult)> {
        self.result
    }

    /// Board as last confirmed by the server.
    pub fn confirmed_board(&self) -> &E {
        &self.confirmed
    }

    /// Board to display: the confirmed board plus any pending prediction.
    pub fn display_board(&self) -> &E {
        &self.predicted
    }

    pub fn take_events(&mut self) -> Vec<ViewEvent> {
        std::mem::take(&mut self.events)
    }
}

/// Human-readable line announcing the end of the game.
pub fn result_text(result: GameResult, winner: Option<ChessColor>) -> String {
    let by_winner = |white: &str, black: &str| match winner {
        Some(ChessColor::White) => white.to_string(),
        Some(ChessColor::Black) => black.to_string(),
        None => "Draw.".to_string(),
    };

    match result {
        GameResult::WhiteCheckmated => "Black won by checkmate.".to_string(),
        GameResult::BlackCheckmated => "White won by checkmate.".to_string(),
        GameResult::Resignation => {
            by_winner("White won by resignation.", "Black won by resignation.")
        }
        GameResult::Stalemate => "Stalemate.".to_string(),
        GameResult::AgreedDraw => "Draw.".to_string(),
        GameResult::OutOfTime => by_winner("White won on time.", "Black won on time."),
        GameResult::Walkover => by_winner(
            "White won. Black left the game.",
            "Black won. White left the game.",
        ),
        GameResult::Aborted => "The game was aborted.".to_string(),
    }
}
