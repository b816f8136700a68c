//! Authoritative match state machine.
//!
//! [`ServerMatchController`] owns everything that decides the outcome of a
//! match: the connection registry, the two [`PlayerSession`]s, the input
//! queue, the rule engine and the clock. The network layer feeds it
//! connection events and command packets and calls [`ServerMatchController::tick`]
//! once per tick interval; every outbound packet goes through a [`Transport`].
//!
//! Waiting is modelled as named states with guards evaluated on each tick,
//! so the controller never blocks and can be driven with synthetic
//! timestamps in tests.

use crate::client_manager::ClientManager;
use crate::config::MatchConfig;
use crate::input_queue::{ClientInput, InputKind, InputQueue, InputRejected};
use crate::session::{PlayerSession, Players};
use crate::transport::Transport;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::clock::format_clock;
use shared::{
    timestamp_millis, ChessColor, ChessMove, Clock, GameResult, MoveResult, Packet, PlayerId,
    RuleEngine,
};
use std::net::SocketAddr;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    WaitingForPlayers,
    WaitingForFirstMove,
    Playing,
    EndOfGame,
    Aborted,
    ConnectionError,
}

impl ServerState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ServerState::EndOfGame | ServerState::Aborted | ServerState::ConnectionError
        )
    }
}

/// How a finished match ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOutcome {
    pub result: GameResult,
    pub winner: Option<PlayerId>,
}

/// Notices for whoever observes the match (logging, a UI, tests).
#[derive(Debug, Clone, PartialEq)]
pub enum MatchEvent {
    StateChanged { from: ServerState, to: ServerState },
    MatchStarted { white: PlayerId, black: PlayerId },
    MoveAccepted { color: ChessColor, mv: ChessMove },
    DrawOffered { requester: PlayerId },
    Finished(MatchOutcome),
    /// The match is over and views should tear down
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectRefused {
    #[error("Server full")]
    ServerFull,
    #[error("Match already in progress")]
    MatchInProgress,
    #[error("Unsupported client version {0}")]
    UnsupportedVersion(u32),
    #[error("Unknown connection")]
    UnknownConnection,
}

pub struct ServerMatchController<E: RuleEngine> {
    config: MatchConfig,
    rules: E,
    state: ServerState,
    clients: ClientManager,
    queue: InputQueue,
    players: Option<Players>,
    current: ChessColor,
    clock: Clock,
    started_at: Option<Instant>,
    last_move_at: Option<Instant>,
    last_tick_at: Option<Instant>,
    outcome: Option<MatchOutcome>,
    cleanup_at: Option<Instant>,
    stopped: bool,
    events: Vec<MatchEvent>,
    rng: StdRng,
    tick: u64,
}

impl<E: RuleEngine> ServerMatchController<E> {
    pub fn new(config: MatchConfig, rules: E) -> Self {
        Self::with_rng(config, rules, StdRng::from_entropy())
    }

    /// Same as [`ServerMatchController::new`] with a caller-provided coin.
    pub fn with_rng(config: MatchConfig, rules: E, rng: StdRng) -> Self {
        let clients = ClientManager::new(config.max_clients);
        Self {
            config,
            rules,
            state: ServerState::WaitingForPlayers,
            clients,
            queue: InputQueue::new(),
            players: None,
            current: ChessColor::White,
            clock: Clock::new(),
            started_at: None,
            last_move_at: None,
            last_tick_at: None,
            outcome: None,
            cleanup_at: None,
            stopped: false,
            events: Vec::new(),
            rng,
            tick: 0,
        }
    }

    pub fn on_connected(
        &mut self,
        conn_id: PlayerId,
        addr: SocketAddr,
    ) -> Result<(), ConnectRefused> {
        if self.state != ServerState::WaitingForPlayers {
            return Err(ConnectRefused::MatchInProgress);
        }
        if !self.clients.add_client(conn_id, addr) {
            return Err(ConnectRefused::ServerFull);
        }
        Ok(())
    }

    /// Completes the version handshake, making the connection eligible for pairing.
    pub fn on_handshake(
        &mut self,
        conn_id: PlayerId,
        client_version: u32,
    ) -> Result<(), ConnectRefused> {
        if !self.clients.contains(conn_id) {
            return Err(ConnectRefused::UnknownConnection);
        }
        if client_version != self.config.client_version {
            return Err(ConnectRefused::UnsupportedVersion(client_version));
        }
        self.clients.mark_ready(conn_id);
        Ok(())
    }

    /// Forgets the connection. A seated session is only marked disconnected;
    /// the next tick decides what that means for the match.
    pub fn on_disconnected(&mut self, conn_id: PlayerId) {
        self.clients.remove_client(&conn_id);

        if let Some(session) = self.players.as_mut().and_then(|p| p.by_id_mut(conn_id)) {
            if session.connected {
                info!("{} player {} left the match", session.color, conn_id);
                session.connected = false;
            }
        }
    }

    /// Queues a command received on `conn_id` for the next tick.
    pub fn submit(
        &mut self,
        conn_id: PlayerId,
        packet: Packet,
        received_at: Instant,
    ) -> Result<(), InputRejected> {
        let seated = self
            .players
            .as_ref()
            .map_or(false, |p| p.color_of(conn_id).is_some());
        if !seated {
            return Err(InputRejected::NotInMatch(conn_id));
        }

        let input = ClientInput::from_packet(conn_id, packet, received_at)?;
        debug!("Queued {:?} from {}", input.kind, conn_id);
        self.queue.enqueue(input);
        Ok(())
    }

    /// Advances the state machine by one tick.
    pub fn tick<T: Transport>(&mut self, now: Instant, transport: &mut T) {
        self.tick += 1;
        if let Some(last) = self.last_tick_at {
            self.clock
                .tick(now.saturating_duration_since(last).as_secs_f64());
        }
        self.last_tick_at = Some(now);

        match self.state {
            ServerState::WaitingForPlayers => {
                if self.clients.len() == 2 && self.clients.all_ready() {
                    self.start_match(now, transport);
                }
            }
            ServerState::WaitingForFirstMove => self.tick_first_move(now, transport),
            ServerState::Playing => {
                let inputs = self.queue.drain_all();
                self.tick_playing(inputs, now, false, transport);
            }
            ServerState::EndOfGame | ServerState::Aborted | ServerState::ConnectionError => {
                let discarded = self.queue.drain_all();
                if !discarded.is_empty() {
                    debug!("Discarded {} inputs after the match ended", discarded.len());
                }
            }
        }

        let interval = self.config.status_interval_ticks;
        if interval > 0 && self.tick % interval == 0 {
            debug!(
                "Tick {}: {:?}, {} connections, white {} black {}",
                self.tick,
                self.state,
                self.clients.len(),
                format_clock(self.clock.remaining(ChessColor::White)),
                format_clock(self.clock.remaining(ChessColor::Black)),
            );
        }
    }

    fn start_match<T: Transport>(&mut self, now: Instant, transport: &mut T) {
        let ids = self.clients.ids();
        let (one, two) = (ids[0], ids[1]);

        let one_color = if self.rng.gen_bool(0.5) {
            ChessColor::White
        } else {
            ChessColor::Black
        };
        let budget = self.config.start_clock_seconds;
        let players = Players::pair(
            PlayerSession::new(one, one_color, budget),
            PlayerSession::new(two, one_color.opponent(), budget),
        );

        let start_time = timestamp_millis();
        for id in [one, two] {
            if let Some(color) = players.color_of(id) {
                let session = players.get(color);
                transport.unicast(
                    id,
                    Packet::StartGame {
                        color,
                        time_left: session.time_left,
                        start_time,
                    },
                );
            }
        }

        let white = players.get(ChessColor::White).id;
        let black = players.get(ChessColor::Black).id;
        info!("Match started: {} plays White, {} plays Black", white, black);

        self.players = Some(players);
        self.current = ChessColor::White;
        self.clock.start(budget);
        self.started_at = Some(now);
        self.last_move_at = Some(now);
        self.events.push(MatchEvent::MatchStarted { white, black });
        self.transition(ServerState::WaitingForFirstMove, now, transport);
    }

    fn tick_first_move<T: Transport>(&mut self, now: Instant, transport: &mut T) {
        let mut inputs = self.queue.drain_all().into_iter();

        while let Some(input) = inputs.next() {
            match input.kind {
                InputKind::MoveRequested(mv) if self.is_current(input.session) => {
                    if self.flag_fallen(input.received_at) {
                        debug!(
                            "Dropping first move {} from {}: flag already fell",
                            mv, input.session
                        );
                        continue;
                    }
                    match self.rules.try_move(&mv) {
                        Ok(MoveResult::None) => {
                            transport.broadcast(Packet::InitGame);
                            self.accept_move(mv, input.received_at, transport);
                            self.transition(ServerState::Playing, now, transport);
                            self.tick_playing(inputs.collect(), now, true, transport);
                            return;
                        }
                        Ok(result) => {
                            warn!("First move {} produced {:?}, aborting", mv, result);
                            self.transition(ServerState::Aborted, now, transport);
                            return;
                        }
                        Err(e) => warn!("Rejected first move from {}: {}", input.session, e),
                    }
                }
                InputKind::MoveRequested(mv) => {
                    warn!("Dropping out-of-turn move {} from {}", mv, input.session);
                }
                InputKind::ResignRequested => {
                    info!("Player {} resigned before the first move", input.session);
                    self.transition(ServerState::Aborted, now, transport);
                    return;
                }
                InputKind::DrawRequested => {
                    debug!("Ignoring draw request from {} before the first move", input.session);
                }
            }
        }

        let started_at = self.started_at.unwrap_or(now);
        if self.time_remaining(now) <= 0.0 {
            self.players_mut().get_mut(ChessColor::White).time_left = 0.0;
            let winner = self.players().get(ChessColor::Black).id;
            self.finish(GameResult::OutOfTime, Some(winner), now, transport);
        } else if now.saturating_duration_since(started_at) > self.config.abort_after {
            info!("No first move within {:?}", self.config.abort_after);
            self.transition(ServerState::Aborted, now, transport);
        } else if self.players().connected().count() < 2 {
            self.transition(ServerState::ConnectionError, now, transport);
        }
    }

    fn tick_playing<T: Transport>(
        &mut self,
        inputs: Vec<ClientInput>,
        now: Instant,
        mut move_taken: bool,
        transport: &mut T,
    ) {
        let mut move_result = MoveResult::None;
        let mut resigned: Option<PlayerId> = None;

        for input in inputs {
            let Some(color) = self.players().color_of(input.session) else {
                continue;
            };

            match input.kind {
                InputKind::MoveRequested(mv) => {
                    if move_taken || color != self.current {
                        warn!("Dropping out-of-turn move {} from {}", mv, input.session);
                        continue;
                    }
                    if self.flag_fallen(input.received_at) {
                        debug!("Dropping move {} from {}: flag already fell", mv, input.session);
                        continue;
                    }
                    match self.rules.try_move(&mv) {
                        Ok(result) => {
                            self.accept_move(mv, input.received_at, transport);
                            move_result = result;
                            move_taken = true;
                        }
                        Err(e) => warn!("Rejected move from {}: {}", input.session, e),
                    }
                }
                InputKind::DrawRequested => {
                    let players = self.players_mut();
                    players.get_mut(color).requesting_draw = true;
                    if !players.both_requesting_draw() {
                        transport.broadcast(Packet::PlayerRequestedDraw {
                            requester_id: input.session,
                        });
                        self.events.push(MatchEvent::DrawOffered {
                            requester: input.session,
                        });
                    }
                }
                InputKind::ResignRequested => {
                    if resigned.is_none() {
                        resigned = Some(input.session);
                    }
                }
            }
        }

        if let Some(result) = move_result.game_result() {
            let winner = match move_result {
                MoveResult::WhiteCheckmated => Some(self.players().get(ChessColor::Black).id),
                MoveResult::BlackCheckmated => Some(self.players().get(ChessColor::White).id),
                _ => None,
            };
            self.finish(result, winner, now, transport);
        } else if let Some(resigner) = resigned {
            let winner = self.players().opponent_of(resigner).map(|s| s.id);
            self.finish(GameResult::Resignation, winner, now, transport);
        } else if self.time_remaining(now) <= 0.0 {
            let loser = self.current;
            self.players_mut().get_mut(loser).time_left = 0.0;
            let winner = self.players().get(loser.opponent()).id;
            self.finish(GameResult::OutOfTime, Some(winner), now, transport);
        } else if self.players().connected().count() < 2 {
            let remaining = self.players().connected().next().map(|s| s.id);
            match remaining {
                Some(remaining) => {
                    self.finish(GameResult::Walkover, Some(remaining), now, transport)
                }
                None => self.transition(ServerState::ConnectionError, now, transport),
            }
        } else if self.players().both_requesting_draw() {
            self.finish(GameResult::AgreedDraw, None, now, transport);
        }
    }

    /// Charges the mover, broadcasts the move with both clocks and hands the turn over.
    fn accept_move<T: Transport>(
        &mut self,
        mv: ChessMove,
        received_at: Instant,
        transport: &mut T,
    ) {
        let elapsed = self
            .last_move_at
            .map_or(0.0, |last| received_at.saturating_duration_since(last).as_secs_f64());
        let color = self.current;

        let players = self.players_mut();
        let mover = players.get_mut(color);
        mover.charge(elapsed);
        let mover_id = mover.id;
        players.clear_draw_requests();
        let (white_time_left, black_time_left) = players.times();

        transport.broadcast(Packet::Move {
            mover_id,
            start: mv.start,
            target: mv.target,
            promotion: mv.promotion,
            white_time_left,
            black_time_left,
        });

        self.clock.switch_active();
        self.clock.set_authoritative(white_time_left, black_time_left);

        info!("{} played {} ({:.1}s)", color, mv, elapsed);
        self.events.push(MatchEvent::MoveAccepted { color, mv });
        self.current = color.opponent();
        self.last_move_at = Some(received_at);
    }

    fn finish<T: Transport>(
        &mut self,
        result: GameResult,
        winner: Option<PlayerId>,
        now: Instant,
        transport: &mut T,
    ) {
        if self.state.is_terminal() {
            return;
        }

        let outcome = MatchOutcome { result, winner };
        info!("Match finished: {:?}, winner {:?}", result, winner);
        transport.broadcast(Packet::PresentResult {
            winner_id: winner,
            result,
        });
        self.outcome = Some(outcome);
        self.events.push(MatchEvent::Finished(outcome));
        self.transition(ServerState::EndOfGame, now, transport);
    }

    /// Moves to `to`. Terminal states are never left, which makes their
    /// entry actions run exactly once.
    fn transition<T: Transport>(&mut self, to: ServerState, now: Instant, transport: &mut T) {
        if self.state == to || self.state.is_terminal() {
            return;
        }

        let from = self.state;
        info!("Match state {:?} -> {:?}", from, to);
        self.state = to;
        self.events.push(MatchEvent::StateChanged { from, to });

        if to.is_terminal() {
            self.enter_terminal(now, transport);
        }
    }

    fn enter_terminal<T: Transport>(&mut self, now: Instant, transport: &mut T) {
        if self.state == ServerState::Aborted {
            let outcome = MatchOutcome {
                result: GameResult::Aborted,
                winner: None,
            };
            transport.broadcast(Packet::PresentResult {
                winner_id: None,
                result: GameResult::Aborted,
            });
            self.outcome = Some(outcome);
            self.events.push(MatchEvent::Finished(outcome));
        }

        self.stop_game();
        self.cleanup_at = Some(now + self.config.cleanup_grace);
    }

    /// Halts the clock and tells observers to tear down. Safe to call repeatedly.
    pub fn stop_game(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.clock.stop();
        self.events.push(MatchEvent::Stopped);
    }

    fn is_current(&self, conn_id: PlayerId) -> bool {
        self.players
            .as_ref()
            .map_or(false, |p| p.get(self.current).id == conn_id)
    }

    /// True when the current mover had no time left at `at`.
    fn flag_fallen(&self, at: Instant) -> bool {
        let elapsed = self
            .last_move_at
            .map_or(0.0, |last| at.saturating_duration_since(last).as_secs_f64());
        self.current_player().time_left <= elapsed
    }

    fn time_remaining(&self, now: Instant) -> f64 {
        let elapsed = self
            .last_move_at
            .map_or(0.0, |last| now.saturating_duration_since(last).as_secs_f64());
        self.current_player().time_left - elapsed
    }

    fn players(&self) -> &Players {
        match &self.players {
            Some(players) => players,
            None => panic!("match sessions queried before pairing"),
        }
    }

    fn players_mut(&mut self) -> &mut Players {
        match &mut self.players {
            Some(players) => players,
            None => panic!("match sessions queried before pairing"),
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn outcome(&self) -> Option<MatchOutcome> {
        self.outcome
    }

    /// # Panics
    ///
    /// Panics before the match has been paired.
    pub fn current_player(&self) -> &PlayerSession {
        self.players().get(self.current)
    }

    /// # Panics
    ///
    /// Panics before the match has been paired.
    pub fn session(&self, color: ChessColor) -> &PlayerSession {
        self.players().get(color)
    }

    pub fn is_paired(&self) -> bool {
        self.players.is_some()
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn queued_inputs(&self) -> usize {
        self.queue.len()
    }

    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }

    pub fn cleanup_due(&self, now: Instant) -> bool {
        self.cleanup_at.map_or(false, |at| now >= at)
    }

    pub fn take_events(&mut self) -> Vec<MatchEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::GameMessage;
    use assert_approx_eq::assert_approx_eq;
    use shared::{PieceKind, RulesError, Square, StandardRules, PROTOCOL_VERSION};
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Accepts every move and reports a scripted sequence of results.
    #[derive(Default)]
    struct ScriptedRules {
        results: VecDeque<MoveResult>,
    }

    impl RuleEngine for ScriptedRules {
        fn try_move(&mut self, _mv: &ChessMove) -> Result<MoveResult, RulesError> {
            Ok(self.results.pop_front().unwrap_or_default())
        }

        fn is_legal_move(&self, _start: Square, _target: Square) -> bool {
            true
        }

        fn is_promoting_move(&self, _start: Square, _target: Square) -> bool {
            false
        }

        fn piece_at(&self, _square: Square) -> Option<(PieceKind, ChessColor)> {
            None
        }

        fn side_to_move(&self) -> ChessColor {
            ChessColor::White
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn at(t0: Instant, seconds: f64) -> Instant {
        t0 + Duration::from_secs_f64(seconds)
    }

    fn move_packet(player_id: PlayerId, notation: &str) -> Packet {
        let mv: ChessMove = notation.parse().unwrap();
        Packet::RequestMove {
            player_id,
            start: mv.start,
            target: mv.target,
            promotion: mv.promotion,
        }
    }

    fn connect_two<E: RuleEngine>(controller: &mut ServerMatchController<E>) {
        controller.on_connected(1, addr(4001)).unwrap();
        controller.on_connected(2, addr(4002)).unwrap();
        controller.on_handshake(1, PROTOCOL_VERSION).unwrap();
        controller.on_handshake(2, PROTOCOL_VERSION).unwrap();
    }

    /// Returns a paired controller in WaitingForFirstMove plus (white, black) ids.
    fn paired<E: RuleEngine>(rules: E) -> (ServerMatchController<E>, Instant, PlayerId, PlayerId) {
        let rng = StdRng::seed_from_u64(7);
        let mut controller = ServerMatchController::with_rng(MatchConfig::default(), rules, rng);
        connect_two(&mut controller);

        let t0 = Instant::now();
        let mut sent = Vec::new();
        controller.tick(t0, &mut sent);
        assert_eq!(controller.state(), ServerState::WaitingForFirstMove);

        let white = controller.session(ChessColor::White).id;
        let black = controller.session(ChessColor::Black).id;
        (controller, t0, white, black)
    }

    fn broadcasts(sent: &[GameMessage]) -> Vec<Packet> {
        sent.iter()
            .filter_map(|m| match m {
                GameMessage::BroadcastPacket { packet, .. } => Some(packet.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_pairing_unicasts_complementary_colors() {
        let mut controller = ServerMatchController::with_rng(
            MatchConfig::default(),
            StandardRules::new(),
            StdRng::seed_from_u64(1),
        );
        connect_two(&mut controller);

        let mut sent = Vec::new();
        controller.tick(Instant::now(), &mut sent);

        let mut colors = Vec::new();
        for message in &sent {
            match message {
                GameMessage::SendPacket {
                    conn_id,
                    packet: Packet::StartGame { color, time_left, .. },
                } => {
                    assert_eq!(*time_left, 600.0);
                    assert_eq!(controller.session(*color).id, *conn_id);
                    colors.push(*color);
                }
                _ => panic!("Unexpected message {:?}", message),
            }
        }
        assert_eq!(colors.len(), 2);
        assert_ne!(colors[0], colors[1]);
        assert_eq!(controller.current_player().color, ChessColor::White);
        assert!(controller.clock().is_running());
    }

    #[test]
    fn test_pairing_waits_for_handshake() {
        let mut controller =
            ServerMatchController::new(MatchConfig::default(), StandardRules::new());
        controller.on_connected(1, addr(4001)).unwrap();
        controller.on_connected(2, addr(4002)).unwrap();
        controller.on_handshake(1, PROTOCOL_VERSION).unwrap();

        let mut sent = Vec::new();
        controller.tick(Instant::now(), &mut sent);
        assert_eq!(controller.state(), ServerState::WaitingForPlayers);
        assert!(sent.is_empty());
        assert!(!controller.is_paired());
    }

    #[test]
    fn test_connection_refusals() {
        let mut controller =
            ServerMatchController::new(MatchConfig::default(), StandardRules::new());
        controller.on_connected(1, addr(4001)).unwrap();
        assert_eq!(
            controller.on_handshake(1, PROTOCOL_VERSION + 1),
            Err(ConnectRefused::UnsupportedVersion(PROTOCOL_VERSION + 1))
        );
        assert_eq!(
            controller.on_handshake(9, PROTOCOL_VERSION),
            Err(ConnectRefused::UnknownConnection)
        );

        controller.on_connected(2, addr(4002)).unwrap();
        assert_eq!(
            controller.on_connected(3, addr(4003)),
            Err(ConnectRefused::ServerFull)
        );
    }

    #[test]
    fn test_late_connection_refused_once_paired() {
        let (mut controller, _, white, _) = paired(StandardRules::new());
        controller.on_disconnected(white);
        assert_eq!(
            controller.on_connected(5, addr(4005)),
            Err(ConnectRefused::MatchInProgress)
        );
    }

    #[test]
    fn test_submit_rejects_outsiders_and_spoofing() {
        let mut controller =
            ServerMatchController::new(MatchConfig::default(), StandardRules::new());
        assert_eq!(
            controller.submit(1, Packet::RequestDraw { player_id: 1 }, Instant::now()),
            Err(InputRejected::NotInMatch(1))
        );

        let (mut controller, t0, white, black) = paired(StandardRules::new());
        assert_eq!(
            controller.submit(9, Packet::RequestDraw { player_id: 9 }, t0),
            Err(InputRejected::NotInMatch(9))
        );
        assert!(matches!(
            controller.submit(black, move_packet(white, "e2e4"), t0),
            Err(InputRejected::SpoofedPlayer { .. })
        ));
        assert_eq!(controller.queued_inputs(), 0);
    }

    #[test]
    fn test_first_move_enters_playing() {
        let (mut controller, t0, white, black) = paired(StandardRules::new());
        controller.submit(white, move_packet(white, "e2e4"), at(t0, 2.0)).unwrap();

        let mut sent = Vec::new();
        controller.tick(at(t0, 2.05), &mut sent);

        assert_eq!(controller.state(), ServerState::Playing);
        assert_eq!(controller.current_player().id, black);

        let packets = broadcasts(&sent);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0], Packet::InitGame);
        match &packets[1] {
            Packet::Move {
                mover_id,
                white_time_left,
                black_time_left,
                ..
            } => {
                assert_eq!(*mover_id, white);
                assert_approx_eq!(*white_time_left, 598.0, 1e-6);
                assert_eq!(*black_time_left, 600.0);
            }
            other => panic!("Unexpected packet {:?}", other),
        }
        assert_eq!(controller.clock().active(), Some(ChessColor::Black));
    }

    #[test]
    fn test_black_cannot_open() {
        let (mut controller, t0, _, black) = paired(StandardRules::new());
        controller.submit(black, move_packet(black, "e7e5"), t0).unwrap();

        let mut sent = Vec::new();
        controller.tick(at(t0, 0.1), &mut sent);
        assert_eq!(controller.state(), ServerState::WaitingForFirstMove);
        assert!(sent.is_empty());
    }

    #[test]
    fn test_special_first_move_aborts() {
        let rules = ScriptedRules {
            results: VecDeque::from([MoveResult::Check]),
        };
        let (mut controller, t0, white, _) = paired(rules);
        controller.submit(white, move_packet(white, "e2e4"), t0).unwrap();

        let mut sent = Vec::new();
        controller.tick(at(t0, 0.1), &mut sent);
        assert_eq!(controller.state(), ServerState::Aborted);
        assert_eq!(
            broadcasts(&sent),
            vec![Packet::PresentResult {
                winner_id: None,
                result: GameResult::Aborted
            }]
        );
    }

    #[test]
    fn test_resign_before_first_move_aborts() {
        let (mut controller, t0, _, black) = paired(StandardRules::new());
        controller
            .submit(black, Packet::RequestResign { player_id: black }, t0)
            .unwrap();

        let mut sent = Vec::new();
        controller.tick(at(t0, 0.1), &mut sent);
        assert_eq!(controller.state(), ServerState::Aborted);
        assert_eq!(
            controller.outcome(),
            Some(MatchOutcome {
                result: GameResult::Aborted,
                winner: None
            })
        );
        assert!(!controller.clock().is_running());
    }

    #[test]
    fn test_first_move_deadline_aborts() {
        let (mut controller, t0, _, _) = paired(StandardRules::new());
        let mut sent = Vec::new();

        controller.tick(at(t0, 29.9), &mut sent);
        assert_eq!(controller.state(), ServerState::WaitingForFirstMove);

        controller.tick(at(t0, 30.1), &mut sent);
        assert_eq!(controller.state(), ServerState::Aborted);
        assert!(controller.cleanup_due(at(t0, 90.2)));
        assert!(!controller.cleanup_due(at(t0, 60.0)));
    }

    #[test]
    fn test_disconnect_before_first_move() {
        let (mut controller, t0, white, _) = paired(StandardRules::new());
        controller.on_disconnected(white);

        let mut sent = Vec::new();
        controller.tick(at(t0, 0.1), &mut sent);
        assert_eq!(controller.state(), ServerState::ConnectionError);
        assert_eq!(controller.outcome(), None);
        assert!(sent.is_empty());
    }

    #[test]
    fn test_walkover_goes_to_remaining_player() {
        let (mut controller, t0, white, black) = paired(StandardRules::new());
        controller.submit(white, move_packet(white, "e2e4"), at(t0, 1.0)).unwrap();
        controller.tick(at(t0, 1.1), &mut Vec::new());
        assert_eq!(controller.state(), ServerState::Playing);

        controller.on_disconnected(black);
        let mut sent = Vec::new();
        controller.tick(at(t0, 1.2), &mut sent);

        assert_eq!(controller.state(), ServerState::EndOfGame);
        assert_eq!(
            broadcasts(&sent),
            vec![Packet::PresentResult {
                winner_id: Some(white),
                result: GameResult::Walkover
            }]
        );
    }

    #[test]
    fn test_both_leaving_mid_game_is_connection_error() {
        let (mut controller, t0, white, black) = paired(StandardRules::new());
        controller.submit(white, move_packet(white, "e2e4"), at(t0, 1.0)).unwrap();
        controller.tick(at(t0, 1.1), &mut Vec::new());

        controller.on_disconnected(white);
        controller.on_disconnected(black);
        controller.tick(at(t0, 1.2), &mut Vec::new());

        assert_eq!(controller.state(), ServerState::ConnectionError);
        assert_eq!(controller.outcome(), None);
    }

    #[test]
    fn test_draw_ignored_before_first_move() {
        let (mut controller, t0, white, black) = paired(StandardRules::new());
        controller
            .submit(white, Packet::RequestDraw { player_id: white }, t0)
            .unwrap();
        controller
            .submit(black, Packet::RequestDraw { player_id: black }, t0)
            .unwrap();

        let mut sent = Vec::new();
        controller.tick(at(t0, 0.1), &mut sent);
        assert_eq!(controller.state(), ServerState::WaitingForFirstMove);
        assert!(sent.is_empty());
    }

    #[test]
    fn test_one_move_per_tick() {
        let (mut controller, t0, white, black) = paired(StandardRules::new());
        controller.submit(white, move_packet(white, "e2e4"), at(t0, 1.0)).unwrap();
        controller.submit(black, move_packet(black, "e7e5"), at(t0, 1.1)).unwrap();

        let mut sent = Vec::new();
        controller.tick(at(t0, 1.2), &mut sent);
        assert_eq!(controller.current_player().id, black);

        controller.submit(black, move_packet(black, "e7e5"), at(t0, 2.0)).unwrap();
        controller.submit(white, move_packet(white, "d2d4"), at(t0, 2.0)).unwrap();
        sent.clear();
        controller.tick(at(t0, 2.1), &mut sent);

        let moves: Vec<_> = broadcasts(&sent)
            .into_iter()
            .filter(|p| matches!(p, Packet::Move { .. }))
            .collect();
        assert_eq!(moves.len(), 1);
        assert_eq!(controller.current_player().id, white);
        assert_eq!(controller.state(), ServerState::Playing);
    }

    #[test]
    fn test_illegal_move_keeps_turn() {
        let (mut controller, t0, white, black) = paired(StandardRules::new());
        controller.submit(white, move_packet(white, "e2e4"), at(t0, 1.0)).unwrap();
        let mut sent = Vec::new();
        controller.tick(at(t0, 1.1), &mut sent);

        controller.submit(black, move_packet(black, "e7e4"), at(t0, 2.0)).unwrap();
        sent.clear();
        controller.tick(at(t0, 2.1), &mut sent);
        assert!(sent.is_empty());
        assert_eq!(controller.current_player().id, black);
    }

    #[test]
    fn test_checkmate_by_mover_wins() {
        let rules = ScriptedRules {
            results: VecDeque::from([MoveResult::None, MoveResult::WhiteCheckmated]),
        };
        let (mut controller, t0, white, black) = paired(rules);
        controller.submit(white, move_packet(white, "f2f3"), at(t0, 1.0)).unwrap();
        let mut sent = Vec::new();
        controller.tick(at(t0, 1.1), &mut sent);

        controller.submit(black, move_packet(black, "d8h4"), at(t0, 2.0)).unwrap();
        sent.clear();
        controller.tick(at(t0, 2.1), &mut sent);

        assert_eq!(controller.state(), ServerState::EndOfGame);
        assert_eq!(
            controller.outcome(),
            Some(MatchOutcome {
                result: GameResult::WhiteCheckmated,
                winner: Some(black)
            })
        );
        assert_eq!(
            broadcasts(&sent).last(),
            Some(&Packet::PresentResult {
                winner_id: Some(black),
                result: GameResult::WhiteCheckmated
            })
        );
    }

    #[test]
    fn test_stalemate_has_no_winner() {
        let rules = ScriptedRules {
            results: VecDeque::from([MoveResult::None, MoveResult::Stalemate]),
        };
        let (mut controller, t0, white, black) = paired(rules);
        controller.submit(white, move_packet(white, "e2e3"), at(t0, 1.0)).unwrap();
        let mut sent = Vec::new();
        controller.tick(at(t0, 1.1), &mut sent);
        controller.submit(black, move_packet(black, "a7a5"), at(t0, 2.0)).unwrap();
        controller.tick(at(t0, 2.1), &mut sent);

        assert_eq!(
            controller.outcome(),
            Some(MatchOutcome {
                result: GameResult::Stalemate,
                winner: None
            })
        );
    }

    #[test]
    fn test_move_after_flag_fell_is_dropped() {
        let config = MatchConfig {
            start_clock_seconds: 1.0,
            ..MatchConfig::default()
        };
        let mut controller =
            ServerMatchController::with_rng(config, StandardRules::new(), StdRng::seed_from_u64(3));
        connect_two(&mut controller);
        let t0 = Instant::now();
        let mut sent = Vec::new();
        controller.tick(t0, &mut sent);
        let white = controller.session(ChessColor::White).id;
        let black = controller.session(ChessColor::Black).id;

        controller.submit(white, move_packet(white, "e2e4"), at(t0, 0.2)).unwrap();
        controller.tick(at(t0, 0.3), &mut sent);

        controller.submit(black, move_packet(black, "e7e5"), at(t0, 1.5)).unwrap();
        sent.clear();
        controller.tick(at(t0, 1.6), &mut sent);

        assert_eq!(
            broadcasts(&sent),
            vec![Packet::PresentResult {
                winner_id: Some(white),
                result: GameResult::OutOfTime
            }]
        );
        assert_eq!(controller.session(ChessColor::Black).time_left, 0.0);
    }

    fn short_clock_match(
        budget: f64,
    ) -> (ServerMatchController<StandardRules>, Instant, PlayerId, PlayerId) {
        let config = MatchConfig {
            start_clock_seconds: budget,
            ..MatchConfig::default()
        };
        let mut controller =
            ServerMatchController::with_rng(config, StandardRules::new(), StdRng::seed_from_u64(5));
        connect_two(&mut controller);
        let t0 = Instant::now();
        controller.tick(t0, &mut Vec::new());
        let white = controller.session(ChessColor::White).id;
        let black = controller.session(ChessColor::Black).id;
        (controller, t0, white, black)
    }

    #[test]
    fn test_first_move_after_flag_fell_is_dropped() {
        let (mut controller, t0, white, black) = short_clock_match(5.0);

        controller.submit(white, move_packet(white, "e2e4"), at(t0, 20.0)).unwrap();
        let mut sent = Vec::new();
        controller.tick(at(t0, 20.0), &mut sent);

        assert_eq!(
            broadcasts(&sent),
            vec![Packet::PresentResult {
                winner_id: Some(black),
                result: GameResult::OutOfTime
            }]
        );
        assert_eq!(controller.state(), ServerState::EndOfGame);
        assert_eq!(controller.session(ChessColor::White).time_left, 0.0);
        assert_eq!(controller.session(ChessColor::Black).time_left, 5.0);
    }

    #[test]
    fn test_white_flag_falls_before_abort_deadline() {
        let (mut controller, t0, _, black) = short_clock_match(5.0);
        let mut sent = Vec::new();

        controller.tick(at(t0, 4.0), &mut sent);
        assert_eq!(controller.state(), ServerState::WaitingForFirstMove);

        controller.tick(at(t0, 6.0), &mut sent);
        assert_eq!(controller.state(), ServerState::EndOfGame);
        assert_eq!(
            controller.outcome(),
            Some(MatchOutcome {
                result: GameResult::OutOfTime,
                winner: Some(black)
            })
        );
    }

    #[test]
    fn test_draw_offer_cleared_by_move() {
        let (mut controller, t0, white, black) = paired(StandardRules::new());
        controller.submit(white, move_packet(white, "e2e4"), at(t0, 1.0)).unwrap();
        let mut sent = Vec::new();
        controller.tick(at(t0, 1.1), &mut sent);

        controller
            .submit(white, Packet::RequestDraw { player_id: white }, at(t0, 1.5))
            .unwrap();
        sent.clear();
        controller.tick(at(t0, 1.6), &mut sent);
        assert_eq!(
            broadcasts(&sent),
            vec![Packet::PlayerRequestedDraw {
                requester_id: white
            }]
        );

        controller.submit(black, move_packet(black, "e7e5"), at(t0, 2.0)).unwrap();
        controller
            .submit(black, Packet::RequestDraw { player_id: black }, at(t0, 2.1))
            .unwrap();
        controller.tick(at(t0, 2.2), &mut sent);

        assert_eq!(controller.state(), ServerState::Playing);
        assert!(!controller.session(ChessColor::White).requesting_draw);
        assert!(controller.session(ChessColor::Black).requesting_draw);
    }

    #[test]
    fn test_terminal_state_ignores_inputs() {
        let (mut controller, t0, white, black) = paired(StandardRules::new());
        controller.submit(white, move_packet(white, "e2e4"), at(t0, 1.0)).unwrap();
        controller
            .submit(white, Packet::RequestResign { player_id: white }, at(t0, 1.0))
            .unwrap();
        let mut sent = Vec::new();
        controller.tick(at(t0, 1.1), &mut sent);
        assert_eq!(
            controller.outcome(),
            Some(MatchOutcome {
                result: GameResult::Resignation,
                winner: Some(black)
            })
        );

        controller.submit(black, move_packet(black, "e7e5"), at(t0, 2.0)).unwrap();
        sent.clear();
        controller.tick(at(t0, 2.1), &mut sent);
        controller.tick(at(t0, 2.2), &mut sent);
        assert!(sent.is_empty());
        assert_eq!(controller.queued_inputs(), 0);
        assert_eq!(controller.state(), ServerState::EndOfGame);
    }

    #[test]
    fn test_stop_game_is_idempotent() {
        let (mut controller, t0, _, black) = paired(StandardRules::new());
        controller
            .submit(black, Packet::RequestResign { player_id: black }, t0)
            .unwrap();
        let mut sent = Vec::new();
        controller.tick(at(t0, 0.1), &mut sent);
        controller.stop_game();
        controller.stop_game();

        let stops = controller
            .take_events()
            .into_iter()
            .filter(|e| *e == MatchEvent::Stopped)
            .count();
        assert_eq!(stops, 1);
        assert!(controller.take_events().is_empty());
    }

    #[test]
    fn test_events_trace_transitions() {
        let (mut controller, t0, white, _) = paired(StandardRules::new());
        controller.submit(white, move_packet(white, "e2e4"), t0).unwrap();
        let mut sent = Vec::new();
        controller.tick(at(t0, 0.5), &mut sent);

        let events = controller.take_events();
        assert!(matches!(events[0], MatchEvent::MatchStarted { .. }));
        assert!(events.contains(&MatchEvent::StateChanged {
            from: ServerState::WaitingForPlayers,
            to: ServerState::WaitingForFirstMove
        }));
        assert!(events.contains(&MatchEvent::StateChanged {
            from: ServerState::WaitingForFirstMove,
            to: ServerState::Playing
        }));
        assert!(events
            .iter()
            .any(|e| matches!(e, MatchEvent::MoveAccepted { color: ChessColor::White, .. })));
    }

    #[test]
    #[should_panic(expected = "before pairing")]
    fn test_current_player_before_pairing_panics() {
        let controller = ServerMatchController::new(MatchConfig::default(), StandardRules::new());
        controller.current_player();
    }
}
