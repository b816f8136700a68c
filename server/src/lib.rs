//! # Chess Match Server Library
//!
//! This library provides the authoritative server for a two-player networked
//! chess match. It owns the only copy of the match state that counts: who is
//! seated, whose turn it is, how much time each side has left and how the
//! game ended. Clients only ever see what the server broadcasts.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Match State
//! Every move is validated by the rule engine on the server before it is
//! broadcast. Results (checkmate, stalemate, resignation, agreed draw,
//! timeout, walkover, abort) are decided here and announced exactly once.
//!
//! ### Time Control
//! Each player's budget is charged by the server from the receipt time of
//! their moves. Client-reported time is never trusted.
//!
//! ### Connection Handling
//! - Handshake with protocol version check
//! - Pairing of the first two ready connections, colours by coin flip
//! - Disconnections observed by the state machine on the next tick
//!
//! ## Architecture Design
//!
//! ### Single Match Loop
//! Network tasks never touch match state. They push connection events and
//! received packets into an mpsc channel; the match loop consumes them,
//! queues commands, and runs one [`game::ServerMatchController::tick`] per
//! interval. Everything the controller sends goes through the
//! [`transport::Transport`] seam, so the same controller runs against TCP in
//! production and against a recording `Vec` in tests.
//!
//! ### Tick-Driven State Machine
//! `WaitingForPlayers -> WaitingForFirstMove -> Playing -> EndOfGame`, with
//! `Aborted` and `ConnectionError` as the other terminal states. Waiting is a
//! named state with a guard, never a suspended task.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! Open connections in connection order, with readiness and capacity.
//!
//! ### Config Module (`config`)
//! Tick interval, clock budget, abort and grace periods.
//!
//! ### Game Module (`game`)
//! The match controller, its states, outcome and observer events.
//!
//! ### Input Queue Module (`input_queue`)
//! FIFO of validated client commands stamped with their receipt time.
//!
//! ### Network Module (`network`)
//! TCP accept loop, per-connection reader/writer tasks and the match loop.
//!
//! ### Session Module (`session`)
//! The two seated players and their clocks and draw flags.
//!
//! ### Transport Module (`transport`)
//! Outbound message type and the broadcast/unicast seam.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::MatchConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new("127.0.0.1:8080", MatchConfig::default()).await?;
//!
//!     // Runs until the match is over and the grace period has elapsed
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod game;
pub mod input_queue;
pub mod network;
pub mod session;
pub mod transport;
