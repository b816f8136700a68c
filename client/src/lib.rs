//! # Chess Client Library
//!
//! Console client for a two-player match hosted by the authoritative server.
//! The client never decides the outcome of anything: it forwards requests,
//! mirrors what the server confirms, and shows the result.
//!
//! ## Architecture Overview
//!
//! ### Match Mirror
//! [`mirror::ClientMatchMirror`] follows the server's match through its own
//! state machine. Incoming packets only set flags; each tick evaluates the
//! guards of the active state and runs one-time entry actions on a
//! transition. Output is queued as [`mirror::ViewEvent`]s so the mirror can
//! be driven and inspected without a terminal.
//!
//! ### Move Prediction
//! A legal local move is shown immediately on a predicted copy of the board
//! and sent to the server. The server's `Move` broadcast replaces the
//! prediction; if no confirmation arrives within the configured timeout the
//! prediction is dropped and the confirmed board is shown again.
//!
//! ### Clock Display
//! Between server updates the local [`shared::Clock`] counts down the side to
//! move. Each confirmed move overwrites both remaining times with the
//! server's values.
//!
//! ## Module Organization
//!
//! ### Mirror Module (`mirror`)
//! - Client state machine and entry actions
//! - Move prediction and reconciliation
//! - Request construction for moves, draws and resignations
//!
//! ### Input Module (`input`)
//! - Parsing console lines into player commands
//! - Cancel safe async line reading for the event loop
//!
//! ### Network Module (`network`)
//! - TCP connection and framed packet exchange
//! - The `select!` loop tying socket, console and tick together
//!
//! ### View Module (`view`)
//! - ASCII board rendering from either side
//! - Printing view events

pub mod input;
pub mod mirror;
pub mod network;
pub mod view;
