//! FIFO buffer of client commands awaiting the match tick.
//!
//! The network layer is the only producer; it turns each received command
//! packet into a [`ClientInput`] stamped with the server receipt time. The
//! match loop is the only consumer and takes the whole buffer at once with
//! [`InputQueue::drain_all`].

use shared::{ChessMove, Packet, PlayerId};
use std::collections::VecDeque;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputKind {
    MoveRequested(ChessMove),
    ResignRequested,
    DrawRequested,
}

/// One queued command. Created on arrival, consumed exactly once.
#[derive(Debug, Clone)]
pub struct ClientInput {
    pub kind: InputKind,
    pub session: PlayerId,
    pub received_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputRejected {
    #[error("connection {actual} sent a command on behalf of player {claimed}")]
    SpoofedPlayer { claimed: PlayerId, actual: PlayerId },
    #[error("malformed move payload {0}")]
    MalformedMove(String),
    #[error("packet is not a client command")]
    NotACommand,
    #[error("connection {0} is not playing in this match")]
    NotInMatch(PlayerId),
}

impl ClientInput {
    /// Converts a command packet received on connection `session`.
    ///
    /// The `player_id` carried by the packet must name the connection it
    /// arrived on; the server never acts on behalf of another session.
    pub fn from_packet(
        session: PlayerId,
        packet: Packet,
        received_at: Instant,
    ) -> Result<Self, InputRejected> {
        let (player_id, kind) = match packet {
            Packet::RequestMove {
                player_id,
                start,
                target,
                promotion,
            } => {
                let mv = ChessMove::new(start, target, promotion);
                if !mv.is_well_formed() {
                    return Err(InputRejected::MalformedMove(mv.to_string()));
                }
                (player_id, InputKind::MoveRequested(mv))
            }
            Packet::RequestResign { player_id } => (player_id, InputKind::ResignRequested),
            Packet::RequestDraw { player_id } => (player_id, InputKind::DrawRequested),
            _ => return Err(InputRejected::NotACommand),
        };

        if player_id != session {
            return Err(InputRejected::SpoofedPlayer {
                claimed: player_id,
                actual: session,
            });
        }

        Ok(Self {
            kind,
            session,
            received_at,
        })
    }
}

#[derive(Debug, Default)]
pub struct InputQueue {
    inputs: VecDeque<ClientInput>,
}

impl InputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, input: ClientInput) {
        self.inputs.push_back(input);
    }

    /// Takes every buffered input in arrival order, leaving the queue empty.
    pub fn drain_all(&mut self) -> Vec<ClientInput> {
        self.inputs.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}
