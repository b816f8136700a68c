//! Outbound seam between the match controller and the network tasks.

use log::error;
use shared::{Packet, PlayerId};
use tokio::sync::mpsc;

/// Messages sent from the match loop to the network sender task
#[derive(Debug, Clone, PartialEq)]
pub enum GameMessage {
    SendPacket {
        conn_id: PlayerId,
        packet: Packet,
    },
    BroadcastPacket {
        packet: Packet,
    },
    /// Flush and close one connection's writer
    Close {
        conn_id: PlayerId,
    },
}

/// Where the controller sends packets. Delivery is fire-and-forget.
pub trait Transport {
    fn broadcast(&mut self, packet: Packet);

    fn unicast(&mut self, conn_id: PlayerId, packet: Packet);
}

impl Transport for mpsc::UnboundedSender<GameMessage> {
    fn broadcast(&mut self, packet: Packet) {
        if let Err(e) = self.send(GameMessage::BroadcastPacket { packet }) {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    fn unicast(&mut self, conn_id: PlayerId, packet: Packet) {
        if let Err(e) = self.send(GameMessage::SendPacket { conn_id, packet }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }
}

/// Records outbound traffic in order, for driving the controller without sockets.
impl Transport for Vec<GameMessage> {
    fn broadcast(&mut self, packet: Packet) {
        self.push(GameMessage::BroadcastPacket { packet });
    }

    fn unicast(&mut self, conn_id: PlayerId, packet: Packet) {
        self.push(GameMessage::SendPacket { conn_id, packet });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_transport_records_in_order() {
        let mut sent: Vec<GameMessage> = Vec::new();
        sent.unicast(3, Packet::Connected { client_id: 3 });
        sent.broadcast(Packet::InitGame);

        assert_eq!(
            sent,
            vec![
                GameMessage::SendPacket {
                    conn_id: 3,
                    packet: Packet::Connected { client_id: 3 },
                },
                GameMessage::BroadcastPacket {
                    packet: Packet::InitGame,
                },
            ]
        );
    }

    #[test]
    fn test_channel_transport() {
        let (mut tx, mut rx) = mpsc::unbounded_channel::<GameMessage>();
        tx.broadcast(Packet::InitGame);
        tx.unicast(9, Packet::Disconnect);

        match rx.try_recv().unwrap() {
            GameMessage::BroadcastPacket { packet } => assert_eq!(packet, Packet::InitGame),
            _ => panic!("Unexpected message type"),
        }
        match rx.try_recv().unwrap() {
            GameMessage::SendPacket { conn_id, .. } => assert_eq!(conn_id, 9),
            _ => panic!("Unexpected message type"),
        }
    }
}
