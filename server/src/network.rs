//! Server network layer handling TCP connections and match loop coordination

use crate::config::MatchConfig;
use crate::game::{MatchEvent, ServerMatchController};
use crate::transport::{GameMessage, Transport};
use log::{debug, error, info, warn};
use shared::codec::{read_packet, write_packet};
use shared::{Packet, PlayerId, StandardRules};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};

/// Messages sent from network tasks to the match loop
#[derive(Debug)]
pub enum ServerMessage {
    ConnectionOpened {
        conn_id: PlayerId,
        addr: SocketAddr,
    },
    PacketReceived {
        conn_id: PlayerId,
        packet: Packet,
        received_at: Instant,
    },
    ConnectionClosed {
        conn_id: PlayerId,
    },
}

/// Outbound queues of the per-connection writer tasks
type Peers = Arc<RwLock<HashMap<PlayerId, mpsc::UnboundedSender<Packet>>>>;

/// Grace period that lets writer tasks flush the final frames before exit
const FLUSH_DELAY: Duration = Duration::from_millis(200);

/// Main server coordinating networking and the match controller
pub struct Server {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    peers: Peers,
    controller: ServerMatchController<StandardRules>,
    tick_duration: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(addr: &str, config: MatchConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();
        let tick_duration = config.tick_duration;

        Ok(Server {
            listener: Some(listener),
            local_addr,
            peers: Arc::new(RwLock::new(HashMap::new())),
            controller: ServerMatchController::new(config, StandardRules::new()),
            tick_duration,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Spawns the task that accepts connections and starts their reader/writer tasks
    fn spawn_acceptor(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let peers = Arc::clone(&self.peers);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut next_id: PlayerId = 1;

            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let conn_id = next_id;
                        next_id += 1;
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                        }
                        let registered =
                            Self::register_connection(conn_id, stream, addr, &peers, &server_tx)
                                .await;
                        if !registered {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    async fn register_connection(
        conn_id: PlayerId,
        stream: TcpStream,
        addr: SocketAddr,
        peers: &Peers,
        server_tx: &mpsc::UnboundedSender<ServerMessage>,
    ) -> bool {
        let (reader, writer) = stream.into_split();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        peers.write().await.insert(conn_id, peer_tx);
        tokio::spawn(Self::run_writer(conn_id, writer, peer_rx));

        // Announce the connection before any of its packets can arrive
        if let Err(e) = server_tx.send(ServerMessage::ConnectionOpened { conn_id, addr }) {
            error!("Failed to send connection to match loop: {}", e);
            return false;
        }

        tokio::spawn(Self::run_reader(
            conn_id,
            reader,
            Arc::clone(peers),
            server_tx.clone(),
        ));
        true
    }

    async fn run_reader(
        conn_id: PlayerId,
        mut reader: OwnedReadHalf,
        peers: Peers,
        server_tx: mpsc::UnboundedSender<ServerMessage>,
    ) {
        loop {
            match read_packet(&mut reader).await {
                Ok(Some(packet)) => {
                    let message = ServerMessage::PacketReceived {
                        conn_id,
                        packet,
                        received_at: Instant::now(),
                    };
                    if server_tx.send(message).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("Connection {} closed by peer", conn_id);
                    break;
                }
                Err(e) => {
                    warn!("Dropping connection {}: {}", conn_id, e);
                    break;
                }
            }
        }

        peers.write().await.remove(&conn_id);
        let _ = server_tx.send(ServerMessage::ConnectionClosed { conn_id });
    }

    async fn run_writer(
        conn_id: PlayerId,
        mut writer: OwnedWriteHalf,
        mut outgoing: mpsc::UnboundedReceiver<Packet>,
    ) {
        while let Some(packet) = outgoing.recv().await {
            if let Err(e) = write_packet(&mut writer, &packet).await {
                error!("Failed to send packet to {}: {}", conn_id, e);
                break;
            }
        }
        let _ = writer.shutdown().await;
    }

    /// Spawns task that routes outgoing packets to the connection writers
    fn spawn_network_sender(&mut self) {
        let peers = Arc::clone(&self.peers);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { conn_id, packet } => {
                        let peers_guard = peers.read().await;
                        match peers_guard.get(&conn_id) {
                            Some(tx) => {
                                if tx.send(packet).is_err() {
                                    debug!("Connection {} already closed", conn_id);
                                }
                            }
                            None => debug!("No writer for connection {}", conn_id),
                        }
                    }
                    GameMessage::BroadcastPacket { packet } => {
                        let peers_guard = peers.read().await;
                        for tx in peers_guard.values() {
                            let _ = tx.send(packet.clone());
                        }
                    }
                    GameMessage::Close { conn_id } => {
                        // Dropping the sender lets the writer drain and shut down
                        peers.write().await.remove(&conn_id);
                    }
                }
            }
        });
    }

    fn send_packet(&self, conn_id: PlayerId, packet: Packet) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { conn_id, packet }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn close_connection(&self, conn_id: PlayerId) {
        if let Err(e) = self.game_tx.send(GameMessage::Close { conn_id }) {
            error!("Failed to queue connection close: {}", e);
        }
    }

    fn refuse(&self, conn_id: PlayerId, reason: String) {
        warn!("Refusing connection {}: {}", conn_id, reason);
        self.send_packet(conn_id, Packet::Disconnected { reason });
        self.close_connection(conn_id);
    }

    /// Routes one received packet into the controller
    fn handle_packet(&mut self, conn_id: PlayerId, packet: Packet, received_at: Instant) {
        match packet {
            Packet::Connect { client_version } => {
                info!(
                    "Client {} handshaking (version: {})",
                    conn_id, client_version
                );
                match self.controller.on_handshake(conn_id, client_version) {
                    Ok(()) => self.send_packet(conn_id, Packet::Connected { client_id: conn_id }),
                    Err(e) => self.refuse(conn_id, e.to_string()),
                }
            }

            Packet::Disconnect => {
                self.controller.on_disconnected(conn_id);
                self.close_connection(conn_id);
            }

            packet => {
                if let Err(e) = self.controller.submit(conn_id, packet, received_at) {
                    warn!("Dropped input from {}: {}", conn_id, e);
                }
            }
        }
    }

    fn log_events(&mut self) {
        for event in self.controller.take_events() {
            match event {
                MatchEvent::Stopped => {
                    info!("Match stopped, connections close after the grace period")
                }
                MatchEvent::Finished(outcome) => {
                    info!("Result {:?}, winner {:?}", outcome.result, outcome.winner)
                }
                other => debug!("Match event {:?}", other),
            }
        }
    }

    /// Main server loop: network events in, one controller tick per interval
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_acceptor();
        self.spawn_network_sender();

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut outbound = self.game_tx.clone();

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::ConnectionOpened { conn_id, addr }) => {
                            if let Err(e) = self.controller.on_connected(conn_id, addr) {
                                self.refuse(conn_id, e.to_string());
                            }
                        },
                        Some(ServerMessage::PacketReceived { conn_id, packet, received_at }) => {
                            self.handle_packet(conn_id, packet, received_at);
                        },
                        Some(ServerMessage::ConnectionClosed { conn_id }) => {
                            self.controller.on_disconnected(conn_id);
                        },
                        None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    self.controller.tick(now, &mut outbound);
                    self.log_events();

                    if self.controller.cleanup_due(now) {
                        info!("Grace period over, closing connections");
                        outbound.broadcast(Packet::Disconnected {
                            reason: "Match closed".to_string(),
                        });
                        tokio::time::sleep(FLUSH_DELAY).await;
                        break;
                    }
                },
            }
        }

        Ok(())
    }
}
