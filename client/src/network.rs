use crate::input::{InputManager, PlayerCommand, HELP};
use crate::mirror::{ClientMatchMirror, MirrorConfig};
use crate::view::{render_board, ConsoleView};
use log::{debug, error, info, warn};
use shared::codec::{read_packet, write_packet};
use shared::{timestamp_millis, Packet, StandardRules, PROTOCOL_VERSION};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, BufReader, Stdin};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::interval;

/// Period of the mirror's state machine
const TICK_INTERVAL: Duration = Duration::from_millis(100);

pub struct Client<R = BufReader<Stdin>> {
    writer: OwnedWriteHalf,
    packet_rx: mpsc::UnboundedReceiver<Option<Packet>>,
    mirror: ClientMatchMirror<StandardRules>,
    input: InputManager<R>,
    view: ConsoleView,
    connected: bool,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        config: MirrorConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_input(server_addr, config, BufReader::new(tokio::io::stdin())).await
    }
}

impl<R: AsyncBufRead + Unpin> Client<R> {
    /// Connects to the server, reading commands from `reader`.
    pub async fn with_input(
        server_addr: &str,
        config: MirrorConfig,
        reader: R,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let stream = TcpStream::connect(server_addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, writer) = stream.into_split();

        let (packet_tx, packet_rx) = mpsc::unbounded_channel();
        Self::spawn_network_receiver(read_half, packet_tx);

        Ok(Client {
            writer,
            packet_rx,
            mirror: ClientMatchMirror::new(config, StandardRules::new()),
            input: InputManager::new(reader),
            view: ConsoleView::new(),
            connected: true,
        })
    }

    /// Spawns task that reads frames; `None` marks the end of the stream
    fn spawn_network_receiver(
        mut reader: OwnedReadHalf,
        packet_tx: mpsc::UnboundedSender<Option<Packet>>,
    ) {
        tokio::spawn(async move {
            loop {
                match read_packet(&mut reader).await {
                    Ok(Some(packet)) => {
                        if packet_tx.send(Some(packet)).is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        break;
                    }
                }
            }
            let _ = packet_tx.send(None);
        });
    }

    async fn send_packet(&mut self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        write_packet(&mut self.writer, packet).await?;
        Ok(())
    }

    async fn handle_command(
        &mut self,
        command: PlayerCommand,
    ) -> Result<bool, Box<dyn std::error::Error>> {
        let request = match command {
            PlayerCommand::Move(mv) => {
                self.mirror
                    .attempt_move(mv.start, mv.target, mv.promotion, Instant::now())
            }
            PlayerCommand::Resign => self.mirror.request_resign(),
            PlayerCommand::Draw => self.mirror.request_draw(),
            PlayerCommand::Board => {
                let perspective = self.mirror.color().unwrap_or(shared::ChessColor::White);
                println!("{}", render_board(self.mirror.display_board(), perspective));
                return Ok(true);
            }
            PlayerCommand::Help => {
                println!("{}", HELP);
                return Ok(true);
            }
            PlayerCommand::Quit => return Ok(false),
        };

        match request {
            Ok(packet) => {
                debug!("Sending {:?}", packet);
                self.send_packet(&packet).await?;
            }
            Err(e) => println!("{}", e),
        }
        Ok(true)
    }

    fn render_events(&mut self) {
        for event in self.mirror.take_events() {
            self.view.render(&event, self.mirror.display_board());
        }
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to server...");
        self.send_packet(&Packet::Connect {
            client_version: PROTOCOL_VERSION,
        })
        .await?;

        let mut tick_interval = interval(TICK_INTERVAL);
        let mut input_open = true;

        loop {
            tokio::select! {
                message = self.packet_rx.recv() => {
                    match message {
                        Some(Some(packet)) => self.mirror.handle_packet(packet),
                        Some(None) | None => {
                            info!("Server closed the connection");
                            self.connected = false;
                            self.mirror.on_disconnected();
                            self.mirror.tick(Instant::now(), timestamp_millis());
                            self.render_events();
                            break;
                        }
                    }
                },

                command = self.input.next_command(), if input_open => {
                    match command {
                        Some(Ok(command)) => {
                            match self.handle_command(command).await {
                                Ok(true) => {}
                                Ok(false) => break,
                                Err(e) => {
                                    error!("Error sending command: {}", e);
                                    break;
                                }
                            }
                        },
                        Some(Err(e)) => println!("{}", e),
                        None => {
                            warn!("Input closed");
                            input_open = false;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    self.mirror.tick(Instant::now(), timestamp_millis());
                    self.render_events();
                },
            }
        }

        if self.connected {
            let _ = self.send_packet(&Packet::Disconnect).await;
        }

        Ok(())
    }

    pub fn mirror(&self) -> &ClientMatchMirror<StandardRules> {
        &self.mirror
    }
}
