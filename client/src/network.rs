use log::{debug, info, warn};
use shared::{read_packet, write_packet, FrameError, Packet, PeerSetup};
use std::io::Write;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;

/// Framed connection to the chat server
pub struct Connection {
    stream: TcpStream,
}

impl Connection {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, FrameError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Connection { stream })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, FrameError> {
        Ok(self.stream.local_addr()?)
    }

    /// Sends one line of user input
    pub async fn send_reply(&mut self, text: &str) -> Result<(), FrameError> {
        write_packet(&mut self.stream, &Packet::reply(text)).await
    }

    /// Next packet from the server, `None` once it closed the connection
    pub async fn recv(&mut self) -> Result<Option<Packet>, FrameError> {
        read_packet(&mut self.stream).await
    }

    pub fn into_split(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        self.stream.into_split()
    }
}

/// Text shown to the user for a packet, and whether it ends the line
pub fn render(packet: &Packet) -> Option<(String, bool)> {
    match packet {
        Packet::Prompt { text } => Some((text.clone(), false)),
        Packet::Notice { text } => Some((text.clone(), true)),
        Packet::Chat {
            from,
            text,
            broadcast: true,
        } => Some((format!("[broadcast] {}: {}", from, text), true)),
        Packet::Chat { from, text, .. } => Some((format!("{}: {}", from, text), true)),
        Packet::PeerSession(setup) => Some((render_peer_setup(setup), true)),
        Packet::Disconnected { reason } => Some((format!("Disconnected: {}", reason), true)),
        Packet::Reply { .. } => None,
    }
}

fn render_peer_setup(setup: &PeerSetup) -> String {
    match setup {
        PeerSetup::Ready { username, addr } => {
            format!("{} is reachable for a private session at {}", username, addr)
        }
        PeerSetup::SelfTarget => "Error: You can't start a private session with yourself".to_string(),
        PeerSetup::Blocked => "Error: That user has blocked you".to_string(),
        PeerSetup::Offline => "Error: That user is offline".to_string(),
        PeerSetup::Invalid => "Error: Invalid user".to_string(),
    }
}

/// Console client: prints what the server sends and forwards stdin lines
pub struct Client {
    server_addr: String,
    peer_port: u16,
}

impl Client {
    pub fn new(host: &str, port: u16, peer_port: u16) -> Self {
        Client {
            server_addr: format!("{}:{}", host, port),
            peer_port,
        }
    }

    /// Spawns task that reads frames until the server closes or fails
    fn spawn_server_reader(
        mut reader: OwnedReadHalf,
    ) -> mpsc::UnboundedReceiver<Result<Option<Packet>, FrameError>> {
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let result = read_packet(&mut reader).await;
                let done = !matches!(result, Ok(Some(_)));
                if tx.send(result).is_err() || done {
                    break;
                }
            }
        });

        rx
    }

    /// Spawns task that forwards stdin lines
    fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        rx
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to {}", self.server_addr);
        info!(
            "Peer port {} reserved for private sessions",
            self.peer_port
        );

        let connection = Connection::connect(self.server_addr.as_str()).await?;
        let (reader, mut writer) = connection.into_split();

        let mut from_server = Self::spawn_server_reader(reader);
        let mut from_stdin = Self::spawn_stdin_reader();
        let mut stdin_open = true;

        loop {
            tokio::select! {
                incoming = from_server.recv() => {
                    let packet = match incoming {
                        Some(Ok(Some(packet))) => packet,
                        Some(Err(e)) => return Err(e.into()),
                        Some(Ok(None)) | None => {
                            return Err("server closed the connection".into());
                        }
                    };
                    debug!("Received {:?}", packet);

                    if let Some((text, newline)) = render(&packet) {
                        let mut stdout = std::io::stdout();
                        if newline {
                            writeln!(stdout, "{}", text)?;
                        } else {
                            write!(stdout, "{}", text)?;
                        }
                        stdout.flush()?;
                    }

                    if let Packet::Disconnected { reason } = packet {
                        info!("Server ended the session: {}", reason);
                        return Ok(());
                    }
                },

                line = from_stdin.recv(), if stdin_open => {
                    match line {
                        Some(line) => write_packet(&mut writer, &Packet::reply(line)).await?,
                        None => {
                            warn!("Standard input closed");
                            stdin_open = false;
                        }
                    }
                },
            }
        }
    }
}
