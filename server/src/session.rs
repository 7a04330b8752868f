//! One session per accepted connection.
//!
//! A session owns its stream for its whole lifetime. A reader task decodes
//! incoming frames and forwards them over a channel, so the session can wait
//! on client input and on packets queued by other sessions at the same time.
//! Whatever way the session ends, it removes its own login from the registry
//! and closes the stream before returning. A session task that panics or is
//! aborted still releases its login through [`LoginGuard`].

use crate::auth::{LoginFlow, Progress, Rejection};
use crate::commands;
use crate::config::{LockoutPolicy, SessionSettings};
use crate::registry::SharedRegistry;
use crate::user::SessionLink;
use crate::utils::epoch_seconds;
use log::{debug, error, info, warn};
use shared::{read_packet, write_packet, FrameError, Packet};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How a session finished when the transport did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Client closed the connection
    ClientClosed,
    /// Client sent `logout`
    LoggedOut,
    /// Failure bound exhausted under [`LockoutPolicy::Disconnect`]
    LockedOut,
}

type Inbound = mpsc::Receiver<Result<Packet, FrameError>>;

/// Username a session has registered, released from the registry on drop
pub struct LoginGuard {
    registry: SharedRegistry,
    username: Option<String>,
}

impl LoginGuard {
    pub fn new(registry: SharedRegistry) -> Self {
        Self {
            registry,
            username: None,
        }
    }

    pub fn hold(&mut self, username: String) {
        self.username = Some(username);
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Removes the held login now
    pub async fn release(&mut self) {
        if let Some(username) = self.username.take() {
            self.registry.write().await.remove_client(&username);
        }
    }
}

impl Drop for LoginGuard {
    fn drop(&mut self) {
        let Some(username) = self.username.take() else {
            return;
        };

        warn!("Releasing login of {} from an interrupted session", username);
        let registry = self.registry.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    registry.write().await.remove_client(&username);
                });
            }
            Err(_) => {
                if let Ok(mut guard) = registry.try_write() {
                    guard.remove_client(&username);
                }
            }
        }
    }
}

pub struct Session<S> {
    stream: S,
    addr: SocketAddr,
    registry: SharedRegistry,
    settings: SessionSettings,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: S, addr: SocketAddr, registry: SharedRegistry, settings: SessionSettings) -> Self {
        Self {
            stream,
            addr,
            registry,
            settings,
        }
    }

    /// Runs the session until the client leaves or the transport fails
    pub async fn run(self) -> Result<SessionEnd, FrameError> {
        let Session {
            stream,
            addr,
            registry,
            settings,
        } = self;

        let (reader, mut writer) = tokio::io::split(stream);
        let (inbound, reader_task) = spawn_reader(reader, addr);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let mut conn = Connection {
            addr,
            login: LoginGuard::new(registry.clone()),
            registry,
            settings,
            writer: &mut writer,
            inbound,
            outbound_tx,
            outbound_rx,
        };
        let result = conn.serve().await;

        conn.login.release().await;
        drop(conn);

        reader_task.abort();
        if let Err(e) = writer.shutdown().await {
            debug!("Shutdown of {} failed: {}", addr, e);
        }

        match &result {
            Ok(end) => info!("Session {} ended: {:?}", addr, end),
            Err(e) => error!("Session {} failed: {}", addr, e),
        }
        result
    }
}

/// Reads frames until EOF or the first error
fn spawn_reader<S>(mut reader: ReadHalf<S>, addr: SocketAddr) -> (Inbound, JoinHandle<()>)
where
    S: AsyncRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(32);

    let handle = tokio::spawn(async move {
        loop {
            match read_packet(&mut reader).await {
                Ok(Some(packet)) => {
                    debug!("Received {:?} from {}", packet, addr);
                    if tx.send(Ok(packet)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            }
        }
    });

    (rx, handle)
}

struct Connection<'a, S> {
    addr: SocketAddr,
    registry: SharedRegistry,
    settings: SessionSettings,
    writer: &'a mut WriteHalf<S>,
    inbound: Inbound,
    outbound_tx: mpsc::UnboundedSender<Packet>,
    outbound_rx: mpsc::UnboundedReceiver<Packet>,
    /// Login this session registered, if any
    login: LoginGuard,
}

impl<'a, S> Connection<'a, S>
where
    S: AsyncWrite,
{
    async fn serve(&mut self) -> Result<SessionEnd, FrameError> {
        info!("New connection from {}", self.addr);

        let username = match self.authenticate().await? {
            Ok(username) => username,
            Err(end) => return Ok(end),
        };

        self.send(&Packet::notice(format!("Welcome to the chat server, {}!", username)))
            .await?;
        self.command_loop(&username).await
    }

    async fn send(&mut self, packet: &Packet) -> Result<(), FrameError> {
        write_packet(&mut *self.writer, packet).await
    }

    /// Next reply line from the client, `None` once the stream is closed
    async fn next_reply(&mut self) -> Result<Option<String>, FrameError> {
        loop {
            match self.inbound.recv().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(e),
                Some(Ok(Packet::Reply { text })) => return Ok(Some(text)),
                Some(Ok(other)) => warn!("Unexpected packet from {}: {:?}", self.addr, other),
            }
        }
    }

    /// Drives the login flow. The inner `Err` is a non-error early end.
    async fn authenticate(&mut self) -> Result<Result<String, SessionEnd>, FrameError> {
        let mut flow = LoginFlow::new(self.settings.failure_bound);

        loop {
            if let Some(prompt) = flow.prompt() {
                self.send(&Packet::prompt(prompt)).await?;
            }
            let Some(input) = self.next_reply().await? else {
                return Ok(Err(SessionEnd::ClientClosed));
            };

            let step = {
                let mut registry = self.registry.write().await;
                match flow.submit(&mut registry, &input) {
                    Ok(Progress::Authenticated(username)) => {
                        let link = SessionLink::new(self.addr, self.outbound_tx.clone());
                        match registry.add_client(&username, link) {
                            Ok(()) => Ok(Some(username)),
                            Err(_) => {
                                flow.restart();
                                Err(Rejection::AlreadyLoggedIn)
                            }
                        }
                    }
                    Ok(Progress::PasswordRequired) => Ok(None),
                    Err(rejection) => Err(rejection),
                }
            };

            match step {
                Ok(Some(username)) => {
                    self.login.hold(username.clone());
                    return Ok(Ok(username));
                }
                Ok(None) => {}
                Err(Rejection::TooManyFailures)
                    if self.settings.lockout_policy == LockoutPolicy::Disconnect =>
                {
                    warn!("Disconnecting {} after too many failed logins", self.addr);
                    self.send(&Packet::notice(Rejection::TooManyFailures.to_string()))
                        .await?;
                    self.send(&Packet::Disconnected {
                        reason: "too many failed login attempts".to_string(),
                    })
                    .await?;
                    return Ok(Err(SessionEnd::LockedOut));
                }
                Err(rejection) => {
                    debug!("Login rejected for {}: {:?}", self.addr, rejection);
                    self.send(&Packet::notice(rejection.to_string())).await?;
                }
            }
        }
    }

    async fn command_loop(&mut self, username: &str) -> Result<SessionEnd, FrameError> {
        loop {
            tokio::select! {
                incoming = self.inbound.recv() => {
                    let line = match incoming {
                        None => return Ok(SessionEnd::ClientClosed),
                        Some(Err(e)) => return Err(e),
                        Some(Ok(Packet::Reply { text })) => text,
                        Some(Ok(other)) => {
                            warn!("Unexpected packet from {}: {:?}", username, other);
                            continue;
                        }
                    };

                    let dispatch = {
                        let mut registry = self.registry.write().await;
                        commands::execute(&mut registry, username, &line, epoch_seconds())
                    };
                    for packet in &dispatch.replies {
                        self.send(packet).await?;
                    }
                    if dispatch.logout {
                        self.send(&Packet::Disconnected {
                            reason: "logged out".to_string(),
                        })
                        .await?;
                        return Ok(SessionEnd::LoggedOut);
                    }
                },

                Some(packet) = self.outbound_rx.recv() => {
                    // Relays that cannot be framed are not this client's fault
                    match self.send(&packet).await {
                        Err(FrameError::TooLarge(len)) => {
                            warn!("Dropping {} byte relay for {}", len, username);
                        }
                        other => other?,
                    }
                },
            }
        }
    }
}
