//! Per-account state kept for the lifetime of the server process.

use crate::credentials::Credential;
use shared::Packet;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Handle to the live session currently logged in as a user
///
/// Holds the peer address observed on the server connection and the queue the
/// session drains into its socket.
#[derive(Debug, Clone)]
pub struct SessionLink {
    pub addr: SocketAddr,
    pub outbound: mpsc::UnboundedSender<Packet>,
}

impl SessionLink {
    pub fn new(addr: SocketAddr, outbound: mpsc::UnboundedSender<Packet>) -> Self {
        Self { addr, outbound }
    }

    /// Queues a packet for the session. Returns false if the session is gone.
    pub fn send(&self, packet: Packet) -> bool {
        self.outbound.send(packet).is_ok()
    }
}

/// Runtime record for one account from the credential store
///
/// Records are created at startup and never removed. Identity and password
/// are fixed; everything else is mutated by whichever session owns the login,
/// always through the registry's write lock.
#[derive(Debug)]
pub struct UserRecord {
    username: String,
    password: String,
    online: bool,
    /// Seconds since the epoch of the last login or logout
    last_active: u64,
    lockout_started: Option<Instant>,
    session: Option<SessionLink>,
    blocked: BTreeSet<String>,
}

impl UserRecord {
    pub fn new(credential: Credential) -> Self {
        Self {
            username: credential.username,
            password: credential.password,
            online: false,
            last_active: 0,
            lockout_started: None,
            session: None,
            blocked: BTreeSet::new(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password_matches(&self, candidate: &str) -> bool {
        self.password == candidate
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn last_active(&self) -> u64 {
        self.last_active
    }

    /// Marks the user online or offline; going online stamps the activity time
    pub fn set_active(&mut self, active: bool, now: u64) {
        self.online = active;
        if active {
            self.set_last_active(now);
        }
    }

    pub fn set_last_active(&mut self, now: u64) {
        self.last_active = now;
    }

    /// Starts a lockout window from the current instant
    pub fn start_lockout(&mut self) {
        self.lockout_started = Some(Instant::now());
    }

    /// True while the most recent lockout is younger than `window`
    pub fn is_locked_out(&self, window: Duration) -> bool {
        self.lockout_started
            .map(|started| started.elapsed() < window)
            .unwrap_or(false)
    }

    pub fn attach_session(&mut self, link: SessionLink) {
        self.session = Some(link);
    }

    pub fn detach_session(&mut self) -> Option<SessionLink> {
        self.session.take()
    }

    pub fn session(&self) -> Option<&SessionLink> {
        self.session.as_ref()
    }

    pub fn has_blocked(&self, username: &str) -> bool {
        self.blocked.contains(username)
    }

    /// Adds `username` to the blocklist. Returns false if already present.
    pub fn block(&mut self, username: &str) -> bool {
        self.blocked.insert(username.to_string())
    }

    /// Removes `username` from the blocklist. Returns false if it was absent.
    pub fn unblock(&mut self, username: &str) -> bool {
        self.blocked.remove(username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> UserRecord {
        UserRecord::new(Credential::new("alice", "secret"))
    }

    #[test]
    fn test_record_creation() {
        let user = record();

        assert_eq!(user.username(), "alice");
        assert!(!user.is_online());
        assert_eq!(user.last_active(), 0);
        assert!(user.session().is_none());
        assert!(!user.is_locked_out(Duration::from_secs(10)));
    }

    #[test]
    fn test_password_uses_value_equality() {
        let user = record();
        let candidate = String::from("sec") + "ret";

        assert!(user.password_matches(&candidate));
        assert!(!user.password_matches("Secret"));
        assert!(!user.password_matches(""));
    }

    #[test]
    fn test_set_active_stamps_time_only_when_going_online() {
        let mut user = record();

        user.set_active(true, 1_000);
        assert!(user.is_online());
        assert_eq!(user.last_active(), 1_000);

        user.set_active(false, 2_000);
        assert!(!user.is_online());
        assert_eq!(user.last_active(), 1_000);
    }

    #[test]
    fn test_lockout_window() {
        let mut user = record();
        let window = Duration::from_secs(10);

        user.start_lockout();
        assert!(user.is_locked_out(window));

        user.lockout_started = Some(Instant::now() - Duration::from_secs(11));
        assert!(!user.is_locked_out(window));
    }

    #[test]
    fn test_session_attach_and_detach() {
        let mut user = record();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();

        user.attach_session(SessionLink::new(addr, tx));
        assert_eq!(user.session().map(|s| s.addr), Some(addr));
        assert!(user.session().unwrap().send(Packet::notice("hi")));
        assert_eq!(rx.try_recv().unwrap(), Packet::notice("hi"));

        assert!(user.detach_session().is_some());
        assert!(user.session().is_none());
        assert!(user.detach_session().is_none());
    }

    #[test]
    fn test_blocklist() {
        let mut user = record();

        assert!(user.block("bob"));
        assert!(!user.block("bob"));
        assert!(user.has_blocked("bob"));

        assert!(user.unblock("bob"));
        assert!(!user.unblock("bob"));
        assert!(!user.has_blocked("bob"));
    }
}
