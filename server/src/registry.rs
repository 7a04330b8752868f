//! Active-user registry and user record store shared by every session
//!
//! This module owns all state that outlives a single connection:
//! - The user records created from the credential store
//! - The ordered set of usernames currently logged in
//! - Lockout bookkeeping for failed logins
//! - Blocklist-aware message delivery and peer endpoint lookup
//!
//! Sessions reach the registry through a [`SharedRegistry`]. The write guard
//! of that lock is the critical section: every method taking `&mut self` runs
//! entirely inside it, so active-set membership and record state change
//! together and readers holding the read guard never see one without the other.

use crate::credentials::Credential;
use crate::user::{SessionLink, UserRecord};
use crate::utils::epoch_seconds;
use log::{info, warn};
use shared::{fits_in_frame, Packet, PeerSetup};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

/// Handle cloned into every session task
pub type SharedRegistry = Arc<RwLock<Registry>>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no account named {0}")]
    UnknownUser(String),

    #[error("{0} is already logged in")]
    AlreadyActive(String),

    #[error("message does not fit in a single frame")]
    MessageTooLarge,
}

/// Result of relaying a direct message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    SelfTarget,
    Blocked,
    Offline,
    Invalid,
    /// Relayed packet would not fit in a frame; nothing was queued
    TooLarge,
}

/// How many recipients a broadcast reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub skipped: usize,
}

/// Manages user records and the set of logged-in usernames
pub struct Registry {
    /// Records in credential file order
    users: Vec<UserRecord>,
    /// Logged-in usernames in login order
    active: Vec<String>,
    /// How long a lockout blocks password attempts
    lockout_window: Duration,
}

impl Registry {
    /// Creates a registry with one offline record per credential
    pub fn new(credentials: Vec<Credential>, lockout_window: Duration) -> Self {
        Self {
            users: credentials.into_iter().map(UserRecord::new).collect(),
            active: Vec::new(),
            lockout_window,
        }
    }

    /// Wraps the registry in the lock shared by all sessions
    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    pub fn lockout_window(&self) -> Duration {
        self.lockout_window
    }

    /// Finds the record for `username`
    ///
    /// Linear scan in credential order, so the first duplicate wins. The
    /// returned record is the shared one, never a copy.
    pub fn find(&self, username: &str) -> Option<&UserRecord> {
        self.users.iter().find(|user| user.username() == username)
    }

    pub fn find_mut(&mut self, username: &str) -> Option<&mut UserRecord> {
        self.users.iter_mut().find(|user| user.username() == username)
    }

    /// Returns true if `username` is currently logged in
    pub fn is_active(&self, username: &str) -> bool {
        self.active.iter().any(|name| name == username)
    }

    /// Returns true if `username` exists and is inside its lockout window
    pub fn is_locked_out(&self, username: &str) -> bool {
        let window = self.lockout_window;
        self.find(username)
            .map(|user| user.is_locked_out(window))
            .unwrap_or(false)
    }

    /// Starts a lockout for `username`. Unknown names are ignored.
    pub fn start_lockout(&mut self, username: &str) {
        if let Some(user) = self.find_mut(username) {
            user.start_lockout();
            warn!("User {} locked out for {:?}", username, self.lockout_window);
        }
    }

    /// Registers an authenticated session for `username`
    ///
    /// Fails without touching any state if the name is unknown or already
    /// logged in. On success the name joins the active set and the record is
    /// marked online with the session attached.
    pub fn add_client(&mut self, username: &str, link: SessionLink) -> Result<(), RegistryError> {
        if self.is_active(username) {
            return Err(RegistryError::AlreadyActive(username.to_string()));
        }

        let addr = link.addr;
        let user = self
            .find_mut(username)
            .ok_or_else(|| RegistryError::UnknownUser(username.to_string()))?;
        user.attach_session(link);
        user.set_active(true, epoch_seconds());

        self.active.push(username.to_string());
        info!("User {} logged in from {}", username, addr);
        Ok(())
    }

    /// Removes `username` from the active set and marks the record offline
    ///
    /// Safe to call any number of times. Returns true only if the user was
    /// logged in.
    pub fn remove_client(&mut self, username: &str) -> bool {
        let was_active = match self.active.iter().position(|name| name == username) {
            Some(idx) => {
                self.active.remove(idx);
                true
            }
            None => false,
        };

        if let Some(user) = self.find_mut(username) {
            user.detach_session();
            if user.is_online() {
                user.set_active(false, 0);
                user.set_last_active(epoch_seconds());
            }
        }

        if was_active {
            info!("User {} logged out", username);
        }
        was_active
    }

    /// Logged-in usernames in login order
    pub fn active_users(&self) -> &[String] {
        &self.active
    }

    /// Other users that are online, or were active within `since` seconds of `now`
    ///
    /// With `since == None` only currently logged-in users are returned.
    /// Online users come first in login order, followed by recently departed
    /// users in credential order.
    pub fn others_active_since(&self, username: &str, since: Option<u64>, now: u64) -> Vec<String> {
        let mut names: Vec<String> = self
            .active
            .iter()
            .filter(|name| name.as_str() != username)
            .cloned()
            .collect();

        if let Some(window) = since {
            let cutoff = now.saturating_sub(window);
            for user in &self.users {
                let name = user.username();
                if name == username || user.is_online() || user.last_active() == 0 {
                    continue;
                }
                if user.last_active() >= cutoff && !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }

        names
    }

    /// Relays a direct message from `from` to `to`
    pub fn deliver(&self, from: &str, to: &str, text: &str) -> Delivery {
        if from == to {
            return Delivery::SelfTarget;
        }
        let Some(recipient) = self.find(to) else {
            return Delivery::Invalid;
        };
        if recipient.has_blocked(from) {
            return Delivery::Blocked;
        }

        let packet = Packet::Chat {
            from: from.to_string(),
            text: text.to_string(),
            broadcast: false,
        };
        if !fits_in_frame(&packet) {
            warn!("Dropping oversized message from {} to {}", from, to);
            return Delivery::TooLarge;
        }
        match recipient.session() {
            Some(link) if recipient.is_online() => {
                if link.send(packet) {
                    Delivery::Delivered
                } else {
                    Delivery::Offline
                }
            }
            _ => Delivery::Offline,
        }
    }

    /// Relays `text` to every other logged-in user that has not blocked `from`
    ///
    /// Fails without queuing anything if the relayed packet would not fit in
    /// a frame.
    pub fn broadcast(&self, from: &str, text: &str) -> Result<BroadcastReport, RegistryError> {
        let packet = Packet::Chat {
            from: from.to_string(),
            text: text.to_string(),
            broadcast: true,
        };
        if !fits_in_frame(&packet) {
            warn!("Dropping oversized broadcast from {}", from);
            return Err(RegistryError::MessageTooLarge);
        }

        let mut report = BroadcastReport::default();

        for name in self.active.iter().filter(|name| name.as_str() != from) {
            let Some(recipient) = self.find(name) else {
                continue;
            };
            if recipient.has_blocked(from) {
                report.skipped += 1;
                continue;
            }

            let sent = recipient
                .session()
                .map(|link| link.send(packet.clone()))
                .unwrap_or(false);
            if sent {
                report.delivered += 1;
            } else {
                report.skipped += 1;
            }
        }

        Ok(report)
    }

    /// Adds `target` to `owner`'s blocklist. Returns false if already blocked.
    pub fn block(&mut self, owner: &str, target: &str) -> Result<bool, RegistryError> {
        if self.find(target).is_none() {
            return Err(RegistryError::UnknownUser(target.to_string()));
        }
        let user = self
            .find_mut(owner)
            .ok_or_else(|| RegistryError::UnknownUser(owner.to_string()))?;
        Ok(user.block(target))
    }

    /// Removes `target` from `owner`'s blocklist. Returns false if it was not blocked.
    pub fn unblock(&mut self, owner: &str, target: &str) -> Result<bool, RegistryError> {
        if self.find(target).is_none() {
            return Err(RegistryError::UnknownUser(target.to_string()));
        }
        let user = self
            .find_mut(owner)
            .ok_or_else(|| RegistryError::UnknownUser(owner.to_string()))?;
        Ok(user.unblock(target))
    }

    /// Looks up the endpoint `requester` should dial for a private session with `target`
    pub fn peer_setup(&self, requester: &str, target: &str) -> PeerSetup {
        if requester == target {
            return PeerSetup::SelfTarget;
        }
        let Some(user) = self.find(target) else {
            return PeerSetup::Invalid;
        };
        if user.has_blocked(requester) {
            return PeerSetup::Blocked;
        }

        match user.session() {
            Some(link) if user.is_online() => PeerSetup::Ready {
                username: target.to_string(),
                addr: link.addr,
            },
            _ => PeerSetup::Offline,
        }
    }

    /// Number of user records
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Returns true if the credential store was empty
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
