//! Named chat groups with an invite list and an append-only message log.

use log::error;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// A group chat channel
///
/// The owner is a member from creation. Everyone else must be invited and
/// then join; a name is never both invited and a member.
#[derive(Debug)]
pub struct Group {
    name: String,
    members: Vec<String>,
    invited: Vec<String>,
    /// Sequence number of the next logged message
    next_seq: u64,
    log_path: PathBuf,
}

impl Group {
    /// Creates a group whose log lives at `<log_dir>/<name>_messageLog.txt`
    pub fn new<I, S>(name: &str, owner: &str, invited: I, log_dir: impl AsRef<Path>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut invites: Vec<String> = Vec::new();
        for username in invited.into_iter().map(Into::into) {
            if username != owner && !invites.contains(&username) {
                invites.push(username);
            }
        }

        Self {
            name: name.to_string(),
            members: vec![owner.to_string()],
            invited: invites,
            next_seq: 1,
            log_path: log_dir.as_ref().join(format!("{}_messageLog.txt", name)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn is_member(&self, username: &str) -> bool {
        self.members.iter().any(|m| m == username)
    }

    pub fn is_invited(&self, username: &str) -> bool {
        self.invited.iter().any(|i| i == username)
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Moves `username` from the invite list into the members.
    ///
    /// Returns false, changing nothing, unless the user was invited and has
    /// not joined yet.
    pub fn join(&mut self, username: &str) -> bool {
        if !self.is_invited(username) || self.is_member(username) {
            return false;
        }
        self.invited.retain(|i| i != username);
        self.members.push(username.to_string());
        true
    }

    /// Appends `seq; timestamp; user; message` to the group log
    ///
    /// Write failures are logged and otherwise ignored; the sequence number
    /// only advances when the line was written.
    pub fn log_msg(&mut self, timestamp: &str, user: &str, message: &str) {
        let line = format!("{}; {}; {}; {}\n", self.next_seq, timestamp, user, message);
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .and_then(|mut file| file.write_all(line.as_bytes()));

        match written {
            Ok(()) => self.next_seq += 1,
            Err(e) => error!(
                "Failed to write message log {}: {}",
                self.log_path.display(),
                e
            ),
        }
    }
}
