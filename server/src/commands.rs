//! Command interpreter for logged-in sessions.
//!
//! Each reply line from an authenticated client is parsed into a [`Command`]
//! and executed against the registry while the caller holds the write guard.
//! The interpreter never touches the socket; it returns the packets to send
//! back and whether the session should end.

use crate::registry::{Delivery, Registry};
use crate::utils::split_first_word;
use shared::Packet;
use std::str::FromStr;
use thiserror::Error;

const MESSAGE_TOO_LONG: &str = "Error: Your message is too long to deliver";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Logout,
    WhoElse,
    WhoElseSince(u64),
    Broadcast(String),
    Message { to: String, text: String },
    Block(String),
    Unblock(String),
    SetupPrivate(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Invalid command. Use format: {0}")]
    Usage(&'static str),

    #[error("That is not a valid command.")]
    Unknown,
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let words: Vec<&str> = line.split_whitespace().collect();
        let (name, rest) = split_first_word(line);

        match name {
            "logout" if words.len() == 1 => Ok(Command::Logout),
            "logout" => Err(CommandError::Usage("logout")),

            "whoelse" if words.len() == 1 => Ok(Command::WhoElse),
            "whoelse" => Err(CommandError::Usage("whoelse")),

            "whoelsesince" => match words.as_slice() {
                [_, secs] => secs
                    .parse()
                    .map(Command::WhoElseSince)
                    .map_err(|_| CommandError::Usage("whoelsesince <time>")),
                _ => Err(CommandError::Usage("whoelsesince <time>")),
            },

            "broadcast" if words.len() >= 2 => Ok(Command::Broadcast(rest.to_string())),
            "broadcast" => Err(CommandError::Usage("broadcast <message>")),

            "message" if words.len() >= 3 => Ok(Command::Message {
                to: words[1].to_string(),
                text: words[2..].join(" "),
            }),
            "message" => Err(CommandError::Usage("message <user> <message>")),

            "block" => single_target(&words, "block <user>").map(Command::Block),
            "unblock" => single_target(&words, "unblock <user>").map(Command::Unblock),
            "setupprivate" => {
                single_target(&words, "setupprivate <user>").map(Command::SetupPrivate)
            }

            _ => Err(CommandError::Unknown),
        }
    }
}

fn single_target(words: &[&str], usage: &'static str) -> Result<String, CommandError> {
    match words {
        [_, target] => Ok(target.to_string()),
        _ => Err(CommandError::Usage(usage)),
    }
}

/// Packets produced by one command, and whether the session should end
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Dispatch {
    pub replies: Vec<Packet>,
    pub logout: bool,
}

impl Dispatch {
    fn notice(text: impl Into<String>) -> Self {
        Self {
            replies: vec![Packet::notice(text)],
            logout: false,
        }
    }
}

/// Parses and runs one command line for `username`
///
/// `now` is the current time in epoch seconds, used by `whoelsesince`.
pub fn execute(registry: &mut Registry, username: &str, line: &str, now: u64) -> Dispatch {
    if line.trim().is_empty() {
        return Dispatch::default();
    }

    match line.parse::<Command>() {
        Ok(command) => run(registry, username, command, now),
        Err(err) => Dispatch::notice(err.to_string()),
    }
}

fn run(registry: &mut Registry, username: &str, command: Command, now: u64) -> Dispatch {
    match command {
        Command::Logout => Dispatch {
            replies: vec![Packet::notice(format!("Goodbye, {}!", username))],
            logout: true,
        },

        Command::WhoElse => who_else(registry, username, None, now),
        Command::WhoElseSince(secs) => who_else(registry, username, Some(secs), now),

        Command::Broadcast(text) => {
            match registry.broadcast(username, &text) {
                Ok(report) if report.skipped == 0 => Dispatch::default(),
                Ok(_) => Dispatch::notice("Your message could not be delivered to some recipients"),
                Err(_) => Dispatch::notice(MESSAGE_TOO_LONG),
            }
        }

        Command::Message { to, text } => match registry.deliver(username, &to, &text) {
            Delivery::Delivered => Dispatch::default(),
            Delivery::SelfTarget => Dispatch::notice("Error: You can't message yourself"),
            Delivery::Invalid => Dispatch::notice("Error: Invalid user"),
            Delivery::Blocked => Dispatch::notice(
                "Your message could not be delivered as the recipient has blocked you",
            ),
            Delivery::Offline => Dispatch::notice(format!("Error: {} is offline", to)),
            Delivery::TooLarge => Dispatch::notice(MESSAGE_TOO_LONG),
        },

        Command::Block(target) => {
            if target == username {
                return Dispatch::notice("Error: Cannot block yourself");
            }
            match registry.block(username, &target) {
                Ok(true) => Dispatch::notice(format!("{} is blocked", target)),
                Ok(false) => Dispatch::notice(format!("{} is already blocked", target)),
                Err(_) => Dispatch::notice("Error: invalid user"),
            }
        }

        Command::Unblock(target) => {
            if target == username {
                return Dispatch::notice("Error: You are not blocked");
            }
            match registry.unblock(username, &target) {
                Ok(true) => Dispatch::notice(format!("{} is unblocked", target)),
                Ok(false) => Dispatch::notice(format!("{} was not blocked", target)),
                Err(_) => Dispatch::notice("Error: invalid user"),
            }
        }

        Command::SetupPrivate(target) => Dispatch {
            replies: vec![Packet::PeerSession(registry.peer_setup(username, &target))],
            logout: false,
        },
    }
}

fn who_else(registry: &Registry, username: &str, since: Option<u64>, now: u64) -> Dispatch {
    let names = registry.others_active_since(username, since, now);
    if names.is_empty() {
        Dispatch::notice("No other users are active")
    } else {
        Dispatch::notice(names.join("\n"))
    }
}
