//! Login state machine driven by a session.
//!
//! The flow walks `AwaitingUsername -> AwaitingPassword -> Authenticated`.
//! Every rejected input keeps the flow in (or returns it to) the prompting
//! state; nothing here performs I/O. Each step borrows the registry through
//! the caller's write guard so lookups and lockout updates see the same
//! records as every other session.

use crate::config::FailureBound;
use crate::registry::Registry;
use log::warn;
use thiserror::Error;

pub const USERNAME_PROMPT: &str = "Username: ";
pub const PASSWORD_PROMPT: &str = "Password: ";

/// Why an input was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("=== Error: Invalid Username ===")]
    UnknownUser,

    #[error("=== Error: Account already logged in. ===")]
    AlreadyLoggedIn,

    #[error("=== Error: Consecutive login failures. Please try again later. ===")]
    LockedOut,

    #[error("=== Error: Invalid Password ===")]
    WrongPassword { attempts_left: u8 },

    /// The failure bound has just been exhausted and a lockout started
    #[error("=== Error: Consecutive login failures. Please try again later. ===")]
    TooManyFailures,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    AwaitingUsername,
    AwaitingPassword { username: String, attempts_left: u8 },
    Authenticated { username: String },
}

/// What an accepted input led to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    PasswordRequired,
    Authenticated(String),
}

pub struct LoginFlow {
    state: AuthState,
    failure_bound: FailureBound,
}

impl LoginFlow {
    pub fn new(failure_bound: FailureBound) -> Self {
        Self {
            state: AuthState::AwaitingUsername,
            failure_bound,
        }
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    /// Prompt to send before the next input, or `None` once authenticated
    pub fn prompt(&self) -> Option<&'static str> {
        match self.state {
            AuthState::AwaitingUsername => Some(USERNAME_PROMPT),
            AuthState::AwaitingPassword { .. } => Some(PASSWORD_PROMPT),
            AuthState::Authenticated { .. } => None,
        }
    }

    /// Goes back to asking for a username
    pub fn restart(&mut self) {
        self.state = AuthState::AwaitingUsername;
    }

    /// Feeds one line of client input into the flow
    pub fn submit(&mut self, registry: &mut Registry, input: &str) -> Result<Progress, Rejection> {
        match &mut self.state {
            AuthState::AwaitingUsername => {
                let username = input.trim();
                if registry.find(username).is_none() {
                    return Err(Rejection::UnknownUser);
                }
                if registry.is_active(username) {
                    return Err(Rejection::AlreadyLoggedIn);
                }
                if registry.is_locked_out(username) {
                    return Err(Rejection::LockedOut);
                }

                self.state = AuthState::AwaitingPassword {
                    username: username.to_string(),
                    attempts_left: self.failure_bound.get(),
                };
                Ok(Progress::PasswordRequired)
            }

            AuthState::AwaitingPassword {
                username,
                attempts_left,
            } => {
                if registry.is_locked_out(username) {
                    return Err(Rejection::LockedOut);
                }

                let matches = registry
                    .find(username)
                    .map(|user| user.password_matches(input.trim()))
                    .unwrap_or(false);
                if matches {
                    let username = std::mem::take(username);
                    self.state = AuthState::Authenticated {
                        username: username.clone(),
                    };
                    return Ok(Progress::Authenticated(username));
                }

                *attempts_left = attempts_left.saturating_sub(1);
                warn!(
                    "Failed password for {} ({} attempts left)",
                    username, attempts_left
                );
                if *attempts_left == 0 {
                    registry.start_lockout(username);
                    *attempts_left = self.failure_bound.get();
                    return Err(Rejection::TooManyFailures);
                }
                Err(Rejection::WrongPassword {
                    attempts_left: *attempts_left,
                })
            }

            AuthState::Authenticated { username } => Ok(Progress::Authenticated(username.clone())),
        }
    }
}
