//! Server settings assembled from the command line.

use shared::{MAX_FAILURE_BOUND, MIN_FAILURE_BOUND};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default length of the login lockout window
pub const DEFAULT_LOCKOUT_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error(
        "Invalid number of allowed failed consecutive attempts: {0}. \
         The valid value is an integer between 1 and 5"
    )]
    FailureBoundOutOfRange(i64),
}

/// Number of consecutive wrong passwords tolerated before a lockout starts.
///
/// Always within `MIN_FAILURE_BOUND..=MAX_FAILURE_BOUND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureBound(u8);

impl FailureBound {
    pub fn new(value: i64) -> Result<Self, ConfigError> {
        if value < MIN_FAILURE_BOUND as i64 || value > MAX_FAILURE_BOUND as i64 {
            return Err(ConfigError::FailureBoundOutOfRange(value));
        }
        Ok(Self(value as u8))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

/// What a session does once the failure bound has been exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LockoutPolicy {
    /// Keep prompting for the password; attempts are refused until the window ends
    #[default]
    Reprompt,
    /// Tell the client about the lockout and close the connection
    Disconnect,
}

/// Per-session authentication settings shared by every connection
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub failure_bound: FailureBound,
    pub lockout_policy: LockoutPolicy,
}

/// Everything the server binary needs to start
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub credentials: PathBuf,
    pub lockout_window: Duration,
    pub session: SessionSettings,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
