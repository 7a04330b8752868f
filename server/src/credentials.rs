//! Credential store loaded once at boot.
//!
//! The backing file holds one `username password` pair per line, separated by
//! any whitespace. Blank lines are skipped and extra fields are ignored.
//! Duplicate usernames are kept as-is; lookups scan in file order, so the
//! first entry wins.

use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential store {path} is unavailable: {source}")]
    StoreUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("credential line {line} is malformed: expected `username password`")]
    Malformed { line: usize },
}

/// Reads and parses the credential file at `path`
pub fn load(path: impl AsRef<Path>) -> Result<Vec<Credential>, CredentialError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| CredentialError::StoreUnavailable {
        path: path.to_path_buf(),
        source,
    })?;

    let credentials = parse(&contents)?;
    info!(
        "Loaded {} credentials from {}",
        credentials.len(),
        path.display()
    );
    Ok(credentials)
}

/// Parses credential text, one pair per non-blank line
pub fn parse(contents: &str) -> Result<Vec<Credential>, CredentialError> {
    let mut credentials = Vec::new();

    for (idx, line) in contents.lines().enumerate() {
        let mut fields = line.split_whitespace();
        let Some(username) = fields.next() else {
            continue;
        };
        let password = fields
            .next()
            .ok_or(CredentialError::Malformed { line: idx + 1 })?;

        credentials.push(Credential::new(username, password));
    }

    Ok(credentials)
}
