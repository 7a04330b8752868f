//! # Chat Server Library
//!
//! This library provides the server side of a multi-client text chat. Clients
//! connect over TCP, authenticate against a credential file loaded at boot, and
//! then issue line-oriented commands until they log out or disconnect.
//!
//! ## Core Responsibilities
//!
//! ### Authentication
//! Every connection starts in a login flow that asks for a username and then a
//! password. Unknown names are re-prompted, accounts already in use are refused,
//! and repeated wrong passwords lock the account for a configurable window.
//!
//! ### Presence
//! The registry is the single source of truth for who is online. A user is
//! active between a successful login and the end of the session that logged
//! them in, and at most one session can hold a username at a time.
//!
//! ### Messaging
//! Authenticated users can list who else is online, message or broadcast to
//! other users, block and unblock senders, and look up a peer's address to
//! open a private connection outside the server.
//!
//! ## Architecture Design
//!
//! ### Task Per Connection
//! The listener spawns one task per accepted connection. Sessions never share
//! a socket; they reach each other only through outbound channels stored in
//! the registry.
//!
//! ### Shared Registry
//! All user state lives in one [`registry::Registry`] behind a
//! `tokio::sync::RwLock`. Every check-then-act sequence (for example "is this
//! user free, then mark them active") runs under a single write guard, so two
//! sessions racing for the same account cannot both win.
//!
//! ### Framing
//! Packets are bincode-encoded and length-prefixed, see the `shared` crate.
//!
//! ## Module Organization
//!
//! - `auth`: login state machine
//! - `commands`: command parsing and execution for logged-in users
//! - `config`: validated server settings
//! - `credentials`: credential file loading
//! - `group`: named chat groups with message logs
//! - `network`: TCP listener
//! - `registry`: user records and the active-user list
//! - `session`: per-connection driver
//! - `user`: a single user's record
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::{FailureBound, LockoutPolicy, ServerConfig, SessionSettings};
//! use server::network::Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         host: "127.0.0.1".to_string(),
//!         port: 5000,
//!         credentials: "credentials.txt".into(),
//!         lockout_window: Duration::from_secs(10),
//!         session: SessionSettings {
//!             failure_bound: FailureBound::new(3)?,
//!             lockout_policy: LockoutPolicy::Reprompt,
//!         },
//!     };
//!
//!     // Loads the credential file, binds, then accepts clients forever
//!     Server::from_config(config).await?.run().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod commands;
pub mod config;
pub mod credentials;
pub mod group;
pub mod network;
pub mod registry;
pub mod session;
pub mod user;
pub mod utils;
