//! # Chat Client Library
//!
//! Console client for the chat server. The server drives the conversation: it
//! sends prompts and notices, and every line typed by the user goes back as a
//! reply frame. Before login those replies answer the username and password
//! prompts; afterwards they are commands such as `whoelse` or
//! `message <user> <text>`.
//!
//! [`network::Connection`] is the framed TCP connection on its own, which is
//! what the integration tests use to script a session. [`network::Client`]
//! wraps it with the interactive console loop used by the `client` binary.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Server at 127.0.0.1:5000, port 6000 reserved for private sessions
//!     Client::new("127.0.0.1", 5000, 6000).run().await
//! }
//! ```

pub mod network;
