//! TCP listener that hands each connection to its own session task

use crate::config::{ConfigError, ServerConfig, SessionSettings};
use crate::credentials::{self, CredentialError};
use crate::registry::{Registry, SharedRegistry};
use crate::session::Session;
use log::{error, info, warn};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, ToSocketAddrs};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Chat server accepting any number of concurrent clients
pub struct Server {
    listener: TcpListener,
    registry: SharedRegistry,
    settings: SessionSettings,
}

impl Server {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        registry: Registry,
        settings: SessionSettings,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await.map_err(ServerError::Bind)?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            registry: registry.into_shared(),
            settings,
        })
    }

    /// Loads the credential store and binds the configured address.
    ///
    /// A missing or unreadable credential file is an error; the server never
    /// starts with an empty store.
    pub async fn from_config(config: ServerConfig) -> Result<Self, ServerError> {
        let credentials = credentials::load(&config.credentials)?;
        let registry = Registry::new(credentials, config.lockout_window);
        Self::bind(config.bind_address(), registry, config.session).await
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle to the registry shared by every session
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// Accepts connections forever
    pub async fn run(self) -> Result<(), ServerError> {
        info!(
            "Server started (failure bound {}, lockout policy {:?})",
            self.settings.failure_bound.get(),
            self.settings.lockout_policy
        );

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                    }

                    let session = Session::new(stream, addr, self.registry.clone(), self.settings);
                    tokio::spawn(async move {
                        // Outcome is logged by the session itself
                        let _ = session.run().await;
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}
