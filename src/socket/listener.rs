//! TCP listener for the listener role.
//!
//! Binds synchronously so bind failures surface from [`ChatListener::bind`]
//! itself, then hands the socket to tokio for the asynchronous accept.
//! Dropping a `ChatListener` closes the listening socket; aborting the task
//! that owns it is how a pending accept is cancelled.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};

use super::endpoint::Endpoint;
use crate::error::ChatError;

/// Listening socket waiting for the single peer.
#[derive(Debug)]
pub struct ChatListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl ChatListener {
    /// Bind and listen on `endpoint`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Bind`] if the address is in use or cannot be resolved.
    pub fn bind(endpoint: &Endpoint) -> Result<Self, ChatError> {
        let bind_err = |source| ChatError::Bind {
            endpoint: endpoint.clone(),
            source,
        };

        let listener =
            std::net::TcpListener::bind(endpoint.as_socket_addr()).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        // Convert std listener to tokio async listener
        listener.set_nonblocking(true).map_err(bind_err)?;
        let listener = TcpListener::from_std(listener).map_err(bind_err)?;

        log::info!("[Listener] Listening on {} ({})", endpoint, local_addr);

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Address the socket is actually bound to (resolved host, real port).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for a peer to connect.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Accept`] if the listening socket fails.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ChatError> {
        let (stream, peer_addr) = self.listener.accept().await.map_err(ChatError::Accept)?;
        if let Err(e) = stream.set_nodelay(true) {
            log::warn!("[Listener] Failed to set TCP_NODELAY: {e}");
        }
        log::info!("[Listener] Accepted peer {}", peer_addr);
        Ok((stream, peer_addr))
    }
}
