//! Events a session reports to its front end.
//!
//! Every background producer (accept/connect task, read loop, write loop)
//! and every user action sends through the same
//! `mpsc::UnboundedSender<SessionEvent>`. The front end drains the matching
//! receiver on its own task and never shares state with the transport.

use std::net::SocketAddr;

use crate::error::{ChatError, ErrorKind};

/// Which end of the conversation this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Binds, accepts one peer, then chats (the "server" app).
    Listener,
    /// Dials the listener, then chats (the "client" app).
    Connector,
}

impl Role {
    /// Label shown in front of messages received from the peer.
    pub fn peer_label(self) -> &'static str {
        match self {
            Self::Listener => "Client",
            Self::Connector => "Server",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Listener => write!(f, "listener"),
            Self::Connector => write!(f, "connector"),
        }
    }
}

/// Notification from a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A peer connection is established and the read loop is running.
    Connected {
        /// Remote address of the peer.
        peer_addr: SocketAddr,
    },

    /// The connection (or a pending listen/connect) ended.
    ///
    /// Emitted once per open, whether the peer hung up, an error occurred
    /// or the session was closed locally.
    Disconnected,

    /// One complete message arrived from the peer.
    MessageReceived(String),

    /// Human-readable connection status line.
    StatusChanged(String),

    /// An operation failed.
    Error {
        /// Classification of the failure.
        kind: ErrorKind,
        /// Human-readable description, suitable for display.
        detail: String,
    },
}

impl From<&ChatError> for SessionEvent {
    fn from(err: &ChatError) -> Self {
        Self::Error {
            kind: err.kind(),
            detail: err.to_string(),
        }
    }
}
