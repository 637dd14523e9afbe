//! Error types for the chat transport.

use std::io;
use std::time::Duration;

use crate::constants::MAX_MESSAGE_LEN;
use crate::socket::endpoint::Endpoint;

/// Error produced by the chat transport.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The listening socket could not be bound (address in use, unresolvable host).
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        /// Address the listener tried to bind.
        endpoint: Endpoint,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// Waiting for the peer on the listening socket failed.
    #[error("failed to accept a client: {0}")]
    Accept(#[source] io::Error),
    /// The connector could not reach the listener.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        /// Address the connector dialed.
        endpoint: Endpoint,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// The configured connect timeout elapsed.
    #[error("timed out connecting to {endpoint} after {timeout:?}")]
    ConnectTimeout {
        /// Address the connector dialed.
        endpoint: Endpoint,
        /// Timeout that elapsed.
        timeout: Duration,
    },
    /// Writing a frame to the connection failed.
    #[error("failed to send message: {0}")]
    Write(#[source] io::Error),
    /// Reading from the connection failed.
    #[error("failed to read from peer: {0}")]
    Read(#[source] io::Error),
    /// The peer sent bytes that do not form a valid frame.
    #[error("malformed frame: {0}")]
    FrameDecode(String),
    /// The message does not fit in one frame.
    #[error("message is {len} bytes encoded, frames carry at most {MAX_MESSAGE_LEN}")]
    FrameTooLarge {
        /// Encoded length of the rejected message.
        len: usize,
    },
    /// A send was attempted with no open connection.
    #[error("not connected")]
    NotConnected,
    /// An open was attempted while the session is listening, connecting or connected.
    #[error("session is already open; close it first")]
    AlreadyActive,
}

/// Coarse classification of a [`ChatError`], carried by error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Binding the listening socket.
    Bind,
    /// Accepting the peer.
    Accept,
    /// Dialing the listener.
    Connect,
    /// Writing to the connection.
    Write,
    /// Reading from the connection.
    Read,
    /// Decoding a received frame.
    FrameDecode,
    /// Encoding an oversized message.
    FrameTooLarge,
    /// Action not valid in the current session state.
    State,
}

impl ChatError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Bind { .. } => ErrorKind::Bind,
            Self::Accept(_) => ErrorKind::Accept,
            Self::Connect { .. } | Self::ConnectTimeout { .. } => ErrorKind::Connect,
            Self::Write(_) => ErrorKind::Write,
            Self::Read(_) => ErrorKind::Read,
            Self::FrameDecode(_) => ErrorKind::FrameDecode,
            Self::FrameTooLarge { .. } => ErrorKind::FrameTooLarge,
            Self::NotConnected | Self::AlreadyActive => ErrorKind::State,
        }
    }

    /// Write error for a connection whose writer task has already stopped.
    pub(crate) fn writer_closed() -> Self {
        Self::Write(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "connection writer has stopped",
        ))
    }
}
