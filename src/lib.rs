//! peerchat - two-party chat over a single TCP connection.
//!
//! One process listens and accepts exactly one peer, the other connects.
//! Messages travel as length-prefixed text frames; everything a front end
//! needs to show arrives as [`SessionEvent`]s.
//!
//! # Modules
//!
//! - [`socket`] - Transport: framing, listener, connector, connection, session
//! - [`chat_log`] - Event-to-line rendering for front ends
//! - [`config`] - Configuration loading/saving
//! - [`error`] - Transport error type

pub mod chat_log;
pub mod config;
pub mod constants;
pub mod env;
pub mod error;
pub mod socket;

// Re-export commonly used types
pub use chat_log::ChatLog;
pub use config::Config;
pub use error::{ChatError, ErrorKind};
pub use socket::{Endpoint, Role, Session, SessionConfig, SessionEvent, TextEncoding};
