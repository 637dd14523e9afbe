//! TCP transport for a two-party chat.
//!
//! One process plays the listener, the other the connector. After the
//! single connection is established both sides are symmetric: either can
//! send, either can close.
//!
//! # Architecture
//!
//! ```text
//! Listener process                     Connector process
//! ┌──────────────────┐                ┌──────────────────┐
//! │ Session          │                │ Session          │
//! │  ChatListener    │                │  connect()       │
//! │  (one accept)    │                │                  │
//! │  Connection      │◄──────────────►│  Connection      │
//! │   read / write   │  frames over   │   read / write   │
//! │   tasks          │  TCP           │   tasks          │
//! └────────┬─────────┘                └────────┬─────────┘
//!          │ SessionEvent                      │ SessionEvent
//!          ▼                                   ▼
//!     front end (ChatLog)                 front end (ChatLog)
//! ```
//!
//! # Wire Protocol
//!
//! Length-prefixed frames: `[u16 BE length][text bytes]`
//!
//! See [`framing`] for the codec and text encodings.

pub mod connection;
pub mod connector;
pub mod endpoint;
pub mod events;
pub mod framing;
pub mod listener;
pub mod session;

pub use connection::Connection;
pub use endpoint::Endpoint;
pub use events::{Role, SessionEvent};
pub use framing::{FrameDecoder, TextEncoding};
pub use listener::ChatListener;
pub use session::{Session, SessionConfig};
