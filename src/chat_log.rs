//! Scrollback for a chat front end.
//!
//! Turns [`SessionEvent`]s into the lines a user sees: peer messages
//! prefixed with the peer's label, status lines prefixed with
//! [`STATUS_LINE_PREFIX`], errors verbatim.

use crate::constants::STATUS_LINE_PREFIX;
use crate::socket::events::{Role, SessionEvent};

/// Display log for one session.
#[derive(Debug, Clone)]
pub struct ChatLog {
    role: Role,
    lines: Vec<String>,
}

impl ChatLog {
    /// Empty log for a session playing `role`.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            lines: Vec::new(),
        }
    }

    /// Record `event`, returning the line it added, if any.
    pub fn apply(&mut self, event: &SessionEvent) -> Option<&str> {
        let line = match event {
            SessionEvent::MessageReceived(text) => format!("{}: {}", self.role.peer_label(), text),
            SessionEvent::StatusChanged(text) => format!("{STATUS_LINE_PREFIX}{text}"),
            SessionEvent::Error { detail, .. } => detail.clone(),
            SessionEvent::Connected { .. } | SessionEvent::Disconnected => return None,
        };
        self.lines.push(line);
        self.lines.last().map(String::as_str)
    }

    /// All lines so far, oldest first.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// The whole log as newline-separated text.
    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}
