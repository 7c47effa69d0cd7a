//! Protocol session state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of one IMAP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No transport. Initial and terminal state.
    Disconnected,
    /// Transport open, greeting or LOGIN in flight.
    Connecting,
    /// Logged in, no mailbox selected.
    Authenticated,
    /// A mailbox is selected and no command is running.
    MailboxOpen,
    /// Waiting for server push notices.
    Idle,
    /// `UID SEARCH` in flight.
    Searching,
    /// `UID FETCH` responses are being streamed.
    Fetching,
}

impl SessionState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, target),
            // Anything can be torn down
            (_, Disconnected) |
            (Disconnected, Connecting) |
            (Connecting, Authenticated) |
            (Authenticated, MailboxOpen) |
            // Reopening swaps the selected mailbox
            (MailboxOpen, MailboxOpen) |
            (MailboxOpen, Idle) | (MailboxOpen, Searching) | (MailboxOpen, Fetching) |
            (Idle, MailboxOpen) | (Searching, MailboxOpen) | (Fetching, MailboxOpen)
        )
    }

    /// Whether LOGIN has succeeded and the transport is still up.
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::Disconnected | Self::Connecting)
    }

    /// Whether a command's responses are currently being consumed.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Idle | Self::Searching | Self::Fetching)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticated => "authenticated",
            Self::MailboxOpen => "mailbox_open",
            Self::Idle => "idle",
            Self::Searching => "searching",
            Self::Fetching => "fetching",
        };
        write!(f, "{s}")
    }
}

/// Something observers of a session may care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
        at: DateTime<Utc>,
    },
    /// The server pushed `* n EXISTS` while idling.
    NewMail { count: u32 },
    /// A session-level failure, already mapped to a human-readable message.
    Error(String),
    /// The transport was shut down. Sent once per connection.
    Closed,
}
