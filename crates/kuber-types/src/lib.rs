//! Shared types and constants for the Kuber voice assistant.
//!
//! This crate defines the conversation data model that every other crate
//! agrees on: who spoke ([`Speaker`]), what was said ([`LoggedMessage`]),
//! and the persisted shape of a whole conversation ([`SessionRecord`]).
//!
//! The JSON produced by serialising a [`SessionRecord`] is the on-disk
//! session format:
//!
//! ```json
//! {
//!   "created_at": "2025-01-01T10:00:00.000000Z",
//!   "conversation_log": [
//!     { "speaker": "user", "text": "What's the gold rate?", "timestamp": "..." }
//!   ]
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum number of sessions held in memory at once.
pub const DEFAULT_SESSION_CAPACITY: usize = 100;

/// A session is saved automatically after every this-many logged messages.
pub const AUTO_SAVE_INTERVAL: usize = 5;

/// Number of recent messages returned by a history lookup.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Returned by history lookups on a session with no messages.
pub const NO_HISTORY_SENTINEL: &str = "No conversation history yet";

/// The party that produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The human caller.
    User,
    /// The voice agent.
    Assistant,
}

impl Speaker {
    /// Returns the wire label for this speaker.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a known [`Speaker`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown speaker: {0}")]
pub struct ParseSpeakerError(pub String);

impl FromStr for Speaker {
    type Err = ParseSpeakerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(ParseSpeakerError(s.to_string())),
        }
    }
}

/// One entry in a conversation log. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedMessage {
    pub speaker: Speaker,
    /// Trimmed, never empty.
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl LoggedMessage {
    /// Creates a message stamped with the current UTC time.
    pub fn now(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// The full state of one conversation, as held in memory and written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub created_at: DateTime<Utc>,
    /// Append-only, in conversation order.
    pub conversation_log: Vec<LoggedMessage>,
}

impl SessionRecord {
    /// Creates an empty record created now.
    pub fn new() -> Self {
        Self {
            created_at: Utc::now(),
            conversation_log: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.conversation_log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversation_log.is_empty()
    }
}

impl Default for SessionRecord {
    fn default() -> Self {
        Self::new()
    }
}
