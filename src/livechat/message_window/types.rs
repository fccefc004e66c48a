use serde::{Deserialize, Serialize};

/// The fields of a chat message as stored remotely under its key
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    /// Message content, already trimmed by the sender
    pub text: String,

    /// Display name of the author. Older records carry the author's email here.
    pub owner: String,

    /// Stable author identifier, absent on records that predate it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_uid: Option<String>,

    /// Author email, absent on records that predate it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_email: Option<String>,

    /// Logical creation time in milliseconds, used only for ordering
    pub timestamp: i64,
}

/// A message together with the key the remote store assigned to it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Unique, stable key assigned by the store at creation time
    pub id: String,

    #[serde(flatten)]
    pub payload: MessagePayload,
}

impl Message {
    pub fn new(id: impl Into<String>, payload: MessagePayload) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }

    pub fn timestamp(&self) -> i64 {
        self.payload.timestamp
    }
}

/// What a live subscription can report about a single child of the collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildEvent {
    Added { key: String, payload: MessagePayload },
    Changed { key: String, payload: MessagePayload },
    Removed { key: String },
}

impl ChildEvent {
    pub fn key(&self) -> &str {
        match self {
            ChildEvent::Added { key, .. }
            | ChildEvent::Changed { key, .. }
            | ChildEvent::Removed { key } => key,
        }
    }
}

/// Outcome of a "load older" request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOlderOutcome {
    /// Nothing is loaded yet, so there is no boundary to page from
    NoBoundary,
    /// Another older-page fetch is still in flight
    AlreadyLoading,
    /// The window was deactivated while the fetch was in flight; the result was dropped
    Discarded,
    /// The fetch completed and `added` previously unseen messages were merged
    Merged { added: usize },
}

/// Configuration for the message window
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct WindowConfig {
    /// Number of messages in the live subscription and in each older page
    pub page_size: usize,

    /// Whether to log every applied event at debug level
    pub enable_debug_logging: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            enable_debug_logging: false,
        }
    }
}
