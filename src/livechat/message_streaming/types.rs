//! Types for the message streaming feature.
//!
//! Every update carries the complete ordered window, so a renderer can replace its
//! list wholesale without tracking deltas.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::livechat::message_window::Message;

/// What caused the window to change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateTrigger {
    /// A message was added by the live subscription.
    MessageAdded,

    /// A message's payload was replaced by the live subscription.
    MessageChanged,

    /// A message was removed by the live subscription.
    MessageRemoved,

    /// An older page was merged into the window.
    OlderLoaded,

    /// The window was emptied because the user went away.
    Cleared,
}

/// A single update sent to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowUpdate {
    /// What triggered this update.
    pub trigger: UpdateTrigger,

    /// Key of the affected message for live events.
    pub key: Option<String>,

    /// The full window after the update, ascending by timestamp.
    pub messages: Vec<Message>,

    /// Pagination boundary after the update.
    pub oldest_timestamp: Option<i64>,
}

/// Result of subscribing to a live window.
///
/// The snapshot and the receiver are taken under the same lock, so no update is
/// missed or seen twice.
pub struct WindowSubscription {
    /// The window at subscription time.
    pub initial_messages: Vec<Message>,

    /// Receiver for every later update.
    pub updates: broadcast::Receiver<WindowUpdate>,
}
