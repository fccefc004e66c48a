//! Message Streaming Module
//!
//! This module keeps the message window of a collection live. It owns the store
//! subscription while a user is present, applies child events and older pages to the
//! window, and fans every resulting state out to subscribers without polling.

mod manager;
mod session;
mod types;

pub use manager::MessageStreamManager;
pub use session::{LiveWindow, SubscriptionHandle};
pub use types::{UpdateTrigger, WindowSubscription, WindowUpdate};
