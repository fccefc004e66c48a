//! Realtime keyed-record store
//!
//! The chat reads and writes messages through [`RealtimeStore`], an ordered collection
//! that can push child events to subscribers. [`InMemoryStore`] implements the same
//! contract locally, including limit-to-last eviction.

mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::livechat::message_window::{ChildEvent, Message, MessagePayload};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(u64),
}

/// Identifies a live subscription at the store
pub type SubscriptionId = u64;

/// Collection path plus the limit-to-last window, ordered by `timestamp`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQuery {
    pub path: String,
    pub limit: usize,
}

impl MessageQuery {
    pub fn latest(path: impl Into<String>, limit: usize) -> Self {
        Self {
            path: path.into(),
            limit,
        }
    }
}

/// A live subscription as handed out by the store.
///
/// Events arrive in delivery order. Initial children are delivered as `Added`.
pub struct StoreSubscription {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<ChildEvent>,
}

#[async_trait]
pub trait RealtimeStore: Send + Sync {
    /// Subscribes to added, changed and removed events for the newest `query.limit`
    /// children of `query.path`.
    async fn subscribe(&self, query: MessageQuery) -> Result<StoreSubscription, StoreError>;

    /// Stops event delivery for a subscription
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), StoreError>;

    /// Writes a new child under a store-assigned key and returns the key
    async fn push(&self, path: &str, payload: MessagePayload) -> Result<String, StoreError>;

    /// Deletes a child. Deleting a missing key succeeds.
    async fn remove(&self, path: &str, key: &str) -> Result<(), StoreError>;

    /// Reads the newest `limit` children with timestamp strictly below `boundary`,
    /// returned in ascending timestamp order
    async fn fetch_before(
        &self,
        path: &str,
        boundary: i64,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;
}
