//! Message Window Module
//!
//! This module holds the in-memory, time-ordered view of a chat collection. It merges
//! live child events (added, changed, removed) and older pages fetched on demand into
//! one list that is always deduplicated by key and sorted ascending by timestamp.
//!
//! Everything here is synchronous. Callers that share a window across tasks wrap it in
//! a mutex and apply each event inside a single critical section.

mod types;


pub use types::{ChildEvent, LoadOlderOutcome, Message, MessagePayload, WindowConfig};

use std::collections::HashMap;

/// Sorted, deduplicated set of the messages currently materialized for display
#[derive(Debug, Clone, Default)]
pub struct MessageWindow {
    messages: Vec<Message>,
    oldest_timestamp: Option<i64>,
    loading_older: bool,
}

impl MessageWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages in ascending timestamp order
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Exclusive upper bound for the next older-page fetch
    pub fn oldest_timestamp(&self) -> Option<i64> {
        self.oldest_timestamp
    }

    pub fn is_loading_older(&self) -> bool {
        self.loading_older
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<&Message> {
        self.position(key).map(|index| &self.messages[index])
    }

    /// Applies one live event. Returns whether the window changed.
    pub fn apply(&mut self, event: ChildEvent) -> bool {
        match event {
            ChildEvent::Added { key, payload } => self.apply_added(key, payload),
            ChildEvent::Changed { key, payload } => self.apply_changed(&key, payload),
            ChildEvent::Removed { key } => self.apply_removed(&key),
        }
    }

    /// Inserts a message the store reported as added.
    ///
    /// A key that is already present means the event was delivered twice; the window is
    /// left exactly as it was.
    pub fn apply_added(&mut self, key: String, payload: MessagePayload) -> bool {
        if self.contains(&key) {
            return false;
        }
        self.messages.push(Message::new(key, payload));
        self.sort();
        self.oldest_timestamp = self.messages.first().map(Message::timestamp);
        true
    }

    /// Replaces the payload of a known message wholesale. Unknown keys are ignored.
    pub fn apply_changed(&mut self, key: &str, payload: MessagePayload) -> bool {
        let Some(index) = self.position(key) else {
            return false;
        };
        self.messages[index].payload = payload;
        self.sort();
        true
    }

    /// Drops a message. The pagination boundary is intentionally left where it was.
    pub fn apply_removed(&mut self, key: &str) -> bool {
        let before = self.messages.len();
        self.messages.retain(|message| message.id != key);
        self.messages.len() != before
    }

    /// Marks an older-page fetch as started and returns the boundary to page from.
    ///
    /// Returns `Err` with the reason when no fetch should be issued.
    pub fn begin_load_older(&mut self) -> Result<i64, LoadOlderOutcome> {
        let Some(boundary) = self.oldest_timestamp else {
            return Err(LoadOlderOutcome::NoBoundary);
        };
        if self.loading_older {
            return Err(LoadOlderOutcome::AlreadyLoading);
        }
        self.loading_older = true;
        Ok(boundary)
    }

    /// Clears the in-flight flag without touching the messages, used when a fetch fails.
    pub fn abort_load_older(&mut self) {
        self.loading_older = false;
    }

    /// Merges a fetched older page and clears the in-flight flag.
    ///
    /// Fetched messages win on key collision. The boundary moves to the minimum timestamp
    /// across the merged set, or stays put when the page was empty. Returns the number of
    /// keys that were not present before.
    pub fn merge_older(&mut self, fetched: Vec<Message>) -> usize {
        self.loading_older = false;
        if fetched.is_empty() {
            return 0;
        }

        let mut by_key: HashMap<String, Message> = self
            .messages
            .drain(..)
            .map(|message| (message.id.clone(), message))
            .collect();
        let mut added = 0;
        for message in fetched {
            if by_key.insert(message.id.clone(), message).is_none() {
                added += 1;
            }
        }

        self.messages = by_key.into_values().collect();
        self.sort();
        if let Some(first) = self.messages.first() {
            self.oldest_timestamp = Some(first.timestamp());
        }
        added
    }

    /// Forgets everything, including the boundary and the in-flight flag
    pub fn clear(&mut self) {
        self.messages.clear();
        self.oldest_timestamp = None;
        self.loading_older = false;
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.messages.iter().position(|message| message.id == key)
    }

    // Ties are broken by key so every replica renders the same order.
    fn sort(&mut self) {
        self.messages.sort_by(|a, b| {
            a.timestamp()
                .cmp(&b.timestamp())
                .then_with(|| a.id.cmp(&b.id))
        });
    }
}
