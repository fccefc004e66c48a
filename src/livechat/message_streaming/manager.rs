//! Fan-out of window updates, one broadcast channel per collection path.
//!
//! Channels are created on first subscription. A channel whose last receiver is gone
//! is dropped on the next emit.

use dashmap::DashMap;
use tokio::sync::broadcast;

use super::types::WindowUpdate;

/// Updates a slow renderer may fall behind by before it sees `Lagged`
const CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
pub struct MessageStreamManager {
    channels: DashMap<String, broadcast::Sender<WindowUpdate>>,
}

impl MessageStreamManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, path: &str) -> broadcast::Receiver<WindowUpdate> {
        self.channels
            .entry(path.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Number of live receivers for `path`
    pub fn receiver_count(&self, path: &str) -> usize {
        self.channels
            .get(path)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Sends `update` to everyone watching `path` and returns how many receivers got it
    pub fn emit(&self, path: &str, update: WindowUpdate) -> usize {
        let delivered = match self.channels.get(path) {
            Some(sender) => sender.send(update).unwrap_or(0),
            None => return 0,
        };
        if delivered == 0 {
            self.channels
                .remove_if(path, |_, sender| sender.receiver_count() == 0);
            tracing::trace!(
                target: "livechat::message_streaming::manager",
                "No receivers left for {}, channel dropped",
                path
            );
        }
        delivered
    }
}
