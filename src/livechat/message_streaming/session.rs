//! Live window session.
//!
//! Owns the store subscription for one collection while a user is present and applies
//! its events to a shared [`MessageWindow`]. All window mutations happen inside one
//! short critical section each; the lock is never held across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use super::manager::MessageStreamManager;
use super::types::{UpdateTrigger, WindowSubscription, WindowUpdate};
use crate::livechat::error::{LiveChatError, Operation, Result};
use crate::livechat::message_window::{
    ChildEvent, LoadOlderOutcome, Message, MessageWindow, WindowConfig,
};
use crate::livechat::store::{MessageQuery, RealtimeStore, SubscriptionId};

/// Releases a store subscription and stops the task applying its events.
///
/// Dropping the handle stops the task; [`SubscriptionHandle::release`] additionally
/// unsubscribes at the store.
pub struct SubscriptionHandle {
    id: SubscriptionId,
    store: Arc<dyn RealtimeStore>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub async fn release(self) {
        self.task.abort();
        if let Err(e) = self.store.unsubscribe(self.id).await {
            tracing::warn!(
                target: "livechat::message_streaming::release",
                "Failed to unsubscribe {}: {}",
                self.id,
                e
            );
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct WindowState {
    window: MessageWindow,
    /// Bumped on every activation and deactivation; late results from another epoch are dropped
    epoch: u64,
    active: bool,
}

struct Shared {
    path: String,
    config: WindowConfig,
    state: Mutex<WindowState>,
    streams: MessageStreamManager,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, state: &WindowState, trigger: UpdateTrigger, key: Option<String>) {
        self.streams.emit(
            &self.path,
            WindowUpdate {
                trigger,
                key,
                messages: state.window.messages().to_vec(),
                oldest_timestamp: state.window.oldest_timestamp(),
            },
        );
    }

    /// Applies one store event if it belongs to the current epoch
    fn apply(&self, epoch: u64, event: ChildEvent) -> bool {
        let mut state = self.lock();
        if state.epoch != epoch || !state.active {
            return false;
        }
        let key = event.key().to_string();
        let trigger = match &event {
            ChildEvent::Added { .. } => UpdateTrigger::MessageAdded,
            ChildEvent::Changed { .. } => UpdateTrigger::MessageChanged,
            ChildEvent::Removed { .. } => UpdateTrigger::MessageRemoved,
        };
        if self.config.enable_debug_logging {
            tracing::debug!(
                target: "livechat::message_streaming::apply",
                "Applying {:?} for {} on {}",
                trigger,
                key,
                self.path
            );
        }
        if state.window.apply(event) {
            self.emit(&state, trigger, Some(key));
        }
        true
    }
}

/// The live, paginated message window of one collection
pub struct LiveWindow {
    store: Arc<dyn RealtimeStore>,
    shared: Arc<Shared>,
    subscription: AsyncMutex<Option<SubscriptionHandle>>,
}

impl LiveWindow {
    pub fn new(store: Arc<dyn RealtimeStore>, path: &str, config: WindowConfig) -> Self {
        Self {
            store,
            shared: Arc::new(Shared {
                path: path.to_string(),
                config,
                state: Mutex::new(WindowState {
                    window: MessageWindow::new(),
                    epoch: 0,
                    active: false,
                }),
                streams: MessageStreamManager::new(),
            }),
            subscription: AsyncMutex::new(None),
        }
    }

    pub fn path(&self) -> &str {
        &self.shared.path
    }

    pub fn is_active(&self) -> bool {
        self.shared.lock().active
    }

    /// Subscribes to the newest `page_size` messages. Activating twice is a no-op.
    pub async fn activate(&self) -> Result<()> {
        let mut subscription = self.subscription.lock().await;
        if subscription.is_some() {
            return Ok(());
        }

        let query = MessageQuery::latest(self.shared.path.clone(), self.shared.config.page_size);
        let mut store_subscription = self
            .store
            .subscribe(query)
            .await
            .map_err(|e| LiveChatError::remote(Operation::Subscribe, e))?;

        let subscription_id = store_subscription.id;
        let epoch = {
            let mut state = self.shared.lock();
            state.epoch += 1;
            state.active = true;
            state.window.clear();
            state.epoch
        };

        let shared = self.shared.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = store_subscription.events.recv().await {
                if !shared.apply(epoch, event) {
                    break;
                }
            }
            tracing::debug!(
                target: "livechat::message_streaming::activate",
                "Event loop for {} (epoch {}) finished",
                shared.path,
                epoch
            );
        });

        tracing::info!(
            target: "livechat::message_streaming::activate",
            "Subscribed to {} (subscription {}, epoch {})",
            self.shared.path,
            subscription_id,
            epoch
        );

        *subscription = Some(SubscriptionHandle {
            id: subscription_id,
            store: self.store.clone(),
            task,
        });
        Ok(())
    }

    /// Releases the subscription and clears the window. An older-page fetch still in
    /// flight will find the epoch changed and drop its result.
    pub async fn deactivate(&self) {
        let handle = self.subscription.lock().await.take();
        if let Some(handle) = handle {
            handle.release().await;
        }

        let mut state = self.shared.lock();
        if !state.active {
            return;
        }
        state.active = false;
        state.epoch += 1;
        state.window.clear();
        self.shared.emit(&state, UpdateTrigger::Cleared, None);
        tracing::info!(
            target: "livechat::message_streaming::deactivate",
            "Released window for {}",
            self.shared.path
        );
    }

    /// Fetches the page of messages just older than the oldest loaded one and merges it.
    pub async fn load_older(&self) -> Result<LoadOlderOutcome> {
        let (boundary, epoch) = {
            let mut state = self.shared.lock();
            if !state.active {
                return Ok(LoadOlderOutcome::NoBoundary);
            }
            match state.window.begin_load_older() {
                Ok(boundary) => (boundary, state.epoch),
                Err(outcome) => return Ok(outcome),
            }
        };

        let fetched = self
            .store
            .fetch_before(&self.shared.path, boundary, self.shared.config.page_size)
            .await;

        let mut state = self.shared.lock();
        if state.epoch != epoch {
            tracing::debug!(
                target: "livechat::message_streaming::load_older",
                "Dropping older page for {}, window was deactivated",
                self.shared.path
            );
            return Ok(LoadOlderOutcome::Discarded);
        }

        match fetched {
            Ok(page) => {
                let page: Vec<Message> = page
                    .into_iter()
                    .filter(|message| message.timestamp() < boundary)
                    .collect();
                let added = state.window.merge_older(page);
                self.shared.emit(&state, UpdateTrigger::OlderLoaded, None);
                Ok(LoadOlderOutcome::Merged { added })
            }
            Err(e) => {
                state.window.abort_load_older();
                Err(LiveChatError::remote(Operation::LoadOlder, e))
            }
        }
    }

    /// Current window contents, ascending by timestamp
    pub fn messages(&self) -> Vec<Message> {
        self.shared.lock().window.messages().to_vec()
    }

    pub fn oldest_timestamp(&self) -> Option<i64> {
        self.shared.lock().window.oldest_timestamp()
    }

    pub fn is_loading_older(&self) -> bool {
        self.shared.lock().window.is_loading_older()
    }

    /// Snapshot plus a receiver for every later update
    pub fn subscribe(&self) -> WindowSubscription {
        let state = self.shared.lock();
        WindowSubscription {
            initial_messages: state.window.messages().to_vec(),
            updates: self.shared.streams.subscribe(&self.shared.path),
        }
    }
}
