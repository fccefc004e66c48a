//! In-process implementation of [`RealtimeStore`].
//!
//! Children of a path are ordered by `(timestamp, key)`. Each subscriber sees the newest
//! `limit` children; when a write pushes a child out of that window the subscriber gets
//! a `Removed` event for it, and a `Added` event when a delete lets one back in.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

use super::{MessageQuery, RealtimeStore, StoreError, StoreSubscription, SubscriptionId};
use crate::livechat::message_window::{ChildEvent, Message, MessagePayload};

struct Listener {
    query: MessageQuery,
    sender: mpsc::UnboundedSender<ChildEvent>,
    visible: HashSet<String>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, HashMap<String, MessagePayload>>,
    listeners: HashMap<SubscriptionId, Listener>,
    next_subscription_id: SubscriptionId,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    offline: AtomicBool,
    fetch_gate: Mutex<Option<Arc<Notify>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every operation fails with [`StoreError::Unavailable`]
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes subsequent `fetch_before` calls wait until the returned [`Notify`] fires.
    /// Each fetch consumes one notification.
    pub fn gate_fetches(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self
            .fetch_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(notify.clone());
        notify
    }

    /// Writes `payload` under an explicit key, creating or replacing the child.
    /// Replacing an existing child is delivered to subscribers as `Changed`.
    pub fn set(&self, path: &str, key: &str, payload: MessagePayload) -> Result<(), StoreError> {
        self.ensure_online()?;
        let mut inner = self.lock();
        inner
            .collections
            .entry(path.to_string())
            .or_default()
            .insert(key.to_string(), payload);
        inner.notify_path(path, Some(key));
        Ok(())
    }

    /// Number of live subscriptions, mostly useful to verify teardown
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.listeners.retain(|_, listener| !listener.sender.is_closed());
        inner.listeners.len()
    }

    /// Number of children stored under `path`
    pub fn len(&self, path: &str) -> usize {
        self.lock()
            .collections
            .get(path)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, path: &str) -> bool {
        self.len(path) == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        Ok(())
    }
}

impl Inner {
    /// Keys of the newest `limit` children of `path`, ascending
    fn newest_keys(&self, path: &str, limit: usize) -> Vec<String> {
        let Some(children) = self.collections.get(path) else {
            return Vec::new();
        };
        let mut ordered: Vec<(&String, &MessagePayload)> = children.iter().collect();
        ordered.sort_by(|(ka, a), (kb, b)| a.timestamp.cmp(&b.timestamp).then_with(|| ka.cmp(kb)));
        let skip = ordered.len().saturating_sub(limit);
        ordered
            .into_iter()
            .skip(skip)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Diffs every listener of `path` against the current children and sends the delta.
    /// `touched` is the key whose payload was written, if any.
    fn notify_path(&mut self, path: &str, touched: Option<&str>) {
        let ids: Vec<SubscriptionId> = self
            .listeners
            .iter()
            .filter(|(_, listener)| listener.query.path == path)
            .map(|(id, _)| *id)
            .collect();

        for id in ids {
            let limit = self.listeners[&id].query.limit;
            let newest = self.newest_keys(path, limit);
            let now_visible: HashSet<String> = newest.iter().cloned().collect();
            let children = self.collections.get(path);

            let Some(listener) = self.listeners.get_mut(&id) else {
                continue;
            };

            let mut events = Vec::new();
            for key in listener.visible.difference(&now_visible) {
                events.push(ChildEvent::Removed { key: key.clone() });
            }
            for key in &newest {
                let Some(payload) = children.and_then(|c| c.get(key)) else {
                    continue;
                };
                if !listener.visible.contains(key) {
                    events.push(ChildEvent::Added {
                        key: key.clone(),
                        payload: payload.clone(),
                    });
                } else if touched == Some(key.as_str()) {
                    events.push(ChildEvent::Changed {
                        key: key.clone(),
                        payload: payload.clone(),
                    });
                }
            }
            listener.visible = now_visible;

            let delivered = events
                .into_iter()
                .all(|event| listener.sender.send(event).is_ok());
            if !delivered {
                tracing::debug!(
                    target: "livechat::store::memory",
                    "Dropping subscription {} whose receiver is gone",
                    id
                );
                self.listeners.remove(&id);
            }
        }
    }
}

#[async_trait]
impl RealtimeStore for InMemoryStore {
    async fn subscribe(&self, query: MessageQuery) -> Result<StoreSubscription, StoreError> {
        self.ensure_online()?;
        let (sender, events) = mpsc::unbounded_channel();
        let mut inner = self.lock();

        let newest = inner.newest_keys(&query.path, query.limit);
        if let Some(children) = inner.collections.get(&query.path) {
            for key in &newest {
                if let Some(payload) = children.get(key) {
                    // The receiver is still in scope, so this cannot fail
                    let _ = sender.send(ChildEvent::Added {
                        key: key.clone(),
                        payload: payload.clone(),
                    });
                }
            }
        }

        inner.next_subscription_id += 1;
        let id = inner.next_subscription_id;
        inner.listeners.insert(
            id,
            Listener {
                query,
                sender,
                visible: newest.into_iter().collect(),
            },
        );

        Ok(StoreSubscription { id, events })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), StoreError> {
        self.lock()
            .listeners
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::SubscriptionNotFound(id))
    }

    async fn push(&self, path: &str, payload: MessagePayload) -> Result<String, StoreError> {
        self.ensure_online()?;
        let key = Uuid::new_v4().simple().to_string();
        let mut inner = self.lock();
        inner
            .collections
            .entry(path.to_string())
            .or_default()
            .insert(key.clone(), payload);
        inner.notify_path(path, None);
        Ok(key)
    }

    async fn remove(&self, path: &str, key: &str) -> Result<(), StoreError> {
        self.ensure_online()?;
        let mut inner = self.lock();
        let removed = inner
            .collections
            .get_mut(path)
            .and_then(|children| children.remove(key))
            .is_some();
        if removed {
            inner.notify_path(path, None);
        }
        Ok(())
    }

    async fn fetch_before(
        &self,
        path: &str,
        boundary: i64,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let gate = self
            .fetch_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.ensure_online()?;

        let inner = self.lock();
        let Some(children) = inner.collections.get(path) else {
            return Ok(Vec::new());
        };
        let mut older: Vec<Message> = children
            .iter()
            .filter(|(_, payload)| payload.timestamp < boundary)
            .map(|(key, payload)| Message::new(key.clone(), payload.clone()))
            .collect();
        older.sort_by(|a, b| {
            a.timestamp()
                .cmp(&b.timestamp())
                .then_with(|| a.id.cmp(&b.id))
        });
        let skip = older.len().saturating_sub(limit);
        Ok(older.split_off(skip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATH: &str = "messages";

    fn payload(text: &str, timestamp: i64) -> MessagePayload {
        MessagePayload {
            text: text.to_string(),
            owner: "alice@example.com".to_string(),
            owner_uid: Some("uid-alice".to_string()),
            owner_email: Some("alice@example.com".to_string()),
            timestamp,
        }
    }

    fn drain(subscription: &mut StoreSubscription) -> Vec<ChildEvent> {
        let mut events = Vec::new();
        while let Ok(event) = subscription.events.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn subscribe_delivers_newest_children_as_added() {
        let store = InMemoryStore::new();
        for ts in 1..=5 {
            store.push(PATH, payload("m", ts)).await.unwrap();
        }

        let mut subscription = store.subscribe(MessageQuery::latest(PATH, 3)).await.unwrap();
        let events = drain(&mut subscription);

        assert_eq!(events.len(), 3);
        let timestamps: Vec<i64> = events
            .iter()
            .map(|event| match event {
                ChildEvent::Added { payload, .. } => payload.timestamp,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(timestamps, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn push_beyond_limit_evicts_oldest() {
        let store = InMemoryStore::new();
        let first = store.push(PATH, payload("a", 1)).await.unwrap();
        store.push(PATH, payload("b", 2)).await.unwrap();

        let mut subscription = store.subscribe(MessageQuery::latest(PATH, 2)).await.unwrap();
        drain(&mut subscription);

        let third = store.push(PATH, payload("c", 3)).await.unwrap();
        let events = drain(&mut subscription);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ChildEvent::Removed { key: first });
        assert_eq!(events[1].key(), third);
    }

    #[tokio::test]
    async fn set_existing_child_emits_changed() {
        let store = InMemoryStore::new();
        let key = store.push(PATH, payload("a", 1)).await.unwrap();
        let mut subscription = store.subscribe(MessageQuery::latest(PATH, 10)).await.unwrap();
        drain(&mut subscription);

        store.set(PATH, &key, payload("edited", 1)).unwrap();

        let events = drain(&mut subscription);
        assert_eq!(
            events,
            vec![ChildEvent::Changed {
                key,
                payload: payload("edited", 1)
            }]
        );
    }

    #[tokio::test]
    async fn fetch_before_is_exclusive_and_limited() {
        let store = InMemoryStore::new();
        for ts in 1..=10 {
            store.push(PATH, payload("m", ts)).await.unwrap();
        }

        let page = store.fetch_before(PATH, 8, 3).await.unwrap();
        let timestamps: Vec<i64> = page.iter().map(Message::timestamp).collect();

        assert_eq!(timestamps, vec![5, 6, 7]);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let store = InMemoryStore::new();
        let mut subscription = store.subscribe(MessageQuery::latest(PATH, 10)).await.unwrap();
        store.unsubscribe(subscription.id).await.unwrap();

        store.push(PATH, payload("a", 1)).await.unwrap();

        assert!(drain(&mut subscription).is_empty());
        assert_eq!(store.subscriber_count(), 0);
        assert!(matches!(
            store.unsubscribe(subscription.id).await,
            Err(StoreError::SubscriptionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn offline_store_rejects_writes() {
        let store = InMemoryStore::new();
        store.set_offline(true);

        let result = store.push(PATH, payload("a", 1)).await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert!(store.is_empty(PATH));
    }
}
