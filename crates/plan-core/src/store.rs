//! Persistent-store contract for plan documents.
//!
//! The store itself is an external collaborator (a hosted database with a
//! live-update feed); this module defines what the synchronization core
//! requires of it: keyed point lookup, keyed upsert with last-writer-wins
//! conflict handling, and a per-key change subscription. [`InMemoryStore`]
//! is a reference implementation used by tests; a directory-backed one lives
//! in the `plan-cli` crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum StoreError {
    /// No document stored under the key yet. A legitimate empty state, not
    /// a failure.
    #[error("document not found: {0}")]
    NotFound(DocKey),

    /// The store is unreachable or not set up. Fatal for the session.
    #[error("store not configured: {0}")]
    Configuration(String),

    /// Transport, permission, or schema failure on read or write.
    #[error("store error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Identifies one logical document: a user's thread, optionally narrowed to
/// a single section. The whole-plan document has no section id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocKey {
    pub user_id: u64,
    pub thread_id: String,
    pub section_id: Option<String>,
}

impl DocKey {
    /// Key for the whole-plan document of a thread.
    pub fn plan(user_id: u64, thread_id: impl Into<String>) -> Self {
        Self {
            user_id,
            thread_id: thread_id.into(),
            section_id: None,
        }
    }

    /// Key for a single section of a thread.
    pub fn section(
        user_id: u64,
        thread_id: impl Into<String>,
        section_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            thread_id: thread_id.into(),
            section_id: Some(section_id.into()),
        }
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.section_id {
            Some(section) => write!(f, "{}/{}/{}", self.user_id, self.thread_id, section),
            None => write!(f, "{}/{}", self.user_id, self.thread_id),
        }
    }
}

/// One stored document record.
///
/// `text` is the durable markdown form. `plain_text` is the secondary
/// search field derived from the tree; `agent_id` records which agent last
/// wrote the content. Both are absent for records written by producers that
/// do not supply them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub text: String,
    pub plain_text: Option<String>,
    pub agent_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A change notification delivered by the store's live-update feed.
///
/// Delivery is at-least-once: the feed may include echoes of the
/// subscriber's own writes, which the session filters out.
#[derive(Debug, Clone)]
pub struct RemoteChange {
    pub text: String,
    pub updated_at: DateTime<Utc>,
}

/// Receiving half of a change subscription.
///
/// Dropping the feed unsubscribes; [`ChangeFeed::unsubscribe`] does so
/// eagerly and is idempotent.
pub struct ChangeFeed {
    rx: mpsc::UnboundedReceiver<RemoteChange>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl ChangeFeed {
    pub fn new(
        rx: mpsc::UnboundedReceiver<RemoteChange>,
        cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            rx,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Wait for the next change. Returns `None` once unsubscribed and the
    /// channel has drained.
    pub async fn next(&mut self) -> Option<RemoteChange> {
        self.rx.recv().await
    }

    /// Stop receiving changes. Safe to call any number of times.
    pub fn unsubscribe(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
        self.rx.close();
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// What the synchronization core requires of the persistent store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch the record stored under `key`.
    async fn get(&self, key: &DocKey) -> Result<StoredDocument>;

    /// Write the record under `key`, replacing any existing one (last
    /// writer wins at document granularity).
    async fn upsert(&self, key: &DocKey, doc: StoredDocument) -> Result<()>;

    /// Subscribe to updates for `key`.
    async fn subscribe(&self, key: &DocKey) -> Result<ChangeFeed>;
}

type SubscriberMap = Arc<Mutex<HashMap<DocKey, Vec<(usize, mpsc::UnboundedSender<RemoteChange>)>>>>;

/// In-memory store for tests.
///
/// Notifies subscribers of a key on every upsert to that key, including the
/// writer's own subscription, the same echo behavior as a real live-update
/// feed.
pub struct InMemoryStore {
    documents: RwLock<HashMap<DocKey, StoredDocument>>,
    subscribers: SubscriberMap,
    next_id: AtomicUsize,
    writes: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of upserts performed, for asserting debounce and no-op
    /// suppression in tests.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get(&self, key: &DocKey) -> Result<StoredDocument> {
        let documents = self.documents.read().unwrap();
        documents
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn upsert(&self, key: &DocKey, doc: StoredDocument) -> Result<()> {
        {
            let mut documents = self.documents.write().unwrap();
            documents.insert(key.clone(), doc.clone());
        }
        self.writes.fetch_add(1, Ordering::Relaxed);

        let change = RemoteChange {
            text: doc.text,
            updated_at: doc.updated_at,
        };
        let mut subscribers = self.subscribers.lock().unwrap();
        if let Some(senders) = subscribers.get_mut(key) {
            senders.retain(|(_, tx)| tx.send(change.clone()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, key: &DocKey) -> Result<ChangeFeed> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers
            .lock()
            .unwrap()
            .entry(key.clone())
            .or_default()
            .push((id, tx));

        let subscribers = Arc::clone(&self.subscribers);
        let key = key.clone();
        Ok(ChangeFeed::new(rx, move || {
            let mut subscribers = subscribers.lock().unwrap();
            if let Some(senders) = subscribers.get_mut(&key) {
                senders.retain(|(i, _)| *i != id);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(text: &str) -> StoredDocument {
        StoredDocument {
            text: text.to_string(),
            plain_text: None,
            agent_id: None,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = InMemoryStore::new();
        let key = DocKey::plan(1, "t1");
        assert!(matches!(
            store.get(&key).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_upsert_then_get() {
        let store = InMemoryStore::new();
        let key = DocKey::section(1, "t1", "mission");

        store.upsert(&key, record("# Mission")).await.unwrap();
        let stored = store.get(&key).await.unwrap();
        assert_eq!(stored.text, "# Mission");
    }

    #[tokio::test]
    async fn test_upsert_replaces_on_key_collision() {
        let store = InMemoryStore::new();
        let key = DocKey::plan(1, "t1");

        store.upsert(&key, record("first")).await.unwrap();
        store.upsert(&key, record("second")).await.unwrap();

        assert_eq!(store.get(&key).await.unwrap().text, "second");
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_subscribe_receives_updates_for_key() {
        let store = InMemoryStore::new();
        let key = DocKey::plan(1, "t1");
        let other = DocKey::plan(2, "t2");

        let mut feed = store.subscribe(&key).await.unwrap();
        store.upsert(&other, record("unrelated")).await.unwrap();
        store.upsert(&key, record("mine")).await.unwrap();

        let change = feed.next().await.unwrap();
        assert_eq!(change.text, "mine");
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let store = InMemoryStore::new();
        let key = DocKey::plan(1, "t1");

        let mut feed = store.subscribe(&key).await.unwrap();
        feed.unsubscribe();
        feed.unsubscribe();
        drop(feed);

        // Writes after unsubscribe must not error on the dead channel.
        store.upsert(&key, record("after")).await.unwrap();
        assert!(store.subscribers.lock().unwrap()[&key].is_empty());
    }

    #[test]
    fn test_key_display() {
        assert_eq!(DocKey::plan(7, "abc").to_string(), "7/abc");
        assert_eq!(
            DocKey::section(7, "abc", "mission").to_string(),
            "7/abc/mission"
        );
    }
}
