//! Document session: the synchronization coordinator for one document key.
//!
//! A session owns the live state of one document (the current tree and the
//! last text confirmed persisted) and reconciles two directions of change:
//!
//! - Local edits arrive through [`DocumentSession::apply_local_edit`]. They
//!   update the visible tree immediately and schedule a debounced save; only
//!   the last edit inside the window is ever written.
//! - Remote changes arrive through the store's change feed. They replace the
//!   visible tree unless they are an echo of the session's own write (a save
//!   is in flight or just cooled down, or the text equals what was last
//!   persisted).
//!
//! The echo rule trades a short window of missed truly-concurrent remote
//! edits for eliminating self-triggered update loops; conflicts resolve as
//! last-writer-wins at whole-document granularity.
//!
//! One session is the single logical owner of its key. Route all edits for a
//! key through one instance.

use crate::document::Node;
use crate::events::{EventBus, SessionEvent};
use crate::markdown;
use crate::store::{DocKey, DocumentStore, RemoteChange, StoreError, StoredDocument};

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Coarse session state for status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Ready,
    Saving,
}

/// Timing and identity settings for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Quiet period after the last edit before a save fires.
    pub debounce: Duration,
    /// How long after an acknowledged write remote notifications are still
    /// treated as echoes.
    pub cooldown: Duration,
    /// Agent identifier recorded on every write.
    pub agent_id: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1000),
            cooldown: Duration::from_millis(500),
            agent_id: "founder-buddy".to_string(),
        }
    }
}

struct SessionState {
    tree: Node,
    /// Markdown most recently confirmed written to or received from storage.
    last_persisted: String,
    /// True from "debounce fired" until the write settles (plus cooldown on
    /// success).
    is_persisting: bool,
    last_saved_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    /// Monotonic edit counter; a pending save only proceeds if no newer
    /// edit superseded it.
    save_seq: u64,
    pending_save: Option<JoinHandle<()>>,
}

struct Shared {
    key: DocKey,
    config: SessionConfig,
    state: Mutex<SessionState>,
    events: Arc<EventBus>,
}

/// Live synchronization state for one document key.
pub struct DocumentSession<S: DocumentStore + 'static> {
    store: Arc<S>,
    shared: Arc<Shared>,
    feed_task: Option<JoinHandle<()>>,
    found: bool,
}

impl<S: DocumentStore + 'static> DocumentSession<S> {
    /// Open a session: fetch the stored document, parse it, and subscribe
    /// to the change feed.
    ///
    /// A missing record is not an error: the session starts on an empty
    /// document and [`is_new`](Self::is_new) reports the condition so the
    /// caller can show "not yet generated".
    pub async fn open(store: Arc<S>, key: DocKey, config: SessionConfig) -> Result<Self> {
        let (tree, last_persisted, last_saved_at, found) = match store.get(&key).await {
            Ok(stored) => {
                let tree = markdown::parse(&stored.text);
                (tree, stored.text, Some(stored.updated_at), true)
            }
            Err(StoreError::NotFound(_)) => {
                debug!(key = %key, "no stored document yet; starting empty");
                (Node::empty_doc(), String::new(), None, false)
            }
            Err(e) => return Err(e.into()),
        };

        let shared = Arc::new(Shared {
            key: key.clone(),
            config,
            state: Mutex::new(SessionState {
                tree,
                last_persisted,
                is_persisting: false,
                last_saved_at,
                last_error: None,
                save_seq: 0,
                pending_save: None,
            }),
            events: Arc::new(EventBus::new()),
        });

        let mut feed = store.subscribe(&key).await?;
        let feed_shared = Arc::clone(&shared);
        let feed_task = tokio::spawn(async move {
            while let Some(change) = feed.next().await {
                apply_remote(&feed_shared, change);
            }
        });

        Ok(Self {
            store,
            shared,
            feed_task: Some(feed_task),
            found,
        })
    }

    /// Replace the visible tree with an edited one and schedule a save.
    ///
    /// Synchronous: the tree is visible to [`document`](Self::document)
    /// before this returns. Rapid edits coalesce: each call cancels the
    /// previous debounce timer, so only the last tree in a quiet window is
    /// persisted. Must be called from within the tokio runtime.
    pub fn apply_local_edit(&self, tree: Node) {
        let mut st = self.shared.state.lock().unwrap();
        st.tree = tree;
        st.save_seq += 1;
        let seq = st.save_seq;
        if let Some(pending) = st.pending_save.take() {
            pending.abort();
        }

        let shared = Arc::clone(&self.shared);
        let store = Arc::clone(&self.store);
        st.pending_save = Some(tokio::spawn(async move {
            tokio::time::sleep(shared.config.debounce).await;
            persist(shared, store, seq).await;
        }));
    }

    /// Apply a change notification from the store's feed.
    ///
    /// Called internally by the subscription task; exposed so alternate
    /// delivery paths can drive the same filters. Drops the change when a
    /// save is in flight (presumed echo of our own write) or when the text
    /// matches what was last persisted.
    pub fn apply_remote_change(&self, change: RemoteChange) {
        apply_remote(&self.shared, change);
    }

    /// Snapshot of the current tree.
    pub fn document(&self) -> Node {
        self.shared.state.lock().unwrap().tree.clone()
    }

    pub fn key(&self) -> &DocKey {
        &self.shared.key
    }

    /// True when the store had no content for this key at open time.
    pub fn is_new(&self) -> bool {
        !self.found
    }

    pub fn status(&self) -> SessionStatus {
        if self.shared.state.lock().unwrap().is_persisting {
            SessionStatus::Saving
        } else {
            SessionStatus::Ready
        }
    }

    pub fn last_saved_at(&self) -> Option<DateTime<Utc>> {
        self.shared.state.lock().unwrap().last_saved_at
    }

    /// Message of the most recent failed save, cleared when a later save
    /// succeeds.
    pub fn last_error(&self) -> Option<String> {
        self.shared.state.lock().unwrap().last_error.clone()
    }

    /// Bus for [`SessionEvent`] notifications.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.shared.events
    }

    /// Cancel any pending save, release the subscription, and discard the
    /// in-memory state. Unsaved edits inside the debounce window are
    /// dropped, matching a closed editor view.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let mut st = self.shared.state.lock().unwrap();
        // Invalidate any save task that already left its sleep.
        st.save_seq += 1;
        if let Some(pending) = st.pending_save.take() {
            pending.abort();
        }
        drop(st);

        if let Some(feed) = self.feed_task.take() {
            feed.abort();
        }
    }
}

impl<S: DocumentStore + 'static> Drop for DocumentSession<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn apply_remote(shared: &Shared, change: RemoteChange) {
    let mut st = shared.state.lock().unwrap();
    if st.is_persisting {
        debug!(key = %shared.key, "dropping remote change; save in flight");
        return;
    }
    if change.text == st.last_persisted {
        debug!(key = %shared.key, "dropping remote change; content unchanged");
        return;
    }

    st.tree = markdown::parse(&change.text);
    st.last_persisted = change.text;
    st.last_saved_at = Some(change.updated_at);
    drop(st);

    shared.events.emit(SessionEvent::RemoteApplied {
        updated_at: change.updated_at,
    });
}

async fn persist<S: DocumentStore>(shared: Arc<Shared>, store: Arc<S>, seq: u64) {
    let (text, plain_text) = {
        let mut st = shared.state.lock().unwrap();
        if st.save_seq != seq {
            // A newer edit rescheduled the save.
            return;
        }
        st.pending_save = None;

        let text = markdown::serialize(&st.tree);
        if text == st.last_persisted {
            debug!(key = %shared.key, "skipping save; content unchanged");
            return;
        }
        st.is_persisting = true;
        st.last_error = None;
        (text, st.tree.plain_text())
    };

    let updated_at = Utc::now();
    let record = StoredDocument {
        text: text.clone(),
        plain_text: Some(plain_text),
        agent_id: Some(shared.config.agent_id.clone()),
        updated_at,
    };

    match store.upsert(&shared.key, record).await {
        Ok(()) => {
            debug!(key = %shared.key, bytes = text.len(), "saved");
            {
                let mut st = shared.state.lock().unwrap();
                st.last_persisted = text;
                st.last_saved_at = Some(updated_at);
            }
            shared.events.emit(SessionEvent::Saved { updated_at });

            // Keep treating feed notifications as echoes for a short spell
            // after the acknowledgement.
            tokio::time::sleep(shared.config.cooldown).await;
            shared.state.lock().unwrap().is_persisting = false;
        }
        Err(e) => {
            warn!(key = %shared.key, error = %e, "save failed");
            {
                let mut st = shared.state.lock().unwrap();
                st.is_persisting = false;
                st.last_error = Some(e.to_string());
                // last_persisted stays put so the next edit retries the
                // write.
            }
            shared.events.emit(SessionEvent::SaveFailed {
                message: e.to_string(),
            });
        }
    }
}
