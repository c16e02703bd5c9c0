//! Directory-backed document store.
//!
//! Each document key maps to one markdown file under the root:
//! `{user_id}/{thread_id}/{section_id}.md`, with `business-plan.md` for the
//! whole-plan document. Record metadata (writer agent, update time) rides in
//! a small `---`-delimited YAML header above the markdown body. The change
//! feed is a debounced filesystem watcher, so edits made by any other
//! process (or another store handle) show up as remote changes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notify::RecursiveMode;
use notify_debouncer_mini::{DebouncedEvent, new_debouncer};
use plan_core::store::{
    ChangeFeed, DocKey, DocumentStore, RemoteChange, Result, StoreError, StoredDocument,
};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Debounce period for the filesystem watcher.
const WATCH_DEBOUNCE: Duration = Duration::from_millis(200);

/// Metadata header stored above the markdown body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FileMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

/// Store over a directory of markdown files.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open a store rooted at an existing directory.
    pub fn open(root: PathBuf) -> Result<Self> {
        if !root.is_dir() {
            return Err(StoreError::Configuration(format!(
                "document root {} is not a directory",
                root.display()
            )));
        }
        // Resolve symlinks so watcher event paths compare equal to ours.
        let root = root.canonicalize().unwrap_or(root);
        Ok(Self { root })
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn path_for(&self, key: &DocKey) -> PathBuf {
        let name = key.section_id.as_deref().unwrap_or("business-plan");
        self.root
            .join(key.user_id.to_string())
            .join(&key.thread_id)
            .join(format!("{name}.md"))
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn get(&self, key: &DocKey) -> Result<StoredDocument> {
        let path = self.path_for(key);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.clone()));
            }
            Err(e) => return Err(StoreError::Backend(e.to_string())),
        };

        let (meta, body) = split_header(&raw);
        let updated_at = match meta.updated_at {
            Some(at) => at,
            None => file_mtime(&path).await.unwrap_or_else(Utc::now),
        };

        Ok(StoredDocument {
            text: body,
            plain_text: None,
            agent_id: meta.agent_id,
            updated_at,
        })
    }

    async fn upsert(&self, key: &DocKey, doc: StoredDocument) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }

        let rendered = render(&doc);
        fs::write(&path, rendered)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        debug!(key = %key, path = %path.display(), "wrote document");
        Ok(())
    }

    async fn subscribe(&self, key: &DocKey) -> Result<ChangeFeed> {
        let target = self.path_for(key);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut debouncer = new_debouncer(
            WATCH_DEBOUNCE,
            move |result: std::result::Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    for event in events {
                        if event.path != target {
                            continue;
                        }
                        let raw = match std::fs::read_to_string(&event.path) {
                            Ok(raw) => raw,
                            Err(e) => {
                                debug!(path = %event.path.display(), error = %e, "skipping unreadable change");
                                continue;
                            }
                        };
                        let (meta, body) = split_header(&raw);
                        let updated_at = meta
                            .updated_at
                            .or_else(|| {
                                std::fs::metadata(&event.path)
                                    .and_then(|m| m.modified())
                                    .map(DateTime::<Utc>::from)
                                    .ok()
                            })
                            .unwrap_or_else(Utc::now);
                        let change = RemoteChange {
                            text: body,
                            updated_at,
                        };
                        if tx.send(change).is_err() {
                            // Receiver dropped; the feed is gone.
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "file watcher error");
                }
            },
        )
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        // Watch the whole root: the document's directories may not exist
        // until the first write.
        debouncer
            .watcher()
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(ChangeFeed::new(rx, move || drop(debouncer)))
    }
}

/// Split a raw file into its metadata header and markdown body.
///
/// Files without a `---` header (or with an unparseable one) yield default
/// metadata; the body is whatever remains after the delimited block.
fn split_header(raw: &str) -> (FileMeta, String) {
    if !raw.starts_with("---") {
        return (FileMeta::default(), raw.to_string());
    }

    let rest = &raw[3..];
    match rest.find("\n---") {
        Some(pos) => {
            let header = rest[..pos].trim();
            let body = rest[pos + 4..].trim_start_matches('\n').to_string();
            let meta = serde_yaml::from_str::<FileMeta>(header).unwrap_or_default();
            (meta, body)
        }
        None => (FileMeta::default(), raw.to_string()),
    }
}

fn render(doc: &StoredDocument) -> String {
    let meta = FileMeta {
        agent_id: doc.agent_id.clone(),
        updated_at: Some(doc.updated_at),
    };
    let header = serde_yaml::to_string(&meta).unwrap_or_default();
    format!("---\n{}---\n\n{}", header, doc.text)
}

async fn file_mtime(path: &PathBuf) -> Option<DateTime<Utc>> {
    let metadata = fs::metadata(path).await.ok()?;
    let modified = metadata.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(text: &str) -> StoredDocument {
        StoredDocument {
            text: text.to_string(),
            plain_text: Some("ignored".to_string()),
            agent_id: Some("founder-buddy".to_string()),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_open_requires_directory() {
        let result = FileStore::open(PathBuf::from("/definitely/not/here"));
        assert!(matches!(result, Err(StoreError::Configuration(_))));
    }

    #[test]
    fn test_key_to_path_mapping() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().to_path_buf()).unwrap();

        let section = store.path_for(&DocKey::section(3, "thread-9", "mission"));
        assert!(section.ends_with("3/thread-9/mission.md"));

        let plan = store.path_for(&DocKey::plan(3, "thread-9"));
        assert!(plan.ends_with("3/thread-9/business-plan.md"));
    }

    #[test]
    fn test_split_header_round_trip() {
        let doc = record("# Mission\n\nBuild tools.");
        let (meta, body) = split_header(&render(&doc));
        assert_eq!(meta.agent_id.as_deref(), Some("founder-buddy"));
        assert!(meta.updated_at.is_some());
        assert_eq!(body, "# Mission\n\nBuild tools.");
    }

    #[test]
    fn test_split_header_without_header() {
        let (meta, body) = split_header("just markdown");
        assert!(meta.agent_id.is_none());
        assert_eq!(body, "just markdown");
    }

    #[test]
    fn test_split_header_unclosed_delimiter() {
        let raw = "--- looks like a rule\ntext";
        let (meta, body) = split_header(raw);
        assert!(meta.updated_at.is_none());
        assert_eq!(body, raw);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().to_path_buf()).unwrap();
        let result = store.get(&DocKey::plan(1, "t1")).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_upsert_then_get() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().to_path_buf()).unwrap();
        let key = DocKey::section(1, "t1", "idea");

        store.upsert(&key, record("## Idea\n\nShip.")).await.unwrap();
        let stored = store.get(&key).await.unwrap();

        assert_eq!(stored.text, "## Idea\n\nShip.");
        assert_eq!(stored.agent_id.as_deref(), Some("founder-buddy"));
    }

    #[tokio::test]
    async fn test_subscribe_sees_external_write() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().to_path_buf()).unwrap();
        let key = DocKey::plan(1, "t1");

        // The file must exist before the watcher can report a change to it.
        store.upsert(&key, record("before")).await.unwrap();
        let mut feed = store.subscribe(&key).await.unwrap();

        // Simulate another process editing the file directly.
        let path = store.path_for(&key);
        std::fs::write(&path, "after").unwrap();

        let change = tokio::time::timeout(Duration::from_secs(5), feed.next())
            .await
            .expect("watcher delivered no change")
            .expect("feed closed");
        assert_eq!(change.text, "after");
    }
}
