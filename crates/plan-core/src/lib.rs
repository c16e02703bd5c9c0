//! plan-core: document synchronization core for the plan authoring tool.
//!
//! This crate provides the pieces that keep a rich-text plan document and
//! its stored markdown form in step while several viewers watch it live:
//! - The structured document tree and its JSON form
//! - Markdown serialization and (lossy, total) parsing
//! - Plain-text extraction for the secondary search field
//! - The `DocumentStore` collaborator contract and change feed
//! - `DocumentSession`: debounced persistence with echo suppression

pub mod document;
pub mod events;
pub mod markdown;
pub mod session;
pub mod store;

pub use document::Node;
pub use events::{EventBus, SessionEvent, Subscription};
pub use session::{DocumentSession, SessionConfig, SessionError, SessionStatus};
pub use store::{
    ChangeFeed, DocKey, DocumentStore, InMemoryStore, RemoteChange, StoreError, StoredDocument,
};
