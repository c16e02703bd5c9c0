//! plan-cli: headless tools for a directory-backed plan document store.
//!
//! Provides a `DocumentStore` implementation over plain markdown files (one
//! file per document key, with a small metadata header) and a CLI for
//! converting documents and following live changes.

pub mod file_store;

pub use file_store::FileStore;
