//! Document store abstraction
//!
//! The engine never talks to the MongoDB driver directly. It sees a store as
//! three traits:
//!
//! 1. **StoreConnector**: opens a store for one run from a connection target
//! 2. **DocumentStore**: one open database; enumerates and hands out collections
//! 3. **CollectionHandle**: the per-collection reads and writes the engine needs
//!
//! `mongo` implements them on the official driver; `memory` implements them
//! in process for tests and dry runs.

use std::fmt;

use async_trait::async_trait;
use mongodb::bson::{Bson, Document};

use crate::error::Result;
use crate::model::IndexDescriptor;

pub mod memory;
pub mod mongo;

pub use memory::{MemoryConnector, MemoryStore};
pub use mongo::{MongoConnector, MongoStore};

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Kind of a per-document write failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Identifier (or other unique key) already present
    DuplicateKey,
    /// Anything else
    Other,
}

/// One document rejected by a bulk insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFailure {
    /// Position of the document within the submitted batch
    pub index: usize,
    pub kind: FailureKind,
    pub message: String,
}

/// Errors reported by a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A single write collided with an existing identifier
    DuplicateKey(String),

    /// An unordered bulk insert where some documents were rejected.
    /// Every document not listed in `failures` was inserted.
    BulkInsert {
        inserted: u64,
        failures: Vec<DocumentFailure>,
    },

    /// The collection does not exist
    NamespaceNotFound(String),

    /// Any other failure
    Other(String),
}

impl StoreError {
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StoreError::DuplicateKey(_))
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::DuplicateKey(msg) => write!(f, "Duplicate key: {msg}"),
            StoreError::BulkInsert { inserted, failures } => write!(
                f,
                "Bulk insert partially failed: {} inserted, {} rejected",
                inserted,
                failures.len()
            ),
            StoreError::NamespaceNotFound(ns) => write!(f, "Namespace not found: {ns}"),
            StoreError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Per-collection operations used by the engine
#[async_trait]
pub trait CollectionHandle: Send + Sync {
    /// Collection name
    fn name(&self) -> &str;

    /// Drop the collection; a missing collection is not an error
    async fn drop_collection(&self) -> StoreResult<()>;

    /// Unordered bulk insert. Returns the inserted count on full success,
    /// `StoreError::BulkInsert` when some documents were rejected.
    async fn insert_many_unordered(&self, documents: &[Document]) -> StoreResult<u64>;

    /// Insert one document
    async fn insert_one(&self, document: &Document) -> StoreResult<()>;

    /// Replace the document with identifier `id`, inserting it if absent
    async fn upsert_by_id(&self, id: &Bson, document: &Document) -> StoreResult<()>;

    /// Whether a document with identifier `id` exists
    async fn contains_id(&self, id: &Bson) -> StoreResult<bool>;

    /// Read every document
    async fn find_all(&self) -> StoreResult<Vec<Document>>;

    /// Metadata-based document count
    async fn estimated_count(&self) -> StoreResult<u64>;

    /// Index descriptors, primary index included
    async fn list_indexes(&self) -> StoreResult<Vec<IndexDescriptor>>;

    /// Create indexes in one bulk operation
    async fn create_indexes(&self, indexes: &[IndexDescriptor]) -> StoreResult<()>;
}

/// One open database
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Database name
    fn database_name(&self) -> &str;

    /// Names of every collection in the database
    async fn list_collection_names(&self) -> StoreResult<Vec<String>>;

    /// Handle to a collection (no round trip)
    fn collection(&self, name: &str) -> Box<dyn CollectionHandle>;

    /// Server version string, if the store reports one
    async fn server_version(&self) -> Option<String>;

    /// Release the connection. Called exactly once per opened store.
    async fn close(&self);
}

/// Opens stores for a run
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Connect to `target` and select `database`
    async fn connect(&self, target: &str, database: &str) -> Result<Box<dyn DocumentStore>>;
}
