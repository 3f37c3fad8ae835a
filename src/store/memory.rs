//! In-process document store
//!
//! Behaves like a single MongoDB deployment for the operations the engine
//! uses: `_id` uniqueness, `ObjectId` assignment, the implicit `_id_` index,
//! unordered bulk inserts with per-document failures. Failures can be
//! injected per collection, and every opened connection is counted so tests
//! can check that runs release what they acquire.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use mongodb::bson::{Bson, Document, doc, oid::ObjectId};
use tracing::debug;

use crate::error::{ConnectionError, Result};
use crate::model::{ID_FIELD, IndexDescriptor, PRIMARY_INDEX_NAME};

use super::{
    CollectionHandle, DocumentFailure, DocumentStore, FailureKind, StoreConnector, StoreError,
    StoreResult,
};

#[derive(Debug, Default, Clone)]
struct CollectionState {
    documents: Vec<Document>,
    indexes: Vec<IndexDescriptor>,
}

impl CollectionState {
    fn position_of(&self, id: &Bson) -> Option<usize> {
        self.documents
            .iter()
            .position(|d| d.get(ID_FIELD) == Some(id))
    }
}

#[derive(Debug, Default)]
struct ServerState {
    databases: HashMap<String, BTreeMap<String, CollectionState>>,
    failing_reads: HashSet<String>,
    failing_index_builds: HashSet<String>,
    rejected_fields: HashMap<String, String>,
    server_version: Option<String>,
}

/// Shared handle to one in-memory deployment
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<ServerState>>,
    open: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let store = Self::default();
        store.lock().server_version = Some("7.0.0-memory".to_string());
        store
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert documents directly, creating the collection if needed
    pub fn seed(&self, database: &str, collection: &str, documents: Vec<Document>) {
        let mut state = self.lock();
        let coll = state
            .databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();
        for mut document in documents {
            ensure_id(&mut document);
            coll.documents.push(document);
        }
    }

    /// Register a secondary index directly
    pub fn seed_index(&self, database: &str, collection: &str, index: IndexDescriptor) {
        let mut state = self.lock();
        state
            .databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default()
            .indexes
            .push(index);
    }

    /// Current documents of a collection, in insertion order
    pub fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
        self.lock()
            .databases
            .get(database)
            .and_then(|db| db.get(collection))
            .map(|c| c.documents.clone())
            .unwrap_or_default()
    }

    /// Secondary indexes of a collection (the implicit `_id_` excluded)
    pub fn indexes(&self, database: &str, collection: &str) -> Vec<IndexDescriptor> {
        self.lock()
            .databases
            .get(database)
            .and_then(|db| db.get(collection))
            .map(|c| c.indexes.clone())
            .unwrap_or_default()
    }

    /// Collection names of a database, sorted
    pub fn collection_names(&self, database: &str) -> Vec<String> {
        self.lock()
            .databases
            .get(database)
            .map(|db| db.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Make full reads of `collection` fail
    pub fn fail_reads(&self, collection: &str) {
        self.lock().failing_reads.insert(collection.to_string());
    }

    /// Make index creation on `collection` fail
    pub fn fail_index_builds(&self, collection: &str) {
        self.lock()
            .failing_index_builds
            .insert(collection.to_string());
    }

    /// Reject writes to `collection` of documents carrying `field`
    pub fn reject_documents_with(&self, collection: &str, field: &str) {
        self.lock()
            .rejected_fields
            .insert(collection.to_string(), field.to_string());
    }

    /// Connections currently open
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Connections opened over the store's lifetime
    pub fn connections_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn open_database(&self, name: &str) -> MemoryDatabase {
        self.open.fetch_add(1, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
        MemoryDatabase {
            store: self.clone(),
            name: name.to_string(),
            closed: AtomicBool::new(false),
        }
    }
}

/// Assign an ObjectId when `_id` is missing; a `null` `_id` is kept as a
/// literal value, as the server does
fn ensure_id(document: &mut Document) {
    if !document.contains_key(ID_FIELD) {
        let mut with_id = doc! { ID_FIELD: ObjectId::new() };
        for (key, value) in std::mem::take(document) {
            if key != ID_FIELD {
                with_id.insert(key, value);
            }
        }
        *document = with_id;
    }
}

/// Connector resolving targets to registered in-memory deployments
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    servers: HashMap<String, MemoryStore>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `store` under connection target `target`
    pub fn with_server(mut self, target: &str, store: MemoryStore) -> Self {
        self.servers.insert(target.to_string(), store);
        self
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(&self, target: &str, database: &str) -> Result<Box<dyn DocumentStore>> {
        match self.servers.get(target) {
            Some(store) => {
                debug!("Opened in-memory connection to {}/{}", target, database);
                Ok(Box::new(store.open_database(database)))
            }
            None => Err(ConnectionError::ConnectionFailed(format!("unreachable target: {target}")).into()),
        }
    }
}

/// One open connection to a database of a [`MemoryStore`]
struct MemoryDatabase {
    store: MemoryStore,
    name: String,
    closed: AtomicBool,
}

#[async_trait]
impl DocumentStore for MemoryDatabase {
    fn database_name(&self) -> &str {
        &self.name
    }

    async fn list_collection_names(&self) -> StoreResult<Vec<String>> {
        Ok(self.store.collection_names(&self.name))
    }

    fn collection(&self, name: &str) -> Box<dyn CollectionHandle> {
        Box::new(MemoryCollection {
            store: self.store.clone(),
            database: self.name.clone(),
            name: name.to_string(),
        })
    }

    async fn server_version(&self) -> Option<String> {
        self.store.lock().server_version.clone()
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.store.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

struct MemoryCollection {
    store: MemoryStore,
    database: String,
    name: String,
}

impl MemoryCollection {
    fn with_collection<T>(&self, f: impl FnOnce(&mut CollectionState, Option<&str>) -> T) -> T {
        let mut state = self.store.lock();
        let rejected = state.rejected_fields.get(&self.name).cloned();
        let coll = state
            .databases
            .entry(self.database.clone())
            .or_default()
            .entry(self.name.clone())
            .or_default();
        f(coll, rejected.as_deref())
    }

    fn existing<T>(&self, f: impl FnOnce(&CollectionState) -> T) -> Option<T> {
        let state = self.store.lock();
        state
            .databases
            .get(&self.database)
            .and_then(|db| db.get(&self.name))
            .map(f)
    }
}

/// Insert into `coll`, enforcing `_id` uniqueness and the rejection rule
fn insert_into(
    coll: &mut CollectionState,
    rejected: Option<&str>,
    document: &Document,
) -> StoreResult<()> {
    if let Some(field) = rejected
        && document.contains_key(field)
    {
        return Err(StoreError::Other(format!(
            "Document failed validation: field '{field}' is not allowed"
        )));
    }

    let mut document = document.clone();
    ensure_id(&mut document);
    if let Some(id) = document.get(ID_FIELD)
        && coll.position_of(id).is_some()
    {
        return Err(StoreError::DuplicateKey(format!(
            "E11000 duplicate key error dup key: {{ _id: {id} }}"
        )));
    }
    coll.documents.push(document);
    Ok(())
}

#[async_trait]
impl CollectionHandle for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn drop_collection(&self) -> StoreResult<()> {
        let mut state = self.store.lock();
        if let Some(db) = state.databases.get_mut(&self.database) {
            db.remove(&self.name);
        }
        Ok(())
    }

    async fn insert_many_unordered(&self, documents: &[Document]) -> StoreResult<u64> {
        if documents.is_empty() {
            return Ok(0);
        }

        self.with_collection(|coll, rejected| {
            let mut inserted = 0u64;
            let mut failures = Vec::new();
            for (index, document) in documents.iter().enumerate() {
                match insert_into(coll, rejected, document) {
                    Ok(()) => inserted += 1,
                    Err(e) => failures.push(DocumentFailure {
                        index,
                        kind: if e.is_duplicate_key() {
                            FailureKind::DuplicateKey
                        } else {
                            FailureKind::Other
                        },
                        message: e.to_string(),
                    }),
                }
            }
            if failures.is_empty() {
                Ok(inserted)
            } else {
                Err(StoreError::BulkInsert { inserted, failures })
            }
        })
    }

    async fn insert_one(&self, document: &Document) -> StoreResult<()> {
        self.with_collection(|coll, rejected| insert_into(coll, rejected, document))
    }

    async fn upsert_by_id(&self, id: &Bson, document: &Document) -> StoreResult<()> {
        self.with_collection(|coll, rejected| {
            if let Some(field) = rejected
                && document.contains_key(field)
            {
                return Err(StoreError::Other(format!(
                    "Document failed validation: field '{field}' is not allowed"
                )));
            }

            let mut replacement = doc! { ID_FIELD: id.clone() };
            for (key, value) in document {
                if key != ID_FIELD {
                    replacement.insert(key.clone(), value.clone());
                }
            }
            match coll.position_of(id) {
                Some(pos) => coll.documents[pos] = replacement,
                None => coll.documents.push(replacement),
            }
            Ok(())
        })
    }

    async fn contains_id(&self, id: &Bson) -> StoreResult<bool> {
        Ok(self
            .existing(|coll| coll.position_of(id).is_some())
            .unwrap_or(false))
    }

    async fn find_all(&self) -> StoreResult<Vec<Document>> {
        if self.store.lock().failing_reads.contains(&self.name) {
            return Err(StoreError::Other(format!(
                "cursor read failed for {}.{}",
                self.database, self.name
            )));
        }
        Ok(self
            .existing(|coll| coll.documents.clone())
            .unwrap_or_default())
    }

    async fn estimated_count(&self) -> StoreResult<u64> {
        Ok(self
            .existing(|coll| coll.documents.len() as u64)
            .unwrap_or(0))
    }

    async fn list_indexes(&self) -> StoreResult<Vec<IndexDescriptor>> {
        Ok(self
            .existing(|coll| {
                let mut all = vec![IndexDescriptor::new(
                    doc! { ID_FIELD: 1 },
                    PRIMARY_INDEX_NAME,
                    doc! { "v": 2 },
                )];
                all.extend(coll.indexes.iter().cloned());
                all
            })
            .unwrap_or_default())
    }

    async fn create_indexes(&self, indexes: &[IndexDescriptor]) -> StoreResult<()> {
        if self.store.lock().failing_index_builds.contains(&self.name) {
            return Err(StoreError::Other(format!(
                "Index build failed on {}.{}",
                self.database, self.name
            )));
        }
        self.with_collection(|coll, _| {
            for index in indexes {
                let spec = IndexDescriptor::from_spec(index.creation_spec());
                match coll
                    .indexes
                    .iter()
                    .position(|existing| existing.name() == spec.name())
                {
                    Some(pos) => coll.indexes[pos] = spec,
                    None => coll.indexes.push(spec),
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    async fn open(store: &MemoryStore) -> Box<dyn DocumentStore> {
        MemoryConnector::new()
            .with_server("mem://a", store.clone())
            .connect("mem://a", "db")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_unknown_target_fails() {
        let result = MemoryConnector::new().connect("mem://nowhere", "db").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_connection_counting() {
        let store = MemoryStore::new();
        let db = open(&store).await;
        assert_eq!(store.open_connections(), 1);
        db.close().await;
        db.close().await;
        assert_eq!(store.open_connections(), 0);
        assert_eq!(store.connections_opened(), 1);
    }

    #[tokio::test]
    async fn test_bulk_insert_reports_duplicates() {
        let store = MemoryStore::new();
        store.seed("db", "users", vec![doc! { "_id": 1, "name": "a" }]);
        let db = open(&store).await;
        let users = db.collection("users");

        let err = users
            .insert_many_unordered(&[doc! { "_id": 1 }, doc! { "_id": 2 }])
            .await
            .unwrap_err();
        match err {
            StoreError::BulkInsert { inserted, failures } => {
                assert_eq!(inserted, 1);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].index, 0);
                assert_eq!(failures[0].kind, FailureKind::DuplicateKey);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.documents("db", "users").len(), 2);
    }

    #[tokio::test]
    async fn test_insert_assigns_object_id() {
        let store = MemoryStore::new();
        let db = open(&store).await;
        assert_ok!(db.collection("c").insert_one(&doc! { "x": 1 }).await);

        let docs = store.documents("db", "c");
        assert!(matches!(docs[0].get("_id"), Some(Bson::ObjectId(_))));
        assert_eq!(docs[0].keys().next().map(String::as_str), Some("_id"));
    }

    #[tokio::test]
    async fn test_null_id_is_stored_literally() {
        let store = MemoryStore::new();
        let db = open(&store).await;
        let c = db.collection("c");
        assert_ok!(c.insert_one(&doc! { "_id": Bson::Null, "x": 1 }).await);

        let err = c
            .insert_one(&doc! { "_id": Bson::Null, "x": 2 })
            .await
            .unwrap_err();
        assert!(err.is_duplicate_key());
        assert_eq!(
            store.documents("db", "c"),
            vec![doc! { "_id": Bson::Null, "x": 1 }]
        );
    }

    #[tokio::test]
    async fn test_upsert_replaces_whole_document() {
        let store = MemoryStore::new();
        store.seed("db", "c", vec![doc! { "_id": 1, "a": 1, "b": 2 }]);
        let db = open(&store).await;
        assert_ok!(
            db.collection("c")
                .upsert_by_id(&Bson::Int32(1), &doc! { "_id": 1, "a": 9 })
                .await
        );

        assert_eq!(store.documents("db", "c"), vec![doc! { "_id": 1, "a": 9 }]);
    }

    #[tokio::test]
    async fn test_list_indexes_includes_primary() {
        let store = MemoryStore::new();
        store.seed("db", "c", vec![doc! { "_id": 1 }]);
        let db = open(&store).await;
        let indexes = db.collection("c").list_indexes().await.unwrap();
        assert_eq!(indexes.len(), 1);
        assert!(indexes[0].is_primary());

        assert!(db.collection("missing").list_indexes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_drop_missing_collection_is_ok() {
        let store = MemoryStore::new();
        let db = open(&store).await;
        assert!(db.collection("nothing").drop_collection().await.is_ok());
    }
}
