//! MongoDB implementation of the store traits
//!
//! Driver errors are classified here, once, into [`StoreError`] so the
//! engine can reason about duplicate keys without knowing driver types.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{Bson, Document, doc};
use mongodb::{Client, Collection, Database};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::connection::{ConnectionManager, sanitize_uri};
use crate::error::mongo::{
    NAMESPACE_NOT_FOUND, extract_error_info, extract_insert_many_failures, is_duplicate_key_code,
};
use crate::error::{Result, TransferError};
use crate::model::{ID_FIELD, IndexDescriptor};

use super::{
    CollectionHandle, DocumentFailure, DocumentStore, FailureKind, StoreConnector, StoreError,
    StoreResult,
};

/// Classify a driver error
fn classify(error: mongodb::error::Error) -> StoreError {
    let info = extract_error_info(&error);
    match info.code() {
        Some(code) if is_duplicate_key_code(code) => StoreError::DuplicateKey(info.message()),
        Some(NAMESPACE_NOT_FOUND) => StoreError::NamespaceNotFound(info.message()),
        _ => StoreError::Other(error.to_string()),
    }
}

/// Opens a [`MongoStore`] per run
#[derive(Debug, Clone, Default)]
pub struct MongoConnector {
    config: ConnectionConfig,
}

impl MongoConnector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StoreConnector for MongoConnector {
    async fn connect(&self, target: &str, database: &str) -> Result<Box<dyn DocumentStore>> {
        debug!("Connecting to {}", sanitize_uri(target));
        let mut manager = ConnectionManager::new(target.to_string(), self.config.clone());
        manager.connect().await?;
        let client = manager.get_client()?.clone();
        let db = manager.get_database(database)?;
        Ok(Box::new(MongoStore {
            manager: Mutex::new(manager),
            client,
            db,
        }))
    }
}

/// One connected MongoDB database
pub struct MongoStore {
    manager: Mutex<ConnectionManager>,
    client: Client,
    db: Database,
}

#[async_trait]
impl DocumentStore for MongoStore {
    fn database_name(&self) -> &str {
        self.db.name()
    }

    async fn list_collection_names(&self) -> StoreResult<Vec<String>> {
        self.db.list_collection_names().await.map_err(classify)
    }

    fn collection(&self, name: &str) -> Box<dyn CollectionHandle> {
        Box::new(MongoCollection {
            name: name.to_string(),
            inner: self.db.collection::<Document>(name),
            db: self.db.clone(),
        })
    }

    async fn server_version(&self) -> Option<String> {
        let manager = self.manager.lock().await;
        match manager.get_server_version(&self.client).await {
            Ok(version) => Some(version),
            Err(e) => {
                warn!("Could not read server version: {}", e);
                None
            }
        }
    }

    async fn close(&self) {
        let mut manager = self.manager.lock().await;
        if let Err(e) = manager.disconnect().await {
            warn!("Error while disconnecting: {}", e);
        }
    }
}

/// Driver-backed collection handle
struct MongoCollection {
    name: String,
    inner: Collection<Document>,
    db: Database,
}

#[async_trait]
impl CollectionHandle for MongoCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn drop_collection(&self) -> StoreResult<()> {
        match self.inner.drop().await.map_err(classify) {
            Ok(()) | Err(StoreError::NamespaceNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn insert_many_unordered(&self, documents: &[Document]) -> StoreResult<u64> {
        if documents.is_empty() {
            return Ok(0);
        }

        match self.inner.insert_many(documents).ordered(false).await {
            Ok(result) => Ok(result.inserted_ids.len() as u64),
            Err(e) => match extract_insert_many_failures(&e) {
                Some(raw) if !raw.is_empty() => {
                    let failures: Vec<DocumentFailure> = raw
                        .into_iter()
                        .map(|f| DocumentFailure {
                            index: f.index,
                            kind: if is_duplicate_key_code(f.code) {
                                FailureKind::DuplicateKey
                            } else {
                                FailureKind::Other
                            },
                            message: f.message,
                        })
                        .collect();
                    let inserted = documents.len().saturating_sub(failures.len()) as u64;
                    Err(StoreError::BulkInsert { inserted, failures })
                }
                _ => Err(classify(e)),
            },
        }
    }

    async fn insert_one(&self, document: &Document) -> StoreResult<()> {
        self.inner
            .insert_one(document)
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn upsert_by_id(&self, id: &Bson, document: &Document) -> StoreResult<()> {
        self.inner
            .replace_one(doc! { ID_FIELD: id.clone() }, document)
            .upsert(true)
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn contains_id(&self, id: &Bson) -> StoreResult<bool> {
        let found = self
            .inner
            .find_one(doc! { ID_FIELD: id.clone() })
            .projection(doc! { ID_FIELD: 1 })
            .await
            .map_err(classify)?;
        Ok(found.is_some())
    }

    async fn find_all(&self) -> StoreResult<Vec<Document>> {
        let cursor = self.inner.find(doc! {}).await.map_err(classify)?;
        cursor.try_collect().await.map_err(classify)
    }

    async fn estimated_count(&self) -> StoreResult<u64> {
        self.inner
            .estimated_document_count()
            .await
            .map_err(classify)
    }

    /// Index specifications exactly as the server reports them.
    ///
    /// Runs the raw `listIndexes` command so options the driver does not
    /// model survive. Follow-up batches stay on the same session as the
    /// cursor.
    async fn list_indexes(&self) -> StoreResult<Vec<IndexDescriptor>> {
        let mut session = self.db.client().start_session().await.map_err(classify)?;
        let reply = match self
            .db
            .run_command(doc! { "listIndexes": self.name.as_str() })
            .session(&mut session)
            .await
            .map_err(classify)
        {
            Ok(reply) => reply,
            Err(StoreError::NamespaceNotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let (mut specs, mut cursor_id) = cursor_batch(&reply, "firstBatch")?;
        while cursor_id != 0 {
            let reply = self
                .db
                .run_command(doc! { "getMore": cursor_id, "collection": self.name.as_str() })
                .session(&mut session)
                .await
                .map_err(classify)?;
            let (batch, next) = cursor_batch(&reply, "nextBatch")?;
            specs.extend(batch);
            cursor_id = next;
        }
        Ok(specs.into_iter().map(IndexDescriptor::from_spec).collect())
    }

    /// Creates every descriptor in one raw `createIndexes` command
    async fn create_indexes(&self, indexes: &[IndexDescriptor]) -> StoreResult<()> {
        if indexes.is_empty() {
            return Ok(());
        }
        let entries = indexes
            .iter()
            .map(|i| {
                i.create_command_entry()
                    .map(Bson::Document)
                    .map_err(to_store_error)
            })
            .collect::<StoreResult<Vec<_>>>()?;
        self.db
            .run_command(doc! { "createIndexes": self.name.as_str(), "indexes": entries })
            .await
            .map(|_| ())
            .map_err(classify)
    }
}

/// Documents and cursor id from a command cursor reply
fn cursor_batch(reply: &Document, batch_field: &str) -> StoreResult<(Vec<Document>, i64)> {
    let cursor = reply
        .get_document("cursor")
        .map_err(|e| StoreError::Other(format!("malformed cursor reply: {e}")))?;
    let cursor_id = match cursor.get("id") {
        Some(Bson::Int64(id)) => *id,
        Some(Bson::Int32(id)) => i64::from(*id),
        _ => 0,
    };
    let batch = cursor
        .get_array(batch_field)
        .map_err(|e| StoreError::Other(format!("malformed cursor reply: {e}")))?
        .iter()
        .map(|entry| match entry {
            Bson::Document(spec) => Ok(spec.clone()),
            other => Err(StoreError::Other(format!(
                "unexpected cursor entry: {other}"
            ))),
        })
        .collect::<StoreResult<Vec<_>>>()?;
    Ok((batch, cursor_id))
}

fn to_store_error(err: TransferError) -> StoreError {
    StoreError::Other(err.to_string())
}
