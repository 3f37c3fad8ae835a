//! Secondary index replication

use tracing::{info, warn};

use crate::model::IndexDescriptor;
use crate::store::CollectionHandle;

/// Result of replicating indexes onto one collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    /// This many indexes were created
    Created(usize),
    /// Nothing to create
    Skipped,
    /// Creation failed; carries the warning for the collection entry
    Failed(String),
}

impl IndexOutcome {
    /// Warning text, if replication failed
    pub fn warning(&self) -> Option<String> {
        match self {
            IndexOutcome::Failed(msg) => Some(msg.clone()),
            _ => None,
        }
    }
}

/// Create every non-primary descriptor of `source_indexes` on `target` in
/// one bulk call.
pub async fn replicate(
    source_indexes: &[IndexDescriptor],
    target: &dyn CollectionHandle,
) -> IndexOutcome {
    let to_create: Vec<IndexDescriptor> = source_indexes
        .iter()
        .filter(|i| !i.is_primary())
        .cloned()
        .collect();

    if to_create.is_empty() {
        return IndexOutcome::Skipped;
    }

    match target.create_indexes(&to_create).await {
        Ok(()) => {
            info!("Restored {} indexes for {}", to_create.len(), target.name());
            IndexOutcome::Created(to_create.len())
        }
        Err(e) => {
            warn!("Could not restore indexes for {}: {}", target.name(), e);
            IndexOutcome::Failed(format!("Index restore failed: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PRIMARY_INDEX_NAME;
    use crate::store::{DocumentStore, MemoryConnector, MemoryStore, StoreConnector};
    use mongodb::bson::doc;

    async fn open(store: &MemoryStore) -> Box<dyn DocumentStore> {
        MemoryConnector::new()
            .with_server("mem://t", store.clone())
            .connect("mem://t", "db")
            .await
            .unwrap()
    }

    fn primary() -> IndexDescriptor {
        IndexDescriptor::new(doc! { "_id": 1 }, PRIMARY_INDEX_NAME, doc! { "v": 2 })
    }

    #[tokio::test]
    async fn test_primary_index_excluded() {
        let store = MemoryStore::new();
        let db = open(&store).await;
        let target = db.collection("users");

        let email = IndexDescriptor::new(
            doc! { "email": 1 },
            "email_1",
            doc! { "unique": true, "v": 2, "ns": "db.users" },
        );
        let outcome = replicate(&[primary(), email], target.as_ref()).await;
        assert_eq!(outcome, IndexOutcome::Created(1));

        let created = store.indexes("db", "users");
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].name(), Some("email_1"));
        assert_eq!(created[0].spec().get_bool("unique"), Ok(true));
        assert!(created[0].spec().get("ns").is_none());
        assert!(created.iter().all(|i| !i.is_primary()));
    }

    #[tokio::test]
    async fn test_only_primary_is_noop() {
        let store = MemoryStore::new();
        let db = open(&store).await;
        let target = db.collection("users");

        assert_eq!(replicate(&[primary()], target.as_ref()).await, IndexOutcome::Skipped);
        assert_eq!(replicate(&[], target.as_ref()).await, IndexOutcome::Skipped);
        assert!(store.collection_names("db").is_empty());
    }

    #[tokio::test]
    async fn test_compound_key_order_preserved() {
        let store = MemoryStore::new();
        let db = open(&store).await;
        let target = db.collection("orders");

        let compound = IndexDescriptor::new(
            doc! { "customer": 1, "created": -1 },
            "customer_1_created_-1",
            doc! {},
        );
        replicate(&[compound], target.as_ref()).await;

        let created = store.indexes("db", "orders");
        let keys: Vec<&String> = created[0].key().unwrap().keys().collect();
        assert_eq!(keys, vec!["customer", "created"]);
    }

    #[tokio::test]
    async fn test_failure_is_warning() {
        let store = MemoryStore::new();
        store.fail_index_builds("users");
        let db = open(&store).await;
        let target = db.collection("users");

        let idx = IndexDescriptor::new(doc! { "a": 1 }, "a_1", doc! {});
        let outcome = replicate(&[idx], target.as_ref()).await;
        assert!(matches!(outcome, IndexOutcome::Failed(_)));
        assert!(outcome.warning().unwrap().contains("Index build failed"));
    }
}
