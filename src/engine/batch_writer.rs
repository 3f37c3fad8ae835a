//! Document batch writer
//!
//! Applies an ordered sequence of documents to one target collection in
//! fixed-size batches under a [`WritePolicy`]. Batches run strictly in order
//! and every document is attempted once per run:
//!
//! - `replace` drops the target, then bulk inserts each batch
//! - `merge` upserts each document by `_id` (plain insert when it has none)
//! - `append` bulk inserts each batch; on identifier collisions the documents
//!   the bulk attempt did not confirm are retried one at a time
//!
//! A `null` or `undefined` `_id` is removed before writing so the store
//! assigns a fresh identifier.
//!
//! Failures are folded into the returned [`WriteOutcome`]. The only error is a
//! missing target.

use std::borrow::Cow;

use mongodb::bson::Document;
use tracing::{debug, warn};

use crate::error::{Result, TransferError};
use crate::model::WritePolicy;
use crate::model::document::{describe_id, document_id, has_null_id, strip_null_id};
use crate::store::{CollectionHandle, FailureKind, StoreError};

use super::stats::{DocumentError, WriteOutcome};

/// Default documents per batch
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Apply `documents` to `target` under `policy`
pub async fn apply(
    target: Option<&dyn CollectionHandle>,
    documents: &[Document],
    policy: WritePolicy,
    batch_size: usize,
) -> Result<WriteOutcome> {
    let target = target.ok_or(TransferError::MissingCollection)?;
    let batch_size = batch_size.max(1);
    let mut writer = BatchWriter {
        target,
        outcome: WriteOutcome::default(),
    };

    if policy == WritePolicy::Replace {
        if let Err(e) = target.drop_collection().await {
            warn!("Could not drop {} before replace: {}", target.name(), e);
        } else {
            debug!("Dropped {} before replace", target.name());
        }
    }

    for (batch_no, batch) in documents.chunks(batch_size).enumerate() {
        let offset = batch_no * batch_size;
        let batch = without_null_ids(batch);
        match policy {
            WritePolicy::Replace => writer.replace_batch(&batch, offset).await,
            WritePolicy::Merge => writer.merge_batch(&batch, offset).await,
            WritePolicy::Append => writer.append_batch(&batch, offset).await,
        }
    }

    debug!(
        "{}: {} processed, {} skipped, {} batch errors",
        target.name(),
        writer.outcome.processed,
        writer.outcome.skipped,
        writer.outcome.batch_errors
    );
    Ok(writer.outcome)
}

/// The batch as written; borrowed unless some `_id` has to be stripped
fn without_null_ids(batch: &[Document]) -> Cow<'_, [Document]> {
    if batch.iter().any(has_null_id) {
        Cow::Owned(batch.iter().map(strip_null_id).collect())
    } else {
        Cow::Borrowed(batch)
    }
}

struct BatchWriter<'a> {
    target: &'a dyn CollectionHandle,
    outcome: WriteOutcome,
}

impl BatchWriter<'_> {
    fn document_error(&mut self, position: usize, document: &Document, message: String) {
        self.outcome.errors.push(DocumentError {
            position,
            id: document_id(document).map(describe_id),
            message,
        });
    }

    async fn replace_batch(&mut self, batch: &[Document], offset: usize) {
        match self.target.insert_many_unordered(batch).await {
            Ok(inserted) => self.outcome.processed += inserted,
            Err(StoreError::BulkInsert { inserted, failures }) => {
                self.outcome.processed += inserted;
                let mut other_failures = false;
                for failure in failures {
                    match failure.kind {
                        FailureKind::DuplicateKey => self.outcome.skipped += 1,
                        FailureKind::Other => {
                            other_failures = true;
                            if let Some(document) = batch.get(failure.index) {
                                self.document_error(offset + failure.index, document, failure.message);
                            }
                        }
                    }
                }
                if other_failures {
                    warn!("Batch at {} in {} partially failed", offset, self.target.name());
                    self.outcome.batch_errors += 1;
                }
            }
            Err(e) => self.fail_batch(offset, &e),
        }
    }

    async fn merge_batch(&mut self, batch: &[Document], offset: usize) {
        for (i, document) in batch.iter().enumerate() {
            let result = match document_id(document) {
                Some(id) => self.target.upsert_by_id(id, document).await,
                None => self.target.insert_one(document).await,
            };
            match result {
                Ok(()) => self.outcome.processed += 1,
                Err(e) => {
                    warn!("Skipping document {} in {}: {}", offset + i, self.target.name(), e);
                    self.outcome.skipped += 1;
                    self.document_error(offset + i, document, e.to_string());
                }
            }
        }
    }

    async fn append_batch(&mut self, batch: &[Document], offset: usize) {
        match self.target.insert_many_unordered(batch).await {
            Ok(inserted) => self.outcome.processed += inserted,
            Err(StoreError::BulkInsert { inserted, failures }) => {
                self.outcome.processed += inserted;

                if failures.iter().any(|f| f.kind == FailureKind::DuplicateKey) {
                    let unconfirmed: Vec<usize> = failures.iter().map(|f| f.index).collect();
                    self.append_fallback(batch, offset, &unconfirmed).await;
                } else {
                    for failure in failures {
                        if let Some(document) = batch.get(failure.index) {
                            self.document_error(offset + failure.index, document, failure.message);
                        }
                    }
                    self.outcome.batch_errors += 1;
                }
            }
            Err(e) => self.fail_batch(offset, &e),
        }
    }

    /// One-at-a-time retry of the documents a bulk insert did not confirm
    async fn append_fallback(&mut self, batch: &[Document], offset: usize, unconfirmed: &[usize]) {
        for &index in unconfirmed {
            let Some(document) = batch.get(index) else {
                continue;
            };

            if let Some(id) = document_id(document) {
                match self.target.contains_id(id).await {
                    Ok(true) => {
                        self.outcome.skipped += 1;
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        self.document_error(offset + index, document, e.to_string());
                        self.fail_batch(offset, &e);
                        return;
                    }
                }
            }

            match self.target.insert_one(document).await {
                Ok(()) => self.outcome.processed += 1,
                Err(StoreError::DuplicateKey(_)) => self.outcome.skipped += 1,
                Err(e) => {
                    self.document_error(offset + index, document, e.to_string());
                    self.fail_batch(offset, &e);
                    return;
                }
            }
        }
    }

    fn fail_batch(&mut self, offset: usize, error: &StoreError) {
        warn!(
            "Error processing batch at {} in {}: {}",
            offset,
            self.target.name(),
            error
        );
        self.outcome.batch_errors += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DocumentStore, MemoryConnector, MemoryStore, StoreConnector};
    use mongodb::bson::{Bson, doc};

    async fn open(store: &MemoryStore) -> Box<dyn DocumentStore> {
        MemoryConnector::new()
            .with_server("mem://t", store.clone())
            .connect("mem://t", "db")
            .await
            .unwrap()
    }

    fn numbered(range: std::ops::Range<i32>) -> Vec<Document> {
        range.map(|i| doc! { "_id": i, "n": i }).collect()
    }

    #[tokio::test]
    async fn test_missing_target() {
        let result = apply(None, &numbered(0..3), WritePolicy::Merge, 100).await;
        assert!(matches!(result, Err(TransferError::MissingCollection)));
    }

    #[tokio::test]
    async fn test_replace_leaves_exactly_input() {
        let store = MemoryStore::new();
        store.seed("db", "c", numbered(100..110));
        let db = open(&store).await;
        let target = db.collection("c");

        let docs = numbered(0..250);
        let outcome = apply(Some(target.as_ref()), &docs, WritePolicy::Replace, 100)
            .await
            .unwrap();

        assert_eq!(outcome.processed, 250);
        assert_eq!(outcome.skipped, 0);
        assert_eq!(outcome.batch_errors, 0);
        assert_eq!(store.documents("db", "c"), docs);
    }

    #[tokio::test]
    async fn test_replace_duplicate_within_input_is_skipped() {
        let store = MemoryStore::new();
        let db = open(&store).await;
        let target = db.collection("c");

        let docs = vec![doc! { "_id": 1 }, doc! { "_id": 1 }, doc! { "_id": 2 }];
        let outcome = apply(Some(target.as_ref()), &docs, WritePolicy::Replace, 100)
            .await
            .unwrap();

        assert_eq!(outcome.processed, 2);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.batch_errors, 0);
    }

    #[tokio::test]
    async fn test_replace_other_rejection_is_batch_error() {
        let store = MemoryStore::new();
        store.reject_documents_with("c", "bad");
        let db = open(&store).await;
        let target = db.collection("c");

        let docs = vec![doc! { "_id": 1 }, doc! { "_id": 2, "bad": true }];
        let outcome = apply(Some(target.as_ref()), &docs, WritePolicy::Replace, 100)
            .await
            .unwrap();

        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.batch_errors, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].position, 1);
        assert_eq!(outcome.errors[0].id.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_merge_is_idempotent_and_source_wins() {
        let store = MemoryStore::new();
        store.seed("db", "c", vec![doc! { "_id": 1, "v": "old" }, doc! { "_id": 9, "v": "keep" }]);
        let db = open(&store).await;
        let target = db.collection("c");

        let docs = vec![doc! { "_id": 1, "v": "new" }, doc! { "_id": 2, "v": "new" }];
        for _ in 0..2 {
            let outcome = apply(Some(target.as_ref()), &docs, WritePolicy::Merge, 100)
                .await
                .unwrap();
            assert_eq!(outcome.processed, 2);
            assert_eq!(outcome.skipped, 0);
        }

        let stored = store.documents("db", "c");
        assert_eq!(stored.len(), 3);
        assert!(stored.contains(&doc! { "_id": 1, "v": "new" }));
        assert!(stored.contains(&doc! { "_id": 9, "v": "keep" }));
    }

    #[tokio::test]
    async fn test_merge_without_id_inserts() {
        let store = MemoryStore::new();
        let db = open(&store).await;
        let target = db.collection("c");

        let docs = vec![
            doc! { "x": 1 },
            doc! { "_id": Bson::Null, "x": 2 },
            doc! { "_id": Bson::Null, "x": 3 },
        ];
        let outcome = apply(Some(target.as_ref()), &docs, WritePolicy::Merge, 100)
            .await
            .unwrap();
        assert_eq!(outcome.processed, 3);
        assert_eq!(outcome.skipped, 0);

        let stored = store.documents("db", "c");
        assert_eq!(stored.len(), 3);
        assert!(
            stored
                .iter()
                .all(|d| matches!(d.get("_id"), Some(Bson::ObjectId(_))))
        );
    }

    #[tokio::test]
    async fn test_append_without_id_inserts() {
        let store = MemoryStore::new();
        store.seed("db", "c", vec![doc! { "_id": 1, "x": 1 }]);
        let db = open(&store).await;
        let target = db.collection("c");

        let docs = vec![
            doc! { "x": 1 },
            doc! { "x": 1 },
            doc! { "_id": Bson::Null, "x": 1 },
            doc! { "_id": Bson::Undefined, "x": 1 },
            doc! { "_id": 1, "x": 1 },
        ];
        let outcome = apply(Some(target.as_ref()), &docs, WritePolicy::Append, 2)
            .await
            .unwrap();
        assert_eq!(outcome.processed, 4);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.batch_errors, 0);
        assert_eq!(store.documents("db", "c").len(), 5);
    }

    #[tokio::test]
    async fn test_merge_failure_skips_and_continues() {
        let store = MemoryStore::new();
        store.reject_documents_with("c", "bad");
        let db = open(&store).await;
        let target = db.collection("c");

        let docs = vec![doc! { "_id": 1, "bad": 1 }, doc! { "_id": 2 }];
        let outcome = apply(Some(target.as_ref()), &docs, WritePolicy::Merge, 100)
            .await
            .unwrap();
        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.batch_errors, 0);
        assert_eq!(outcome.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_append_never_overwrites() {
        let store = MemoryStore::new();
        store.seed("db", "c", vec![doc! { "_id": 1, "v": "orig" }]);
        let db = open(&store).await;
        let target = db.collection("c");

        let docs = vec![doc! { "_id": 1, "v": "incoming" }];
        let outcome = apply(Some(target.as_ref()), &docs, WritePolicy::Append, 100)
            .await
            .unwrap();

        assert_eq!(outcome.processed, 0);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(store.documents("db", "c"), vec![doc! { "_id": 1, "v": "orig" }]);
    }

    #[tokio::test]
    async fn test_append_counts_each_document_once() {
        let store = MemoryStore::new();
        store.seed("db", "c", vec![doc! { "_id": 2 }, doc! { "_id": 4 }]);
        let db = open(&store).await;
        let target = db.collection("c");

        let docs = numbered(0..6);
        let outcome = apply(Some(target.as_ref()), &docs, WritePolicy::Append, 4)
            .await
            .unwrap();

        assert_eq!(outcome.processed, 4);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.processed + outcome.skipped, docs.len() as u64);
        assert_eq!(store.documents("db", "c").len(), 6);
    }

    #[tokio::test]
    async fn test_append_other_failure_is_batch_error() {
        let store = MemoryStore::new();
        store.reject_documents_with("c", "bad");
        let db = open(&store).await;
        let target = db.collection("c");

        let docs = vec![doc! { "_id": 1, "bad": 1 }, doc! { "_id": 2 }];
        let outcome = apply(Some(target.as_ref()), &docs, WritePolicy::Append, 1)
            .await
            .unwrap();
        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.batch_errors, 1);
    }

    #[tokio::test]
    async fn test_append_fallback_stops_batch_on_other_error() {
        let store = MemoryStore::new();
        store.seed("db", "c", vec![doc! { "_id": 1 }]);
        store.reject_documents_with("c", "bad");
        let db = open(&store).await;
        let target = db.collection("c");

        let docs = vec![
            doc! { "_id": 1 },
            doc! { "_id": 2, "bad": 1 },
            doc! { "_id": 3 },
        ];
        let outcome = apply(Some(target.as_ref()), &docs, WritePolicy::Append, 100)
            .await
            .unwrap();

        // bulk confirms 3; fallback skips 1, then fails on 2
        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.batch_errors, 1);
        assert_eq!(outcome.errors[0].position, 1);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let store = MemoryStore::new();
        let db = open(&store).await;
        let target = db.collection("c");
        for policy in [WritePolicy::Replace, WritePolicy::Merge, WritePolicy::Append] {
            let outcome = apply(Some(target.as_ref()), &[], policy, 100).await.unwrap();
            assert_eq!(outcome, WriteOutcome::default());
        }
    }
}
