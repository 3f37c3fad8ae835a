//! Run statistics
//!
//! Collects one outcome per collection in processing order and folds them
//! into the totals reported at the end of an import or sync run.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::model::ordered;

/// Failure to write one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentError {
    /// Position of the document in the collection's document sequence
    pub position: usize,
    /// Rendered identifier, when the document carries one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub message: String,
}

/// What the batch writer did to one collection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub processed: u64,
    pub skipped: u64,
    pub batch_errors: u64,
    pub errors: Vec<DocumentError>,
}

/// Per-collection entry of a run result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CollectionOutcome {
    Applied {
        processed: u64,
        skipped: u64,
        total: u64,
        #[serde(default, skip_serializing_if = "is_zero")]
        batch_errors: u64,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        document_errors: Vec<DocumentError>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index_warning: Option<String>,
    },
    Failed {
        error: String,
        processed: u64,
        skipped: u64,
    },
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl CollectionOutcome {
    pub fn applied(outcome: WriteOutcome, total: u64, index_warning: Option<String>) -> Self {
        CollectionOutcome::Applied {
            processed: outcome.processed,
            skipped: outcome.skipped,
            total,
            batch_errors: outcome.batch_errors,
            document_errors: outcome.errors,
            index_warning,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        CollectionOutcome::Failed {
            error: error.into(),
            processed: 0,
            skipped: 0,
        }
    }

    pub fn processed(&self) -> u64 {
        match self {
            CollectionOutcome::Applied { processed, .. }
            | CollectionOutcome::Failed { processed, .. } => *processed,
        }
    }

    /// Errors this entry contributes to the run total
    pub fn error_count(&self) -> u64 {
        match self {
            CollectionOutcome::Applied { batch_errors, .. } => *batch_errors,
            CollectionOutcome::Failed { .. } => 1,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, CollectionOutcome::Failed { .. })
    }
}

/// Aggregated result of an import or sync run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub total_documents_processed: u64,
    pub total_collections: usize,
    pub total_errors: u64,
    pub duration_ms: u64,
    #[serde(
        serialize_with = "ordered::serialize",
        deserialize_with = "ordered::deserialize"
    )]
    pub per_collection_stats: Vec<(String, CollectionOutcome)>,
}

/// Accumulates collection outcomes for one run
#[derive(Debug)]
pub struct RunStatistics {
    started: Instant,
    entries: Vec<(String, CollectionOutcome)>,
}

impl Default for RunStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStatistics {
    /// Start the run clock
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            entries: Vec::new(),
        }
    }

    /// Record an entry. A key seen before is overwritten in place.
    pub fn record(&mut self, key: &str, outcome: CollectionOutcome) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = outcome,
            None => self.entries.push((key.to_string(), outcome)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&CollectionOutcome> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Fold every entry into the final totals
    pub fn finish(self) -> RunTotals {
        let duration_ms = self.elapsed_ms();
        RunTotals {
            total_documents_processed: self.entries.iter().map(|(_, o)| o.processed()).sum(),
            total_collections: self.entries.len(),
            total_errors: self.entries.iter().map(|(_, o)| o.error_count()).sum(),
            duration_ms,
            per_collection_stats: self.entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(processed: u64, skipped: u64, batch_errors: u64) -> WriteOutcome {
        WriteOutcome {
            processed,
            skipped,
            batch_errors,
            errors: Vec::new(),
        }
    }

    #[test]
    fn test_totals_fold_entries() {
        let mut stats = RunStatistics::new();
        stats.record("users", CollectionOutcome::applied(outcome(3, 0, 0), 3, None));
        stats.record("orders", CollectionOutcome::applied(outcome(5, 1, 2), 6, None));
        stats.record("broken.json", CollectionOutcome::failed("bad json"));

        let totals = stats.finish();
        assert_eq!(totals.total_documents_processed, 8);
        assert_eq!(totals.total_collections, 3);
        assert_eq!(totals.total_errors, 3);
    }

    #[test]
    fn test_total_processed_matches_entries() {
        let mut stats = RunStatistics::new();
        for (i, n) in [4u64, 0, 7].iter().enumerate() {
            stats.record(&format!("c{i}"), CollectionOutcome::applied(outcome(*n, 0, 0), *n, None));
        }
        let totals = stats.finish();
        let sum: u64 = totals
            .per_collection_stats
            .iter()
            .map(|(_, o)| o.processed())
            .sum();
        assert_eq!(totals.total_documents_processed, sum);
    }

    #[test]
    fn test_record_overwrites_same_key() {
        let mut stats = RunStatistics::new();
        stats.record("users", CollectionOutcome::failed("first"));
        stats.record("users", CollectionOutcome::applied(outcome(1, 0, 0), 1, None));
        assert_eq!(stats.len(), 1);
        assert!(!stats.get("users").unwrap().is_failed());
    }

    #[test]
    fn test_serialized_shape() {
        let mut stats = RunStatistics::new();
        stats.record("zeta", CollectionOutcome::applied(outcome(2, 1, 0), 3, None));
        stats.record(
            "alpha",
            CollectionOutcome::applied(outcome(0, 0, 0), 0, Some("index build failed".into())),
        );
        stats.record("gamma", CollectionOutcome::failed("read failed"));

        let text = serde_json::to_string(&stats.finish()).unwrap();
        let zeta = text.find("zeta").unwrap();
        let alpha = text.find("alpha").unwrap();
        assert!(zeta < alpha);

        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        let per = &value["per_collection_stats"];
        assert_eq!(per["zeta"], serde_json::json!({"processed": 2, "skipped": 1, "total": 3}));
        assert_eq!(per["alpha"]["index_warning"], "index build failed");
        assert_eq!(
            per["gamma"],
            serde_json::json!({"error": "read failed", "processed": 0, "skipped": 0})
        );
    }
}
