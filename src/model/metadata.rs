//! Transfer metadata written into every export archive
//!
//! The file is written twice during an export: a skeleton before any
//! collection is read, then the enriched record once the loop is done, so a
//! readable partial record exists even if the run dies halfway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ordered;

/// Archive entry name of the metadata file
pub const METADATA_FILE: &str = "metadata.json";

/// Export statistics for one collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExportStat {
    Exported {
        documents: u64,
        estimated_count: u64,
        file_size: u64,
    },
    Failed {
        error: String,
        documents: u64,
    },
}

impl ExportStat {
    pub fn failed(error: impl Into<String>) -> Self {
        ExportStat::Failed {
            error: error.into(),
            documents: 0,
        }
    }

    pub fn documents(&self) -> u64 {
        match self {
            ExportStat::Exported { documents, .. } | ExportStat::Failed { documents, .. } => {
                *documents
            }
        }
    }
}

/// Description of one export run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferMetadata {
    pub database: String,
    pub exported_at: DateTime<Utc>,
    pub collections: Vec<String>,
    pub total_collections: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_documents: Option<u64>,
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        serialize_with = "ordered::serialize",
        deserialize_with = "ordered::deserialize"
    )]
    pub export_stats: Vec<(String, ExportStat)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_duration_ms: Option<u64>,
}

impl TransferMetadata {
    /// Skeleton written before the per-collection loop
    pub fn skeleton(database: &str, collections: &[String], server_version: Option<String>) -> Self {
        Self {
            database: database.to_string(),
            exported_at: Utc::now(),
            collections: collections.to_vec(),
            total_collections: collections.len(),
            server_version,
            total_documents: None,
            export_stats: Vec::new(),
            export_duration_ms: None,
        }
    }

    /// Record one collection's outcome
    pub fn record(&mut self, collection: &str, stat: ExportStat) {
        self.export_stats.push((collection.to_string(), stat));
    }

    /// Fill in the totals once every collection has been processed
    pub fn finish(&mut self, duration_ms: u64) {
        self.total_documents = Some(self.export_stats.iter().map(|(_, s)| s.documents()).sum());
        self.export_duration_ms = Some(duration_ms);
    }
}
