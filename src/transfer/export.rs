//! Export run: snapshot collections into an archive

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::archive::{self, ARCHIVE_EXT};
use crate::config::JsonMode;
use crate::engine::ProgressTracker;
use crate::error::{Result, TransferError};
use crate::model::snapshot::indexes_to_file_json;
use crate::model::{
    CollectionSnapshot, ExportStat, METADATA_FILE, TransferMetadata, document_file_name,
    index_file_name, is_document_file,
};
use crate::store::{DocumentStore, StoreConnector};

use super::{
    ExportRequest, ExportSummary, TransferEngine, cancelled, download_reference,
    enumeration_error, parse_collection_list, select_collections,
};

/// Write `value` as pretty JSON, returning the file size
pub(super) async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<u64> {
    let bytes = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, &bytes).await?;
    Ok(bytes.len() as u64)
}

/// Archive file name for an export of `database` started at `now`
fn archive_name(database: &str, now: chrono::DateTime<Utc>) -> String {
    let timestamp = now.format("%Y-%m-%dT%H-%M-%S-%3fZ");
    format!("{database}_backup_{timestamp}{ARCHIVE_EXT}")
}

/// Collection names must map to a single flat file name that import reads
/// back as documents, so neither `metadata` nor `*_indexes` qualify
fn is_file_safe(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && is_document_file(&document_file_name(name))
}

impl<C: StoreConnector> TransferEngine<C> {
    /// Export the selected collections of a database into an archive
    pub async fn export(
        &self,
        request: &ExportRequest,
        cancel: &CancellationToken,
    ) -> Result<ExportSummary> {
        request.validate()?;

        let span = info_span!(
            "export",
            run_id = %Uuid::new_v4(),
            database = %request.database_name
        );
        async {
            info!("Starting export");
            let started = Instant::now();
            let store = self
                .connector
                .connect(&request.connection_target, &request.database_name)
                .await?;

            let result = self.export_with(store.as_ref(), request, cancel, started).await;
            store.close().await;

            match &result {
                Ok(summary) => info!(
                    "Export completed: {} documents in {}",
                    summary.total_documents, summary.filename
                ),
                Err(e) => error!("Export failed: {}", e),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn export_with(
        &self,
        store: &dyn DocumentStore,
        request: &ExportRequest,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<ExportSummary> {
        let available = store
            .list_collection_names()
            .await
            .map_err(enumeration_error)?;
        let names = select_collections(
            parse_collection_list(request.collections.as_deref()),
            &available,
            "export",
        )?;
        info!("Collections to export: {}", names.join(", "));

        let scratch = self.scratch_dir(&format!("{}_", request.database_name))?;
        let server_version = store.server_version().await;
        let mut metadata =
            TransferMetadata::skeleton(&request.database_name, &names, server_version);
        write_json(&scratch.path().join(METADATA_FILE), &metadata).await?;

        let mode = self.config.transfer.json_mode;
        let progress = ProgressTracker::new(names.len() as u64, self.config.transfer.show_progress);
        let mut was_cancelled = false;

        for name in &names {
            if cancelled(cancel, name) {
                was_cancelled = true;
                break;
            }
            progress.start_collection(name);

            let stat = if !available.contains(name) {
                warn!("Collection {} not found", name);
                ExportStat::failed(format!("Collection '{name}' not found"))
            } else if !is_file_safe(name) {
                ExportStat::failed(format!("Collection name '{name}' cannot be used as a file name"))
            } else {
                match export_collection(store, name, scratch.path(), mode).await {
                    Ok(stat) => stat,
                    Err(e) => {
                        error!("Error exporting collection {}: {}", name, e);
                        ExportStat::failed(e.to_string())
                    }
                }
            };

            progress.finish_collection(stat.documents());
            metadata.record(name, stat);
        }
        progress.finish();

        metadata.finish(started.elapsed().as_millis() as u64);
        write_json(&scratch.path().join(METADATA_FILE), &metadata).await?;

        let filename = archive_name(&request.database_name, Utc::now());
        tokio::fs::create_dir_all(&self.config.paths.exports_dir).await?;
        let output = self.config.paths.exports_dir.join(&filename);
        let file_size = pack_blocking(
            scratch.path().to_path_buf(),
            output,
            self.config.transfer.compression_level,
        )
        .await?;

        if let Err(e) = scratch.close() {
            warn!("Could not remove scratch directory: {}", e);
        }

        Ok(ExportSummary {
            download_reference: download_reference(&filename),
            filename,
            database: request.database_name.clone(),
            collections: names.len(),
            total_documents: metadata.total_documents.unwrap_or(0),
            file_size,
            duration_ms: started.elapsed().as_millis() as u64,
            cancelled: was_cancelled,
        })
    }
}

/// Snapshot one collection and its indexes into `dir`
async fn export_collection(
    store: &dyn DocumentStore,
    name: &str,
    dir: &Path,
    mode: JsonMode,
) -> Result<ExportStat> {
    info!("Exporting collection: {}", name);
    let collection = store.collection(name);

    let estimated_count = collection
        .estimated_count()
        .await
        .map_err(|e| TransferError::Generic(e.to_string()))?;
    let documents = collection
        .find_all()
        .await
        .map_err(|e| TransferError::Generic(e.to_string()))?;
    let indexes = collection
        .list_indexes()
        .await
        .map_err(|e| TransferError::Generic(e.to_string()))?;

    let snapshot = CollectionSnapshot::new(name, documents);
    let file_size = write_json(
        &dir.join(document_file_name(name)),
        &snapshot.to_file_json(mode),
    )
    .await?;
    write_json(
        &dir.join(index_file_name(name)),
        &indexes_to_file_json(&indexes, mode),
    )
    .await?;

    info!("Exported {} documents from {}", snapshot.count(), name);
    Ok(ExportStat::Exported {
        documents: snapshot.count() as u64,
        estimated_count,
        file_size,
    })
}

/// Run the archive packer off the async workers
async fn pack_blocking(source: PathBuf, output: PathBuf, level: i32) -> Result<u64> {
    tokio::task::spawn_blocking(move || archive::pack_with_level(&source, &output, level))
        .await
        .map_err(|e| TransferError::Generic(format!("archive task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_archive_name() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 10, 20, 30).unwrap();
        assert_eq!(
            archive_name("shop", at),
            "shop_backup_2024-03-05T10-20-30-000Z.tar.zst"
        );
    }

    #[test]
    fn test_file_safe_names() {
        assert!(is_file_safe("users"));
        assert!(is_file_safe("system.profile"));
        assert!(!is_file_safe("a/b"));
        assert!(!is_file_safe(".hidden"));
        assert!(!is_file_safe(""));
        assert!(!is_file_safe("metadata"));
        assert!(!is_file_safe("users_indexes"));
        assert!(is_file_safe("metadata_v2"));
    }
}
