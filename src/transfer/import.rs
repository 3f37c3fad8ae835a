//! Import run: restore an archive or a single collection file

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::archive;
use crate::engine::{
    CollectionOutcome, ProgressTracker, RunStatistics, batch_writer, index_replicator,
};
use crate::error::{Result, TransferError};
use crate::model::snapshot::indexes_from_file_json;
use crate::model::{
    BSON_FILE_EXT, CollectionSnapshot, METADATA_FILE, TransferMetadata, WritePolicy, file_stem,
    index_file_name, is_document_file,
};
use crate::store::{DocumentStore, StoreConnector};

use super::{ImportRequest, ImportSummary, TransferEngine, UploadedFile, cancelled};

/// Removes the uploaded file when dropped
struct UploadGuard(PathBuf);

impl Drop for UploadGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => debug!("Removed upload {}", self.0.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove upload {}: {}", self.0.display(), e),
        }
    }
}

impl<C: StoreConnector> TransferEngine<C> {
    /// Import an uploaded archive or collection file into a database.
    ///
    /// The upload is deleted when the run ends, including when the request
    /// is rejected.
    pub async fn import(
        &self,
        request: ImportRequest,
        cancel: &CancellationToken,
    ) -> Result<ImportSummary> {
        let _upload = UploadGuard(request.upload.path.clone());
        request.validate(&self.config.upload)?;

        let span = info_span!(
            "import",
            run_id = %Uuid::new_v4(),
            database = %request.database_name,
            mode = %request.import_mode
        );
        async {
            info!(
                "Starting import of {} ({} bytes)",
                request.upload.original_name, request.upload.size
            );
            let store = self
                .connector
                .connect(&request.connection_target, &request.database_name)
                .await?;

            let result = self.import_with(store.as_ref(), &request, cancel).await;
            store.close().await;

            match &result {
                Ok(summary) => info!(
                    "Import completed: {} documents, {} errors",
                    summary.totals.total_documents_processed, summary.totals.total_errors
                ),
                Err(e) => error!("Import failed: {}", e),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn import_with(
        &self,
        store: &dyn DocumentStore,
        request: &ImportRequest,
        cancel: &CancellationToken,
    ) -> Result<ImportSummary> {
        let mut stats = RunStatistics::new();
        let scratch = self.scratch_dir("import_")?;

        let extracted = stage_upload(&request.upload, scratch.path()).await?;
        info!("Extracted {} files", extracted.len());

        log_metadata(&scratch.path().join(METADATA_FILE)).await;

        let files: Vec<String> = extracted
            .into_iter()
            .filter(|f| is_document_file(f))
            .collect();
        info!("Processing {} collection files", files.len());

        let progress = ProgressTracker::new(files.len() as u64, self.config.transfer.show_progress);
        let mut was_cancelled = false;

        for file in &files {
            if cancelled(cancel, file) {
                was_cancelled = true;
                break;
            }
            progress.start_collection(file);

            match self
                .import_file(store, scratch.path(), file, request.import_mode)
                .await
            {
                Ok((name, outcome)) => {
                    progress.finish_collection(outcome.processed());
                    stats.record(&name, outcome);
                }
                Err(e) => {
                    error!("Error processing {}: {}", file, e);
                    progress.finish_collection(0);
                    stats.record(file, CollectionOutcome::failed(e.to_string()));
                }
            }
        }
        progress.finish();

        if let Err(e) = scratch.close() {
            warn!("Could not remove scratch directory: {}", e);
        }

        Ok(ImportSummary {
            database: request.database_name.clone(),
            import_mode: request.import_mode,
            totals: stats.finish(),
            original_file: request.upload.original_name.clone(),
            cancelled: was_cancelled,
        })
    }

    /// Load one collection file, write it, then restore its indexes
    async fn import_file(
        &self,
        store: &dyn DocumentStore,
        dir: &Path,
        file: &str,
        policy: WritePolicy,
    ) -> Result<(String, CollectionOutcome)> {
        let snapshot = read_collection_file(&dir.join(file), file).await?;
        let name = snapshot.name().to_string();
        info!(
            "Processing collection: {} ({} documents)",
            name,
            snapshot.count()
        );

        let collection = store.collection(&name);
        let outcome = batch_writer::apply(
            Some(collection.as_ref()),
            snapshot.documents(),
            policy,
            self.config.transfer.batch_size,
        )
        .await?;

        let index_path = dir.join(index_file_name(&name));
        let index_warning = if tokio::fs::try_exists(&index_path).await.unwrap_or(false) {
            match read_index_file(&index_path).await {
                Ok(indexes) => index_replicator::replicate(&indexes, collection.as_ref())
                    .await
                    .warning(),
                Err(e) => {
                    warn!("Could not read indexes for {}: {}", name, e);
                    Some(format!("Index file unreadable: {e}"))
                }
            }
        } else {
            None
        };

        info!(
            "Collection {}: {} processed, {} skipped",
            name, outcome.processed, outcome.skipped
        );
        let total = snapshot.count() as u64;
        Ok((name, CollectionOutcome::applied(outcome, total, index_warning)))
    }
}

/// Put the upload's collection files into `dir`, returning their names in
/// archive order
async fn stage_upload(upload: &UploadedFile, dir: &Path) -> Result<Vec<String>> {
    if archive::is_archive_name(&upload.original_name.to_lowercase()) {
        info!("Extracting archive {}", upload.original_name);
        let source = upload.path.clone();
        let target = dir.to_path_buf();
        return tokio::task::spawn_blocking(move || archive::unpack(&source, &target))
            .await
            .map_err(|e| TransferError::Generic(format!("archive task failed: {e}")))?;
    }

    let name = upload.file_name().to_string();
    tokio::fs::copy(&upload.path, dir.join(&name)).await?;
    Ok(vec![name])
}

/// Log what an archive's metadata says about it; never fails the run
async fn log_metadata(path: &Path) {
    let Ok(bytes) = tokio::fs::read(path).await else {
        return;
    };
    match serde_json::from_slice::<TransferMetadata>(&bytes) {
        Ok(meta) => info!(
            "Metadata found: {} collections, {} documents from {}",
            meta.total_collections,
            meta.total_documents
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            meta.database
        ),
        Err(e) => warn!("Unreadable metadata: {}", e),
    }
}

/// Decode a `.json` or `.bson` collection file
async fn read_collection_file(path: &Path, file: &str) -> Result<CollectionSnapshot> {
    let stem = file_stem(file).to_string();
    if file.ends_with(BSON_FILE_EXT) {
        let path = path.to_path_buf();
        return tokio::task::spawn_blocking(move || {
            let reader = BufReader::new(File::open(&path)?);
            CollectionSnapshot::from_bson_reader(&stem, reader)
        })
        .await
        .map_err(|e| TransferError::Generic(format!("read task failed: {e}")))?;
    }

    let bytes = tokio::fs::read(path).await?;
    let value: serde_json::Value = serde_json::from_slice(&bytes)?;
    CollectionSnapshot::from_file_json(value, &stem)
}

async fn read_index_file(path: &Path) -> Result<Vec<crate::model::IndexDescriptor>> {
    let bytes = tokio::fs::read(path).await?;
    indexes_from_file_json(serde_json::from_slice(&bytes)?)
}
