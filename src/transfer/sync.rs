//! Sync run: copy collections directly between two live stores

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::engine::{
    CollectionOutcome, ProgressTracker, RunStatistics, batch_writer, index_replicator,
};
use crate::error::{Result, TransferError};
use crate::model::WritePolicy;
use crate::store::{DocumentStore, StoreConnector};

use super::{
    SyncRequest, SyncSummary, TransferEngine, cancelled, enumeration_error, select_collections,
};

impl<C: StoreConnector> TransferEngine<C> {
    /// Copy collections from the source database into the target database
    pub async fn sync(&self, request: &SyncRequest, cancel: &CancellationToken) -> Result<SyncSummary> {
        request.validate()?;

        let span = info_span!(
            "sync",
            run_id = %Uuid::new_v4(),
            source = %request.source_database_name,
            target = %request.target_database_name,
            mode = %request.sync_mode
        );
        async {
            info!("Starting sync");
            let source = self
                .connector
                .connect(
                    &request.source_connection_target,
                    &request.source_database_name,
                )
                .await?;
            let target = match self
                .connector
                .connect(
                    &request.target_connection_target,
                    &request.target_database_name,
                )
                .await
            {
                Ok(target) => target,
                Err(e) => {
                    source.close().await;
                    error!("Sync failed: {}", e);
                    return Err(e);
                }
            };

            let result = self
                .sync_with(source.as_ref(), target.as_ref(), request, cancel)
                .await;
            target.close().await;
            source.close().await;

            match &result {
                Ok(summary) => info!(
                    "Sync completed: {} documents, {} errors",
                    summary.totals.total_documents_processed, summary.totals.total_errors
                ),
                Err(e) => error!("Sync failed: {}", e),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn sync_with(
        &self,
        source: &dyn DocumentStore,
        target: &dyn DocumentStore,
        request: &SyncRequest,
        cancel: &CancellationToken,
    ) -> Result<SyncSummary> {
        let mut stats = RunStatistics::new();
        let available = source
            .list_collection_names()
            .await
            .map_err(enumeration_error)?;
        let names = select_collections(
            request.collections.clone(),
            &available,
            "sync",
        )?;
        info!("Collections to sync: {}", names.join(", "));

        let progress = ProgressTracker::new(names.len() as u64, self.config.transfer.show_progress);
        let mut was_cancelled = false;

        for name in &names {
            if cancelled(cancel, name) {
                was_cancelled = true;
                break;
            }
            progress.start_collection(name);

            let outcome = if available.contains(name) {
                match self
                    .sync_collection(source, target, name, request.sync_mode)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!("Error syncing {}: {}", name, e);
                        CollectionOutcome::failed(e.to_string())
                    }
                }
            } else {
                warn!("Collection {} not found in source", name);
                CollectionOutcome::failed(format!("Collection '{name}' not found"))
            };

            progress.finish_collection(outcome.processed());
            stats.record(name, outcome);
        }
        progress.finish();

        Ok(SyncSummary {
            source_database: request.source_database_name.clone(),
            target_database: request.target_database_name.clone(),
            sync_mode: request.sync_mode,
            totals: stats.finish(),
            cancelled: was_cancelled,
        })
    }

    async fn sync_collection(
        &self,
        source: &dyn DocumentStore,
        target: &dyn DocumentStore,
        name: &str,
        policy: WritePolicy,
    ) -> Result<CollectionOutcome> {
        info!("Syncing collection: {}", name);
        let source_collection = source.collection(name);
        let documents = source_collection
            .find_all()
            .await
            .map_err(|e| TransferError::Generic(e.to_string()))?;

        let target_collection = target.collection(name);
        let outcome = batch_writer::apply(
            Some(target_collection.as_ref()),
            &documents,
            policy,
            self.config.transfer.batch_size,
        )
        .await?;

        let index_warning = match source_collection.list_indexes().await {
            Ok(indexes) => index_replicator::replicate(&indexes, target_collection.as_ref())
                .await
                .warning(),
            Err(e) => {
                warn!("Could not read indexes of {}: {}", name, e);
                Some(format!("Index listing failed: {e}"))
            }
        };

        info!(
            "Collection {}: {} processed, {} skipped",
            name, outcome.processed, outcome.skipped
        );
        Ok(CollectionOutcome::applied(
            outcome,
            documents.len() as u64,
            index_warning,
        ))
    }
}
