//! Transfer orchestration
//!
//! Export, import and sync runs all follow the same shape:
//! CONNECT, ENUMERATE, one iteration per collection, FINALIZE, DISCONNECT.
//!
//! Every store a run opens is closed before the run returns, on success and
//! on failure. Scratch directories are [`tempfile::TempDir`] guards and the
//! import upload is removed by a drop guard, so neither outlives the run.
//! A [`CancellationToken`] is checked before each collection; a cancelled
//! run still finalizes and reports `cancelled: true`.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::archive::ARCHIVE_EXT;
use crate::config::Config;
use crate::error::{ConfigError, Result, TransferError};
use crate::model::DOCUMENT_FILE_EXT;
use crate::store::{StoreConnector, StoreError};

mod export;
mod import;
pub mod request;
mod sync;

pub use request::{
    ExportRequest, ExportSummary, ImportRequest, ImportSummary, SyncRequest, SyncSummary,
    UploadedFile, parse_collection_list,
};

/// Route under which finished archives are served
pub const DOWNLOAD_ROUTE: &str = "/api/export/download";

/// Runs transfers against stores opened through `C`
pub struct TransferEngine<C: StoreConnector> {
    connector: C,
    config: Config,
}

impl<C: StoreConnector> TransferEngine<C> {
    pub fn new(connector: C, config: Config) -> Self {
        Self { connector, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Fresh scratch directory under the configured temp dir
    fn scratch_dir(&self, prefix: &str) -> Result<TempDir> {
        std::fs::create_dir_all(&self.config.paths.temp_dir)?;
        Ok(tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(&self.config.paths.temp_dir)?)
    }
}

/// Collections a run should process.
///
/// `explicit` comes from [`parse_collection_list`]; `None` selects every
/// collection the store reports.
fn select_collections(
    explicit: Option<Vec<String>>,
    available: &[String],
    what: &str,
) -> Result<Vec<String>> {
    let names = explicit.unwrap_or_else(|| available.to_vec());
    if names.is_empty() {
        return Err(TransferError::NoCollections(format!(
            "No collections found to {what}"
        )));
    }
    Ok(names)
}

/// Enumeration failure; fails the whole run
fn enumeration_error(err: StoreError) -> TransferError {
    TransferError::Generic(format!("Failed to list collections: {err}"))
}

/// Check whether the run was cancelled before the next collection
fn cancelled(cancel: &CancellationToken, next: &str) -> bool {
    if cancel.is_cancelled() {
        warn!("Run cancelled before {}", next);
        return true;
    }
    false
}

/// Whether `filename` is a name an export could have produced
fn is_downloadable_name(filename: &str) -> bool {
    let stem = filename
        .strip_suffix(ARCHIVE_EXT)
        .or_else(|| filename.strip_suffix(DOCUMENT_FILE_EXT));
    match stem {
        Some(stem) => {
            !stem.is_empty()
                && stem
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        }
        None => false,
    }
}

/// Resolve a finished export for download.
///
/// Only plain names of archives or JSON files are accepted, so a request
/// can never reach outside `exports_dir`.
pub fn resolve_download(exports_dir: &Path, filename: &str) -> Result<PathBuf> {
    if !is_downloadable_name(filename) {
        return Err(ConfigError::InvalidValue {
            field: "filename".to_string(),
            value: filename.to_string(),
        }
        .into());
    }

    let path = exports_dir.join(filename);
    if !path.is_file() {
        return Err(TransferError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("File not found: {filename}"),
        )));
    }
    Ok(path)
}

/// Download reference reported for a finished export
pub fn download_reference(filename: &str) -> String {
    format!("{DOWNLOAD_ROUTE}/{filename}")
}
