//! Run requests and their structured results

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::UploadConfig;
use crate::engine::RunTotals;
use crate::error::{ConfigError, Result};
use crate::model::WritePolicy;

/// Parse a comma-separated collection list.
///
/// `None` or an empty string selects every collection; otherwise names are
/// trimmed and empty entries dropped, which can leave an empty list.
pub fn parse_collection_list(raw: Option<&str>) -> Option<Vec<String>> {
    match raw {
        Some(s) if !s.is_empty() => Some(
            s.split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from)
                .collect(),
        ),
        _ => None,
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(field.to_string()).into());
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub connection_target: String,
    pub database_name: String,
    pub collections: Option<String>,
}

impl ExportRequest {
    pub fn validate(&self) -> Result<()> {
        require("connection_target", &self.connection_target)?;
        require("database_name", &self.database_name)
    }
}

/// A file handed over for import. The engine deletes `path` when the run
/// ends, whatever the outcome.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub path: PathBuf,
    pub original_name: String,
    pub size: u64,
}

impl UploadedFile {
    /// Lowercased suffix of the original name that matches the allow-list
    fn matched_extension<'a>(&self, allowed: &'a [String]) -> Option<&'a str> {
        let name = self.original_name.to_lowercase();
        allowed
            .iter()
            .map(String::as_str)
            .find(|ext| name.ends_with(&ext.to_lowercase()))
    }

    /// Reject uploads with a disallowed extension or over the size limit
    pub fn validate(&self, rules: &UploadConfig) -> Result<()> {
        if self.matched_extension(&rules.allowed_extensions).is_none() {
            return Err(ConfigError::RejectedUpload(format!(
                "Invalid file type '{}'. Allowed: {}",
                self.original_name,
                rules.allowed_extensions.join(", ")
            ))
            .into());
        }
        if self.size > rules.max_size_bytes {
            return Err(ConfigError::RejectedUpload(format!(
                "File too large: {} bytes (limit {} bytes)",
                self.size, rules.max_size_bytes
            ))
            .into());
        }
        Ok(())
    }

    /// Plain file name of the upload, stripped of any directory part
    pub fn file_name(&self) -> &str {
        Path::new(&self.original_name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.original_name)
    }
}

#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub connection_target: String,
    pub database_name: String,
    pub import_mode: WritePolicy,
    pub upload: UploadedFile,
}

impl ImportRequest {
    pub fn validate(&self, rules: &UploadConfig) -> Result<()> {
        require("connection_target", &self.connection_target)?;
        require("database_name", &self.database_name)?;
        self.upload.validate(rules)
    }
}

#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub source_connection_target: String,
    pub target_connection_target: String,
    pub source_database_name: String,
    pub target_database_name: String,
    pub sync_mode: WritePolicy,
    /// Collections to copy; `None` copies every source collection
    pub collections: Option<Vec<String>>,
}

impl SyncRequest {
    pub fn validate(&self) -> Result<()> {
        require("source_connection_target", &self.source_connection_target)?;
        require("target_connection_target", &self.target_connection_target)?;
        require("source_database_name", &self.source_database_name)?;
        require("target_database_name", &self.target_database_name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub filename: String,
    pub database: String,
    pub collections: usize,
    pub total_documents: u64,
    pub file_size: u64,
    pub duration_ms: u64,
    pub download_reference: String,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub database: String,
    pub import_mode: WritePolicy,
    #[serde(flatten)]
    pub totals: RunTotals,
    pub original_file: String,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub source_database: String,
    pub target_database: String,
    pub sync_mode: WritePolicy,
    #[serde(flatten)]
    pub totals: RunTotals,
    pub cancelled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransferError;

    fn upload(name: &str, size: u64) -> UploadedFile {
        UploadedFile {
            path: PathBuf::from("/tmp/ignored"),
            original_name: name.to_string(),
            size,
        }
    }

    #[test]
    fn test_parse_collection_list() {
        assert_eq!(parse_collection_list(None), None);
        assert_eq!(parse_collection_list(Some("")), None);
        assert_eq!(
            parse_collection_list(Some(" users , ,orders,")),
            Some(vec!["users".to_string(), "orders".to_string()])
        );
        assert_eq!(parse_collection_list(Some(" , ")), Some(vec![]));
    }

    #[test]
    fn test_upload_allow_list() {
        let rules = UploadConfig::default();
        assert!(upload("backup.tar.zst", 10).validate(&rules).is_ok());
        assert!(upload("BACKUP.TZST", 10).validate(&rules).is_ok());
        assert!(upload("users.json", 10).validate(&rules).is_ok());
        assert!(upload("dump.bson", 10).validate(&rules).is_ok());

        let rejected = upload("backup.zip", 10).validate(&rules);
        assert!(matches!(
            rejected,
            Err(TransferError::Config(ConfigError::RejectedUpload(_)))
        ));
    }

    #[test]
    fn test_upload_size_limit() {
        let rules = UploadConfig {
            max_size_bytes: 100,
            ..UploadConfig::default()
        };
        assert!(upload("a.json", 100).validate(&rules).is_ok());
        assert!(upload("a.json", 101).validate(&rules).is_err());
    }

    #[test]
    fn test_required_fields() {
        let req = ExportRequest {
            connection_target: "mongodb://localhost".into(),
            database_name: "  ".into(),
            collections: None,
        };
        assert!(matches!(
            req.validate(),
            Err(TransferError::Config(ConfigError::MissingField(_)))
        ));
    }

    #[test]
    fn test_upload_file_name_strips_directories() {
        assert_eq!(upload("../../etc/users.json", 1).file_name(), "users.json");
    }
}
