use std::fmt;

use serde::{Deserialize, Serialize};

/// Server code for a unique index violation.
pub const DUPLICATE_KEY: i32 = 11000;

/// Legacy server code for a unique index violation on update.
pub const DUPLICATE_KEY_LEGACY: i32 = 11001;

/// Server code returned when a namespace does not exist.
pub const NAMESPACE_NOT_FOUND: i32 = 26;

/// Structured error information extracted from MongoDB errors.
///
/// This is serialized to JSON when a driver error is displayed, and is the
/// basis for classifying write failures in the store layer.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub(crate) error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) message: Option<String>,
}

impl ErrorInfo {
    /// Server error code, if the driver exposed one.
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    /// Human readable message.
    pub fn message(&self) -> String {
        self.message.clone().unwrap_or_default()
    }

    /// Whether this is a unique index violation.
    pub fn is_duplicate_key(&self) -> bool {
        self.code.is_some_and(is_duplicate_key_code)
    }

    /// Convert error info to compact JSON string (single line).
    pub fn to_json_compact(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// One document rejected by an unordered bulk insert.
#[derive(Debug, Clone)]
pub struct IndexedFailure {
    /// Position of the document within the submitted batch.
    pub index: usize,
    /// Server error code.
    pub code: i32,
    /// Server error message.
    pub message: String,
}

/// Whether a server code denotes a unique index violation.
pub fn is_duplicate_key_code(code: i32) -> bool {
    code == DUPLICATE_KEY || code == DUPLICATE_KEY_LEGACY
}

/// Format MongoDB error messages as compact JSON wrapped in an `error` field.
///
/// Used by the `Display` implementation for `TransferError::MongoDb`.
pub fn format_mongodb_error(
    f: &mut fmt::Formatter<'_>,
    error: &mongodb::error::Error,
) -> fmt::Result {
    let info = extract_error_info(error);
    let wrapper = serde_json::json!({ "error": info });
    let json_output = serde_json::to_string(&wrapper).map_err(|_| fmt::Error)?;
    write!(f, "{json_output}")
}

/// Extract structured information from a MongoDB error using the driver API.
pub fn extract_error_info(error: &mongodb::error::Error) -> ErrorInfo {
    use mongodb::error::{ErrorKind, WriteFailure};

    let mut info = ErrorInfo::default();

    match error.kind.as_ref() {
        ErrorKind::Write(write_failure) => {
            info.error_type = Some("mongo.write_error".to_string());

            match write_failure {
                WriteFailure::WriteError(write_error) => {
                    info.code = Some(write_error.code);
                    info.message = Some(write_error.message.clone());
                }
                WriteFailure::WriteConcernError(wc_error) => {
                    info.code = Some(wc_error.code);
                    info.message = Some(wc_error.message.clone());
                }
                _ => {}
            }
        }
        ErrorKind::Command(command_error) => {
            info.error_type = Some("mongo.command_error".to_string());
            info.code = Some(command_error.code);
            info.message = Some(command_error.message.clone());
        }
        ErrorKind::InsertMany(insert_error) => {
            info.error_type = Some("mongo.insert_many_error".to_string());

            if let Some(first_error) = insert_error.write_errors.as_ref().and_then(|e| e.first()) {
                info.code = Some(first_error.code);
                info.message = Some(first_error.message.clone());
            } else if let Some(wc_error) = &insert_error.write_concern_error {
                info.code = Some(wc_error.code);
                info.message = Some(wc_error.message.clone());
            }
        }
        ErrorKind::Authentication { message, .. } => {
            info.error_type = Some("mongo.authentication_error".to_string());
            info.message = Some(message.clone());
        }
        ErrorKind::InvalidArgument { message, .. } => {
            info.error_type = Some("mongo.invalid_argument".to_string());
            info.message = Some(message.clone());
        }
        ErrorKind::ServerSelection { message, .. } => {
            info.error_type = Some("mongo.server_selection_error".to_string());
            info.message = Some(message.clone());
        }
        _ => {
            info.message = Some(error.to_string());
        }
    }

    if let Some(code) = info.code {
        info.name = get_error_name(code);
    }

    info
}

/// Per-document failures of an unordered `insertMany`.
///
/// Returns `None` when the error is not a bulk insert error, or when the
/// server also reported a write concern failure (in which case no insert can
/// be considered confirmed).
pub fn extract_insert_many_failures(error: &mongodb::error::Error) -> Option<Vec<IndexedFailure>> {
    use mongodb::error::ErrorKind;

    match error.kind.as_ref() {
        ErrorKind::InsertMany(insert_error) if insert_error.write_concern_error.is_none() => {
            let failures = insert_error
                .write_errors
                .as_ref()
                .map(|errors| {
                    errors
                        .iter()
                        .map(|e| IndexedFailure {
                            index: e.index,
                            code: e.code,
                            message: e.message.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default();
            Some(failures)
        }
        _ => None,
    }
}

/// Get a human-readable error name from a MongoDB error code.
fn get_error_name(code: i32) -> Option<String> {
    let name = match code {
        DUPLICATE_KEY | DUPLICATE_KEY_LEGACY => "DuplicateKey",
        13 => "Unauthorized",
        18 => "AuthenticationFailed",
        NAMESPACE_NOT_FOUND => "NamespaceNotFound",
        50 => "MaxTimeMSExpired",
        85 => "IndexOptionsConflict",
        86 => "IndexKeySpecsConflict",
        121 => "DocumentValidationFailure",
        _ => return None,
    };

    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_key_codes() {
        assert!(is_duplicate_key_code(11000));
        assert!(is_duplicate_key_code(11001));
        assert!(!is_duplicate_key_code(26));
    }

    #[test]
    fn test_error_names() {
        assert_eq!(get_error_name(11000).as_deref(), Some("DuplicateKey"));
        assert_eq!(get_error_name(26).as_deref(), Some("NamespaceNotFound"));
        assert_eq!(get_error_name(1), None);
    }

    #[test]
    fn test_error_info_duplicate_flag() {
        let info = ErrorInfo {
            code: Some(11000),
            ..Default::default()
        };
        assert!(info.is_duplicate_key());
        assert!(info.to_json_compact().unwrap().contains("11000"));
    }
}
