//! Collection snapshots and their on-disk encodings
//!
//! A document file is `{"collection": name, "count": n, "documents": [...]}`
//! in Extended JSON. For hand-made imports a bare JSON array of documents is
//! accepted too, as is a `.bson` file of concatenated BSON documents.

use std::io::Read;

use mongodb::bson::Document;

use crate::config::JsonMode;
use crate::error::{Result, TransferError};

use super::document::{from_extended_json, to_extended_json};
use super::index::IndexDescriptor;

/// Full contents of one collection captured by a single read
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSnapshot {
    name: String,
    documents: Vec<Document>,
}

impl CollectionSnapshot {
    pub fn new(name: impl Into<String>, documents: Vec<Document>) -> Self {
        Self {
            name: name.into(),
            documents,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn count(&self) -> usize {
        self.documents.len()
    }

    pub fn into_documents(self) -> Vec<Document> {
        self.documents
    }

    /// Encode as a document file
    pub fn to_file_json(&self, mode: JsonMode) -> serde_json::Value {
        let documents: Vec<serde_json::Value> = self
            .documents
            .iter()
            .map(|doc| to_extended_json(doc, mode))
            .collect();

        serde_json::json!({
            "collection": self.name,
            "count": self.documents.len(),
            "documents": documents,
        })
    }

    /// Decode a JSON document file.
    ///
    /// The collection name comes from the `collection` field when present,
    /// otherwise from `fallback_name` (the file stem).
    pub fn from_file_json(value: serde_json::Value, fallback_name: &str) -> Result<Self> {
        let (name, documents) = match value {
            serde_json::Value::Object(mut map) => {
                let name = match map.remove("collection") {
                    Some(serde_json::Value::String(name)) if !name.is_empty() => name,
                    _ => fallback_name.to_string(),
                };
                match map.remove("documents") {
                    Some(serde_json::Value::Array(items)) => (name, items),
                    _ => {
                        return Err(TransferError::Generic(format!(
                            "Invalid data format in {fallback_name}: missing documents array"
                        )));
                    }
                }
            }
            serde_json::Value::Array(items) => (fallback_name.to_string(), items),
            _ => {
                return Err(TransferError::Generic(format!(
                    "Invalid data format in {fallback_name}"
                )));
            }
        };

        let documents = documents
            .into_iter()
            .map(from_extended_json)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(name, documents))
    }

    /// Decode a stream of concatenated BSON documents.
    ///
    /// Length prefixes outside `5..=16 MiB` are rejected before any buffer
    /// is allocated.
    pub fn from_bson_reader<R: Read>(name: &str, mut reader: R) -> Result<Self> {
        let mut documents = Vec::new();
        loop {
            let mut len_bytes = [0u8; 4];
            match read_exact_or_eof(&mut reader, &mut len_bytes)? {
                false => break,
                true => {
                    let len = i32::from_le_bytes(len_bytes);
                    if !(5..=MAX_BSON_DOCUMENT_SIZE).contains(&len) {
                        return Err(TransferError::Bson(format!(
                            "invalid BSON document length {len} in {name}"
                        )));
                    }
                    let mut buf = Vec::with_capacity(len as usize);
                    buf.extend_from_slice(&len_bytes);
                    buf.resize(len as usize, 0);
                    reader.read_exact(&mut buf[4..]).map_err(|e| {
                        TransferError::Bson(format!("truncated BSON document in {name}: {e}"))
                    })?;
                    documents.push(Document::from_reader(buf.as_slice())?);
                }
            }
        }
        Ok(Self::new(name, documents))
    }
}

/// Largest document the server accepts
const MAX_BSON_DOCUMENT_SIZE: i32 = 16 * 1024 * 1024;

/// Fill `buf`, or report a clean end of stream before the first byte.
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(TransferError::Bson("truncated BSON length prefix".to_string()));
        }
        filled += n;
    }
    Ok(true)
}

/// Encode index descriptors as an index file
pub fn indexes_to_file_json(indexes: &[IndexDescriptor], mode: JsonMode) -> serde_json::Value {
    serde_json::Value::Array(indexes.iter().map(|i| i.to_extended_json(mode)).collect())
}

/// Decode an index file
pub fn indexes_from_file_json(value: serde_json::Value) -> Result<Vec<IndexDescriptor>> {
    match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(IndexDescriptor::from_extended_json)
            .collect(),
        _ => Err(TransferError::Generic(
            "index file must contain a JSON array".to_string(),
        )),
    }
}
