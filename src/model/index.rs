//! Secondary index descriptors
//!
//! A descriptor is kept as the raw specification document reported by the
//! store (`key`, `name` and every option), so options this crate knows
//! nothing about still survive a transfer.

use mongodb::bson::Document;
use serde::{Deserialize, Serialize};

use crate::config::JsonMode;
use crate::error::{Result, TransferError};

use super::document::{from_extended_json, to_extended_json};

/// Name the server gives the implicit primary-key index
pub const PRIMARY_INDEX_NAME: &str = "_id_";

/// Fields the server assigns itself and rejects or ignores on creation
const SERVER_ASSIGNED_FIELDS: &[&str] = &["v", "ns"];

/// Store-independent description of one index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexDescriptor {
    spec: Document,
}

impl IndexDescriptor {
    /// Wrap a raw index specification document
    pub fn from_spec(spec: Document) -> Self {
        Self { spec }
    }

    /// Build a descriptor from key pattern, name and options
    pub fn new(key: Document, name: &str, options: Document) -> Self {
        let mut spec = Document::new();
        spec.insert("key", key);
        spec.insert("name", name);
        for (field, value) in options {
            if field != "key" && field != "name" {
                spec.insert(field, value);
            }
        }
        Self { spec }
    }

    /// Index name, if recorded
    pub fn name(&self) -> Option<&str> {
        self.spec.get_str("name").ok()
    }

    /// Key pattern (field order preserved)
    pub fn key(&self) -> Option<&Document> {
        self.spec.get_document("key").ok()
    }

    /// Whether this is the implicit primary-key index
    pub fn is_primary(&self) -> bool {
        self.name() == Some(PRIMARY_INDEX_NAME)
    }

    /// The full specification document
    pub fn spec(&self) -> &Document {
        &self.spec
    }

    /// Specification minus server-assigned bookkeeping fields
    pub fn creation_spec(&self) -> Document {
        let mut spec = self.spec.clone();
        for field in SERVER_ASSIGNED_FIELDS {
            spec.remove(*field);
        }
        spec
    }

    /// Entry for a raw `createIndexes` command; every option is passed
    /// through as recorded
    pub fn create_command_entry(&self) -> Result<Document> {
        if self.key().is_none() {
            return Err(TransferError::Bson(format!(
                "index {} has no key pattern",
                self.name().unwrap_or("<unnamed>")
            )));
        }
        Ok(self.creation_spec())
    }

    /// Extended JSON form for index files
    pub fn to_extended_json(&self, mode: JsonMode) -> serde_json::Value {
        to_extended_json(&self.spec, mode)
    }

    /// Parse from an index file entry
    pub fn from_extended_json(value: serde_json::Value) -> Result<Self> {
        Ok(Self {
            spec: from_extended_json(value)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn test_primary_detection() {
        let primary = IndexDescriptor::new(doc! { "_id": 1 }, "_id_", Document::new());
        let email = IndexDescriptor::new(doc! { "email": 1 }, "email_1", doc! { "unique": true });
        assert!(primary.is_primary());
        assert!(!email.is_primary());
    }

    #[test]
    fn test_key_order_preserved() {
        let idx = IndexDescriptor::new(
            doc! { "lastName": 1, "firstName": -1, "age": 1 },
            "name_age",
            Document::new(),
        );
        let keys: Vec<&String> = idx.key().unwrap().keys().collect();
        assert_eq!(keys, vec!["lastName", "firstName", "age"]);
    }

    #[test]
    fn test_creation_spec_strips_server_fields() {
        let idx = IndexDescriptor::from_spec(doc! {
            "v": 2,
            "key": { "email": 1 },
            "name": "email_1",
            "ns": "app.users",
            "unique": true,
        });
        let spec = idx.creation_spec();
        assert!(!spec.contains_key("v"));
        assert!(!spec.contains_key("ns"));
        assert_eq!(spec.get_bool("unique").unwrap(), true);
    }

    #[test]
    fn test_create_command_entry_keeps_unknown_options() {
        let idx = IndexDescriptor::from_spec(doc! {
            "v": 2,
            "key": { "a": 1 },
            "name": "a_1",
            "prepareUnique": true,
            "unique": true,
            "expireAfterSeconds": 3600,
        });
        assert_eq!(
            idx.create_command_entry().unwrap(),
            doc! {
                "key": { "a": 1 },
                "name": "a_1",
                "prepareUnique": true,
                "unique": true,
                "expireAfterSeconds": 3600,
            }
        );
    }

    #[test]
    fn test_missing_key_rejected() {
        let idx = IndexDescriptor::from_spec(doc! { "name": "broken" });
        assert!(idx.create_command_entry().is_err());
    }
}
