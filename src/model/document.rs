//! Document helpers and Extended JSON conversion
//!
//! Documents are plain `bson::Document`s; no schema is assumed. The only
//! reserved field is `_id`.

use mongodb::bson::{Bson, Document};

use crate::config::JsonMode;
use crate::error::{Result, TransferError};

/// Reserved identifier field
pub const ID_FIELD: &str = "_id";

/// Identifier of a document, if it carries one.
///
/// A `null` `_id` is treated as absent so the store assigns a fresh one.
pub fn document_id(doc: &Document) -> Option<&Bson> {
    match doc.get(ID_FIELD) {
        None | Some(Bson::Null) | Some(Bson::Undefined) => None,
        Some(id) => Some(id),
    }
}

/// Whether the document carries an `_id` field set to `null` or `undefined`
pub fn has_null_id(doc: &Document) -> bool {
    matches!(doc.get(ID_FIELD), Some(Bson::Null) | Some(Bson::Undefined))
}

/// Copy of `doc` without a `null`/`undefined` `_id`; the server stores such
/// an `_id` literally instead of assigning one.
pub fn strip_null_id(doc: &Document) -> Document {
    let mut stripped = doc.clone();
    if has_null_id(&stripped) {
        stripped.remove(ID_FIELD);
    }
    stripped
}

/// Render an identifier for logs and error details.
pub fn describe_id(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Convert a document to Extended JSON.
pub fn to_extended_json(doc: &Document, mode: JsonMode) -> serde_json::Value {
    let bson = Bson::Document(doc.clone());
    match mode {
        JsonMode::Canonical => bson.into_canonical_extjson(),
        JsonMode::Relaxed => bson.into_relaxed_extjson(),
    }
}

/// Parse a document from Extended JSON (canonical or relaxed).
pub fn from_extended_json(value: serde_json::Value) -> Result<Document> {
    match Bson::try_from(value)? {
        Bson::Document(doc) => Ok(doc),
        other => Err(TransferError::Bson(format!(
            "expected a document, found {:?}",
            other.element_type()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{doc, oid::ObjectId};

    #[test]
    fn test_strip_null_id() {
        assert_eq!(
            strip_null_id(&doc! { "_id": Bson::Null, "x": 1 }),
            doc! { "x": 1 }
        );
        assert_eq!(
            strip_null_id(&doc! { "_id": 7, "x": 1 }),
            doc! { "_id": 7, "x": 1 }
        );
    }

    #[test]
    fn test_document_id_presence() {
        let oid = ObjectId::new();
        assert_eq!(document_id(&doc! { "_id": oid }), Some(&Bson::ObjectId(oid)));
        assert_eq!(document_id(&doc! { "name": "x" }), None);
        assert_eq!(document_id(&doc! { "_id": Bson::Null }), None);
        assert!(has_null_id(&doc! { "_id": Bson::Undefined }));
        assert!(!has_null_id(&doc! { "x": 1 }));
    }

    #[test]
    fn test_extended_json_preserves_types() {
        let oid = ObjectId::new();
        let original = doc! { "_id": oid, "count": 5_i64, "small": 1_i32, "name": "Alice" };

        let json = to_extended_json(&original, JsonMode::Canonical);
        let parsed = from_extended_json(json).unwrap();

        assert_eq!(parsed, original);
        assert_eq!(parsed.get_i64("count").unwrap(), 5);
        assert_eq!(parsed.get_object_id("_id").unwrap(), oid);
    }

    #[test]
    fn test_relaxed_json_keeps_object_id() {
        let oid = ObjectId::new();
        let json = to_extended_json(&doc! { "_id": oid }, JsonMode::Relaxed);
        assert_eq!(json["_id"]["$oid"], oid.to_hex());
        let parsed = from_extended_json(json).unwrap();
        assert_eq!(parsed.get_object_id("_id").unwrap(), oid);
    }

    #[test]
    fn test_non_document_rejected() {
        assert!(from_extended_json(serde_json::json!([1, 2])).is_err());
    }

    #[test]
    fn test_describe_id() {
        assert_eq!(describe_id(&Bson::String("user-1".into())), "user-1");
        assert_eq!(describe_id(&Bson::Int32(7)), "7");
    }
}
