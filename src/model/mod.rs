//! Data model shared by the engine and the orchestrator
//!
//! - `document`: identifier helpers and Extended JSON conversion
//! - `index`: secondary index descriptors
//! - `policy`: write policies
//! - `snapshot`: collection snapshots and document/index file encodings
//! - `metadata`: export metadata

pub mod document;
pub mod index;
pub mod metadata;
pub mod policy;
pub mod snapshot;

pub use document::{ID_FIELD, document_id};
pub use index::{IndexDescriptor, PRIMARY_INDEX_NAME};
pub use metadata::{ExportStat, METADATA_FILE, TransferMetadata};
pub use policy::WritePolicy;
pub use snapshot::CollectionSnapshot;

/// File name suffix of document files
pub const DOCUMENT_FILE_EXT: &str = ".json";

/// File name suffix of raw BSON document files
pub const BSON_FILE_EXT: &str = ".bson";

/// File name suffix of index files
pub const INDEX_FILE_SUFFIX: &str = "_indexes.json";

/// Document file name for a collection
pub fn document_file_name(collection: &str) -> String {
    format!("{collection}{DOCUMENT_FILE_EXT}")
}

/// Index file name for a collection
pub fn index_file_name(collection: &str) -> String {
    format!("{collection}{INDEX_FILE_SUFFIX}")
}

/// Whether a file holds a collection's documents (not metadata, not indexes)
pub fn is_document_file(name: &str) -> bool {
    name != METADATA_FILE
        && !name.ends_with(INDEX_FILE_SUFFIX)
        && (name.ends_with(DOCUMENT_FILE_EXT) || name.ends_with(BSON_FILE_EXT))
}

/// File name minus its document extension
pub fn file_stem(name: &str) -> &str {
    name.strip_suffix(DOCUMENT_FILE_EXT)
        .or_else(|| name.strip_suffix(BSON_FILE_EXT))
        .unwrap_or(name)
}

/// Serialize `(key, value)` pairs as a JSON object, keeping insertion order.
pub(crate) mod ordered {
    use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
    use serde::ser::{Serialize, Serializer};
    use std::fmt;
    use std::marker::PhantomData;

    #[allow(clippy::ptr_arg)]
    pub fn serialize<S, V>(entries: &Vec<(String, V)>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        V: Serialize,
    {
        serializer.collect_map(entries.iter().map(|(k, v)| (k, v)))
    }

    pub fn deserialize<'de, D, V>(deserializer: D) -> Result<Vec<(String, V)>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        struct PairsVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for PairsVisitor<V> {
            type Value = Vec<(String, V)>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((k, v)) = map.next_entry()? {
                    entries.push((k, v));
                }
                Ok(entries)
            }
        }

        deserializer.deserialize_map(PairsVisitor(PhantomData))
    }
}
