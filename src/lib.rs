//! mongo-transfer library
//!
//! Export, import and sync for MongoDB-compatible document stores, with
//! conflict-aware write policies and index replication.
//!
//! # Modules
//!
//! - `archive`: `.tar.zst` archive codec
//! - `cli`: Command-line interface and argument parsing
//! - `config`: Configuration management
//! - `connection`: MongoDB connection management
//! - `engine`: Batch writer, index replicator and run statistics
//! - `error`: Error types and handling
//! - `model`: Documents, snapshots, index descriptors, write policies, metadata
//! - `store`: Store traits with MongoDB and in-memory implementations
//! - `transfer`: Export, import and sync runs
//!
//! # Example
//!
//! ```no_run
//! use mongo_transfer::{Config, TransferEngine};
//! use mongo_transfer::store::MongoConnector;
//! use mongo_transfer::transfer::ExportRequest;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let engine = TransferEngine::new(MongoConnector::new(config.connection.clone()), config);
//!
//!     let request = ExportRequest {
//!         connection_target: "mongodb://localhost:27017".to_string(),
//!         database_name: "shop".to_string(),
//!         collections: None,
//!     };
//!     let summary = engine.export(&request, &CancellationToken::new()).await?;
//!     println!("wrote {}", summary.filename);
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod cli;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod model;
pub mod store;
pub mod transfer;

// Re-export commonly used types
pub use config::Config;
pub use engine::{CollectionOutcome, WriteOutcome};
pub use error::{Result, TransferError};
pub use model::WritePolicy;
pub use transfer::{TransferEngine, resolve_download};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
