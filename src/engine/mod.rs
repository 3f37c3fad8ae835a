//! Replication engine
//!
//! The parts of a transfer that touch documents: the batch writer, the index
//! replicator and the run statistics they feed.

pub mod batch_writer;
pub mod index_replicator;
pub mod progress;
pub mod stats;

pub use batch_writer::{DEFAULT_BATCH_SIZE, apply};
pub use index_replicator::{IndexOutcome, replicate};
pub use progress::ProgressTracker;
pub use stats::{CollectionOutcome, DocumentError, RunStatistics, RunTotals, WriteOutcome};
