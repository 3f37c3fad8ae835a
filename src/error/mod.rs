//! Error handling for transfer runs.
//!
//! Run-terminating failures are expressed as [`TransferError`]. Failures that
//! only affect one collection, batch or document never become errors here;
//! they are recorded as values in the run statistics.
//!
//! MongoDB driver errors are inspected through [`mongo::extract_error_info`]
//! so that duplicate key violations can be told apart from other write
//! failures.

pub mod kinds;
pub mod mongo;

// Re-export commonly used types
pub use kinds::{ArchiveError, ConfigError, ConnectionError, Result, TransferError};
pub use mongo::{ErrorInfo, IndexedFailure};
