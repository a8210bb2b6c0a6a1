//! Durable state of the sync core: the per-artifact IR version log and the unresolved
//! conflict file. Both live under the configured storage root.

mod conflict_file;
mod error;
mod ir_store;

pub use conflict_file::{ConflictFile, CONFLICT_FILE_SCHEMA_VERSION};
pub use error::{Result, StorageError};
pub use ir_store::{IrStore, IrVersion};
