use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode {}: {message}", path.display())]
    Json { path: PathBuf, message: String },

    #[error("corrupt record {}: {message}", path.display())]
    Corrupt { path: PathBuf, message: String },

    #[error("unsupported conflict file schema version {found} (expected {expected})")]
    WrongSchema { expected: u32, found: u32 },
}

pub type Result<T> = std::result::Result<T, StorageError>;
