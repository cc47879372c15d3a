//! Error types for the disc archive

use thiserror::Error;

/// Result type alias using `ArchiveError`
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Archive errors
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The directory is not an archive, or has an unsupported version
    #[error("not a disc archive: {0}")]
    NotAnArchive(String),

    /// A disc or database id has the wrong shape
    #[error("invalid id: {0}")]
    InvalidId(String),

    /// A disc record already exists
    #[error("disc already exists: {0}")]
    DiscExists(String),

    /// A disc record is corrupt
    #[error("corrupt disc record {id}: {reason}")]
    CorruptDisc { id: String, reason: String },

    /// Core model errors
    #[error(transparent)]
    Core(#[from] cod_core::CoreError),

    /// Serialization errors
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
