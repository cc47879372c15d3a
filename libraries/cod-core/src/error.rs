//! Error types for the core data model

use thiserror::Error;

/// Result type alias using `CoreError`
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core data model errors
#[derive(Debug, Error)]
pub enum CoreError {
    /// A disc description is inconsistent or incomplete
    #[error("disc info error: {0}")]
    DiscInfo(String),

    /// A TOC file could not be parsed
    #[error("TOC error: {0}")]
    Toc(String),

    /// A disc or database id has the wrong shape
    #[error("invalid id: {0}")]
    InvalidId(String),

    /// An MM:SS:FF time was malformed
    #[error("bad MSF time: {0}")]
    BadMsf(String),

    /// Serialization errors
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Create a disc info error
    pub fn disc_info(msg: impl Into<String>) -> Self {
        Self::DiscInfo(msg.into())
    }

    /// Create a TOC error
    pub fn toc(msg: impl Into<String>) -> Self {
        Self::Toc(msg.into())
    }
}
