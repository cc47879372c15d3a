//! Error types for the player core

use thiserror::Error;

/// A command failed: unknown, bad argument, or not allowed in the
/// current player state. Returned to the sender; never alters state.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct CommandError(pub String);

impl CommandError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Errors from an audio packet source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The data file could not be opened
    #[error("error opening file {path}: {reason}")]
    Open { path: String, reason: String },

    /// Reading from the data file failed
    #[error("error reading from file {path}: {reason}")]
    Read { path: String, reason: String },

    /// The file ended before the disc did
    #[error("unexpected end of file, expected at least {missing} more bytes")]
    UnexpectedEof { missing: u64 },
}

/// Errors from the ripping process.
#[derive(Debug, Error)]
pub enum RipError {
    /// The physical disc could not be read
    #[error("error reading disc in {device}: {reason}")]
    DiscRead { device: String, reason: String },

    /// A rip helper program could not be executed
    #[error("error executing command {command:?}: {reason}")]
    Exec { command: String, reason: String },

    /// A rip helper program failed
    #[error("{phase} ripping failed: status {status}")]
    ChildFailed { phase: &'static str, status: i32 },

    /// A rip helper program exceeded its time budget
    #[error("{phase} ripping timed out")]
    Timeout { phase: &'static str },

    /// The freshly read TOC could not be used
    #[error("error reading TOC: {0}")]
    Toc(#[from] cod_core::CoreError),

    /// Archive errors during the rip
    #[error(transparent)]
    Archive(#[from] cod_archive::ArchiveError),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
