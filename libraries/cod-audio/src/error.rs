//! Error types for the audio sink

use thiserror::Error;

use crate::sink::SinkState;

/// Result type alias using `SinkError`
pub type Result<T> = std::result::Result<T, SinkError>;

/// Sink errors
#[derive(Debug, Error)]
pub enum SinkError {
    /// An operation was called in a state that does not allow it
    #[error("{op}: invalid state {state:?}")]
    InvalidState { op: &'static str, state: SinkState },

    /// Only 16-bit samples are supported
    #[error("only supports 2 bytes per sample, got {0}")]
    UnsupportedSampleSize(usize),

    /// The audio device could not be used
    #[error("device error: {0}")]
    Device(String),
}

/// An error reported by the audio device, as a message suitable for
/// the published player state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DeviceError(pub String);

impl DeviceError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Result of a single period write to the device.
#[derive(Debug, Error)]
pub enum WriteError {
    /// Interrupted system call; recover and retry
    #[error("interrupted")]
    Interrupted,

    /// Buffer underrun; recover and retry
    #[error("underrun")]
    Underrun,

    /// Device suspended; recover and retry
    #[error("suspended")]
    Suspended,

    /// Anything else closes the device
    #[error("{0}")]
    Fatal(String),
}

impl WriteError {
    /// Whether a device recovery attempt is worthwhile.
    pub fn recoverable(&self) -> bool {
        !matches!(self, WriteError::Fatal(_))
    }
}
