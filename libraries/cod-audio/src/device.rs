//! The seam between the sink worker and the actual audio hardware.
//!
//! The worker only ever talks to these traits, so tests can drive the
//! whole sink state machine without a sound card.

use crate::error::{DeviceError, WriteError};

/// The sample format requested from a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFormat {
    pub channels: usize,
    pub rate: u32,
    pub big_endian: bool,
}

impl DeviceFormat {
    /// Bytes per audio frame (all channels, 16-bit samples).
    pub fn frame_bytes(&self) -> usize {
        self.channels * 2
    }
}

/// What the device actually agreed to during parameter negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    /// Hardware period, in frames. May differ from the requested one.
    pub period_frames: usize,

    /// The device wants the opposite endianness, so samples must be
    /// byte-swapped on the copy into the ring buffer
    pub swap_bytes: bool,
}

/// An open, configured PCM device. Owned by the sink worker thread
/// and never shared.
pub trait PcmDevice {
    /// Write exactly one period. Returns the number of frames the
    /// device took.
    fn write_period(&mut self, data: &[u8], frames: usize) -> Result<usize, WriteError>;

    /// Attempt recovery after a recoverable write error. Returns
    /// false if the device is beyond help and should be closed.
    fn recover(&mut self, error: &WriteError) -> bool;

    /// Pause the hardware.
    fn pause(&mut self) -> Result<(), DeviceError>;

    /// Resume the paused hardware.
    fn unpause(&mut self) -> Result<(), DeviceError>;

    /// Play out everything buffered in the hardware, then stop.
    fn drain(&mut self) -> Result<(), DeviceError>;

    /// Discard everything buffered in the hardware and stop.
    fn discard(&mut self) -> Result<(), DeviceError>;
}

/// Opens and configures PCM devices. Moved into the sink worker
/// thread at construction.
pub trait DeviceOpener: Send {
    /// Open the device and negotiate hardware parameters for the
    /// given format. Channel count and rate are non-negotiable;
    /// endianness may be resolved by byte swapping.
    fn open(
        &mut self,
        format: &DeviceFormat,
    ) -> Result<(Box<dyn PcmDevice>, Negotiated), DeviceError>;
}
