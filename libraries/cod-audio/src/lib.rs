//! codplayer audio sink
//!
//! The realtime half of the player: a period ring buffer shared
//! between the transport and a device worker thread, the sink state
//! machine, and the ALSA output device behind a testable seam.

pub mod buffer;
pub mod device;
pub mod error;
pub mod file;
pub mod sink;
pub mod threaded;

#[cfg(target_os = "linux")]
pub mod alsa_dev;

pub use buffer::PeriodBuffer;
pub use device::{DeviceFormat, DeviceOpener, Negotiated, PcmDevice};
pub use error::{DeviceError, Result, SinkError, WriteError};
pub use file::FileSink;
pub use sink::{AddedPacket, DrainProgress, Sink, SinkState};
pub use threaded::ThreadedSink;

#[cfg(target_os = "linux")]
pub use alsa_dev::AlsaOpener;
