//! The audio sink interface and its state token.

use std::sync::Arc;

use cod_core::AudioPacket;

use crate::device::DeviceFormat;
use crate::error::Result;

/// One-hot state token of a sink.
///
/// The states split into two arms: those in which the buffer is
/// active and `add_packet` may store data, and the open/close
/// transitions in which it may not. `accepts_data` carries that bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// Sink is closed. Set by the worker when reaching the end of
    /// the buffer in Draining or when detecting Closing.
    Closed,

    /// Waiting for the device to be opened. Set by `start()` in
    /// Closed.
    Starting,

    /// Playing normally. Set by the worker upon successfully opening
    /// the device in Starting.
    Playing,

    /// Pause requested. Set by `pause()` in Playing or Draining.
    Pausing,

    /// Paused. Set by the worker in Pausing when the pause takes
    /// effect.
    Paused,

    /// Resume requested. Set by `resume()` in Paused.
    Resume,

    /// Playing out the buffer tail. Set by `drain()` in Playing.
    Draining,

    /// Close requested. Set by `stop()` in any state except Closed
    /// and Shutdown.
    Closing,

    /// The whole sink is going away. Set by the destructor.
    Shutdown,
}

impl SinkState {
    /// Whether `add_packet` may store data in this state.
    pub fn accepts_data(self) -> bool {
        matches!(
            self,
            SinkState::Playing
                | SinkState::Pausing
                | SinkState::Paused
                | SinkState::Resume
                | SinkState::Draining
        )
    }
}

/// What `add_packet` observed by the time it returned.
#[derive(Debug)]
pub struct AddedPacket {
    /// Bytes of packet data stored into the sink buffer
    pub stored: usize,

    /// The packet currently audible, if known
    pub playing: Option<Arc<AudioPacket>>,

    /// The current device error, if any
    pub error: Option<String>,

    /// The sink stopped accepting data (stop() was called)
    pub closed: bool,
}

/// Progress report from `drain`.
#[derive(Debug)]
pub struct DrainProgress {
    pub playing: Option<Arc<AudioPacket>>,
    pub error: Option<String>,
}

/// An audio packet sink, typically a sound card.
///
/// `start`, `add_packet` and `drain` are only called from the
/// transport's sink thread; `pause`, `resume` and `stop` may be
/// called from any thread but never overlap each other.
pub trait Sink: Send + Sync {
    /// (Re)start the sink to play new audio. Valid only when closed.
    fn start(&self, format: DeviceFormat) -> Result<()>;

    /// Stop playing, discarding any buffered audio. A no-op when
    /// already closed.
    fn stop(&self);

    /// Pause playback. Returns true if the sink accepted the pause.
    fn pause(&self) -> bool;

    /// Resume after a pause.
    fn resume(&self);

    /// Add packet data to the sink, blocking until some of it is
    /// stored or the observable situation changes: the audible packet
    /// changed, the device error changed, or the sink closed. The
    /// tripwire return lets the transport publish state without
    /// polling.
    fn add_packet(&self, packet: &Arc<AudioPacket>, data: &[u8]) -> AddedPacket;

    /// Play out all buffered data. Returns None once everything has
    /// been played and the sink has closed; otherwise blocks with the
    /// same tripwire semantics as `add_packet` and reports progress.
    fn drain(&self) -> Option<DrainProgress>;
}
