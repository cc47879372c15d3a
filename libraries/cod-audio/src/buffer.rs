//! The period ring buffer between the transport and the device
//! worker.
//!
//! A plain data structure: all locking and waiting lives in the sink
//! that owns it. The buffer is partitioned into device periods, and
//! every period carries a reference to the packet that produced it so
//! the transport can report what is audible right now.

use std::sync::Arc;

use cod_core::AudioPacket;

use crate::error::DeviceError;

/// Seconds of audio the buffer holds.
pub const BUFFER_SECONDS: usize = 5;

/// Refuse device periods smaller than this allows.
pub const MAX_PERIODS_PER_SECOND: usize = 40;

/// Ring buffer of PCM bytes partitioned into whole device periods.
///
/// The producer appends at `data_end`, the consumer reads exactly one
/// period at `play_pos`. Both positions advance by whole periods,
/// except that the producer may leave a partial tail which
/// `pad_partial` zero-fills at drain.
#[derive(Debug, Default)]
pub struct PeriodBuffer {
    buffer: Vec<u8>,
    packets: Vec<Option<Arc<AudioPacket>>>,
    period_size: usize,
    play_pos: usize,
    data_end: usize,
    data_size: usize,
}

impl PeriodBuffer {
    /// Size the buffer for a negotiated device format: five seconds
    /// of audio, rounded down to a whole number of periods.
    pub fn configure(
        &mut self,
        rate: u32,
        channels: usize,
        period_frames: usize,
    ) -> Result<(), DeviceError> {
        if period_frames == 0 || rate as usize / period_frames >= MAX_PERIODS_PER_SECOND {
            return Err(DeviceError::new("period set by device is too small"));
        }

        let mut frames = rate as usize * BUFFER_SECONDS;
        frames -= frames % period_frames;

        self.period_size = period_frames * channels * 2;
        self.buffer = vec![0; frames * channels * 2];
        self.packets = vec![None; frames / period_frames];
        self.play_pos = 0;
        self.data_end = 0;
        self.data_size = 0;

        Ok(())
    }

    /// Whether the buffer has been configured for a device.
    pub fn is_configured(&self) -> bool {
        self.period_size != 0
    }

    pub fn period_size(&self) -> usize {
        self.period_size
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.data_size
    }

    pub fn is_empty(&self) -> bool {
        self.data_size == 0
    }

    pub fn is_full(&self) -> bool {
        self.data_size >= self.buffer.len()
    }

    /// Whether a whole period is ready for the consumer.
    pub fn has_period(&self) -> bool {
        self.period_size != 0 && self.data_size >= self.period_size
    }

    /// Copy as much of `data` as fits without wrapping the end of the
    /// buffer, tagging every period touched with `packet`. Returns
    /// the number of bytes copied.
    ///
    /// Even an append smaller than a period tags the period it lands
    /// in, so progress reporting keeps working at stream boundaries.
    pub fn append(&mut self, packet: &Arc<AudioPacket>, data: &[u8], swap_bytes: bool) -> usize {
        if data.is_empty() || self.is_full() {
            return 0;
        }

        let free = self.buffer.len() - self.data_size;
        let until_wrap = self.buffer.len() - self.data_end;
        let stored = data.len().min(free).min(until_wrap);

        let first_period = self.data_end / self.period_size;
        let mut last_period = (self.data_end + stored) / self.period_size;

        if swap_bytes {
            // Flip sample byte order by XOR-ing the destination
            // offset. The play side consumes whole periods, never odd
            // bytes, so writing the partner byte of a pair is safe.
            for (i, &byte) in data[..stored].iter().enumerate() {
                self.buffer[(self.data_end + i) ^ 1] = byte;
            }
        } else {
            self.buffer[self.data_end..self.data_end + stored].copy_from_slice(&data[..stored]);
        }

        self.data_end = (self.data_end + stored) % self.buffer.len();
        self.data_size += stored;

        // Always write at least one packet reference, even when the
        // append stays within one period
        if first_period == last_period {
            last_period = first_period + 1;
        }
        for slot in &mut self.packets[first_period..last_period] {
            *slot = Some(Arc::clone(packet));
        }

        stored
    }

    /// The period at the play position, if one is ready.
    pub fn peek_period(&self) -> Option<&[u8]> {
        if self.has_period() {
            Some(&self.buffer[self.play_pos..self.play_pos + self.period_size])
        } else {
            None
        }
    }

    /// Consume one period after a successful device write.
    pub fn advance_play(&mut self) {
        if self.has_period() {
            self.play_pos = (self.play_pos + self.period_size) % self.buffer.len();
            self.data_size -= self.period_size;
        }
    }

    /// Zero-pad a partial final period so the consumer always reads
    /// whole periods. Used at end of stream; a stream ending exactly
    /// on a period boundary needs no padding.
    pub fn pad_partial(&mut self) {
        let partial = self.data_end % self.period_size;
        if partial == 0 {
            return;
        }

        let pad = self.period_size - partial;
        // The pad cannot wrap: the buffer is a whole number of
        // periods and data_end sits mid-period
        self.buffer[self.data_end..self.data_end + pad].fill(0);
        self.data_end = (self.data_end + pad) % self.buffer.len();
        self.data_size += pad;
    }

    /// The packet that is audible now: the tag of the period at the
    /// play position. None when nothing is buffered.
    pub fn playing_packet(&self) -> Option<Arc<AudioPacket>> {
        if self.data_size > 0 && self.period_size != 0 {
            self.packets[self.play_pos / self.period_size].clone()
        } else {
            None
        }
    }

    /// Clear positions and drop all packet tags.
    pub fn reset(&mut self) {
        self.play_pos = 0;
        self.data_end = 0;
        self.data_size = 0;
        for slot in &mut self.packets {
            *slot = None;
        }
    }
}
