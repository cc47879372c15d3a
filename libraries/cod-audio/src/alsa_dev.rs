//! ALSA implementation of the device seam.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use tracing::debug;

use crate::device::{DeviceFormat, DeviceOpener, Negotiated, PcmDevice};
use crate::error::{DeviceError, WriteError};

/// Period size requested from the hardware: ~93 ms at 44.1 kHz. The
/// device may pick something else.
const PERIOD_FRAMES: i64 = 4096;
const PERIODS: u32 = 4;

/// Translate a bare card id to an ALSA card name.
fn translate_cardname(name: &str) -> String {
    if name.is_empty() || name == "default" {
        "default".to_string()
    } else if name.contains(':') {
        // A colon means it already is a real ALSA card name
        name.to_string()
    } else {
        format!("default:CARD={name}")
    }
}

/// Opens ALSA PCM playback devices.
pub struct AlsaOpener {
    card: String,
}

impl AlsaOpener {
    pub fn new(card: &str) -> Self {
        Self {
            card: translate_cardname(card),
        }
    }

    /// Open and immediately close the device, to surface access
    /// problems at startup.
    pub fn probe(&self) -> Result<(), DeviceError> {
        PCM::new(&self.card, Direction::Playback, false)
            .map(|_| ())
            .map_err(|e| DeviceError::new(e.to_string()))
    }
}

impl DeviceOpener for AlsaOpener {
    fn open(
        &mut self,
        format: &DeviceFormat,
    ) -> Result<(Box<dyn PcmDevice>, Negotiated), DeviceError> {
        debug!(card = %self.card, "opening alsa device");

        let pcm = PCM::new(&self.card, Direction::Playback, false)
            .map_err(|e| DeviceError::new(e.to_string()))?;

        let requested = if format.big_endian {
            Format::S16BE
        } else {
            Format::S16LE
        };
        let flipped = if format.big_endian {
            Format::S16LE
        } else {
            Format::S16BE
        };

        // Ask for the producer's endianness; if the card refuses, try
        // the opposite one and swap bytes on the way into the buffer
        let (period_frames, swap_bytes) = match negotiate(&pcm, format, requested) {
            Ok(period) => (period, false),
            Err(_) => {
                let period = negotiate(&pcm, format, flipped)
                    .map_err(|e| DeviceError::new(format_error(&e)))?;
                (period, true)
            }
        };

        let device = AlsaPcm {
            pcm,
            frame_bytes: format.frame_bytes(),
        };

        Ok((
            Box::new(device),
            Negotiated {
                period_frames,
                swap_bytes,
            },
        ))
    }
}

enum NegotiateError {
    Alsa(alsa::Error),
    Param(&'static str),
}

fn format_error(e: &NegotiateError) -> String {
    match e {
        NegotiateError::Alsa(e) => e.to_string(),
        NegotiateError::Param(p) => format!("couldn't set device param: {p}"),
    }
}

impl From<alsa::Error> for NegotiateError {
    fn from(e: alsa::Error) -> Self {
        NegotiateError::Alsa(e)
    }
}

/// Apply hardware parameters and verify what the card accepted.
/// Returns the period size the card settled on.
fn negotiate(
    pcm: &PCM,
    format: &DeviceFormat,
    sample_format: Format,
) -> Result<usize, NegotiateError> {
    {
        let hwp = HwParams::any(pcm)?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(sample_format)?;
        hwp.set_channels(format.channels as u32)?;
        hwp.set_rate(format.rate, ValueOr::Nearest)?;
        hwp.set_period_size(PERIOD_FRAMES, ValueOr::Nearest)?;
        hwp.set_periods(PERIODS, ValueOr::Nearest)?;
        pcm.hw_params(&hwp)?;
    }

    let hwp = pcm.hw_params_current()?;

    if hwp.get_format()? != sample_format {
        return Err(NegotiateError::Param("format"));
    }
    if hwp.get_channels()? != format.channels as u32 {
        return Err(NegotiateError::Param("channels"));
    }
    if hwp.get_rate()? != format.rate {
        return Err(NegotiateError::Param("rate"));
    }

    // Use whatever period size the card chose; the ring buffer sizing
    // decides if it is acceptable
    Ok(hwp.get_period_size()? as usize)
}

struct AlsaPcm {
    pcm: PCM,
    frame_bytes: usize,
}

impl PcmDevice for AlsaPcm {
    fn write_period(&mut self, data: &[u8], frames: usize) -> Result<usize, WriteError> {
        debug_assert_eq!(data.len(), frames * self.frame_bytes);

        let io = self.pcm.io_bytes();
        match io.writei(data) {
            Ok(n) => Ok(n),
            Err(e) => Err(match e.errno() {
                libc::EINTR => WriteError::Interrupted,
                libc::EPIPE => WriteError::Underrun,
                libc::ESTRPIPE => WriteError::Suspended,
                _ => WriteError::Fatal(e.to_string()),
            }),
        }
    }

    fn recover(&mut self, error: &WriteError) -> bool {
        let errno = match error {
            WriteError::Interrupted => libc::EINTR,
            WriteError::Underrun => libc::EPIPE,
            WriteError::Suspended => libc::ESTRPIPE,
            WriteError::Fatal(_) => return false,
        };
        self.pcm.recover(errno, true).is_ok()
    }

    fn pause(&mut self) -> Result<(), DeviceError> {
        self.pcm
            .pause(true)
            .map_err(|e| DeviceError::new(e.to_string()))
    }

    fn unpause(&mut self) -> Result<(), DeviceError> {
        self.pcm
            .pause(false)
            .map_err(|e| DeviceError::new(e.to_string()))
    }

    fn drain(&mut self) -> Result<(), DeviceError> {
        self.pcm.drain().map_err(|e| DeviceError::new(e.to_string()))
    }

    fn discard(&mut self) -> Result<(), DeviceError> {
        self.pcm.drop().map_err(|e| DeviceError::new(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cardname_translation() {
        assert_eq!(translate_cardname(""), "default");
        assert_eq!(translate_cardname("default"), "default");
        assert_eq!(translate_cardname("hw:1,0"), "hw:1,0");
        assert_eq!(translate_cardname("Intel"), "default:CARD=Intel");
    }
}
