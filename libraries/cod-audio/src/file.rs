//! A simple sink writing the stream to a file, mainly for testing
//! and for running the player on machines without a sound card.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use cod_core::AudioPacket;

use crate::device::DeviceFormat;
use crate::error::Result;
use crate::sink::{AddedPacket, DrainProgress, Sink, SinkState};
use crate::SinkError;

struct FileInner {
    file: Option<File>,
    format: Option<DeviceFormat>,
    paused: bool,
}

/// Writes each stream to `stream_<timestamp>.cdr` in a directory.
///
/// With `play_speed` greater than zero the sink sleeps to simulate
/// playing at that multiple of real time; zero runs at full speed.
pub struct FileSink {
    dir: PathBuf,
    play_speed: u32,
    inner: Mutex<FileInner>,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>, play_speed: u32) -> Self {
        Self {
            dir: dir.into(),
            play_speed,
            inner: Mutex::new(FileInner {
                file: None,
                format: None,
                paused: false,
            }),
        }
    }
}

impl Sink for FileSink {
    fn start(&self, format: DeviceFormat) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();

        if inner.file.is_some() {
            return Err(SinkError::InvalidState {
                op: "start",
                state: SinkState::Playing,
            });
        }

        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let path = self.dir.join(format!("stream_{stamp}.cdr"));
        debug!(path = %path.display(), "file sink opening stream file");

        inner.file = Some(
            File::create(&path).map_err(|e| SinkError::Device(e.to_string()))?,
        );
        inner.format = Some(format);
        inner.paused = false;
        Ok(())
    }

    fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.file = None;
        inner.format = None;
        inner.paused = false;
    }

    fn pause(&self) -> bool {
        self.inner.lock().unwrap().paused = true;
        true
    }

    fn resume(&self) {
        self.inner.lock().unwrap().paused = false;
    }

    fn add_packet(&self, packet: &Arc<AudioPacket>, data: &[u8]) -> AddedPacket {
        // Simulate pausing
        loop {
            {
                let inner = self.inner.lock().unwrap();
                if inner.file.is_none() {
                    return AddedPacket {
                        stored: 0,
                        playing: None,
                        error: None,
                        closed: true,
                    };
                }
                if !inner.paused {
                    break;
                }
            }
            thread::sleep(Duration::from_millis(100));
        }

        let mut inner = self.inner.lock().unwrap();
        let format = inner.format.expect("format set in start");
        let write_result = match inner.file.as_mut() {
            Some(file) => file.write_all(data),
            None => {
                return AddedPacket {
                    stored: 0,
                    playing: None,
                    error: None,
                    closed: true,
                }
            }
        };

        if let Err(e) = write_result {
            warn!(error = %e, "file sink write failed");
            return AddedPacket {
                stored: 0,
                playing: Some(Arc::clone(packet)),
                error: Some(e.to_string()),
                closed: false,
            };
        }
        drop(inner);

        if self.play_speed > 0 {
            // Simulate real playing by sleeping
            let frames = data.len() / format.frame_bytes();
            let secs = frames as f64 / (format.rate as f64 * self.play_speed as f64);
            thread::sleep(Duration::from_secs_f64(secs));
        }

        AddedPacket {
            stored: data.len(),
            playing: Some(Arc::clone(packet)),
            error: None,
            closed: false,
        }
    }

    fn drain(&self) -> Option<DrainProgress> {
        // Nothing is buffered, so the stream is already complete
        self.stop();
        None
    }
}
