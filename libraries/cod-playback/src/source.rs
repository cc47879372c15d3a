//! Streaming audio packets from an archived disc file.
//!
//! The file may still be growing under the ripper; the stream then
//! waits for bytes to appear, bounded by a poll interval, until
//! either data arrives or the rip is known to have stopped.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::debug;

use cod_core::{pcm, AudioPacket, Disc, ExtDisc, PacketIter, PlayerState, State, PACKETS_PER_SECOND};

use crate::error::SourceError;

/// How long to wait for the ripper before looking again.
pub const DEFAULT_RIP_POLL: Duration = Duration::from_secs(1);

/// A source of audio packets for one archived disc.
pub struct PcmDiscSource {
    disc: Disc,
    source_disc_id: Option<String>,
    path: PathBuf,
    rip_active: Option<Arc<AtomicBool>>,
    rip_poll: Duration,
}

/// One step of the stream.
#[derive(Debug)]
pub enum Fetch {
    /// A packet with its data filled in
    Packet(AudioPacket),

    /// Nothing available yet (file still being ripped); try again
    Stalled,

    /// The disc has ended
    End,
}

impl PcmDiscSource {
    pub fn new(
        disc: Disc,
        source_disc_id: Option<String>,
        path: PathBuf,
        rip_active: Option<Arc<AtomicBool>>,
    ) -> Self {
        Self {
            disc,
            source_disc_id,
            path,
            rip_active,
            rip_poll: DEFAULT_RIP_POLL,
        }
    }

    /// Use a different poll interval when waiting on the ripper.
    pub fn with_rip_poll(mut self, poll: Duration) -> Self {
        self.rip_poll = poll;
        self
    }

    pub fn disc(&self) -> &Disc {
        &self.disc
    }

    pub fn ext_disc(&self) -> ExtDisc {
        ExtDisc::from(&self.disc)
    }

    pub fn source_disc_id(&self) -> Option<&str> {
        self.source_disc_id.as_deref()
    }

    /// The state to publish when this source starts playing.
    pub fn initial_state(&self, player_state: PlayerState) -> State {
        AudioPacket::initial_state(&self.disc, self.source_disc_id.as_deref(), player_state)
    }

    fn ripping(&self) -> bool {
        self.rip_active
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Open a packet stream starting at `position` seconds into the
    /// track at `start_track` (an index into the track list).
    pub fn open(&self, start_track: usize, position: i32) -> PacketStream<'_> {
        debug!(
            disc_id = %self.disc.disc_id,
            start_track,
            position,
            "opening packet stream"
        );

        PacketStream {
            source: self,
            iter: PacketIter::with_position(&self.disc, start_track, position, PACKETS_PER_SECOND),
            file: None,
        }
    }
}

/// A lazy stream of packets over the disc data file.
pub struct PacketStream<'a> {
    source: &'a PcmDiscSource,
    iter: PacketIter<'a>,
    file: Option<File>,
}

impl<'a> PacketStream<'a> {
    /// Advance the stream by at most one packet's worth of reading.
    pub fn fetch(&mut self) -> Result<Fetch, SourceError> {
        if self.file.is_none() {
            // The ripping process might not have created the file yet
            match File::open(&self.source.path) {
                Ok(file) => self.file = Some(file),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound && self.source.ripping() => {
                    thread::sleep(self.source.rip_poll);
                    return Ok(Fetch::Stalled);
                }
                Err(e) => {
                    return Err(SourceError::Open {
                        path: self.source.path.display().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        match self.iter.next() {
            None => Ok(Fetch::End),
            Some(mut packet) => {
                self.read_packet_data(&mut packet)?;
                Ok(Fetch::Packet(packet))
            }
        }
    }

    /// Fill the packet with data from the file, waiting on the ripper
    /// when the file is still short.
    fn read_packet_data(&mut self, packet: &mut AudioPacket) -> Result<(), SourceError> {
        let wanted = packet.byte_length();

        let Some(file_pos) = packet.file_pos else {
            // Silence that is not stored in the data file
            packet.data = vec![0; wanted];
            return Ok(());
        };

        let file = self.file.as_mut().expect("file opened in fetch");
        let mut data = vec![0; wanted];
        let mut offset = 0;
        let mut byte_pos = file_pos * pcm::BYTES_PER_FRAME as u64;

        loop {
            file.seek(SeekFrom::Start(byte_pos))
                .map_err(|e| SourceError::Read {
                    path: self.source.path.display().to_string(),
                    reason: e.to_string(),
                })?;

            let got = read_fully(file, &mut data[offset..]).map_err(|e| SourceError::Read {
                path: self.source.path.display().to_string(),
                reason: e.to_string(),
            })?;

            offset += got;
            byte_pos += got as u64;

            if offset >= wanted {
                packet.data = data;
                return Ok(());
            }

            // Short read: wait for the ripper to catch up, or give up
            // if it is no longer running
            if !self.source.ripping() {
                return Err(SourceError::UnexpectedEof {
                    missing: (wanted - offset) as u64,
                });
            }

            thread::sleep(self.source.rip_poll);
        }
    }
}

/// Read until the buffer is full or EOF.
fn read_fully(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match file.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cod_core::model::Track;
    use std::io::Write;

    const SECOND: u64 = pcm::RATE;

    fn small_disc(track_frames: &[u64]) -> Disc {
        let mut disc = Disc::new("testId", "disc.cdr");
        let mut offset = 0;
        for &frames in track_frames {
            disc.add_track(Track {
                file_offset: offset,
                file_length: frames,
                length: frames,
                ..Track::default()
            });
            offset += frames;
        }
        disc
    }

    fn write_pcm(path: &std::path::Path, frames: u64) {
        let mut file = File::create(path).unwrap();
        let bytes: Vec<u8> = (0..frames * 4).map(|i| (i % 251) as u8).collect();
        file.write_all(&bytes).unwrap();
    }

    #[test]
    fn streams_whole_disc() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disc.cdr");

        let disc = small_disc(&[SECOND / 2, SECOND / 2]);
        write_pcm(&path, SECOND);

        let source = PcmDiscSource::new(disc, None, path, None);
        let mut stream = source.open(0, 0);

        let mut packets = Vec::new();
        loop {
            match stream.fetch().unwrap() {
                Fetch::Packet(p) => packets.push(p),
                Fetch::End => break,
                Fetch::Stalled => panic!("no rip in progress"),
            }
        }

        assert_eq!(packets.len(), 10);
        assert!(packets.iter().all(|p| p.data.len() == p.byte_length()));

        // The data really is the file contents, in order
        let all: Vec<u8> = packets.iter().flat_map(|p| p.data.clone()).collect();
        let expected: Vec<u8> = (0..SECOND * 4).map(|i| (i % 251) as u8).collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn missing_file_without_rip_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let disc = small_disc(&[SECOND]);

        let source = PcmDiscSource::new(disc, None, dir.path().join("disc.cdr"), None);
        let mut stream = source.open(0, 0);

        assert!(matches!(stream.fetch(), Err(SourceError::Open { .. })));
    }

    #[test]
    fn short_file_without_rip_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disc.cdr");

        let disc = small_disc(&[SECOND]);
        write_pcm(&path, SECOND / 4);

        let source = PcmDiscSource::new(disc, None, path, None);
        let mut stream = source.open(0, 0);

        let result = loop {
            match stream.fetch() {
                Ok(Fetch::Packet(_)) => continue,
                other => break other,
            }
        };
        assert!(matches!(result, Err(SourceError::UnexpectedEof { .. })));
    }

    #[test]
    fn waits_for_growing_file_during_rip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disc.cdr");

        let disc = small_disc(&[SECOND / 2]);
        let rip_active = Arc::new(AtomicBool::new(true));

        let source = PcmDiscSource::new(
            disc,
            None,
            path.clone(),
            Some(Arc::clone(&rip_active)),
        )
        .with_rip_poll(Duration::from_millis(10));

        // Rip the file into existence in the background
        let writer = {
            let rip_active = Arc::clone(&rip_active);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                write_pcm(&path, SECOND / 4);
                thread::sleep(Duration::from_millis(50));
                write_pcm(&path, SECOND / 2);
                rip_active.store(false, Ordering::SeqCst);
            })
        };

        let mut stream = source.open(0, 0);
        let mut stalls = 0;
        let mut packets = Vec::new();

        loop {
            match stream.fetch().unwrap() {
                Fetch::Packet(p) => packets.push(p),
                Fetch::Stalled => stalls += 1,
                Fetch::End => break,
            }
        }

        writer.join().unwrap();
        assert_eq!(packets.len(), 5);
        assert!(stalls > 0);
    }

    #[test]
    fn silent_pregap_reads_zeroes_without_file_access() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disc.cdr");

        let mut disc = small_disc(&[SECOND]);
        {
            let t = &mut disc.tracks[0];
            t.pregap_offset = SECOND / 2;
            t.pregap_silence = SECOND / 2;
            t.length += SECOND / 2;
        }
        write_pcm(&path, SECOND);

        let source = PcmDiscSource::new(disc, None, path, None);
        let mut stream = source.open(0, -1);

        let first = match stream.fetch().unwrap() {
            Fetch::Packet(p) => p,
            other => panic!("expected packet, got {other:?}"),
        };

        assert_eq!(first.index, 0);
        assert!(first.data.iter().all(|&b| b == 0));
    }
}
