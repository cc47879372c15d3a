//! Audio packets: the unit flowing through the playback pipeline.
//!
//! A packet covers roughly 100 ms of PCM from a single track and
//! index. Packets never cross a track or pregap boundary, so the
//! transport can derive the published position directly from the
//! packet the sink reports as audible.

use crate::model::{pcm, Disc, Track};
use crate::state::{PlayerState, State};

/// Default packet rate of the pipeline, giving ~100 ms packets that
/// line up with the sink's device period.
pub const PACKETS_PER_SECOND: u64 = 10;

/// Flags carried by a packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketFlags {
    /// The transport should drain and pause before playing this packet
    pub pause_before: bool,

    /// The track asked the player to pause after it; set on the
    /// track's final packet
    pub pause_after: bool,

    /// Final packet of its track
    pub last_in_track: bool,

    /// Final packet of the whole stream
    pub last_in_stream: bool,
}

/// A packet of PCM audio coming from a single track and index.
///
/// All positions and lengths count audio frames.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPacket {
    /// Id of the disc this packet belongs to
    pub disc_id: String,

    /// The track's own number (0 for a hidden track); skipped tracks
    /// leave gaps in the sequence
    pub track_number: u32,

    /// Position of the track in the disc's track list
    pub track_idx: usize,

    /// Track index counting from 0 (0 = pregap)
    pub index: u32,

    /// Track position from the start of index 0
    pub abs_pos: u64,

    /// Track position from the start of index 1; negative inside the
    /// pregap
    pub rel_pos: i64,

    /// Position in the disc data file, or None if the packet is
    /// silence that is not stored in the file
    pub file_pos: Option<u64>,

    /// Absolute disc time of the packet start
    pub disc_pos: u64,

    /// Number of frames in the packet
    pub length: u64,

    /// Total length of the owning track
    pub track_length: u64,

    /// Pregap offset of the owning track
    pub track_pregap: u64,

    pub flags: PacketFlags,

    /// Sample data; filled in by the source streamer
    pub data: Vec<u8>,
}

impl AudioPacket {
    /// Describe the span of a track starting `abs_pos` frames into it.
    ///
    /// Computes the index, relative position and file position, but
    /// does not read any sample data.
    pub fn new(
        disc: &Disc,
        track_idx: usize,
        abs_pos: u64,
        length: u64,
        flags: PacketFlags,
    ) -> Self {
        let track = &disc.tracks[track_idx];
        debug_assert!(abs_pos + length <= track.length);

        let index = if abs_pos < track.pregap_offset {
            0
        } else {
            let mut index = 1;
            for &index_pos in &track.index {
                if abs_pos < index_pos {
                    break;
                }
                index += 1;
            }
            index
        };

        let file_pos = if abs_pos < track.pregap_silence {
            // In the silent part of the pregap that is not in the
            // data file at all
            debug_assert!(abs_pos + length <= track.pregap_silence);
            None
        } else {
            Some(track.file_offset + abs_pos - track.pregap_silence)
        };

        Self {
            disc_id: disc.disc_id.clone(),
            track_number: track.number,
            track_idx,
            index,
            abs_pos,
            rel_pos: abs_pos as i64 - track.pregap_offset as i64,
            file_pos,
            disc_pos: track.file_offset + abs_pos,
            length,
            track_length: track.length,
            track_pregap: track.pregap_offset,
            flags,
            data: Vec::new(),
        }
    }

    /// Size of the packet's sample data in bytes.
    pub fn byte_length(&self) -> usize {
        self.length as usize * pcm::BYTES_PER_FRAME
    }

    /// Position of the packet start in whole seconds from index 1,
    /// rounding towards the start of the disc.
    pub fn position_secs(&self) -> i32 {
        self.rel_pos.div_euclid(pcm::RATE as i64) as i32
    }

    /// Length of the owning track in whole seconds from index 1.
    pub fn track_secs(&self) -> u32 {
        ((self.track_length - self.track_pregap) / pcm::RATE) as u32
    }

    /// Derive a new published state from this packet, or None if the
    /// state would not change.
    pub fn update_state(&self, state: &State) -> Option<State> {
        let pos = self.position_secs();

        // New track or index
        if state.track != self.track_number || state.index != self.index {
            return Some(State {
                track: self.track_number,
                index: self.index,
                position: pos,
                length: self.track_secs(),
                ..state.clone()
            });
        }

        // Position changed by a whole second
        if pos != state.position {
            return Some(State {
                position: pos,
                ..state.clone()
            });
        }

        None
    }

    /// The initial state for a stream playing this disc.
    pub fn initial_state(disc: &Disc, source_disc_id: Option<&str>, state: PlayerState) -> State {
        State {
            state,
            disc_id: Some(disc.disc_id.clone()),
            source_disc_id: source_disc_id.map(str::to_string),
            no_tracks: disc.tracks.len() as u32,
            ..State::default()
        }
    }
}

/// Iterator describing a disc as a sequence of packets, starting at a
/// given track.
///
/// Packets never cross a track or pregap boundary. Tracks flagged
/// `skip` are omitted entirely, while their numbers stay visible as
/// gaps in the emitted sequence. A track flagged `pause_after` makes
/// the first packet of the following track carry `pause_before`.
///
/// The iterator only computes positions; reading sample data is the
/// source streamer's job.
pub struct PacketIter<'a> {
    disc: &'a Disc,
    track_idx: usize,
    abs_pos: u64,
    packet_frames: u64,
    pending_pause_before: bool,
}

impl<'a> PacketIter<'a> {
    /// Start at index 1 of `start_track` (skipping forward past any
    /// skip-flagged tracks).
    pub fn new(disc: &'a Disc, start_track: usize, packets_per_second: u64) -> Self {
        let mut iter = Self {
            disc,
            track_idx: start_track,
            abs_pos: 0,
            packet_frames: pcm::RATE / packets_per_second,
            pending_pause_before: false,
        };
        iter.skip_flagged();
        if let Some(track) = disc.tracks.get(iter.track_idx) {
            iter.abs_pos = track.pregap_offset;
        }
        iter
    }

    /// Start at a position within a track, in whole seconds counted
    /// from index 1. Negative positions land inside the pregap. The
    /// position is aligned down to a packet boundary.
    pub fn with_position(
        disc: &'a Disc,
        start_track: usize,
        position: i32,
        packets_per_second: u64,
    ) -> Self {
        let mut iter = Self::new(disc, start_track, packets_per_second);

        if let Some(track) = disc.tracks.get(iter.track_idx) {
            let rel = position as i64 * pcm::RATE as i64;
            let rel = rel
                .div_euclid(iter.packet_frames as i64)
                .saturating_mul(iter.packet_frames as i64);

            let abs = track.pregap_offset as i64 + rel;
            let max = track.length.saturating_sub(1) as i64;
            iter.abs_pos = abs.clamp(0, max) as u64;
        }

        iter
    }

    fn skip_flagged(&mut self) {
        while self
            .disc
            .tracks
            .get(self.track_idx)
            .is_some_and(|t| t.skip)
        {
            self.track_idx += 1;
        }
    }

    fn next_track(&mut self) {
        self.track_idx += 1;
        self.abs_pos = 0;
        self.skip_flagged();
    }

    fn has_later_track(&self) -> bool {
        self.disc
            .tracks
            .iter()
            .skip(self.track_idx + 1)
            .any(|t| !t.skip)
    }
}

impl<'a> Iterator for PacketIter<'a> {
    type Item = AudioPacket;

    fn next(&mut self) -> Option<AudioPacket> {
        loop {
            let track: &Track = self.disc.tracks.get(self.track_idx)?;

            let length = if self.abs_pos < track.pregap_offset {
                (track.pregap_offset - self.abs_pos).min(self.packet_frames)
            } else {
                (track.length - self.abs_pos).min(self.packet_frames)
            };

            if length == 0 {
                // Reached end of track, switch to the next one
                self.pending_pause_before = track.pause_after;
                self.next_track();
                continue;
            }

            let last_in_track = self.abs_pos + length == track.length;
            let has_later = self.has_later_track();

            let flags = PacketFlags {
                pause_before: std::mem::take(&mut self.pending_pause_before),
                pause_after: track.pause_after && last_in_track && has_later,
                last_in_track,
                last_in_stream: last_in_track && !has_later,
            };

            let packet = AudioPacket::new(self.disc, self.track_idx, self.abs_pos, length, flags);
            self.abs_pos += length;
            return Some(packet);
        }
    }
}
