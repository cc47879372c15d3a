//! Discs and tracks.
//!
//! The unit of time in all objects is one audio frame, i.e. one sample
//! for each channel.
//!
//! Confusingly, the CD format has its own definition of frame. There
//! are 75 CD frames per second, each consisting of 588 audio frames.

use serde::{Deserialize, Serialize};

use crate::discid;
use crate::error::{CoreError, Result};

/// The fixed sample format of CD audio as stored in the archive:
/// 16-bit signed linear PCM, two channels, interleaved, big-endian.
pub mod pcm {
    pub const CHANNELS: usize = 2;
    pub const BYTES_PER_SAMPLE: usize = 2;
    pub const BYTES_PER_FRAME: usize = CHANNELS * BYTES_PER_SAMPLE;
    pub const RATE: u64 = 44_100;
    pub const BIG_ENDIAN: bool = true;

    pub const CD_FRAMES_PER_SECOND: u64 = 75;
    pub const AUDIO_FRAMES_PER_CD_FRAME: u64 = 588;

    /// Translate an MM:SS:FF string to a number of PCM audio frames.
    pub fn msf_to_frames(msf: &str) -> crate::error::Result<u64> {
        let mut parts = msf.split(':');
        let (m, s, f) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(s), Some(f), None) => (m, s, f),
            _ => return Err(crate::error::CoreError::BadMsf(msf.to_string())),
        };

        let parse = |p: &str| {
            p.parse::<u64>()
                .map_err(|_| crate::error::CoreError::BadMsf(msf.to_string()))
        };

        let (m, s, f) = (parse(m)?, parse(s)?, parse(f)?);
        Ok(((m * 60 + s) * CD_FRAMES_PER_SECOND + f) * AUDIO_FRAMES_PER_CD_FRAME)
    }
}

/// File suffix for the raw PCM archive files.
pub const RAW_CD_SUFFIX: &str = ".cdr";

/// One track on a disc and its offsets and indices.
///
/// All time values are in audio frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// Track number: 0 for a hidden track before the nominal first
    /// track, 1..N otherwise
    pub number: u32,

    /// Total length including any pregap
    pub length: u64,

    /// Where the index switches from 0 to 1
    #[serde(default)]
    pub pregap_offset: u64,

    /// Part of the pregap not contained in the data file at all
    #[serde(default)]
    pub pregap_silence: u64,

    /// Additional index offsets, relative to track start
    #[serde(default)]
    pub index: Vec<u64>,

    /// Position of this track's data in the disc data file, in frames
    pub file_offset: u64,

    /// Frames of this track actually present in the data file
    pub file_length: u64,

    #[serde(default)]
    pub isrc: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub artist: Option<String>,

    /// Skip this track during playback
    #[serde(default)]
    pub skip: bool,

    /// Pause the player when this track has finished
    #[serde(default)]
    pub pause_after: bool,
}

impl Default for Track {
    fn default() -> Self {
        Self {
            number: 0,
            length: 0,
            pregap_offset: 0,
            pregap_silence: 0,
            index: Vec::new(),
            file_offset: 0,
            file_length: 0,
            isrc: None,
            title: None,
            artist: None,
            skip: false,
            pause_after: false,
        }
    }
}

/// Alias link relationships between discs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    /// Playing this disc plays the linked disc instead
    Alias,
}

/// A CD as stored in the archive: identity, metadata and tracks.
///
/// All time values are in audio frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disc {
    /// MusicBrainz-convention disc id, computed from the basic TOC
    pub disc_id: String,

    #[serde(default)]
    pub catalog: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub artist: Option<String>,

    #[serde(default)]
    pub barcode: Option<String>,

    #[serde(default)]
    pub date: Option<String>,

    pub tracks: Vec<Track>,

    /// Audio has been fully ripped into the archive
    #[serde(default)]
    pub rip: bool,

    /// The full subchannel TOC has been read and merged
    #[serde(default)]
    pub toc: bool,

    pub data_file_name: String,

    #[serde(default)]
    pub link_type: Option<LinkType>,

    #[serde(default)]
    pub linked_disc_id: Option<String>,
}

impl Disc {
    /// Create an empty disc record for an id.
    pub fn new(disc_id: impl Into<String>, data_file_name: impl Into<String>) -> Self {
        Self {
            disc_id: disc_id.into(),
            catalog: None,
            title: None,
            artist: None,
            barcode: None,
            date: None,
            tracks: Vec::new(),
            rip: false,
            toc: false,
            data_file_name: data_file_name.into(),
            link_type: None,
            linked_disc_id: None,
        }
    }

    /// Append a track, numbering it after the current last track.
    pub fn add_track(&mut self, mut track: Track) {
        track.number = self.tracks.len() as u32 + 1;
        self.tracks.push(track);
    }

    /// Expected length of the file representing this disc, in frames.
    /// This assumes that the disc tracks have not been shuffled.
    pub fn file_size_frames(&self) -> u64 {
        match self.tracks.last() {
            Some(t) => t.file_offset + t.file_length,
            None => 0,
        }
    }

    /// Expected length of the file representing this disc, in bytes.
    pub fn file_size_bytes(&self) -> u64 {
        self.file_size_frames() * pcm::BYTES_PER_FRAME as u64
    }
}

/// The basic TOC read from the drive when a disc is inserted: the raw
/// track offsets and the leadout, all in CD frames counted from the
/// start of the disc (so the first track is usually at offset 150,
/// after the standard two second lead-in).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicToc {
    /// Start offset of each track, in CD frames
    pub offsets: Vec<u32>,

    /// Offset of the leadout, in CD frames
    pub leadout: u32,
}

impl BasicToc {
    /// Parse the output of a disc id helper command: whitespace
    /// separated `NTRACKS OFFSET... LEADOUT`, all in CD frames.
    pub fn parse(text: &str) -> Result<Self> {
        let mut fields = text.split_whitespace();

        let count: usize = fields
            .next()
            .ok_or_else(|| CoreError::disc_info("empty TOC line"))?
            .parse()
            .map_err(|_| CoreError::disc_info("bad track count in TOC line"))?;

        let numbers: Vec<u32> = fields
            .map(|f| {
                f.parse::<u32>()
                    .map_err(|_| CoreError::disc_info(format!("bad TOC offset: {f}")))
            })
            .collect::<Result<_>>()?;

        if count == 0 || count > 99 || numbers.len() != count + 1 {
            return Err(CoreError::disc_info(format!(
                "expected {} offsets and a leadout, got {} fields",
                count,
                numbers.len()
            )));
        }

        let toc = Self {
            offsets: numbers[..count].to_vec(),
            leadout: numbers[count],
        };

        for pair in toc.offsets.windows(2) {
            if pair[0] > pair[1] {
                return Err(CoreError::disc_info("track offsets must not decrease"));
            }
        }
        if let Some(last) = toc.offsets.last() {
            if *last > toc.leadout {
                return Err(CoreError::disc_info("leadout before last track"));
            }
        }

        Ok(toc)
    }

    /// The disc id of this TOC, per the MusicBrainz convention.
    pub fn disc_id(&self) -> String {
        discid::disc_id_from_toc(&self.offsets, self.leadout)
    }

    /// Build a disc record from the basic TOC. This is just start and
    /// length for each track, but is sufficient for playing a raw data
    /// file while the full TOC is still unknown.
    pub fn to_disc(&self, data_file_name: impl Into<String>) -> Result<Disc> {
        if self.offsets.is_empty() {
            return Err(CoreError::disc_info("no audio tracks on disc"));
        }

        let data_file_name = data_file_name.into();
        if !data_file_name.ends_with(RAW_CD_SUFFIX) {
            return Err(CoreError::disc_info(format!(
                "unknown file format: {data_file_name:?}"
            )));
        }

        let mut disc = Disc::new(self.disc_id(), data_file_name);

        for (i, &start) in self.offsets.iter().enumerate() {
            let end = self
                .offsets
                .get(i + 1)
                .copied()
                .unwrap_or(self.leadout);

            // The drive reports offsets including the standard 2 s
            // lead-in; remove it to get to the start of the data file.
            let file_start = start.saturating_sub(
                (2 * pcm::CD_FRAMES_PER_SECOND) as u32,
            ) as u64;
            let length = (end - start) as u64 * pcm::AUDIO_FRAMES_PER_CD_FRAME;

            let track = Track {
                file_offset: file_start * pcm::AUDIO_FRAMES_PER_CD_FRAME,
                length,
                file_length: length,
                ..Track::default()
            };
            disc.add_track(track);
        }

        Ok(disc)
    }
}

/// External view of a track, hiding file layout and exposing all
/// lengths as whole seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtTrack {
    pub number: u32,
    pub length: u64,
    #[serde(default)]
    pub pregap_offset: u64,
    #[serde(default)]
    pub index: Vec<u64>,
    #[serde(default)]
    pub isrc: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub skip: bool,
    #[serde(default)]
    pub pause_after: bool,
}

impl From<&Track> for ExtTrack {
    fn from(track: &Track) -> Self {
        Self {
            number: track.number,
            length: track.length / pcm::RATE,
            pregap_offset: track.pregap_offset / pcm::RATE,
            index: track.index.iter().map(|i| i / pcm::RATE).collect(),
            isrc: track.isrc.clone(),
            title: track.title.clone(),
            artist: track.artist.clone(),
            skip: track.skip,
            pause_after: track.pause_after,
        }
    }
}

/// External view of a disc, hiding file layout and exposing all
/// lengths as whole seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtDisc {
    pub disc_id: String,
    #[serde(default)]
    pub catalog: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    pub tracks: Vec<ExtTrack>,
}

impl From<&Disc> for ExtDisc {
    fn from(disc: &Disc) -> Self {
        Self {
            disc_id: disc.disc_id.clone(),
            catalog: disc.catalog.clone(),
            title: disc.title.clone(),
            artist: disc.artist.clone(),
            barcode: disc.barcode.clone(),
            date: disc.date.clone(),
            tracks: disc.tracks.iter().map(ExtTrack::from).collect(),
        }
    }
}
