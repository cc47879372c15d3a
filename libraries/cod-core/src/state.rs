//! The player states as visible to external users.

use serde::{Deserialize, Serialize};

/// Coarse player state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerState {
    /// The player isn't running
    Off,

    /// No disc is loaded in the player
    NoDisc,

    /// Disc has been loaded, waiting for streaming to start
    Working,

    /// Playing disc normally
    Play,

    /// Disc is currently paused
    Pause,

    /// Playing finished, but disc is still loaded
    Stop,
}

/// Player state as published to external users.
///
/// `position` counts whole seconds from track index 1, so positions
/// inside the pregap are negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub state: PlayerState,

    pub disc_id: Option<String>,

    /// The disc id that triggered the current play, which may be
    /// different from `disc_id` for aliased discs
    pub source_disc_id: Option<String>,

    /// Current track being played, counting from 1. 0 if stopped or
    /// no disc is loaded.
    pub track: u32,

    /// Number of tracks on the disc to be played. 0 if no disc is loaded.
    pub no_tracks: u32,

    /// Track index currently played. 0 for pregap, 1+ for main sections.
    pub index: u32,

    /// Current position in track in whole seconds
    pub position: i32,

    /// Length of current track in whole seconds, counting from index 1
    pub length: u32,

    pub error: Option<String>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            state: PlayerState::NoDisc,
            disc_id: None,
            source_disc_id: None,
            track: 0,
            no_tracks: 0,
            index: 0,
            position: 0,
            length: 0,
            error: None,
        }
    }
}

impl State {
    /// The OFF state published at shutdown.
    pub fn off() -> Self {
        Self {
            state: PlayerState::Off,
            ..Self::default()
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} disc: {:?} track: {}/{} index: {} position: {} length: {} error: {:?}",
            self.state,
            self.disc_id,
            self.track,
            self.no_tracks,
            self.index,
            self.position,
            self.length,
            self.error
        )
    }
}

/// Phase of the ripping process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RipPhase {
    /// No ripping is currently taking place
    Inactive,

    /// Audio data is being read
    Audio,

    /// TOC is being read
    Toc,
}

/// Ripping state as published to external users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RipState {
    pub state: RipPhase,

    pub disc_id: Option<String>,

    /// Percentage 0-100 for the current phase, or None if not known
    /// or not applicable
    pub progress: Option<u8>,

    /// The last ripping error, if any
    pub error: Option<String>,
}

impl Default for RipState {
    fn default() -> Self {
        Self {
            state: RipPhase::Inactive,
            disc_id: None,
            progress: None,
            error: None,
        }
    }
}

impl std::fmt::Display for RipState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} disc: {:?} progress: {:?} error: {:?}",
            self.state, self.disc_id, self.progress, self.error
        )
    }
}
