//! codplayer core
//!
//! Platform-agnostic data model for the CD player: discs, tracks,
//! disc ids, TOC parsing and merging, and the published player state.
//!
//! This crate holds no threads and touches no devices; everything
//! here is plain data shared by the archive, playback and daemon
//! crates.

#![forbid(unsafe_code)]

pub mod discid;
pub mod error;
pub mod model;
pub mod packet;
pub mod state;
pub mod toc;

// Re-export commonly used types
pub use error::{CoreError, Result};
pub use model::{pcm, BasicToc, Disc, ExtDisc, ExtTrack, LinkType, Track};
pub use packet::{AudioPacket, PacketFlags, PacketIter, PACKETS_PER_SECOND};
pub use state::{PlayerState, RipPhase, RipState, State};
