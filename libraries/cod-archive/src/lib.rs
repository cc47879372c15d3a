//! codplayer disc archive
//!
//! File-system storage of ripped discs: one directory per disc,
//! holding the raw PCM data, the TOC files and the user-editable disc
//! record. The ripper writes here, the source streamer reads here.

#![forbid(unsafe_code)]

pub mod database;
pub mod error;

pub use database::Database;
pub use error::{ArchiveError, Result};
