//! codplayer player core
//!
//! The pieces between the archive and the audio sink: the packet
//! source streamer, the transport with its worker threads, the
//! ripper supervising the external rip helpers, and the player
//! supervisor tying them together behind a command interface.

pub mod error;
pub mod player;
pub mod publish;
pub mod ripper;
pub mod source;
pub mod transport;

pub use error::{CommandError, RipError, SourceError};
pub use player::{Command, CommandRequest, Player, PlayerOptions, Reply};
pub use publish::{ChannelPublisher, NullPublisher, Publication, StatePublisher};
pub use ripper::{Ripper, RipperConfig};
pub use source::{Fetch, PcmDiscSource};
pub use transport::Transport;
