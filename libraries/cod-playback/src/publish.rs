//! The seam between the player core and the wire adapters.
//!
//! The core publishes through this trait; the daemon forwards the
//! records to its sockets, and tests read them straight off a
//! channel.

use crossbeam_channel::{unbounded, Receiver, Sender};

use cod_core::{ExtDisc, RipState, State};

/// Publishes player state to whoever is listening.
pub trait StatePublisher: Send + Sync {
    /// Emitted on every state change, including per-second position
    /// ticks.
    fn publish_state(&self, state: &State);

    /// Emitted on every rip phase or progress change.
    fn publish_rip_state(&self, rip_state: &RipState);

    /// Emitted when the loaded disc changes. Always precedes the
    /// first state update referring to that disc.
    fn publish_disc(&self, disc: Option<&ExtDisc>);
}

/// One published record.
#[derive(Debug, Clone, PartialEq)]
pub enum Publication {
    State(State),
    RipState(RipState),
    Disc(Option<ExtDisc>),
}

/// A publisher pushing records onto a channel.
pub struct ChannelPublisher {
    tx: Sender<Publication>,
}

impl ChannelPublisher {
    pub fn new() -> (Self, Receiver<Publication>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl StatePublisher for ChannelPublisher {
    fn publish_state(&self, state: &State) {
        let _ = self.tx.send(Publication::State(state.clone()));
    }

    fn publish_rip_state(&self, rip_state: &RipState) {
        let _ = self.tx.send(Publication::RipState(rip_state.clone()));
    }

    fn publish_disc(&self, disc: Option<&ExtDisc>) {
        let _ = self.tx.send(Publication::Disc(disc.cloned()));
    }
}

/// A publisher that drops everything, for tests that don't care.
pub struct NullPublisher;

impl StatePublisher for NullPublisher {
    fn publish_state(&self, _state: &State) {}
    fn publish_rip_state(&self, _rip_state: &RipState) {}
    fn publish_disc(&self, _disc: Option<&ExtDisc>) {}
}
