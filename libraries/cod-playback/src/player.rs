//! The player supervisor: owns the coarse state machine, dispatches
//! commands to the transport, and supervises the ripper.
//!
//! This is the only component that publishes RipState; the transport
//! publishes State on its behalf as playback progresses.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{select, tick, Receiver, Sender};
use tracing::{debug, info, warn};

use cod_archive::Database;
use cod_core::{discid, Disc, ExtDisc, LinkType, RipState, State};

use crate::error::CommandError;
use crate::publish::StatePublisher;
use crate::ripper::{eject_disc, Ripper, RipperConfig};
use crate::source::PcmDiscSource;
use crate::transport::Transport;

/// A command received from the wire or a test harness.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Play the inserted physical disc (None) or an archived disc by
    /// id (Some)
    Disc(Option<String>),
    Play,
    Pause,
    PlayPause,
    Stop,
    Next,
    Prev,
    PlayTrack(u32),
    Seek(i32),
    Eject,
    /// The disc is already out of the drive (hardware notification)
    Ejected,
    Quit,
    State,
    RipState,
    Source,
    Version,
}

impl Command {
    /// Parse a command from its wire form: one word per frame.
    pub fn parse(parts: &[String]) -> Result<Self, CommandError> {
        let name = parts
            .first()
            .ok_or_else(|| CommandError::new("empty command"))?;

        let no_args = |cmd: Command| {
            if parts.len() == 1 {
                Ok(cmd)
            } else {
                Err(CommandError::new(format!(
                    "{name} takes no arguments"
                )))
            }
        };

        match name.as_str() {
            "disc" => Ok(Command::Disc(parts.get(1).cloned())),
            "play" => no_args(Command::Play),
            "pause" => no_args(Command::Pause),
            "play_pause" => no_args(Command::PlayPause),
            "stop" => no_args(Command::Stop),
            "next" => no_args(Command::Next),
            "prev" => no_args(Command::Prev),
            "play_track" => {
                let n = parts
                    .get(1)
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| CommandError::new("play_track needs a track number"))?;
                Ok(Command::PlayTrack(n))
            }
            "seek" => {
                let t = parts
                    .get(1)
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| CommandError::new("seek needs a position in seconds"))?;
                Ok(Command::Seek(t))
            }
            "eject" => no_args(Command::Eject),
            "ejected" => no_args(Command::Ejected),
            "quit" => no_args(Command::Quit),
            "state" => no_args(Command::State),
            "rip_state" => no_args(Command::RipState),
            "source" => no_args(Command::Source),
            "version" => no_args(Command::Version),
            other => Err(CommandError::new(format!("unknown command: {other}"))),
        }
    }
}

/// A typed command reply, serialised by the wire adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    State(State),
    RipState(RipState),
    Disc(Option<ExtDisc>),
    Ok(Option<serde_json::Value>),
}

/// A command plus an optional reply channel (None for fire-and-forget
/// queues).
pub struct CommandRequest {
    pub command: Command,
    pub reply: Option<Sender<Result<Reply, CommandError>>>,
}

/// Player configuration beyond what the ripper needs.
#[derive(Debug, Clone)]
pub struct PlayerOptions {
    pub ripper: RipperConfig,

    /// External command ejecting the disc tray, if any
    pub eject_command: Option<String>,
}

/// The player supervisor. `run` consumes it and loops until quit.
pub struct Player {
    options: PlayerOptions,
    db: Database,
    transport: Transport,
    publisher: Arc<dyn StatePublisher>,
    commands: Receiver<CommandRequest>,
    ripper: Option<Ripper>,
    last_rip_state: RipState,
}

impl Player {
    pub fn new(
        options: PlayerOptions,
        db: Database,
        transport: Transport,
        publisher: Arc<dyn StatePublisher>,
        commands: Receiver<CommandRequest>,
    ) -> Self {
        Self {
            options,
            db,
            transport,
            publisher,
            commands,
            ripper: None,
            last_rip_state: RipState::default(),
        }
    }

    /// Run the supervisor loop: commands as they arrive, the ripper
    /// ticked once a second.
    pub fn run(mut self) {
        self.publisher.publish_rip_state(&self.last_rip_state);

        let ticker = tick(Duration::from_secs(1));
        let commands = self.commands.clone();

        loop {
            select! {
                recv(commands) -> msg => {
                    let Ok(request) = msg else { break };

                    let quitting = request.command == Command::Quit;
                    let result = self.handle_command(request.command);
                    if let Some(reply) = request.reply {
                        let _ = reply.send(result);
                    }

                    if quitting {
                        break;
                    }
                }
                recv(ticker) -> _ => self.tick_ripper(),
            }
        }

        // Let a running rip finish before going away
        if self.ripper.is_some() {
            info!("letting the running ripping process finish first");
        }
        while self.ripper.is_some() {
            thread::sleep(Duration::from_secs(1));
            self.tick_ripper();
        }

        self.transport.shutdown();
    }

    /// Dispatch one command and produce its reply.
    pub fn handle_command(&mut self, command: Command) -> Result<Reply, CommandError> {
        debug!(?command, "got command");

        match command {
            Command::Disc(id) => self.cmd_disc(id).map(Reply::State),
            Command::Play => Ok(Reply::State(self.transport.play())),
            Command::Pause => Ok(Reply::State(self.transport.pause())),
            Command::PlayPause => Ok(Reply::State(self.transport.play_pause())),
            Command::Stop => Ok(Reply::State(self.transport.stop())),
            Command::Next => Ok(Reply::State(self.transport.next())),
            Command::Prev => Ok(Reply::State(self.transport.prev())),
            Command::PlayTrack(n) => self.transport.play_track(n).map(Reply::State),
            Command::Seek(t) => self.transport.seek(t).map(Reply::State),

            Command::Eject => {
                self.stop_ripper();
                let state = self.transport.eject();

                // Open the tray with an external helper; far too many
                // ioctls to keep track of to do it ourselves
                if let Some(eject) = &self.options.eject_command {
                    eject_disc(eject, &self.options.ripper.cdrom_device);
                }

                Ok(Reply::State(state))
            }

            Command::Ejected => {
                self.stop_ripper();
                Ok(Reply::State(self.transport.eject()))
            }

            Command::Quit => {
                info!("quitting on command");
                Ok(Reply::State(self.transport.shutdown()))
            }

            Command::State => Ok(Reply::State(self.transport.get_state())),

            Command::RipState => {
                // The ripper is ticked by this thread, so its state
                // is current as-is
                let state = self
                    .ripper
                    .as_ref()
                    .map(|r| r.state().clone())
                    .unwrap_or_default();
                Ok(Reply::RipState(state))
            }

            Command::Source => Ok(Reply::Disc(self.transport.get_source_disc())),

            Command::Version => Ok(Reply::Ok(Some(serde_json::Value::String(
                env!("CARGO_PKG_VERSION").to_string(),
            )))),
        }
    }

    fn cmd_disc(&mut self, disc_id: Option<String>) -> Result<State, CommandError> {
        match disc_id {
            Some(id) => {
                // Play a disc in the archive by its id. No alias
                // following here: asked for by id, played by id.
                let disc = if discid::is_valid_disc_id(&id) {
                    self.db
                        .get_disc_by_disc_id(&id)
                        .map_err(|e| CommandError::new(e.to_string()))?
                } else if discid::is_valid_db_id(&id) {
                    self.db
                        .get_disc_by_db_id(&id)
                        .map_err(|e| CommandError::new(e.to_string()))?
                } else {
                    None
                };

                let disc = disc.ok_or_else(|| {
                    CommandError::new(format!("invalid disc or database ID: {id}"))
                })?;

                self.play_disc(disc, None)
            }

            None => {
                // Play the inserted physical disc, ripping as needed
                if self.ripper.is_some() {
                    return Err(CommandError::new(
                        "already ripping disc, can't rip another one yet",
                    ));
                }

                let read = Ripper::read_disc(self.options.ripper.clone(), self.db.clone())
                    .map_err(|e| CommandError::new(format!("rip failed: {e}")))?;

                if let Some(mut ripper) = read.ripper {
                    // Tick once right away to surface launch errors
                    if ripper.tick() {
                        self.last_rip_state = ripper.state().clone();
                        self.publisher.publish_rip_state(&self.last_rip_state);
                        self.ripper = Some(ripper);
                    } else if let Some(error) = ripper.state().error.clone() {
                        return Err(CommandError::new(format!("rip failed: {error}")));
                    }
                }

                // Only follow links for physical discs. When the user
                // starts a disc by id we assume they really want that
                // one.
                let (disc, source_disc_id) = self.resolve_alias_links(read.disc);
                self.play_disc(disc, source_disc_id)
            }
        }
    }

    fn play_disc(
        &mut self,
        disc: Disc,
        source_disc_id: Option<String>,
    ) -> Result<State, CommandError> {
        info!(disc_id = %disc.disc_id, "playing disc");

        let db_id = discid::disc_to_db_id(&disc.disc_id)
            .map_err(|e| CommandError::new(e.to_string()))?;
        let path = self.db.audio_path(&db_id);

        let rip_active = self.ripper.as_ref().map(|r| r.active_flag());
        let source = PcmDiscSource::new(disc, source_disc_id, path, rip_active);

        self.transport.new_source(source, 0)
    }

    /// Follow any disc alias links, returning the disc that should
    /// really be played and the id that triggered it.
    ///
    /// Errors are handled by just returning whatever disc has been
    /// reached in the chain: that is probably good enough to play.
    fn resolve_alias_links(&self, disc: Disc) -> (Disc, Option<String>) {
        let original_id = disc.disc_id.clone();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(disc.disc_id.clone());

        let mut disc = disc;
        let mut source_disc_id = None;

        while disc.link_type == Some(LinkType::Alias) {
            let Some(linked_id) = disc.linked_disc_id.clone() else {
                warn!(disc_id = %disc.disc_id, "alias link with no target");
                break;
            };

            let linked = match self.db.get_disc_by_disc_id(&linked_id) {
                Ok(Some(linked)) => linked,
                _ => {
                    warn!(
                        disc_id = %disc.disc_id,
                        linked_id = %linked_id,
                        "missing alias link target"
                    );
                    break;
                }
            };

            if visited.contains(&linked.disc_id) {
                warn!(
                    disc_id = %disc.disc_id,
                    linked_id = %linked.disc_id,
                    "alias link circle"
                );
                break;
            }

            debug!(from = %disc.disc_id, to = %linked.disc_id, "following alias link");

            visited.insert(linked.disc_id.clone());
            disc = linked;
            source_disc_id = Some(original_id.clone());
        }

        (disc, source_disc_id)
    }

    fn stop_ripper(&mut self) {
        if let Some(mut ripper) = self.ripper.take() {
            ripper.stop();
            self.last_rip_state = ripper.state().clone();
            self.publisher.publish_rip_state(&self.last_rip_state);
            self.transport.ripping_done();
        }
    }

    fn tick_ripper(&mut self) {
        let Some(ripper) = self.ripper.as_mut() else {
            return;
        };

        let running = ripper.tick();

        let state = ripper.state().clone();
        if state != self.last_rip_state {
            self.publisher.publish_rip_state(&state);
            self.last_rip_state = state;
        }

        if !running {
            debug!("ripper finished");
            self.ripper = None;
            self.transport.ripping_done();
        }
    }
}
