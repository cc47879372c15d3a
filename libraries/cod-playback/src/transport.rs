//! The transport moves samples from a source to a sink, i.e. in this
//! context primarily from a disc to an audio device. All the while it
//! is responsible for updating the published state of the player and
//! implementing the transport-level commands.
//!
//! Two worker threads run here. The source thread pulls packets from
//! the source stream and pushes them onto a bounded queue; the sink
//! thread feeds them to the audio sink and derives state updates from
//! what the sink reports as audible.
//!
//! Everything is coordinated through contexts, identified by an
//! increasing integer. Each command that changes or repositions the
//! source bumps the context, so both threads can tell that queued
//! work is stale. On such disruptive changes the state is updated
//! immediately by the command; during normal play the sink thread
//! updates it.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, warn};

use cod_audio::{DeviceFormat, Sink};
use cod_core::{pcm, AudioPacket, ExtDisc, PlayerState, State};

use crate::error::{CommandError, SourceError};
use crate::publish::StatePublisher;
use crate::source::{Fetch, PcmDiscSource};

/// Maximum read-ahead between the source and sink threads.
const MAX_BUFFER_SECS: u64 = 30;

/// `prev` restarts the current track when this many seconds in.
const PREV_RESTART_SECS: i32 = 3;

enum StreamItem {
    Packet {
        context: u64,
        packet: Arc<AudioPacket>,
    },
    EndOfStream {
        context: u64,
    },
}

struct Shared {
    context: u64,
    source: Option<Arc<PcmDiscSource>>,
    state: State,
    paused_by_user: bool,

    /// Resume was requested while paused at a track boundary
    boundary_resume: bool,

    /// The next stream should start paused (next/prev from PAUSE)
    start_paused: bool,

    /// Where the next stream starts: (track index, seconds)
    start: (usize, i32),

    /// The source thread should pick up a new context
    source_flag: bool,

    shutdown: bool,
}

struct Inner {
    sink: Arc<dyn Sink>,
    publisher: Arc<dyn StatePublisher>,
    lock: Mutex<Shared>,
    cond: Condvar,
}

/// The transport and its two worker threads.
pub struct Transport {
    inner: Arc<Inner>,
    source_thread: Option<thread::JoinHandle<()>>,
    sink_thread: Option<thread::JoinHandle<()>>,
}

impl Transport {
    pub fn new(sink: Arc<dyn Sink>, publisher: Arc<dyn StatePublisher>) -> Self {
        let inner = Arc::new(Inner {
            sink,
            publisher,
            lock: Mutex::new(Shared {
                context: 0,
                source: None,
                state: State::default(),
                paused_by_user: false,
                boundary_resume: false,
                start_paused: false,
                start: (0, 0),
                source_flag: false,
                shutdown: false,
            }),
            cond: Condvar::new(),
        });

        // Publish the initial NO_DISC state
        {
            let guard = inner.lock.lock().unwrap();
            inner.publisher.publish_disc(None);
            inner.publisher.publish_state(&guard.state);
        }

        let (tx, rx) = bounded(
            (cod_core::PACKETS_PER_SECOND * MAX_BUFFER_SECS) as usize,
        );

        let source_inner = Arc::clone(&inner);
        let source_thread = thread::Builder::new()
            .name("transport source".into())
            .spawn(move || source_loop(&source_inner, tx))
            .expect("spawning transport source thread");

        let sink_inner = Arc::clone(&inner);
        let sink_thread = thread::Builder::new()
            .name("transport sink".into())
            .spawn(move || sink_loop(&sink_inner, rx))
            .expect("spawning transport sink thread");

        Self {
            inner,
            source_thread: Some(source_thread),
            sink_thread: Some(sink_thread),
        }
    }

    pub fn get_state(&self) -> State {
        self.inner.lock.lock().unwrap().state.clone()
    }

    pub fn get_source_disc(&self) -> Option<ExtDisc> {
        let guard = self.inner.lock.lock().unwrap();
        guard.source.as_ref().map(|s| s.ext_disc())
    }

    /// Load a new source and start playing it from `start_track`.
    pub fn new_source(
        &self,
        source: PcmDiscSource,
        start_track: usize,
    ) -> Result<State, CommandError> {
        let mut guard = self.inner.lock.lock().unwrap();

        if guard.state.state == PlayerState::Working {
            return Err(CommandError::new("ignoring new source while WORKING"));
        }

        if matches!(guard.state.state, PlayerState::Play | PlayerState::Pause) {
            self.inner.sink.stop();
        }

        self.inner.new_context(&mut guard);
        guard.source = Some(Arc::new(source));
        guard.start = (start_track, 0);
        guard.start_paused = false;
        self.inner.update_disc(&guard);
        self.inner.set_state_working(&mut guard);

        Ok(guard.state.clone())
    }

    /// Stop playing and unload the source.
    pub fn eject(&self) -> State {
        let mut guard = self.inner.lock.lock().unwrap();

        if guard.state.state == PlayerState::NoDisc {
            return guard.state.clone();
        }

        debug!("transport ejecting source");
        self.inner.sink.stop();

        self.inner.new_context(&mut guard);
        guard.source = None;
        self.inner.update_disc(&guard);
        self.inner.update_state(&mut guard, State::default());

        guard.state.clone()
    }

    pub fn play(&self) -> State {
        let mut guard = self.inner.lock.lock().unwrap();

        match guard.state.state {
            PlayerState::Stop => {
                debug!("transport playing from STOP");
                self.inner.new_context(&mut guard);
                guard.start = (0, 0);
                guard.start_paused = false;
                self.inner.set_state_working(&mut guard);
            }
            PlayerState::Pause => self.inner.do_resume(&mut guard),
            state => debug!(?state, "ignoring play()"),
        }

        guard.state.clone()
    }

    pub fn pause(&self) -> State {
        let mut guard = self.inner.lock.lock().unwrap();

        if guard.state.state == PlayerState::Play {
            self.inner.do_pause(&mut guard);
        } else {
            debug!(state = ?guard.state.state, "ignoring pause()");
        }

        guard.state.clone()
    }

    pub fn play_pause(&self) -> State {
        let mut guard = self.inner.lock.lock().unwrap();

        match guard.state.state {
            PlayerState::Stop => {
                debug!("transport playing from STOP");
                self.inner.new_context(&mut guard);
                guard.start = (0, 0);
                guard.start_paused = false;
                self.inner.set_state_working(&mut guard);
            }
            PlayerState::Play => self.inner.do_pause(&mut guard),
            PlayerState::Pause => self.inner.do_resume(&mut guard),
            state => debug!(?state, "ignoring play_pause()"),
        }

        guard.state.clone()
    }

    pub fn stop(&self) -> State {
        let mut guard = self.inner.lock.lock().unwrap();

        if !matches!(guard.state.state, PlayerState::Play | PlayerState::Pause) {
            debug!(state = ?guard.state.state, "ignoring stop()");
            return guard.state.clone();
        }

        debug!("transport stopping");
        self.inner.sink.stop();
        self.inner.new_context(&mut guard);
        self.inner.set_state_stop(&mut guard);

        guard.state.clone()
    }

    /// Skip to the next track not flagged skip, preserving PLAY or
    /// PAUSE. Past the last track this stops.
    pub fn next(&self) -> State {
        let mut guard = self.inner.lock.lock().unwrap();

        if !matches!(guard.state.state, PlayerState::Play | PlayerState::Pause) {
            debug!(state = ?guard.state.state, "ignoring next()");
            return guard.state.clone();
        }

        let target = guard.source.as_ref().and_then(|src| {
            let tracks = &src.disc().tracks;
            let current = tracks
                .iter()
                .position(|t| t.number == guard.state.track)?;
            tracks
                .iter()
                .enumerate()
                .skip(current + 1)
                .find(|(_, t)| !t.skip)
                .map(|(idx, _)| idx)
        });

        match target {
            Some(idx) => self.inner.switch_track(&mut guard, idx, 0),
            None => {
                self.inner.sink.stop();
                self.inner.new_context(&mut guard);
                self.inner.set_state_stop(&mut guard);
            }
        }

        guard.state.clone()
    }

    /// Restart the current track, or skip to the previous non-skipped
    /// track when near the start of the current one.
    pub fn prev(&self) -> State {
        let mut guard = self.inner.lock.lock().unwrap();

        if !matches!(guard.state.state, PlayerState::Play | PlayerState::Pause) {
            debug!(state = ?guard.state.state, "ignoring prev()");
            return guard.state.clone();
        }

        let target = guard.source.as_ref().and_then(|src| {
            let tracks = &src.disc().tracks;
            let current = tracks
                .iter()
                .position(|t| t.number == guard.state.track)?;

            if guard.state.position >= PREV_RESTART_SECS {
                return Some(current);
            }

            tracks
                .iter()
                .enumerate()
                .take(current)
                .rev()
                .find(|(_, t)| !t.skip)
                .map(|(idx, _)| idx)
                .or(Some(current))
        });

        if let Some(idx) = target {
            self.inner.switch_track(&mut guard, idx, 0);
        }

        guard.state.clone()
    }

    /// Restart the streamer at a specific track number.
    pub fn play_track(&self, number: u32) -> Result<State, CommandError> {
        let mut guard = self.inner.lock.lock().unwrap();

        if guard.source.is_none() {
            return Err(CommandError::new("no disc loaded"));
        }
        if guard.state.state == PlayerState::Working {
            return Err(CommandError::new("ignoring play_track while WORKING"));
        }

        let idx = guard
            .source
            .as_ref()
            .and_then(|src| src.disc().tracks.iter().position(|t| t.number == number))
            .ok_or_else(|| CommandError::new(format!("no such track: {number}")))?;

        guard.start_paused = false;
        self.inner.switch_track(&mut guard, idx, 0);
        Ok(guard.state.clone())
    }

    /// Restart the streamer at a position in the current track,
    /// preserving PLAY or PAUSE.
    pub fn seek(&self, position: i32) -> Result<State, CommandError> {
        let mut guard = self.inner.lock.lock().unwrap();

        if !matches!(guard.state.state, PlayerState::Play | PlayerState::Pause) {
            return Err(CommandError::new(format!(
                "ignoring seek in state {:?}",
                guard.state.state
            )));
        }

        let idx = guard
            .source
            .as_ref()
            .and_then(|src| {
                src.disc()
                    .tracks
                    .iter()
                    .position(|t| t.number == guard.state.track)
            })
            .ok_or_else(|| CommandError::new("no current track to seek in"))?;

        self.inner.switch_track(&mut guard, idx, position);
        Ok(guard.state.clone())
    }

    /// Called by the player when the ripping process has finished,
    /// successfully or not.
    pub fn ripping_done(&self) {
        let mut guard = self.inner.lock.lock().unwrap();

        // If the rip failed before any packet arrived we are stuck in
        // WORKING; unload and report no disc
        if guard.state.state == PlayerState::Working {
            warn!("ripping seems to have failed, since state is still WORKING");

            self.inner.new_context(&mut guard);
            guard.source = None;
            self.inner.update_disc(&guard);
            self.inner.update_state(&mut guard, State::default());
        }
    }

    /// Shut the transport down, publishing the OFF state.
    pub fn shutdown(&self) -> State {
        let mut guard = self.inner.lock.lock().unwrap();

        if guard.state.state == PlayerState::Off {
            return guard.state.clone();
        }

        debug!("transport shutting down");
        self.inner.sink.stop();

        self.inner.new_context(&mut guard);
        guard.source = None;
        guard.shutdown = true;
        self.inner.update_disc(&guard);
        self.inner.update_state(&mut guard, State::off());

        guard.state.clone()
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        {
            let mut guard = self.inner.lock.lock().unwrap();
            guard.shutdown = true;
            self.inner.sink.stop();
            self.inner.new_context(&mut guard);
        }

        if let Some(handle) = self.source_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.sink_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Inner {
    fn new_context(&self, guard: &mut MutexGuard<'_, Shared>) {
        guard.context += 1;
        guard.source_flag = true;
        self.cond.notify_all();
        debug!(context = guard.context, "setting new context");
    }

    fn context_changed(&self, context: u64) -> bool {
        self.lock.lock().unwrap().context != context
    }

    fn update_state(&self, guard: &mut MutexGuard<'_, Shared>, state: State) {
        // Log significant changes
        if state.state != guard.state.state
            || state.disc_id != guard.state.disc_id
            || state.track != guard.state.track
        {
            debug!(state = %state, "state");
        }

        guard.state = state;
        self.publisher.publish_state(&guard.state);
    }

    fn update_disc(&self, guard: &MutexGuard<'_, Shared>) {
        let disc = guard.source.as_ref().map(|s| s.ext_disc());
        self.publisher.publish_disc(disc.as_ref());
    }

    fn set_state_working(&self, guard: &mut MutexGuard<'_, Shared>) {
        let state = match guard.source.as_ref() {
            Some(source) => source.initial_state(PlayerState::Working),
            None => State::default(),
        };
        self.update_state(guard, state);
    }

    fn set_state_stop(&self, guard: &mut MutexGuard<'_, Shared>) {
        let state = State {
            state: PlayerState::Stop,
            track: 0,
            index: 0,
            position: 0,
            length: 0,
            ..guard.state.clone()
        };
        self.update_state(guard, state);
    }

    fn do_pause(&self, guard: &mut MutexGuard<'_, Shared>) {
        debug!("transport pausing");

        // Not a new context: the sink just pauses packet playback
        if self.sink.pause() {
            let state = State {
                state: PlayerState::Pause,
                ..guard.state.clone()
            };
            self.update_state(guard, state);
            guard.paused_by_user = true;
        } else {
            debug!("sink refused to pause, keeping PLAY");
        }
    }

    fn do_resume(&self, guard: &mut MutexGuard<'_, Shared>) {
        if guard.paused_by_user {
            debug!("resuming paused transport");

            // Not a new context: keep playing the buffered packets
            self.sink.resume();
            guard.paused_by_user = false;
            let state = State {
                state: PlayerState::Play,
                ..guard.state.clone()
            };
            self.update_state(guard, state);
        } else {
            debug!("paused after track, playing");

            // Wake the sink thread holding the first packet of the
            // next track
            guard.boundary_resume = true;
            self.cond.notify_all();
            let state = State {
                state: PlayerState::Play,
                ..guard.state.clone()
            };
            self.update_state(guard, state);
        }
    }

    /// Restart the streamer at (track index, position), preserving
    /// PLAY or PAUSE.
    fn switch_track(&self, guard: &mut MutexGuard<'_, Shared>, track_idx: usize, position: i32) {
        let was_paused = guard.state.state == PlayerState::Pause;

        self.sink.stop();
        self.new_context(guard);
        guard.start = (track_idx, position);
        guard.start_paused = was_paused;
        guard.paused_by_user = false;
        guard.boundary_resume = false;
        self.set_state_working(guard);
    }

    // Sink thread helpers

    /// Start the sink for a new stream and publish the first state.
    ///
    /// When the stream was requested from PAUSE (next/prev/seek while
    /// paused), the first packet is held here and the state shows
    /// PAUSE at the new position until a resume arrives.
    fn start_playing(&self, context: u64, packet: &Arc<AudioPacket>, format: DeviceFormat) -> bool {
        let mut guard = self.lock.lock().unwrap();

        if guard.context != context {
            return false;
        }

        let Some(source) = guard.source.clone() else {
            return false;
        };

        if guard.start_paused {
            guard.start_paused = false;
            guard.paused_by_user = false;
            guard.boundary_resume = false;

            let mut state = source.initial_state(PlayerState::Pause);
            if let Some(updated) = packet.update_state(&state) {
                state = updated;
            }
            self.update_state(&mut guard, state);

            loop {
                if guard.context != context {
                    return false;
                }
                if guard.boundary_resume {
                    guard.boundary_resume = false;
                    break;
                }
                guard = self.cond.wait(guard).unwrap();
            }
        }

        debug!("starting to play new source");

        if let Err(e) = self.sink.start(format) {
            warn!(error = %e, "couldn't start sink");
            return false;
        }

        let mut state = source.initial_state(PlayerState::Play);
        if let Some(updated) = packet.update_state(&state) {
            state = updated;
        }

        self.update_state(&mut guard, state);
        true
    }

    /// Push one packet's data into the sink, publishing progress as
    /// it becomes audible.
    fn feed_packet(&self, context: u64, packet: &Arc<AudioPacket>) {
        let mut offset = 0;

        while offset < packet.data.len() {
            if self.context_changed(context) {
                return;
            }

            let added = self.sink.add_packet(packet, &packet.data[offset..]);
            offset += added.stored;

            if added.playing.is_some() || added.error.is_some() {
                self.sink_progress(context, added.playing, added.error);
            }

            if added.closed {
                if self.context_changed(context) {
                    return;
                }
                // The sink is not accepting data but nobody asked us
                // to stop; pace the retries
                thread::sleep(Duration::from_millis(50));
            }
        }
    }

    /// Drain the sink to the end, publishing progress. Returns false
    /// if the context changed along the way.
    fn drain_sink(&self, context: u64) -> bool {
        loop {
            if self.context_changed(context) {
                return false;
            }

            match self.sink.drain() {
                None => return true,
                Some(progress) => {
                    self.sink_progress(context, progress.playing, progress.error);
                }
            }
        }
    }

    /// Derive state updates from what the sink reports audible.
    fn sink_progress(
        &self,
        context: u64,
        playing: Option<Arc<AudioPacket>>,
        error: Option<String>,
    ) {
        let error = error.map(|e| format!("Audio sink error: {e}"));

        let mut guard = self.lock.lock().unwrap();

        // Always update the device error, regardless of context
        if error != guard.state.error {
            let state = State {
                error,
                ..guard.state.clone()
            };
            self.update_state(&mut guard, state);
        }

        // Position updates only matter for the current stream
        if guard.context != context {
            return;
        }

        if let Some(packet) = playing {
            if let Some(state) = packet.update_state(&guard.state) {
                self.update_state(&mut guard, state);
            }
        }
    }

    /// The stream ended naturally: stop with the final position still
    /// showing.
    fn sink_finished(&self, context: u64) {
        let mut guard = self.lock.lock().unwrap();

        if guard.context != context {
            return;
        }

        self.sink.stop();
        let state = State {
            state: PlayerState::Stop,
            position: guard.state.length as i32,
            ..guard.state.clone()
        };
        self.update_state(&mut guard, state);
    }

    /// The stream was cut short (empty source or failure before the
    /// sink started).
    fn sink_stopped(&self, context: u64) {
        let mut guard = self.lock.lock().unwrap();

        if guard.context != context {
            return;
        }

        self.sink.stop();
        self.set_state_stop(&mut guard);
    }

    /// Drain, report PAUSE at the upcoming track, and wait for a
    /// resume. Returns true if the held packet should now be played.
    fn pause_at_boundary(&self, context: u64, packet: &Arc<AudioPacket>) -> bool {
        debug!(track = packet.track_number, "pausing at track boundary");

        if !self.drain_sink(context) {
            return false;
        }

        {
            let mut guard = self.lock.lock().unwrap();
            if guard.context != context {
                return false;
            }

            guard.paused_by_user = false;
            guard.boundary_resume = false;

            let state = State {
                state: PlayerState::Pause,
                track: packet.track_number,
                index: packet.index,
                position: packet.position_secs(),
                length: packet.track_secs(),
                ..guard.state.clone()
            };
            self.update_state(&mut guard, state);
        }

        let mut guard = self.lock.lock().unwrap();
        loop {
            if guard.context != context {
                return false;
            }
            if guard.boundary_resume {
                guard.boundary_resume = false;
                return true;
            }
            guard = self.cond.wait(guard).unwrap();
        }
    }

    fn source_failed(&self, context: u64, error: SourceError) {
        warn!(error = %error, "source error");

        let mut guard = self.lock.lock().unwrap();
        if guard.context != context {
            return;
        }

        // Don't get stuck on a dead source: stop immediately
        let state = State {
            error: Some(error.to_string()),
            ..guard.state.clone()
        };
        self.update_state(&mut guard, state);

        self.sink.stop();
        self.new_context(&mut guard);
        self.set_state_stop(&mut guard);
    }
}

fn source_loop(inner: &Arc<Inner>, tx: Sender<StreamItem>) {
    loop {
        // Wait until there's something to play
        let (context, source, start) = {
            let mut guard = inner.lock.lock().unwrap();
            loop {
                if guard.shutdown {
                    return;
                }
                if guard.source_flag {
                    guard.source_flag = false;
                    break;
                }
                guard = inner.cond.wait(guard).unwrap();
            }

            debug!(context = guard.context, "source thread using new context");

            let working = guard.state.state == PlayerState::Working;
            let source = if working { guard.source.clone() } else { None };
            (guard.context, source, guard.start)
        };

        let Some(source) = source else {
            continue;
        };

        debug!(disc_id = %source.disc().disc_id, "starting source");
        let mut stream = source.open(start.0, start.1);

        loop {
            if inner.context_changed(context) {
                break;
            }

            match stream.fetch() {
                Ok(Fetch::Packet(packet)) => {
                    let item = StreamItem::Packet {
                        context,
                        packet: Arc::new(packet),
                    };
                    if tx.send(item).is_err() {
                        return;
                    }
                }
                Ok(Fetch::Stalled) => continue,
                Ok(Fetch::End) => {
                    debug!("reached end of source");
                    let _ = tx.send(StreamItem::EndOfStream { context });
                    break;
                }
                Err(e) => {
                    inner.source_failed(context, e);
                    break;
                }
            }
        }
    }
}

fn sink_loop(inner: &Arc<Inner>, rx: Receiver<StreamItem>) {
    #[derive(PartialEq)]
    enum Feed {
        Idle,
        Adding,
    }

    let mut feed = Feed::Idle;
    let mut context = 0u64;

    let format = DeviceFormat {
        channels: pcm::CHANNELS,
        rate: pcm::RATE as u32,
        big_endian: pcm::BIG_ENDIAN,
    };

    while let Ok(item) = rx.recv() {
        {
            let guard = inner.lock.lock().unwrap();
            if guard.shutdown {
                return;
            }
            // If something changed while not idle, go back to idle to
            // wait for the first packet of the new stream
            if context != guard.context {
                feed = Feed::Idle;
                context = guard.context;
                debug!(context, "sink thread using new context");
            }
        }

        match item {
            StreamItem::EndOfStream { context: ctx } => {
                if ctx != context {
                    continue;
                }

                if feed == Feed::Adding && inner.drain_sink(ctx) {
                    inner.sink_finished(ctx);
                } else if feed == Feed::Idle {
                    inner.sink_stopped(ctx);
                }
                feed = Feed::Idle;
            }

            StreamItem::Packet { context: ctx, packet } => {
                if ctx != context {
                    continue;
                }

                if packet.flags.pause_before && feed == Feed::Adding {
                    feed = Feed::Idle;
                    if !inner.pause_at_boundary(ctx, &packet) {
                        continue;
                    }
                }

                if feed == Feed::Idle {
                    if inner.start_playing(ctx, &packet, format) {
                        feed = Feed::Adding;
                    } else {
                        continue;
                    }
                }

                inner.feed_packet(ctx, &packet);
            }
        }
    }
}
