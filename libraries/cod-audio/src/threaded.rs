//! The threaded sink: a worker with (if permitted) realtime priority
//! feeding the device from the period ring buffer.
//!
//! One mutex protects the sink state token and the ring buffer
//! together; a condition variable carries all wakeups between the
//! transport side and the worker. The worker releases the lock for
//! every device call.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, info, warn};

use cod_core::AudioPacket;

use crate::buffer::PeriodBuffer;
use crate::device::{DeviceFormat, DeviceOpener, PcmDevice};
use crate::error::{Result, SinkError, WriteError};
use crate::sink::{AddedPacket, DrainProgress, Sink, SinkState};

/// Backoff between attempts to open a bad device.
const OPEN_RETRY: Duration = Duration::from_secs(3);

/// State shared between the transport side and the worker.
struct SinkShared {
    state: SinkState,

    /// Remembers whether resume should go back to Playing or Draining
    paused_in_state: SinkState,

    /// Sound format, set by `start()`
    format: Option<DeviceFormat>,

    /// Actual hardware period, set on device open
    period_frames: usize,

    /// Device wants the opposite endianness
    swap_bytes: bool,

    /// Current device error, if any
    device_error: Option<String>,

    buffer: PeriodBuffer,
}

struct Shared {
    state: Mutex<SinkShared>,
    cond: Condvar,
}

/// Static-ish log records passed out of the worker, so the realtime
/// loop never calls into the logging machinery itself.
struct LogRecord {
    message: &'static str,
    detail: Option<String>,
}

/// Tripwire memory for `add_packet`/`drain`: the last packet and
/// error reported to the transport.
#[derive(Default)]
struct Reported {
    playing: Option<Arc<AudioPacket>>,
    error: Option<String>,
}

/// Result of one interaction with the worker.
struct Observed {
    stored: isize,
    playing: Option<Arc<AudioPacket>>,
    error: Option<String>,
}

/// A sink feeding periods to a PCM device from a dedicated worker
/// thread.
pub struct ThreadedSink {
    shared: Arc<Shared>,
    reported: Mutex<Reported>,
    worker: Option<thread::JoinHandle<()>>,
    logger: Option<thread::JoinHandle<()>>,
}

impl ThreadedSink {
    /// Create the sink and launch its worker thread. The worker asks
    /// for minimum realtime round-robin priority and falls back to
    /// normal scheduling if that is not permitted.
    pub fn new(opener: Box<dyn DeviceOpener>) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(SinkShared {
                state: SinkState::Closed,
                paused_in_state: SinkState::Playing,
                format: None,
                period_frames: 0,
                swap_bytes: false,
                device_error: None,
                buffer: PeriodBuffer::default(),
            }),
            cond: Condvar::new(),
        });

        let (log_tx, log_rx) = bounded(16);

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("audio sink".into())
            .spawn(move || Worker::new(worker_shared, opener, log_tx).run())
            .expect("spawning sink worker");

        let logger = thread::Builder::new()
            .name("sink log".into())
            .spawn(move || log_helper(log_rx))
            .expect("spawning sink logger");

        Self {
            shared,
            reported: Mutex::new(Reported::default()),
            worker: Some(worker),
            logger: Some(logger),
        }
    }

    /// One round of the add_packet/drain protocol: store what fits,
    /// pick up the audible packet and error, wait when there is
    /// nothing to do yet.
    fn interact(&self, packet: Option<(&Arc<AudioPacket>, &[u8])>) -> Observed {
        let mut guard = self.shared.state.lock().unwrap();

        // In these two transitional states we must wait for the
        // worker: Starting means the buffer isn't set up yet, Closing
        // that the worker hasn't reacted to stop() yet. Without the
        // wait the transport would spin here until the state settles.
        if matches!(guard.state, SinkState::Starting | SinkState::Closing) {
            guard = self.shared.cond.wait(guard).unwrap();
        }

        let mut stored = 0isize;

        if guard.state.accepts_data() {
            match packet {
                Some((packet, data)) if !data.is_empty() => {
                    if guard.buffer.is_full() {
                        // Wait for the worker to make room
                        guard = self.shared.cond.wait(guard).unwrap();
                    }

                    if guard.state.accepts_data() && !guard.buffer.is_full() {
                        let swap = guard.swap_bytes;
                        stored = guard.buffer.append(packet, data, swap) as isize;
                        self.shared.cond.notify_all();
                    }
                }
                _ => {
                    // Draining: wait for updates to the audible packet
                    guard = self.shared.cond.wait(guard).unwrap();
                }
            }
        }

        if !guard.state.accepts_data() {
            // Tell add_packet()/drain() to return early
            stored = -1;
        }

        Observed {
            stored,
            playing: guard.buffer.playing_packet(),
            error: guard.device_error.clone(),
        }
    }

    fn same_packet(a: &Option<Arc<AudioPacket>>, b: &Option<Arc<AudioPacket>>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Run `interact` until something observable happens. Returns
    /// (stored, playing, error, closed).
    fn tripwire(
        &self,
        packet: Option<(&Arc<AudioPacket>, &[u8])>,
    ) -> (usize, Option<Arc<AudioPacket>>, Option<String>, bool) {
        let mut reported = self.reported.lock().unwrap();

        loop {
            let observed = self.interact(packet);

            let changed = observed.stored != 0
                || !Self::same_packet(&observed.playing, &reported.playing)
                || observed.error != reported.error;

            if changed {
                reported.playing = observed.playing.clone();
                reported.error = observed.error.clone();

                let closed = observed.stored < 0;
                let stored = if closed { 0 } else { observed.stored as usize };
                return (stored, observed.playing, observed.error, closed);
            }
        }
    }
}

impl Sink for ThreadedSink {
    fn start(&self, format: DeviceFormat) -> Result<()> {
        let mut guard = self.shared.state.lock().unwrap();

        if guard.state != SinkState::Closed {
            return Err(SinkError::InvalidState {
                op: "start",
                state: guard.state,
            });
        }

        debug!("starting sink");
        guard.state = SinkState::Starting;
        guard.format = Some(format);
        self.shared.cond.notify_all();
        Ok(())
    }

    fn stop(&self) {
        let mut guard = self.shared.state.lock().unwrap();

        if !matches!(guard.state, SinkState::Closed | SinkState::Shutdown) {
            guard.state = SinkState::Closing;
            self.shared.cond.notify_all();
        }

        while guard.state == SinkState::Closing {
            guard = self.shared.cond.wait(guard).unwrap();
        }
    }

    fn pause(&self) -> bool {
        let mut guard = self.shared.state.lock().unwrap();

        match guard.state {
            SinkState::Playing | SinkState::Draining => {
                guard.paused_in_state = guard.state;
                guard.state = SinkState::Pausing;
                self.shared.cond.notify_all();

                while guard.state == SinkState::Pausing {
                    guard = self.shared.cond.wait(guard).unwrap();
                }

                if guard.state == SinkState::Paused {
                    true
                } else {
                    warn!(state = ?guard.state, "sink didn't pause");
                    false
                }
            }
            SinkState::Paused => true,
            state => {
                warn!(?state, "pausing in invalid state");
                false
            }
        }
    }

    fn resume(&self) {
        let mut guard = self.shared.state.lock().unwrap();

        if guard.state != SinkState::Paused {
            warn!(state = ?guard.state, "resuming in invalid state");
            return;
        }

        guard.state = SinkState::Resume;
        self.shared.cond.notify_all();

        // Accept any state after this: we might be stopped while
        // paused
        while guard.state == SinkState::Resume {
            guard = self.shared.cond.wait(guard).unwrap();
        }
    }

    fn add_packet(&self, packet: &Arc<AudioPacket>, data: &[u8]) -> AddedPacket {
        let (stored, playing, error, closed) = self.tripwire(Some((packet, data)));

        if closed {
            debug!("add_packet: sink closed");
        }

        AddedPacket {
            stored,
            playing,
            error,
            closed,
        }
    }

    fn drain(&self) -> Option<DrainProgress> {
        {
            let mut guard = self.shared.state.lock().unwrap();

            if guard.state == SinkState::Playing {
                debug!("drain: switching to draining");
                guard.state = SinkState::Draining;
                guard.buffer.pad_partial();
                self.shared.cond.notify_all();
            } else if !guard.state.accepts_data() {
                // Already stopped
                return None;
            }
        }

        let (_, playing, error, closed) = self.tripwire(None);

        if closed {
            debug!("drain: sink closed");
            return None;
        }

        Some(DrainProgress { playing, error })
    }
}

impl Drop for ThreadedSink {
    fn drop(&mut self) {
        {
            let mut guard = self.shared.state.lock().unwrap();
            guard.state = SinkState::Shutdown;
            self.shared.cond.notify_all();
        }

        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        if let Some(logger) = self.logger.take() {
            let _ = logger.join();
        }
    }
}

/// The device worker. Owns the device handle; nothing else may touch
/// it.
struct Worker {
    shared: Arc<Shared>,
    opener: Box<dyn DeviceOpener>,
    device: Option<Box<dyn PcmDevice>>,

    /// Private copy of the period being written, so the device call
    /// never holds a pointer into the shared buffer
    scratch: Vec<u8>,

    log: Sender<LogRecord>,
}

impl Worker {
    fn new(shared: Arc<Shared>, opener: Box<dyn DeviceOpener>, log: Sender<LogRecord>) -> Self {
        Self {
            shared,
            opener,
            device: None,
            scratch: Vec::new(),
            log,
        }
    }

    fn run(mut self) {
        if try_realtime_priority() {
            self.say("running at SCHED_RR priority", None);
        } else {
            self.say("couldn't get realtime priority, running as a normal thread", None);
        }

        let shared = Arc::clone(&self.shared);
        let clean_exit = self.thread_loop(&shared);

        if !clean_exit {
            let mut guard = shared.state.lock().unwrap();
            guard.device_error = Some("player thread died".to_string());
            self.shared.cond.notify_all();
        }
    }

    /// Best-effort logging: drop records rather than ever block the
    /// worker.
    fn say(&self, message: &'static str, detail: Option<String>) {
        let _ = self.log.try_send(LogRecord { message, detail });
    }

    fn thread_loop(&mut self, shared: &Shared) -> bool {
        let mut guard = shared.state.lock().unwrap();

        loop {
            match guard.state {
                SinkState::Closed | SinkState::Paused => {
                    guard = shared.cond.wait(guard).unwrap();
                }

                SinkState::Starting | SinkState::Playing => {
                    guard = self.play_once(shared, guard);
                }

                SinkState::Pausing => {
                    guard = self.device_pause(shared, guard);
                }

                SinkState::Resume => {
                    guard = self.device_resume(shared, guard);
                }

                SinkState::Draining => {
                    if !guard.buffer.is_empty() {
                        guard = self.play_once(shared, guard);
                    } else {
                        let (g, exit) = self.close(shared, guard);
                        guard = g;
                        if exit {
                            return true;
                        }
                    }
                }

                SinkState::Closing | SinkState::Shutdown => {
                    let (g, exit) = self.close(shared, guard);
                    guard = g;
                    if exit {
                        return true;
                    }
                }
            }
        }
    }

    /// Open the device if needed, then write at most one period.
    /// Writing a single period per round keeps state changes promptly
    /// handled.
    fn play_once<'a>(
        &mut self,
        shared: &'a Shared,
        mut guard: MutexGuard<'a, SinkShared>,
    ) -> MutexGuard<'a, SinkShared> {
        if self.device.is_none() {
            return self.open_device(shared, guard);
        }

        if !guard.buffer.has_period() {
            // Wait for data; we can block here as long as needed
            return shared.cond.wait(guard).unwrap();
        }

        // Copy the period out so the device write needs no pointer
        // into the shared buffer
        let period = guard.buffer.peek_period().expect("period checked above");
        self.scratch.clear();
        self.scratch.extend_from_slice(period);
        let frames = guard.period_frames;
        drop(guard);

        let device = self.device.as_mut().expect("device checked above");
        let result = device.write_period(&self.scratch, frames);

        match result {
            Ok(n) => {
                let mut guard = shared.state.lock().unwrap();
                if n > 0 {
                    guard.buffer.advance_play();
                    shared.cond.notify_all();
                }
                guard
            }

            Err(error) if error.recoverable() => {
                let recovered = device.recover(&error);
                let mut guard = shared.state.lock().unwrap();
                if !recovered {
                    self.device = None;
                    let msg = error.to_string();
                    self.say("error recovering device", Some(msg.clone()));
                    guard.device_error = Some(msg);
                    shared.cond.notify_all();
                }
                guard
            }

            Err(WriteError::Fatal(msg)) => {
                // Close the device; the main loop will retry opening
                self.device = None;
                let mut guard = shared.state.lock().unwrap();
                self.say("error writing to device", Some(msg.clone()));
                guard.device_error = Some(msg);
                shared.cond.notify_all();
                guard
            }

            Err(error) => {
                let mut guard = shared.state.lock().unwrap();
                guard.device_error = Some(error.to_string());
                guard
            }
        }
    }

    fn open_device<'a>(
        &mut self,
        shared: &'a Shared,
        guard: MutexGuard<'a, SinkShared>,
    ) -> MutexGuard<'a, SinkShared> {
        let Some(format) = guard.format else {
            // Nothing to open without a format; wait for start()
            return shared.cond.wait(guard).unwrap();
        };

        let reopening = guard.state != SinkState::Starting;
        drop(guard);

        let opened = self.opener.open(&format);

        let mut guard = shared.state.lock().unwrap();

        match opened {
            Ok((device, negotiated)) => {
                if guard.period_frames != negotiated.period_frames
                    || !guard.buffer.is_configured()
                {
                    if let Err(e) = guard.buffer.configure(
                        format.rate,
                        format.channels,
                        negotiated.period_frames,
                    ) {
                        guard.device_error = Some(e.to_string());
                        self.say("rejecting device period size", Some(e.to_string()));
                        shared.cond.notify_all();
                        return self.backoff(shared, guard);
                    }
                    guard.period_frames = negotiated.period_frames;
                }

                guard.swap_bytes = negotiated.swap_bytes;
                guard.device_error = None;
                self.device = Some(device);

                self.say(
                    if reopening {
                        "reopened device"
                    } else {
                        "opened device"
                    },
                    Some(
                        if negotiated.swap_bytes {
                            "swapping bytes"
                        } else {
                            "not swapping bytes"
                        }
                        .to_string(),
                    ),
                );

                if guard.state == SinkState::Starting {
                    // Now the transport can put frames into the buffer
                    guard.state = SinkState::Playing;
                }

                shared.cond.notify_all();
                guard
            }

            Err(e) => {
                guard.device_error = Some(e.0);
                shared.cond.notify_all();
                self.backoff(shared, guard)
            }
        }
    }

    /// Sleep before retrying a bad device, without holding the lock.
    fn backoff<'a>(
        &mut self,
        shared: &'a Shared,
        guard: MutexGuard<'a, SinkShared>,
    ) -> MutexGuard<'a, SinkShared> {
        drop(guard);
        thread::sleep(OPEN_RETRY);
        shared.state.lock().unwrap()
    }

    fn device_pause<'a>(
        &mut self,
        shared: &'a Shared,
        guard: MutexGuard<'a, SinkShared>,
    ) -> MutexGuard<'a, SinkShared> {
        let mut failure = None;

        let mut guard = if let Some(device) = self.device.as_mut() {
            drop(guard);

            if let Err(e) = device.pause() {
                // If we can't pause, something is probably very bad.
                // Close the device and let the next play round reopen
                // it after resume.
                let _ = device.discard();
                self.device = None;
                failure = Some(e);
            }

            shared.state.lock().unwrap()
        } else {
            guard
        };

        if let Some(e) = failure {
            self.say("error pausing device, closed it", Some(e.to_string()));
            guard.device_error = Some("error pausing device, closed it".to_string());
        }

        // Even if pausing fails, go into Paused: the music stops at
        // this point either way
        guard.state = SinkState::Paused;
        shared.cond.notify_all();
        guard
    }

    fn device_resume<'a>(
        &mut self,
        shared: &'a Shared,
        guard: MutexGuard<'a, SinkShared>,
    ) -> MutexGuard<'a, SinkShared> {
        let mut failure = None;

        let mut guard = if let Some(device) = self.device.as_mut() {
            drop(guard);

            if let Err(e) = device.unpause() {
                let _ = device.discard();
                self.device = None;
                failure = Some(e);
            }

            shared.state.lock().unwrap()
        } else {
            guard
        };

        if let Some(e) = failure {
            self.say("error resuming device, closed it", Some(e.to_string()));
            guard.device_error = Some("error resuming device, closed it".to_string());
        }

        // Go back to the intended state even if the device failed;
        // the play loop will reopen it
        guard.state = guard.paused_in_state;
        shared.cond.notify_all();
        guard
    }

    /// Close the device, draining or dropping as appropriate, and
    /// either reset to Closed or exit on Shutdown.
    fn close<'a>(
        &mut self,
        shared: &'a Shared,
        guard: MutexGuard<'a, SinkShared>,
    ) -> (MutexGuard<'a, SinkShared>, bool) {
        let drain = guard.state == SinkState::Draining;

        let mut guard = if let Some(mut device) = self.device.take() {
            self.say(
                "closing pcm device",
                Some(if drain { "draining" } else { "dropping" }.to_string()),
            );

            drop(guard);

            let result = if drain {
                device.drain()
            } else {
                device.discard()
            };
            drop(device);

            if let Err(e) = result {
                self.say("error closing pcm device", Some(e.to_string()));
            }

            shared.state.lock().unwrap()
        } else {
            self.say("pcm device not open when closing sink", None);
            guard
        };

        if guard.state == SinkState::Shutdown {
            return (guard, true);
        }

        guard.state = SinkState::Closed;
        guard.format = None;
        guard.device_error = None;
        guard.buffer.reset();
        shared.cond.notify_all();

        (guard, false)
    }
}

fn log_helper(rx: Receiver<LogRecord>) {
    while let Ok(record) = rx.recv() {
        match record.detail {
            Some(detail) => {
                info!(target: "cod_audio::sink", detail = %detail, "{}", record.message)
            }
            None => info!(target: "cod_audio::sink", "{}", record.message),
        }
    }
}

#[cfg(unix)]
fn try_realtime_priority() -> bool {
    // SAFETY: pthread_self() is the calling thread and sched_param
    // is plain data
    unsafe {
        let policy = libc::SCHED_RR;
        let priority = libc::sched_get_priority_min(policy);
        if priority < 0 {
            return false;
        }
        let param = libc::sched_param {
            sched_priority: priority,
        };
        libc::pthread_setschedparam(libc::pthread_self(), policy, &param) == 0
    }
}

#[cfg(not(unix))]
fn try_realtime_priority() -> bool {
    false
}
