//! Ripping discs into the archive.
//!
//! Two external programs do the real work: an audio ripper writing
//! raw PCM to the archive file, and a TOC reader producing a textual
//! subchannel TOC. They run sequentially, audio first, so playback
//! can begin as soon as the first bytes hit the file. The ripper is
//! ticked about once a second by the player to monitor progress.

use std::collections::VecDeque;
use std::fs::File;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use cod_archive::Database;
use cod_core::{discid, toc, BasicToc, Disc, RipPhase, RipState};

use crate::error::RipError;

/// Configuration for the ripping process, extracted from the daemon
/// configuration.
#[derive(Debug, Clone)]
pub struct RipperConfig {
    pub cdrom_device: String,

    /// Prints the basic TOC as `NTRACKS OFFSET... LEADOUT` in CD
    /// frames
    pub discid_command: String,

    /// cdparanoia or compatible
    pub audio_command: String,

    /// cdrdao or compatible
    pub toc_command: String,

    /// Cap on the drive read speed, if any
    pub read_speed: Option<u32>,

    /// Wall-clock budget for each helper program
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RipTask {
    Audio,
    Toc,
}

struct RunningTask {
    task: RipTask,
    child: Child,
    started: Instant,
}

/// Result of reading an inserted disc.
pub struct DiscRead {
    /// The disc to play, from the archive or freshly created
    pub disc: Disc,

    /// A ripper to tick, when the disc still needs rip work
    pub ripper: Option<Ripper>,
}

/// Controls the process of ripping one disc into the archive.
pub struct Ripper {
    cfg: RipperConfig,
    db: Database,
    state: RipState,
    disc: Disc,
    db_id: String,
    audio_size: u64,
    tasks: VecDeque<RipTask>,
    current: Option<RunningTask>,
    active: Arc<AtomicBool>,
}

impl Ripper {
    /// Read the inserted physical disc and decide what rip work it
    /// needs. Creates the disc record for a previously unknown disc.
    pub fn read_disc(cfg: RipperConfig, db: Database) -> Result<DiscRead, RipError> {
        debug!("disc inserted, reading ID");

        let basic = read_basic_toc(&cfg)?;
        let disc_id = basic.disc_id();
        let db_id = discid::disc_to_db_id(&disc_id)
            .map_err(|e| RipError::DiscRead {
                device: cfg.cdrom_device.clone(),
                reason: e.to_string(),
            })?;

        let old_disc = db.get_disc_by_db_id(&db_id)?;
        let new_disc = basic
            .to_disc(db.audio_file_name())
            .map_err(|e| RipError::DiscRead {
                device: cfg.cdrom_device.clone(),
                reason: e.to_string(),
            })?;

        let (disc, tasks): (Disc, Vec<RipTask>) = match old_disc {
            None => {
                info!(disc_id = %disc_id, "ripping new disc");
                db.create_disc(&new_disc)?;
                (new_disc, vec![RipTask::Audio, RipTask::Toc])
            }
            Some(mut disc) if !disc.rip => {
                // Partially ripped earlier: reset the offsets to the
                // basic TOC and rip again
                info!(disc_id = %disc_id, "re-ripping disc");
                toc::merge_basic_toc(&mut disc, &new_disc)?;
                db.save_disc_info(&disc)?;
                (disc, vec![RipTask::Audio, RipTask::Toc])
            }
            Some(disc) if !disc.toc => {
                info!(disc_id = %disc_id, "restarting TOC rip");
                (disc, vec![RipTask::Toc])
            }
            Some(disc) => (disc, Vec::new()),
        };

        if tasks.is_empty() {
            return Ok(DiscRead { disc, ripper: None });
        }

        let audio_size = disc.file_size_bytes();
        let state = RipState {
            disc_id: Some(disc_id),
            ..RipState::default()
        };

        let ripper = Ripper {
            cfg,
            db,
            state,
            disc: disc.clone(),
            db_id,
            audio_size,
            tasks: tasks.into(),
            current: None,
            active: Arc::new(AtomicBool::new(true)),
        };

        Ok(DiscRead {
            disc,
            ripper: Some(ripper),
        })
    }

    /// The current rip state.
    pub fn state(&self) -> &RipState {
        &self.state
    }

    /// Flag that is true while this rip is running; handed to the
    /// source streamer so it knows to wait on a short file.
    pub fn active_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.active)
    }

    /// Check on ripping progress. Returns true while still running;
    /// failures end up in the rip state's error field.
    pub fn tick(&mut self) -> bool {
        match self.tick_inner() {
            Ok(running) => {
                if !running {
                    self.active.store(false, Ordering::SeqCst);
                }
                running
            }
            Err(e) => {
                warn!(error = %e, "rip failed");
                self.state.error = Some(e.to_string());
                self.tasks.clear();
                self.current = None;
                self.active.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    fn tick_inner(&mut self) -> Result<bool, RipError> {
        if self.current.is_none() {
            let Some(task) = self.tasks.pop_front() else {
                if self.state.state != RipPhase::Inactive {
                    self.state = RipState {
                        disc_id: self.state.disc_id.clone(),
                        ..RipState::default()
                    };
                }
                return Ok(false);
            };

            self.start_task(task)?;
        }

        let running = self.current.as_mut().expect("task started above");

        match running.child.try_wait()? {
            None => {
                if let Some(timeout) = self.cfg.timeout {
                    if running.started.elapsed() > timeout {
                        let phase = phase_name(running.task);
                        warn!(phase, "rip helper timed out, killing it");
                        let _ = running.child.kill();
                        let _ = running.child.wait();
                        self.current = None;
                        return Err(RipError::Timeout { phase });
                    }
                }

                self.update_progress();
                Ok(true)
            }

            Some(status) => {
                let task = running.task;
                self.current = None;

                debug!(phase = phase_name(task), ?status, "rip helper finished");

                if !status.success() {
                    return Err(RipError::ChildFailed {
                        phase: phase_name(task),
                        status: status.code().unwrap_or(-1),
                    });
                }

                match task {
                    RipTask::Audio => self.finish_audio()?,
                    RipTask::Toc => self.finish_toc()?,
                }

                // Go straight on to the next task, if any
                self.tick_inner()
            }
        }
    }

    /// Stop the ripping process, abandoning any unfinished work. The
    /// partial result stays in the archive.
    pub fn stop(&mut self) {
        self.tasks.clear();

        if let Some(mut running) = self.current.take() {
            info!(
                phase = phase_name(running.task),
                "killing rip process on stop"
            );
            let _ = running.child.kill();
            let _ = running.child.wait();
        }

        self.state = RipState {
            disc_id: self.state.disc_id.clone(),
            ..RipState::default()
        };
        self.active.store(false, Ordering::SeqCst);
    }

    fn start_task(&mut self, task: RipTask) -> Result<(), RipError> {
        match task {
            RipTask::Audio => {
                info!(disc_id = %self.disc.disc_id, "ripping audio");

                let audio_path = self.db.audio_path(&self.db_id);

                // A span of -NUM_TRACKS forces the ripper to read
                // everything, including hidden tracks before the
                // first proper one
                let span = format!("-{}", self.disc.tracks.len());

                let mut args: Vec<String> = vec![
                    "--force-cdrom-device".into(),
                    self.cfg.cdrom_device.clone(),
                    "--output-raw-big-endian".into(),
                ];
                if let Some(speed) = self.cfg.read_speed {
                    args.push("--force-read-speed".into());
                    args.push(speed.to_string());
                }
                args.push("--".into());
                args.push(span);
                args.push(audio_path.display().to_string());

                let command = self.cfg.audio_command.clone();
                let child = self.run_helper(&command, &args, "rip_audio.log")?;
                self.current = Some(RunningTask {
                    task,
                    child,
                    started: Instant::now(),
                });

                self.state.state = RipPhase::Audio;
                self.state.progress = Some(0);
            }

            RipTask::Toc => {
                info!(disc_id = %self.disc.disc_id, "reading full TOC");

                let toc_path = self.db.toc_path(&self.db_id);

                // The TOC reader refuses to overwrite an old file
                let _ = std::fs::remove_file(&toc_path);

                let args: Vec<String> = vec![
                    "read-toc".into(),
                    "--device".into(),
                    self.cfg.cdrom_device.clone(),
                    "--datafile".into(),
                    self.db.audio_file_name().into(),
                    toc_path.display().to_string(),
                ];

                let command = self.cfg.toc_command.clone();
                let child = self.run_helper(&command, &args, "rip_toc.log")?;
                self.current = Some(RunningTask {
                    task,
                    child,
                    started: Instant::now(),
                });

                self.state.state = RipPhase::Toc;
                self.state.progress = None;
            }
        }

        Ok(())
    }

    fn run_helper(
        &mut self,
        command: &str,
        args: &[String],
        log_name: &str,
    ) -> Result<Child, RipError> {
        let dir = self.db.disc_dir(&self.db_id);
        let log_path = dir.join(log_name);

        let log_file = File::create(&log_path).map_err(|e| RipError::Exec {
            command: command.to_string(),
            reason: format!("can't open log file {}: {e}", log_path.display()),
        })?;
        let log_err = log_file.try_clone().map_err(RipError::Io)?;

        debug!(?command, ?args, dir = %dir.display(), "executing rip helper");

        Command::new(command)
            .args(args)
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_err))
            .spawn()
            .map_err(|e| RipError::Exec {
                command: command.to_string(),
                reason: e.to_string(),
            })
    }

    fn update_progress(&mut self) {
        let progress = match self.state.state {
            // Audio progress from the size of the output file
            RipPhase::Audio => match std::fs::metadata(self.db.audio_path(&self.db_id)) {
                Ok(meta) if self.audio_size > 0 => {
                    Some(((meta.len() * 100) / self.audio_size).min(100) as u8)
                }
                _ => Some(0),
            },

            // TOC progress from the per-track log lines of the reader
            RipPhase::Toc => {
                toc_progress(&self.db.disc_dir(&self.db_id).join("rip_toc.log"), &self.disc)
            }

            RipPhase::Inactive => None,
        };

        if progress != self.state.progress {
            self.state.progress = progress;
        }
    }

    fn finish_audio(&mut self) -> Result<(), RipError> {
        // Reload the disc record, since it might have been edited
        // while ripping
        let mut disc = self
            .db
            .get_disc_by_db_id(&self.db_id)?
            .ok_or_else(|| RipError::DiscRead {
                device: self.cfg.cdrom_device.clone(),
                reason: format!("disc missing from archive after ripping: {}", self.db_id),
            })?;

        disc.rip = true;
        self.db.save_disc_info(&disc)?;
        self.disc = disc;
        Ok(())
    }

    fn finish_toc(&mut self) -> Result<(), RipError> {
        let toc_disc = toc::read_toc(&self.db.toc_path(&self.db_id), &self.disc.disc_id)?;

        let mut disc = self
            .db
            .get_disc_by_db_id(&self.db_id)?
            .ok_or_else(|| RipError::DiscRead {
                device: self.cfg.cdrom_device.clone(),
                reason: format!("disc missing from archive after TOC rip: {}", self.db_id),
            })?;

        toc::merge_full_toc(&mut disc, &toc_disc)?;
        disc.toc = true;

        self.db.save_disc_info(&disc)?;
        self.disc = disc;
        Ok(())
    }
}

fn phase_name(task: RipTask) -> &'static str {
    match task {
        RipTask::Audio => "audio",
        RipTask::Toc => "toc",
    }
}

/// Run the disc id helper and parse the basic TOC from its output.
fn read_basic_toc(cfg: &RipperConfig) -> Result<BasicToc, RipError> {
    let output = Command::new(&cfg.discid_command)
        .arg(&cfg.cdrom_device)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| RipError::Exec {
            command: cfg.discid_command.clone(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(RipError::DiscRead {
            device: cfg.cdrom_device.clone(),
            reason: format!(
                "disc id helper failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    let text = String::from_utf8_lossy(&output.stdout);
    BasicToc::parse(&text).map_err(|e| RipError::DiscRead {
        device: cfg.cdrom_device.clone(),
        reason: e.to_string(),
    })
}

/// Estimate TOC read progress by counting the reader's per-track
/// analysis lines.
fn toc_progress(log_path: &std::path::Path, disc: &Disc) -> Option<u8> {
    let text = std::fs::read_to_string(log_path).ok()?;
    let analyzed = text
        .lines()
        .filter(|line| line.starts_with("Analyzing track"))
        .count();

    let total = disc.tracks.len();
    if total == 0 || analyzed == 0 {
        return None;
    }

    Some(((analyzed * 100) / total).min(100) as u8)
}

/// Run an eject helper in the background, logging its outcome.
pub fn eject_disc(eject_command: &str, device: &str) {
    let command = eject_command.to_string();
    let device = device.to_string();

    let child = Command::new(&command)
        .arg(&device)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();

    match child {
        Err(e) => warn!(command, error = %e, "error executing eject command"),
        Ok(mut child) => {
            std::thread::Builder::new()
                .name("eject wait".into())
                .spawn(move || match child.wait() {
                    Ok(status) if status.success() => debug!(command, "eject finished"),
                    Ok(status) => warn!(command, ?status, "eject finished with error"),
                    Err(e) => warn!(command, error = %e, "error waiting for eject"),
                })
                .ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cfg(dir: &std::path::Path, discid_output: &str) -> RipperConfig {
        // A tiny shell script stands in for the disc id helper
        let script = dir.join("discid.sh");
        std::fs::write(&script, format!("#!/bin/sh\necho \"{discid_output}\"\n")).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        RipperConfig {
            cdrom_device: "/dev/cdrom".into(),
            discid_command: script.display().to_string(),
            audio_command: "/bin/true".into(),
            toc_command: "/bin/true".into(),
            read_speed: None,
            timeout: None,
        }
    }

    #[test]
    fn read_disc_creates_record_and_plans_rip() {
        let tmp = tempfile::tempdir().unwrap();
        let db_dir = tmp.path().join("db");
        std::fs::create_dir(&db_dir).unwrap();
        let db = Database::init(&db_dir).unwrap();

        let cfg = test_cfg(tmp.path(), "2 150 25000 70000");
        let read = Ripper::read_disc(cfg, db.clone()).unwrap();

        assert_eq!(read.disc.tracks.len(), 2);
        let ripper = read.ripper.expect("new disc needs ripping");
        assert_eq!(ripper.tasks.len(), 2);
        assert!(ripper.active_flag().load(Ordering::SeqCst));

        // The record landed in the archive
        let stored = db.get_disc_by_disc_id(&read.disc.disc_id).unwrap();
        assert_eq!(stored.unwrap().disc_id, read.disc.disc_id);
    }

    #[test]
    fn fully_ripped_disc_needs_no_ripper() {
        let tmp = tempfile::tempdir().unwrap();
        let db_dir = tmp.path().join("db");
        std::fs::create_dir(&db_dir).unwrap();
        let db = Database::init(&db_dir).unwrap();

        let cfg = test_cfg(tmp.path(), "2 150 25000 70000");
        let read = Ripper::read_disc(cfg.clone(), db.clone()).unwrap();
        drop(read.ripper);

        // Mark the disc fully processed
        let mut disc = read.disc.clone();
        disc.rip = true;
        disc.toc = true;
        db.save_disc_info(&disc).unwrap();

        let read = Ripper::read_disc(cfg, db).unwrap();
        assert!(read.ripper.is_none());
    }

    #[test]
    fn audio_ripped_disc_only_needs_toc() {
        let tmp = tempfile::tempdir().unwrap();
        let db_dir = tmp.path().join("db");
        std::fs::create_dir(&db_dir).unwrap();
        let db = Database::init(&db_dir).unwrap();

        let cfg = test_cfg(tmp.path(), "1 150 70000");
        let read = Ripper::read_disc(cfg.clone(), db.clone()).unwrap();
        drop(read.ripper);

        let mut disc = read.disc.clone();
        disc.rip = true;
        db.save_disc_info(&disc).unwrap();

        let read = Ripper::read_disc(cfg, db).unwrap();
        let ripper = read.ripper.expect("toc still missing");
        assert_eq!(ripper.tasks.len(), 1);
        assert_eq!(ripper.tasks[0], RipTask::Toc);
    }

    #[test]
    fn helper_failure_sets_error_state() {
        let tmp = tempfile::tempdir().unwrap();
        let db_dir = tmp.path().join("db");
        std::fs::create_dir(&db_dir).unwrap();
        let db = Database::init(&db_dir).unwrap();

        let mut cfg = test_cfg(tmp.path(), "1 150 70000");
        cfg.audio_command = "/bin/false".into();

        let mut ripper = Ripper::read_disc(cfg, db).unwrap().ripper.unwrap();

        // First tick starts /bin/false; tick until it has exited
        let mut running = true;
        for _ in 0..100 {
            running = ripper.tick();
            if !running {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        assert!(!running);
        assert!(ripper.state().error.is_some());
        assert!(!ripper.active_flag().load(Ordering::SeqCst));
    }

    #[test]
    fn stop_kills_current_task() {
        let tmp = tempfile::tempdir().unwrap();
        let db_dir = tmp.path().join("db");
        std::fs::create_dir(&db_dir).unwrap();
        let db = Database::init(&db_dir).unwrap();

        // A helper that ignores its arguments and hangs around
        let slow = tmp.path().join("slow.sh");
        std::fs::write(&slow, "#!/bin/sh\nsleep 60\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&slow, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let mut cfg = test_cfg(tmp.path(), "1 150 70000");
        cfg.audio_command = slow.display().to_string();
        let mut ripper = Ripper::read_disc(cfg, db).unwrap().ripper.unwrap();

        assert!(ripper.tick());
        assert_eq!(ripper.state().state, RipPhase::Audio);

        ripper.stop();

        assert!(ripper.current.is_none());
        assert!(ripper.tasks.is_empty());
        assert_eq!(ripper.state().state, RipPhase::Inactive);
        assert!(!ripper.active_flag().load(Ordering::SeqCst));
    }

    #[test]
    fn helper_timeout_is_enforced() {
        let tmp = tempfile::tempdir().unwrap();
        let db_dir = tmp.path().join("db");
        std::fs::create_dir(&db_dir).unwrap();
        let db = Database::init(&db_dir).unwrap();

        let slow = tmp.path().join("slow.sh");
        std::fs::write(&slow, "#!/bin/sh\nsleep 60\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&slow, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let mut cfg = test_cfg(tmp.path(), "1 150 70000");
        cfg.audio_command = slow.display().to_string();
        cfg.timeout = Some(Duration::from_millis(50));

        let mut ripper = Ripper::read_disc(cfg, db).unwrap().ripper.unwrap();

        assert!(ripper.tick());
        std::thread::sleep(Duration::from_millis(100));

        assert!(!ripper.tick());
        assert!(ripper
            .state()
            .error
            .as_deref()
            .is_some_and(|e| e.contains("timed out")));
    }
}
