//! Tests of the player supervisor driving the transport in-process,
//! with a file sink standing in for the sound card.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver};

use cod_archive::Database;
use cod_audio::FileSink;
use cod_core::{discid, model::Track, pcm, BasicToc, Disc, LinkType, PlayerState, RipPhase};
use cod_playback::{
    ChannelPublisher, Command, Player, PlayerOptions, Publication, Reply, RipperConfig,
    StatePublisher, Transport,
};

const SECOND: u64 = pcm::RATE;

fn test_options() -> PlayerOptions {
    PlayerOptions {
        ripper: RipperConfig {
            cdrom_device: "/dev/null".into(),
            discid_command: "/bin/false".into(),
            audio_command: "/bin/false".into(),
            toc_command: "/bin/false".into(),
            read_speed: None,
            timeout: None,
        },
        eject_command: None,
    }
}

/// Put a small, fully ripped disc into the archive.
fn add_disc(db: &Database, toc_line: &str, track_frames: &[u64]) -> Disc {
    let basic = BasicToc::parse(toc_line).unwrap();
    let mut disc = basic.to_disc("disc.cdr").unwrap();

    // Shrink the tracks so the tests stream quickly
    disc.tracks.clear();
    let mut offset = 0;
    for &frames in track_frames {
        let number = disc.tracks.len() as u32 + 1;
        disc.tracks.push(Track {
            number,
            file_offset: offset,
            file_length: frames,
            length: frames,
            ..Track::default()
        });
        offset += frames;
    }
    disc.rip = true;
    disc.toc = true;

    db.create_disc(&disc).unwrap();

    let db_id = discid::disc_to_db_id(&disc.disc_id).unwrap();
    std::fs::write(db.audio_path(&db_id), vec![0u8; (offset * 4) as usize]).unwrap();

    disc
}

struct Fixture {
    player: Player,
    publications: Receiver<Publication>,
    db: Database,
    _dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let db_dir = dir.path().join("db");
    std::fs::create_dir(&db_dir).unwrap();
    let db = Database::init(&db_dir).unwrap();

    let sink = Arc::new(FileSink::new(dir.path(), 0));
    let (publisher, publications) = ChannelPublisher::new();
    let publisher: Arc<dyn StatePublisher> = Arc::new(publisher);
    let transport = Transport::new(sink, Arc::clone(&publisher));

    let (_command_tx, command_rx) = unbounded();
    let player = Player::new(test_options(), db.clone(), transport, publisher, command_rx);

    Fixture {
        player,
        publications,
        db,
        _dir: dir,
    }
}

impl Fixture {
    fn wait_for_state(&self, what: &str, pred: impl Fn(&cod_core::State) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if let Ok(Publication::State(s)) =
                self.publications.recv_timeout(Duration::from_millis(100))
            {
                if pred(&s) {
                    return;
                }
            }
        }
        panic!("timed out waiting for {what}");
    }
}

#[test]
fn state_query_starts_with_no_disc() {
    let mut f = fixture();

    let reply = f.player.handle_command(Command::State).unwrap();
    match reply {
        Reply::State(state) => assert_eq!(state.state, PlayerState::NoDisc),
        other => panic!("unexpected reply {other:?}"),
    }
}

#[test]
fn rip_state_query_is_inactive_without_a_rip() {
    let mut f = fixture();

    let reply = f.player.handle_command(Command::RipState).unwrap();
    match reply {
        Reply::RipState(rip) => assert_eq!(rip.state, RipPhase::Inactive),
        other => panic!("unexpected reply {other:?}"),
    }
}

#[test]
fn disc_by_id_plays_an_archived_disc() {
    let mut f = fixture();
    let disc = add_disc(&f.db, "2 150 25000 70000", &[SECOND, SECOND]);

    let reply = f
        .player
        .handle_command(Command::Disc(Some(disc.disc_id.clone())))
        .unwrap();

    match reply {
        Reply::State(state) => {
            assert_eq!(state.state, PlayerState::Working);
            assert_eq!(state.disc_id.as_deref(), Some(&*disc.disc_id));
            assert_eq!(state.no_tracks, 2);
        }
        other => panic!("unexpected reply {other:?}"),
    }

    f.wait_for_state("STOP at end of disc", |s| {
        s.state == PlayerState::Stop && s.track == 2
    });
}

#[test]
fn disc_by_db_id_also_works() {
    let mut f = fixture();
    let disc = add_disc(&f.db, "1 150 70000", &[SECOND]);
    let db_id = discid::disc_to_db_id(&disc.disc_id).unwrap();

    let reply = f.player.handle_command(Command::Disc(Some(db_id))).unwrap();
    match reply {
        Reply::State(state) => assert_eq!(state.disc_id.as_deref(), Some(&*disc.disc_id)),
        other => panic!("unexpected reply {other:?}"),
    }
}

#[test]
fn unknown_disc_id_is_a_command_error() {
    let mut f = fixture();

    let result = f
        .player
        .handle_command(Command::Disc(Some("not-a-disc-id".into())));
    assert!(result.is_err());

    // The error does not disturb the player state
    match f.player.handle_command(Command::State).unwrap() {
        Reply::State(state) => assert_eq!(state.state, PlayerState::NoDisc),
        other => panic!("unexpected reply {other:?}"),
    }
}

#[test]
fn source_reports_the_loaded_disc() {
    let mut f = fixture();
    let disc = add_disc(&f.db, "1 150 70000", &[SECOND]);

    match f.player.handle_command(Command::Source).unwrap() {
        Reply::Disc(None) => {}
        other => panic!("unexpected reply {other:?}"),
    }

    f.player
        .handle_command(Command::Disc(Some(disc.disc_id.clone())))
        .unwrap();

    match f.player.handle_command(Command::Source).unwrap() {
        Reply::Disc(Some(ext)) => assert_eq!(ext.disc_id, disc.disc_id),
        other => panic!("unexpected reply {other:?}"),
    }
}

#[test]
fn eject_returns_to_no_disc() {
    let mut f = fixture();
    let disc = add_disc(&f.db, "1 150 70000", &[5 * SECOND]);

    f.player
        .handle_command(Command::Disc(Some(disc.disc_id)))
        .unwrap();

    match f.player.handle_command(Command::Eject).unwrap() {
        Reply::State(state) => {
            assert_eq!(state.state, PlayerState::NoDisc);
            assert_eq!(state.disc_id, None);
        }
        other => panic!("unexpected reply {other:?}"),
    }
}

#[test]
fn version_replies_ok_with_a_value() {
    let mut f = fixture();

    match f.player.handle_command(Command::Version).unwrap() {
        Reply::Ok(Some(value)) => assert!(value.is_string()),
        other => panic!("unexpected reply {other:?}"),
    }
}

#[test]
fn command_parsing_covers_the_wire_surface() {
    let parse = |words: &[&str]| {
        let parts: Vec<String> = words.iter().map(|s| s.to_string()).collect();
        Command::parse(&parts)
    };

    assert_eq!(parse(&["play"]).unwrap(), Command::Play);
    assert_eq!(parse(&["disc"]).unwrap(), Command::Disc(None));
    assert_eq!(
        parse(&["disc", "someid"]).unwrap(),
        Command::Disc(Some("someid".into()))
    );
    assert_eq!(parse(&["play_track", "3"]).unwrap(), Command::PlayTrack(3));
    assert_eq!(parse(&["seek", "-2"]).unwrap(), Command::Seek(-2));
    assert_eq!(parse(&["rip_state"]).unwrap(), Command::RipState);

    assert!(parse(&[]).is_err());
    assert!(parse(&["frobnicate"]).is_err());
    assert!(parse(&["play", "now"]).is_err());
    assert!(parse(&["play_track"]).is_err());
    assert!(parse(&["seek", "soon"]).is_err());
}

#[test]
fn alias_links_resolve_for_inserted_discs() {
    let mut f = fixture();

    // The target disc with real audio
    let target = add_disc(&f.db, "1 150 70000", &[SECOND]);

    // The inserted disc is an alias pointing at the target
    let basic = BasicToc::parse("2 150 30000 60000").unwrap();
    let mut alias = basic.to_disc("disc.cdr").unwrap();
    alias.rip = true;
    alias.toc = true;
    alias.link_type = Some(LinkType::Alias);
    alias.linked_disc_id = Some(target.disc_id.clone());
    f.db.create_disc(&alias).unwrap();

    // A disc id helper reporting the alias disc as inserted
    let script = f._dir.path().join("discid.sh");
    std::fs::write(&script, "#!/bin/sh\necho \"2 150 30000 60000\"\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    let mut options = test_options();
    options.ripper.discid_command = script.display().to_string();

    let (_command_tx, command_rx) = unbounded();
    let sink = Arc::new(FileSink::new(f._dir.path(), 0));
    let (publisher, _publications) = ChannelPublisher::new();
    let publisher: Arc<dyn StatePublisher> = Arc::new(publisher);
    let transport = Transport::new(sink, Arc::clone(&publisher));
    let mut player = Player::new(options, f.db.clone(), transport, publisher, command_rx);

    match player.handle_command(Command::Disc(None)).unwrap() {
        Reply::State(state) => {
            // The alias plays the target, remembering where it came from
            assert_eq!(state.disc_id.as_deref(), Some(&*target.disc_id));
            assert_eq!(state.source_disc_id.as_deref(), Some(&*alias.disc_id));
        }
        other => panic!("unexpected reply {other:?}"),
    }
}
