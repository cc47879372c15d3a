//! The file-system database of ripped discs.
//!
//! The database uses the following directory structure:
//!
//! ```text
//! DB_DIR/.codplayerdb
//!   Identifies that this is a database directory. Contains a single
//!   number that is the version of the database format.
//!
//! DB_DIR/discs/0/ .. DB_DIR/discs/f/
//!   Buckets for the disc directories, based on the first hex
//!   character of the database id.
//!
//! DB_DIR/discs/b/b8ffac79.../
//!   Directory for one ripped disc, named by its database id
//!   (lowercase hex of the disc id digest). Contains:
//!
//!   disc.id    the disc id, same information as the directory name
//!   disc.cdr   raw PCM samples ripped from the disc
//!   disc.toc   TOC read by cdrdao from the disc
//!   disc.json  the disc record with user-editable metadata
//! ```
//!
//! `disc.json` is updated by rename-after-temp-write so that readers
//! always see either the previous or the next complete record.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use cod_core::{discid, Disc};

use crate::error::{ArchiveError, Result};

const VERSION: u32 = 1;

const MARKER_FILE: &str = ".codplayerdb";
const DISC_DIR: &str = "discs";

const DISC_ID_FILE: &str = "disc.id";
const AUDIO_FILE: &str = "disc.cdr";
const TOC_FILE: &str = "disc.toc";
const INFO_FILE: &str = "disc.json";

/// Access to the file-system database of ripped discs.
#[derive(Debug, Clone)]
pub struct Database {
    dir: PathBuf,
}

impl Database {
    /// Initialise a new database directory. The directory must exist
    /// and be empty.
    pub fn init(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();

        if fs::read_dir(&dir)?.next().is_some() {
            return Err(ArchiveError::NotAnArchive(format!(
                "{} is not empty",
                dir.display()
            )));
        }

        fs::write(dir.join(MARKER_FILE), format!("{VERSION}\n"))?;
        fs::create_dir(dir.join(DISC_DIR))?;
        for bucket in "0123456789abcdef".chars() {
            fs::create_dir(dir.join(DISC_DIR).join(bucket.to_string()))?;
        }

        debug!(dir = %dir.display(), "initialised disc database");
        Ok(Self { dir })
    }

    /// Open an existing database directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();

        let marker = dir.join(MARKER_FILE);
        let version = fs::read_to_string(&marker)
            .map_err(|_| ArchiveError::NotAnArchive(dir.display().to_string()))?;
        let version: u32 = version
            .trim()
            .parse()
            .map_err(|_| ArchiveError::NotAnArchive(dir.display().to_string()))?;

        if version != VERSION {
            return Err(ArchiveError::NotAnArchive(format!(
                "unsupported database version {version} in {}",
                dir.display()
            )));
        }

        Ok(Self { dir })
    }

    /// Whether a string looks like a disc id.
    pub fn is_valid_disc_id(id: &str) -> bool {
        discid::is_valid_disc_id(id)
    }

    /// Whether a string looks like a database id.
    pub fn is_valid_db_id(id: &str) -> bool {
        discid::is_valid_db_id(id)
    }

    /// The directory holding a disc's files.
    pub fn disc_dir(&self, db_id: &str) -> PathBuf {
        self.dir
            .join(DISC_DIR)
            .join(&db_id[..1])
            .join(db_id)
    }

    /// Path of the raw PCM file for a disc.
    pub fn audio_path(&self, db_id: &str) -> PathBuf {
        self.disc_dir(db_id).join(AUDIO_FILE)
    }

    /// File name of the raw PCM file, as referenced from TOC files.
    pub fn audio_file_name(&self) -> &'static str {
        AUDIO_FILE
    }

    /// Path of the cdrdao TOC file for a disc.
    pub fn toc_path(&self, db_id: &str) -> PathBuf {
        self.disc_dir(db_id).join(TOC_FILE)
    }

    /// Create a new disc record. Fails if the disc already exists.
    pub fn create_disc(&self, disc: &Disc) -> Result<()> {
        let db_id = discid::disc_to_db_id(&disc.disc_id)?;
        let dir = self.disc_dir(&db_id);

        if dir.exists() {
            return Err(ArchiveError::DiscExists(disc.disc_id.clone()));
        }

        fs::create_dir_all(&dir)?;
        fs::write(dir.join(DISC_ID_FILE), format!("{}\n", disc.disc_id))?;
        self.save_disc_info(disc)?;

        debug!(disc_id = %disc.disc_id, "created disc record");
        Ok(())
    }

    /// Fetch a disc record by disc id, or None if it isn't in the
    /// database.
    pub fn get_disc_by_disc_id(&self, disc_id: &str) -> Result<Option<Disc>> {
        let db_id = discid::disc_to_db_id(disc_id)
            .map_err(|_| ArchiveError::InvalidId(disc_id.to_string()))?;
        self.get_disc_by_db_id(&db_id)
    }

    /// Fetch a disc record by database id, or None if it isn't in the
    /// database.
    pub fn get_disc_by_db_id(&self, db_id: &str) -> Result<Option<Disc>> {
        if !Self::is_valid_db_id(db_id) {
            return Err(ArchiveError::InvalidId(db_id.to_string()));
        }

        let path = self.disc_dir(db_id).join(INFO_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let disc: Disc =
            serde_json::from_str(&text).map_err(|e| ArchiveError::CorruptDisc {
                id: db_id.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Some(disc))
    }

    /// Save a disc record, atomically replacing any previous one.
    pub fn save_disc_info(&self, disc: &Disc) -> Result<()> {
        let db_id = discid::disc_to_db_id(&disc.disc_id)?;
        let dir = self.disc_dir(&db_id);

        let mut tmp = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, disc)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(dir.join(INFO_FILE))
            .map_err(|e| ArchiveError::Io(e.error))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cod_core::BasicToc;

    fn test_disc() -> Disc {
        BasicToc::parse("2 150 25000 70000")
            .unwrap()
            .to_disc(AUDIO_FILE)
            .unwrap()
    }

    #[test]
    fn init_and_open() {
        let dir = tempfile::tempdir().unwrap();
        Database::init(dir.path()).unwrap();
        Database::open(dir.path()).unwrap();
    }

    #[test]
    fn open_rejects_plain_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Database::open(dir.path()),
            Err(ArchiveError::NotAnArchive(_))
        ));
    }

    #[test]
    fn init_rejects_non_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("junk"), "x").unwrap();
        assert!(Database::init(dir.path()).is_err());
    }

    #[test]
    fn create_and_fetch_disc() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::init(dir.path()).unwrap();

        let disc = test_disc();
        db.create_disc(&disc).unwrap();

        let fetched = db.get_disc_by_disc_id(&disc.disc_id).unwrap().unwrap();
        assert_eq!(fetched, disc);

        let db_id = discid::disc_to_db_id(&disc.disc_id).unwrap();
        let fetched = db.get_disc_by_db_id(&db_id).unwrap().unwrap();
        assert_eq!(fetched, disc);

        assert!(db.audio_path(&db_id).starts_with(db.disc_dir(&db_id)));
    }

    #[test]
    fn create_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::init(dir.path()).unwrap();

        let disc = test_disc();
        db.create_disc(&disc).unwrap();
        assert!(matches!(
            db.create_disc(&disc),
            Err(ArchiveError::DiscExists(_))
        ));
    }

    #[test]
    fn save_disc_info_replaces_record() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::init(dir.path()).unwrap();

        let mut disc = test_disc();
        db.create_disc(&disc).unwrap();

        disc.artist = Some("Artist".into());
        disc.tracks[0].skip = true;
        db.save_disc_info(&disc).unwrap();

        let fetched = db.get_disc_by_disc_id(&disc.disc_id).unwrap().unwrap();
        assert_eq!(fetched.artist.as_deref(), Some("Artist"));
        assert!(fetched.tracks[0].skip);
    }

    #[test]
    fn unknown_disc_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::init(dir.path()).unwrap();

        let disc = test_disc();
        assert!(db.get_disc_by_disc_id(&disc.disc_id).unwrap().is_none());
    }
}
