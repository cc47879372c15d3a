//! Reading cdrdao TOC files into disc records, and merging them with
//! the basic track start/length TOC read at disc insertion.

use std::path::Path;

use tracing::debug;

use crate::error::{CoreError, Result};
use crate::model::{pcm, Disc, Track, RAW_CD_SUFFIX};

/// Read and parse a TOC file generated by cdrdao.
///
/// `disc_id` is the already computed disc id; a TOC file carries no
/// id of its own.
pub fn read_toc(path: &Path, disc_id: &str) -> Result<Disc> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CoreError::toc(format!("error reading {}: {e}", path.display())))?;
    parse_toc(&text, disc_id)
}

/// Parse a TOC generated by cdrdao.
///
/// This is not a full parse of all varieties that cdrdao itself
/// allows, only of the TOCs it generates with `read-toc`.
pub fn parse_toc(text: &str, disc_id: &str) -> Result<Disc> {
    let mut disc = Disc::new(disc_id, String::new());
    let mut track: Option<Track> = None;
    let mut cd_text = CdText::default();

    let mut lines = TocLines::new(text);

    while let Some(line) = lines.next() {
        // Disc flags carry no information we need
        if matches!(line.as_str(), "CD_DA" | "CD_ROM" | "CD_ROM_XA") {
            continue;
        }

        if let Some(rest) = line.strip_prefix("CATALOG ") {
            disc.catalog = Some(string_arg(rest, &line)?);
        } else if let Some(rest) = line.strip_prefix("TRACK ") {
            if let Some(t) = track.take() {
                disc.add_track(t);
            }

            if rest == "AUDIO" {
                track = Some(Track::default());
            } else {
                // Skip non-audio tracks entirely
                track = None;
            }
        } else if matches!(
            line.as_str(),
            "TWO_CHANNEL_AUDIO" | "COPY" | "NO COPY" | "PRE_EMPHASIS" | "NO PRE_EMPHASIS"
        ) {
            continue;
        } else if line == "FOUR_CHANNEL_AUDIO" {
            return Err(CoreError::toc("no support for four-channel audio"));
        } else if let Some(rest) = line.strip_prefix("CD_TEXT ") {
            let info = cd_text.parse(rest, &mut lines, track.is_none())?;
            if let Some(info) = info {
                match track.as_mut() {
                    None => {
                        disc.artist = info.artist;
                        disc.title = info.title;
                    }
                    Some(t) => {
                        t.artist = info.artist;
                        t.title = info.title;
                    }
                }
            }
        } else if line.starts_with("FILE ") {
            let t = track
                .as_mut()
                .ok_or_else(|| CoreError::toc(format!("FILE outside audio track: {line}")))?;

            let filename = string_arg(&line, &line)?;
            if disc.data_file_name.is_empty() {
                if !filename.ends_with(RAW_CD_SUFFIX) {
                    return Err(CoreError::toc(format!("unknown file format: {filename:?}")));
                }
                disc.data_file_name = filename;
            } else if disc.data_file_name != filename {
                return Err(CoreError::toc(format!(
                    "expected filename {:?}, got {:?}",
                    disc.data_file_name, filename
                )));
            }

            // The last two words are the offset and length, either 0
            // or an MSF
            let words: Vec<&str> = line.split_whitespace().collect();
            if words.len() < 4 {
                return Err(CoreError::toc(format!("missing offsets in file: {line}")));
            }

            let offset = words[words.len() - 2];
            let length = words[words.len() - 1];

            t.file_offset = if offset == "0" {
                0
            } else {
                pcm::msf_to_frames(offset)
                    .map_err(|_| CoreError::toc(format!("bad offset for file: {line}")))?
            };
            t.file_length = pcm::msf_to_frames(length)
                .map_err(|_| CoreError::toc(format!("bad length for file: {line}")))?;

            // Any silence before the track adds to the total length
            t.length = t.file_length + t.pregap_silence;
        } else if line.starts_with("SILENCE ") {
            let t = track
                .as_mut()
                .ok_or_else(|| CoreError::toc(format!("SILENCE outside audio track: {line}")))?;
            t.pregap_silence = msf_arg(&line)?;
        } else if line.starts_with("START ") {
            let t = track
                .as_mut()
                .ok_or_else(|| CoreError::toc(format!("START outside audio track: {line}")))?;
            t.pregap_offset = msf_arg(&line)?;
        } else if line.starts_with("INDEX ") {
            let t = track
                .as_mut()
                .ok_or_else(|| CoreError::toc(format!("INDEX outside audio track: {line}")))?;
            // Indices are relative to the pregap in the file, but
            // relative to track start in the model
            let index = msf_arg(&line)?;
            t.index.push(index + t.pregap_offset);
        } else if let Some(rest) = line.strip_prefix("ISRC ") {
            let t = track
                .as_mut()
                .ok_or_else(|| CoreError::toc(format!("ISRC outside audio track: {line}")))?;
            t.isrc = Some(string_arg(rest, &line)?);
        } else if line.starts_with("DATAFILE ") {
            // Data track contents, already skipped above
            continue;
        } else {
            return Err(CoreError::toc(format!("unexpected line: {line}")));
        }
    }

    if let Some(t) = track.take() {
        disc.add_track(t);
    }

    if disc.tracks.is_empty() {
        return Err(CoreError::toc("no audio tracks on disc"));
    }

    Ok(disc)
}

/// Merge a basic TOC into an existing disc record.
///
/// Used when re-ripping a disc whose offsets came from an old or
/// unreliable source: any track information added later is retained
/// while the offsets and lengths are reset to the basic TOC, pending
/// a full TOC read.
pub fn merge_basic_toc(disc: &mut Disc, toc_disc: &Disc) -> Result<()> {
    check_same_disc(disc, toc_disc)?;

    for (ot, tt) in disc.tracks.iter_mut().zip(toc_disc.tracks.iter()) {
        ot.file_offset = tt.file_offset;
        ot.file_length = tt.file_length;
        ot.length = tt.file_length;
        ot.pregap_offset = 0;
        ot.pregap_silence = 0;
        ot.index.clear();
    }

    Ok(())
}

/// Merge a full TOC read by cdrdao into an existing disc record.
///
/// The file offsets from a TOC-only read can't be fully trusted, so
/// the offsets of the basic TOC already in the record are kept, while
/// pregaps, indices and other subchannel data are taken from the new
/// TOC. Fields set by the user are never overwritten.
///
/// Also detects "hidden" tracks before the first one and inserts them
/// as track 0.
pub fn merge_full_toc(disc: &mut Disc, toc_disc: &Disc) -> Result<()> {
    check_same_disc(disc, toc_disc)?;

    let mut toc_tracks = toc_disc.tracks.clone();

    disc.catalog = disc.catalog.take().or_else(|| toc_disc.catalog.clone());
    disc.artist = disc.artist.take().or_else(|| toc_disc.artist.clone());
    disc.title = disc.title.take().or_else(|| toc_disc.title.clone());
    disc.barcode = disc.barcode.take().or_else(|| toc_disc.barcode.clone());

    // Detect a hidden first track: anything more than 2 s of audio
    // before track 1 is suspicious.
    let mut hidden: Option<Track> = None;
    let first_offset = disc.tracks[0].file_offset;
    if first_offset > 2 * pcm::RATE {
        hidden = Some(Track {
            number: 0,
            file_offset: 0,
            file_length: first_offset,
            length: first_offset,
            ..Track::default()
        });

        // The TOC may announce that span as track 1 pregap or
        // silence, which would double-count it
        let tt = &mut toc_tracks[0];
        tt.pregap_silence = 0;
        tt.pregap_offset = 0;
        tt.length = tt.file_length;
    }

    for (ot, tt) in disc.tracks.iter_mut().zip(toc_tracks.iter()) {
        // Move the pregap into the track
        ot.pregap_offset = tt.pregap_offset;
        ot.pregap_silence = tt.pregap_silence;
        ot.file_offset = ot.file_offset.checked_sub(tt.pregap_offset).ok_or_else(|| {
            CoreError::toc(format!(
                "track {} pregap larger than its basic offset",
                ot.number
            ))
        })?;
        ot.length = tt.length;
        ot.file_length = tt.file_length;
        ot.index = tt.index.clone();

        ot.isrc = ot.isrc.take().or_else(|| tt.isrc.clone());
        ot.artist = ot.artist.take().or_else(|| tt.artist.clone());
        ot.title = ot.title.take().or_else(|| tt.title.clone());
    }

    if let Some(hidden) = hidden {
        debug!(
            disc_id = %disc.disc_id,
            frames = hidden.length,
            "found hidden track before track 1"
        );
        disc.tracks.insert(0, hidden);
    }

    Ok(())
}

fn check_same_disc(disc: &Disc, toc_disc: &Disc) -> Result<()> {
    if disc.disc_id != toc_disc.disc_id {
        return Err(CoreError::toc(format!(
            "TOC disc id {} does not match {}",
            toc_disc.disc_id, disc.disc_id
        )));
    }
    if disc.tracks.is_empty() {
        return Err(CoreError::toc("disc record has no tracks"));
    }
    if disc.tracks.len() != toc_disc.tracks.len() {
        return Err(CoreError::toc(format!(
            "TOC has {} tracks, disc has {}",
            toc_disc.tracks.len(),
            disc.tracks.len()
        )));
    }
    Ok(())
}

/// Iterator over cleaned TOC lines: comments and surrounding
/// whitespace stripped, empty lines dropped.
struct TocLines<'a> {
    inner: std::str::Lines<'a>,
}

impl<'a> TocLines<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            inner: text.lines(),
        }
    }
}

impl<'a> Iterator for TocLines<'a> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        for line in self.inner.by_ref() {
            let line = match line.find("//") {
                Some(p) => &line[..p],
                None => line,
            };
            let line = line.trim();
            if !line.is_empty() {
                return Some(line.to_string());
            }
        }
        None
    }
}

#[derive(Debug, Default)]
struct CdTextInfo {
    title: Option<String>,
    artist: Option<String>,
}

/// State for parsing CD_TEXT blocks, keeping track of the chosen
/// language across the disc and track blocks.
#[derive(Debug, Default)]
struct CdText {
    language: Option<String>,
}

impl CdText {
    fn parse(
        &mut self,
        opening: &str,
        lines: &mut TocLines<'_>,
        for_disc: bool,
    ) -> Result<Option<CdTextInfo>> {
        if opening.trim() != "{" {
            return Err(CoreError::toc(format!(
                "expected \"{{\" but got {opening:?}"
            )));
        }

        let mut info = None;

        while let Some(line) = lines.next() {
            if line == "}" {
                return Ok(info);
            }

            if line.starts_with("LANGUAGE_MAP") {
                if !for_disc {
                    return Err(CoreError::toc(
                        "unexpected LANGUAGE_MAP in track CD_TEXT block",
                    ));
                }
                let rest = line["LANGUAGE_MAP".len()..]
                    .trim_start()
                    .trim_start_matches('{');
                self.parse_language_map(rest, lines)?;
                continue;
            }

            if let Some(lang) = language_block_id(&line) {
                // Without a LANGUAGE_MAP, just use whatever language
                // id turns up first (it's probably 0)
                if self.language.is_none() {
                    self.language = Some(lang.to_string());
                }

                let block = Self::parse_language_block(lines)?;
                if self.language.as_deref() == Some(lang) {
                    info = Some(block);
                }
                continue;
            }

            return Err(CoreError::toc(format!("unexpected CD_TEXT line: {line}")));
        }

        Err(CoreError::toc("unexpected EOF in CD_TEXT block"))
    }

    fn parse_language_map(&mut self, opening: &str, lines: &mut TocLines<'_>) -> Result<()> {
        let mut map = String::from(opening);

        if !map.contains('}') {
            for line in lines.by_ref() {
                if let Some(p) = line.find('}') {
                    map.push(' ');
                    map.push_str(&line[..p]);
                    break;
                }
                map.push(' ');
                map.push_str(&line);
            }
        } else if let Some(p) = map.find('}') {
            map.truncate(p);
        }

        // NUM : CODE pairs; colons may or may not be surrounded by
        // whitespace, so normalise first
        let normalised = map.replace(':', " : ");
        let words: Vec<&str> = normalised.split_whitespace().collect();

        let mut mappings = Vec::new();
        let mut i = 0;
        while i + 2 < words.len() {
            if words[i + 1] == ":" {
                mappings.push((words[i].to_string(), words[i + 2].to_string()));
                i += 3;
            } else {
                i += 1;
            }
        }

        for (num, code) in &mappings {
            // Prefer an English mapping
            if code == "9" || code == "EN" {
                self.language = Some(num.clone());
                return Ok(());
            }
        }

        match mappings.first() {
            Some((num, _)) => {
                self.language = Some(num.clone());
                Ok(())
            }
            None => Err(CoreError::toc(format!(
                "found no language mappings: {map:?}"
            ))),
        }
    }

    fn parse_language_block(lines: &mut TocLines<'_>) -> Result<CdTextInfo> {
        let mut info = CdTextInfo::default();

        while let Some(line) = lines.next() {
            if line == "}" {
                return Ok(info);
            } else if line.starts_with("TITLE ") {
                info.title = string_arg(&line, &line).ok().filter(|s| !s.is_empty());
            } else if line.starts_with("PERFORMER ") {
                info.artist = string_arg(&line, &line).ok().filter(|s| !s.is_empty());
            } else if line.contains('{') && !line.contains('}') {
                Self::skip_binary_data(lines)?;
            }
        }

        Err(CoreError::toc("unexpected EOF in CD_TEXT LANGUAGE block"))
    }

    fn skip_binary_data(lines: &mut TocLines<'_>) -> Result<()> {
        for line in lines.by_ref() {
            if line.contains('}') {
                return Ok(());
            }
        }
        Err(CoreError::toc("unexpected EOF in binary CD_TEXT data"))
    }
}

fn language_block_id(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("LANGUAGE ")?;
    let rest = rest.trim_end();
    let rest = rest.strip_suffix('{')?;
    let id = rest.trim();
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
        Some(id)
    } else {
        None
    }
}

/// Parse out a quoted string argument from a TOC line.
fn string_arg(text: &str, line: &str) -> Result<String> {
    let start = text
        .find('"')
        .ok_or_else(|| CoreError::toc(format!("no string argument in line: {line}")))?;
    let rest = &text[start + 1..];
    let end = rest
        .find('"')
        .ok_or_else(|| CoreError::toc(format!("no string argument in line: {line}")))?;
    Ok(rest[..end].to_string())
}

/// Parse a single MSF argument from a TOC line.
fn msf_arg(line: &str) -> Result<u64> {
    let mut words = line.split_whitespace();
    let (_, arg) = match (words.next(), words.next(), words.next()) {
        (Some(kw), Some(arg), None) => (kw, arg),
        _ => {
            return Err(CoreError::toc(format!(
                "expected a single MSF argument in line: {line}"
            )))
        }
    };

    pcm::msf_to_frames(arg).map_err(|_| CoreError::toc(format!("bad MSF in line: {line}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msf(s: &str) -> u64 {
        pcm::msf_to_frames(s).unwrap()
    }

    #[test]
    fn no_tracks() {
        assert!(parse_toc("\nCD_DA\n", "testId").is_err());
    }

    #[test]
    fn catalog_and_basic_track() {
        // Data tracks are ignored
        let toc = r#"
CD_DA

CATALOG "0123456789012"

TRACK MODE1
DATAFILE "foo.dat"

TRACK AUDIO
TWO_CHANNEL_AUDIO
FILE "data.cdr" 0 02:54:53
"#;
        let d = parse_toc(toc, "testId").unwrap();

        assert_eq!(d.disc_id, "testId");
        assert_eq!(d.catalog.as_deref(), Some("0123456789012"));
        assert_eq!(d.data_file_name, "data.cdr");

        assert_eq!(d.tracks.len(), 1);
        let t = &d.tracks[0];
        assert_eq!(t.number, 1);
        assert_eq!(t.file_offset, 0);
        assert_eq!(t.length, msf("02:54:53"));
        assert_eq!(t.length, t.file_length);
    }

    #[test]
    fn multiple_tracks() {
        let toc = r#"
CD_DA

TRACK AUDIO
NO COPY
NO PRE_EMPHASIS
TWO_CHANNEL_AUDIO
FILE "data.cdr" 0 02:54:53

TRACK AUDIO
NO COPY
NO PRE_EMPHASIS
TWO_CHANNEL_AUDIO
FILE "data.cdr" 02:54:53 03:29:65

TRACK AUDIO
NO COPY
NO PRE_EMPHASIS
TWO_CHANNEL_AUDIO
FILE "data.cdr" 06:24:43 03:36:67
"#;
        let d = parse_toc(toc, "testId").unwrap();

        assert_eq!(d.catalog, None);
        assert_eq!(d.tracks.len(), 3);

        assert_eq!(d.tracks[0].number, 1);
        assert_eq!(d.tracks[0].file_offset, 0);
        assert_eq!(d.tracks[0].length, msf("02:54:53"));

        assert_eq!(d.tracks[1].number, 2);
        assert_eq!(d.tracks[1].file_offset, msf("02:54:53"));
        assert_eq!(d.tracks[1].length, msf("03:29:65"));

        assert_eq!(d.tracks[2].number, 3);
        assert_eq!(d.tracks[2].file_offset, msf("06:24:43"));
        assert_eq!(d.tracks[2].length, msf("03:36:67"));
    }

    #[test]
    fn ignore_comments() {
        let toc = r#"
// CATALOG "0123456789012"

TRACK AUDIO
TWO_CHANNEL_AUDIO
FILE "data.cdr" 0 02:54:53 // foo bar

 // TRACK AUDIO
  // TWO_CHANNEL_AUDIO
// FILE "data.cdr" 02:54:53 03:29:65
"#;
        let d = parse_toc(toc, "testId").unwrap();

        assert!(d.catalog.is_none());
        assert_eq!(d.tracks.len(), 1);
        assert_eq!(d.tracks[0].length, msf("02:54:53"));
    }

    #[test]
    fn pregap_silence() {
        // Hidden track hiding in the pregap silence before track 1
        let toc = r#"
TRACK AUDIO
TWO_CHANNEL_AUDIO
SILENCE 03:48:35
FILE "data.cdr" 0 03:27:10
START 03:48:35
"#;
        let d = parse_toc(toc, "testId").unwrap();

        assert_eq!(d.tracks.len(), 1);
        let t = &d.tracks[0];
        assert_eq!(t.file_offset, 0);
        assert_eq!(t.length, msf("03:27:10") + msf("03:48:35"));
        assert_eq!(t.file_length, msf("03:27:10"));
        assert_eq!(t.pregap_offset, msf("03:48:35"));
        assert_eq!(t.pregap_silence, msf("03:48:35"));
    }

    #[test]
    fn start_and_index() {
        let toc = r#"
TRACK AUDIO
TWO_CHANNEL_AUDIO
FILE "data.cdr" 0 02:54:53
START 00:01:22
INDEX 00:03:11
INDEX 00:05:00
"#;
        let d = parse_toc(toc, "testId").unwrap();

        let t = &d.tracks[0];
        assert_eq!(t.pregap_offset, msf("00:01:22"));

        // Indices are translated from pregap-relative to
        // track-relative
        assert_eq!(t.index, vec![msf("00:04:33"), msf("00:06:22")]);
    }

    #[test]
    fn cdtext_with_language_map() {
        let toc = r#"
CD_DA

CD_TEXT {
  // Comment inside text block
  LANGUAGE_MAP {
    1: 2
    // Will use language 10, which maps to English
    10: EN 2 : 3
  }
  LANGUAGE 10 {
    TITLE "Disc title"
    PERFORMER "Disc artist"
    GENRE { 0,  0,  0}
    SIZE_INFO { 1,  1, 22,  0, 29, 20,  0,  0,  0,  0,  0,  1,
                0,  0,  0,  0,  0,  0,  0,  3, 52,  0,  0,  0,
                0,  0,  0,  0,  9,  0,  0,  0,  0,  0,  0,  0}
  }
}

TRACK AUDIO
TWO_CHANNEL_AUDIO
CD_TEXT {
  LANGUAGE 1 {
    TITLE "will be skipped"
    PERFORMER "will be skipped"
  }

  LANGUAGE 10 {
    TITLE "Title track 1"
    PERFORMER "Artist track 1"
  }
}
FILE "data.cdr" 0 03:15:63

TRACK AUDIO
TWO_CHANNEL_AUDIO
CD_TEXT {
  LANGUAGE 10 {
    TITLE "Title track 2"
    PERFORMER "Artist track 2"
  }

  LANGUAGE 1 {
    TITLE "will be skipped"
    PERFORMER "will be skipped"
  }
}
FILE "data.cdr" 03:15:63 03:17:47
"#;
        let d = parse_toc(toc, "testId").unwrap();

        assert_eq!(d.tracks.len(), 2);
        assert_eq!(d.title.as_deref(), Some("Disc title"));
        assert_eq!(d.artist.as_deref(), Some("Disc artist"));

        assert_eq!(d.tracks[0].title.as_deref(), Some("Title track 1"));
        assert_eq!(d.tracks[0].artist.as_deref(), Some("Artist track 1"));
        assert_eq!(d.tracks[1].title.as_deref(), Some("Title track 2"));
        assert_eq!(d.tracks[1].artist.as_deref(), Some("Artist track 2"));
    }

    #[test]
    fn cdtext_without_language_map() {
        let toc = r#"
CD_DA

CD_TEXT {
  LANGUAGE 10 {
    TITLE "Disc title"
    PERFORMER "Disc artist"
  }
}

TRACK AUDIO
TWO_CHANNEL_AUDIO
CD_TEXT {
  LANGUAGE 1 {
    TITLE "will be skipped"
    PERFORMER "will be skipped"
  }

  LANGUAGE 10 {
    TITLE "Title track 1"
    PERFORMER "Artist track 1"
  }
}
FILE "data.cdr" 0 03:15:63
"#;
        let d = parse_toc(toc, "testId").unwrap();

        assert_eq!(d.title.as_deref(), Some("Disc title"));
        assert_eq!(d.tracks[0].title.as_deref(), Some("Title track 1"));
    }

    #[test]
    fn track_isrc() {
        let toc = r#"
TRACK AUDIO
TWO_CHANNEL_AUDIO
ISRC "GBAYE0000351"
FILE "data.cdr" 0 03:27:10
"#;
        let d = parse_toc(toc, "testId").unwrap();
        assert_eq!(d.tracks[0].isrc.as_deref(), Some("GBAYE0000351"));
    }

    fn basic_disc(offsets: &[u64], lengths: &[u64]) -> Disc {
        let mut disc = Disc::new("testId", "data.cdr");
        for (&offset, &length) in offsets.iter().zip(lengths) {
            disc.add_track(Track {
                file_offset: offset,
                file_length: length,
                length,
                ..Track::default()
            });
        }
        disc
    }

    #[test]
    fn merge_full_toc_moves_pregap_into_track() {
        let pregap = msf("00:02:00");
        let len1 = msf("03:00:00");
        let len2 = msf("04:00:00");

        let mut disc = basic_disc(&[0, len1 + pregap], &[len1 + pregap, len2 - pregap]);
        disc.tracks[1].title = Some("user title".into());

        let mut toc_disc = basic_disc(&[0, len1 + pregap], &[len1 + pregap, len2 - pregap]);
        toc_disc.tracks[1].pregap_offset = pregap;
        toc_disc.tracks[1].index = vec![pregap + 100];
        toc_disc.tracks[1].title = Some("cdtext title".into());
        toc_disc.tracks[0].isrc = Some("ISRC1".into());

        merge_full_toc(&mut disc, &toc_disc).unwrap();

        assert_eq!(disc.tracks[1].pregap_offset, pregap);
        assert_eq!(disc.tracks[1].file_offset, len1);
        assert_eq!(disc.tracks[1].index, vec![pregap + 100]);

        // User-set metadata wins over CD-TEXT
        assert_eq!(disc.tracks[1].title.as_deref(), Some("user title"));
        // But unset fields are filled in
        assert_eq!(disc.tracks[0].isrc.as_deref(), Some("ISRC1"));
    }

    #[test]
    fn merge_full_toc_finds_hidden_track() {
        let hidden_len = msf("00:10:00");
        let len1 = msf("03:00:00");

        // Basic TOC says track 1 starts well into the file
        let mut disc = basic_disc(&[hidden_len], &[len1]);
        let toc_disc = basic_disc(&[hidden_len], &[len1]);

        merge_full_toc(&mut disc, &toc_disc).unwrap();

        assert_eq!(disc.tracks.len(), 2);
        assert_eq!(disc.tracks[0].number, 0);
        assert_eq!(disc.tracks[0].file_offset, 0);
        assert_eq!(disc.tracks[0].length, hidden_len);
        assert_eq!(disc.tracks[1].number, 1);
        assert_eq!(disc.tracks[1].file_offset, hidden_len);
    }

    #[test]
    fn merge_full_toc_rejects_track_count_mismatch() {
        let mut disc = basic_disc(&[0], &[1000]);
        let toc_disc = basic_disc(&[0, 1000], &[1000, 1000]);
        assert!(merge_full_toc(&mut disc, &toc_disc).is_err());
    }

    #[test]
    fn merge_basic_toc_resets_offsets() {
        let mut disc = basic_disc(&[0, 500], &[500, 700]);
        disc.tracks[0].pregap_offset = 100;
        disc.tracks[0].index = vec![200];
        disc.tracks[0].isrc = Some("KEEP".into());

        let toc_disc = basic_disc(&[0, 600], &[600, 800]);
        merge_basic_toc(&mut disc, &toc_disc).unwrap();

        assert_eq!(disc.tracks[0].pregap_offset, 0);
        assert!(disc.tracks[0].index.is_empty());
        assert_eq!(disc.tracks[0].file_length, 600);
        assert_eq!(disc.tracks[1].file_offset, 600);
        // Track metadata survives the reset
        assert_eq!(disc.tracks[0].isrc.as_deref(), Some("KEEP"));
    }
}
