//! Disc id computation and translation.
//!
//! The disc id is the MusicBrainz convention: an SHA-1 over a fixed
//! hex rendering of the basic TOC, base64 encoded with the characters
//! `+/=` replaced by `._-`. This is a compatibility contract with
//! other implementations, so the byte encoding must not change.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha1::{Digest, Sha1};

use crate::error::{CoreError, Result};

/// Length of a disc id string.
pub const DISC_ID_LEN: usize = 28;

/// Length of a database id string (hex SHA-1).
pub const DB_ID_LEN: usize = 40;

/// Compute the disc id from the basic TOC: per-track start offsets
/// and the leadout offset, all in CD frames from the start of the
/// disc (including the standard 150 frame lead-in).
pub fn disc_id_from_toc(offsets: &[u32], leadout: u32) -> String {
    use std::fmt::Write;

    let first = 1u8;
    let last = offsets.len() as u8;

    let mut text = String::with_capacity(4 + 100 * 8);
    write!(text, "{first:02X}").unwrap();
    write!(text, "{last:02X}").unwrap();
    write!(text, "{leadout:08X}").unwrap();
    for i in 0..99 {
        let offset = offsets.get(i).copied().unwrap_or(0);
        write!(text, "{offset:08X}").unwrap();
    }

    let digest = Sha1::digest(text.as_bytes());
    let id64 = STANDARD.encode(digest);

    id64.chars()
        .map(|c| match c {
            '+' => '.',
            '/' => '_',
            '=' => '-',
            other => other,
        })
        .collect()
}

/// Translate a disc id to the database format: lowercase hex of the
/// decoded SHA-1 digest.
pub fn disc_to_db_id(disc_id: &str) -> Result<String> {
    if !is_valid_disc_id(disc_id) {
        return Err(CoreError::InvalidId(disc_id.to_string()));
    }

    let id64: String = disc_id
        .chars()
        .map(|c| match c {
            '.' => '+',
            '_' => '/',
            '-' => '=',
            other => other,
        })
        .collect();

    let raw = STANDARD
        .decode(id64)
        .map_err(|_| CoreError::InvalidId(disc_id.to_string()))?;

    let mut hex = String::with_capacity(raw.len() * 2);
    for byte in raw {
        use std::fmt::Write;
        write!(hex, "{byte:02x}").unwrap();
    }
    Ok(hex)
}

/// Translate a database id back to a disc id.
pub fn db_to_disc_id(db_id: &str) -> Result<String> {
    if !is_valid_db_id(db_id) {
        return Err(CoreError::InvalidId(db_id.to_string()));
    }

    let mut raw = Vec::with_capacity(db_id.len() / 2);
    let bytes = db_id.as_bytes();
    for pair in bytes.chunks_exact(2) {
        let s = std::str::from_utf8(pair).expect("validated hex");
        let byte = u8::from_str_radix(s, 16)
            .map_err(|_| CoreError::InvalidId(db_id.to_string()))?;
        raw.push(byte);
    }

    let id64 = STANDARD.encode(raw);
    Ok(id64
        .chars()
        .map(|c| match c {
            '+' => '.',
            '/' => '_',
            '=' => '-',
            other => other,
        })
        .collect())
}

/// Check that a string has the shape of a disc id.
pub fn is_valid_disc_id(id: &str) -> bool {
    id.len() == DISC_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Check that a string has the shape of a database id.
pub fn is_valid_db_id(id: &str) -> bool {
    id.len() == DB_ID_LEN && id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn id_has_expected_shape() {
        let id = disc_id_from_toc(&[150, 25000, 50000], 70000);
        assert_eq!(id.len(), DISC_ID_LEN);
        assert!(is_valid_disc_id(&id));
        // SHA-1 is 20 bytes, so the base64 form always ends in one
        // padding character.
        assert!(id.ends_with('-'));
    }

    #[test]
    fn id_is_stable_and_distinguishes_tocs() {
        let a = disc_id_from_toc(&[150, 25000], 70000);
        let b = disc_id_from_toc(&[150, 25000], 70000);
        let c = disc_id_from_toc(&[150, 25001], 70000);
        let d = disc_id_from_toc(&[150, 25000], 70001);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn db_id_round_trip() {
        let id = disc_id_from_toc(&[150], 35000);
        let db = disc_to_db_id(&id).unwrap();
        assert!(is_valid_db_id(&db));
        assert_eq!(db_to_disc_id(&db).unwrap(), id);
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(disc_to_db_id("too-short").is_err());
        assert!(db_to_disc_id("not-hex").is_err());
        assert!(!is_valid_disc_id("x".repeat(27).as_str()));
        assert!(!is_valid_db_id(&"A".repeat(40)));
    }

    proptest! {
        #[test]
        fn round_trip_any_toc(
            offsets in prop::collection::vec(150u32..300_000, 1..99),
            leadout in 300_000u32..360_000,
        ) {
            let mut offsets = offsets;
            offsets.sort_unstable();

            let id = disc_id_from_toc(&offsets, leadout);
            prop_assert!(is_valid_disc_id(&id));

            let db = disc_to_db_id(&id).unwrap();
            prop_assert_eq!(db_to_disc_id(&db).unwrap(), id);
        }
    }
}
