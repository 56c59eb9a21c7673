//! Descriptor and magnet fixtures.

use seedkeep_events::InfoHash;
use seedkeep_torrent_core::{FileEntry, TorrentMetainfo, TrackerEntry};

const PIECE_LENGTH: u64 = 16_384;

/// Deterministic info hash made of one repeated hex digit (`0..=15`).
///
/// # Panics
///
/// Panics when `seed` is not a single hex digit.
#[must_use]
pub fn info_hash(seed: u8) -> InfoHash {
    let digit = char::from_digit(u32::from(seed), 16).expect("seed must be a hex digit");
    std::iter::repeat_n(digit, 40)
        .collect::<String>()
        .parse()
        .expect("fixture hash is valid")
}

/// Descriptor with the given files; paths are `/` separated.
#[must_use]
pub fn sample_metainfo(seed: u8, name: &str, files: &[(&str, u64)]) -> TorrentMetainfo {
    let mut offset = 0;
    let entries: Vec<FileEntry> = files
        .iter()
        .zip(0_u32..)
        .map(|((path, size), index)| {
            let entry = FileEntry {
                index,
                path: (*path).to_string(),
                size: *size,
                offset,
            };
            offset += size;
            entry
        })
        .collect();
    let total_size = offset;
    let num_pieces = u32::try_from(total_size.div_ceil(PIECE_LENGTH)).unwrap_or(u32::MAX);
    TorrentMetainfo {
        info_hash: info_hash(seed),
        name: name.to_string(),
        comment: "fixture".to_string(),
        private: false,
        piece_length: PIECE_LENGTH,
        num_pieces,
        total_size,
        files: entries,
        trackers: vec![TrackerEntry::new("udp://tracker.example.org:6969/announce", 0)],
        raw: Vec::new(),
    }
}

/// Encode a descriptor the way [`crate::LoopbackEngine`] expects to read it back.
#[must_use]
pub fn metainfo_bytes(metainfo: &TorrentMetainfo) -> Vec<u8> {
    let mut stripped = metainfo.clone();
    stripped.raw.clear();
    serde_json::to_vec(&stripped).unwrap_or_default()
}

/// Magnet URI for the given hash and display name.
#[must_use]
pub fn magnet_uri(hash: &InfoHash, display_name: &str) -> String {
    format!(
        "magnet:?xt=urn:btih:{hash}&dn={}",
        display_name.replace(' ', "+")
    )
}
