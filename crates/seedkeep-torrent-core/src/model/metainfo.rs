//! Parsed torrent descriptor handed back by the engine.

use seedkeep_events::InfoHash;
use serde::{Deserialize, Serialize};

/// Tracker URL with its announce tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct TrackerEntry {
    /// Announce URL.
    pub url: String,
    /// Tier, lower tiers are tried first.
    #[serde(default)]
    pub tier: u8,
}

impl TrackerEntry {
    /// Construct a tracker entry.
    #[must_use]
    pub fn new(url: impl Into<String>, tier: u8) -> Self {
        Self {
            url: url.into(),
            tier,
        }
    }
}

/// Individual file inside a torrent payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    /// Index of the file within the descriptor.
    pub index: u32,
    /// Relative path, `/` separated.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Byte offset of the file within the concatenated payload.
    pub offset: u64,
}

/// Descriptor information needed to manage a torrent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TorrentMetainfo {
    /// Content hash identifying the torrent.
    pub info_hash: InfoHash,
    /// Name declared by the descriptor.
    pub name: String,
    /// Free-form comment.
    #[serde(default)]
    pub comment: String,
    /// Whether peer discovery outside trackers is disabled.
    #[serde(default)]
    pub private: bool,
    /// Piece size in bytes.
    pub piece_length: u64,
    /// Number of pieces.
    pub num_pieces: u32,
    /// Total payload size in bytes.
    pub total_size: u64,
    /// Files contained in the payload.
    pub files: Vec<FileEntry>,
    /// Trackers declared by the descriptor.
    #[serde(default)]
    pub trackers: Vec<TrackerEntry>,
    /// Raw descriptor bytes as they should be persisted.
    #[serde(default)]
    pub raw: Vec<u8>,
}

impl TorrentMetainfo {
    /// Top level directory of a multi-file torrent, or the single file name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.files
            .first()
            .and_then(|file| file.path.split('/').next())
            .filter(|segment| !segment.is_empty())
            .unwrap_or(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metainfo(files: Vec<FileEntry>) -> TorrentMetainfo {
        TorrentMetainfo {
            info_hash: "0123456789abcdef0123456789abcdef01234567"
                .parse()
                .expect("hash"),
            name: "declared".into(),
            comment: String::new(),
            private: false,
            piece_length: 16_384,
            num_pieces: 1,
            total_size: 10,
            files,
            trackers: Vec::new(),
            raw: Vec::new(),
        }
    }

    #[test]
    fn display_name_prefers_top_level_folder() {
        let info = metainfo(vec![FileEntry {
            index: 0,
            path: "Album/01.flac".into(),
            size: 10,
            offset: 0,
        }]);
        assert_eq!(info.display_name(), "Album");
    }

    #[test]
    fn display_name_falls_back_to_declared_name() {
        assert_eq!(metainfo(Vec::new()).display_name(), "declared");
    }
}
