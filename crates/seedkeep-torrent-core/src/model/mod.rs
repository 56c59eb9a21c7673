//! Core torrent domain types and DTOs exchanged with the engine.

mod magnet;
mod metainfo;
mod status;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use magnet::MagnetLink;
pub use metainfo::{FileEntry, TorrentMetainfo, TrackerEntry};
pub use status::{EnginePhase, EngineStatus, PeerSnapshot, PieceSnapshot};

/// Payload the engine should start from when creating a handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineSource {
    /// Parsed descriptor whose info hash is already known.
    Metainfo {
        /// Descriptor produced by [`crate::TorrentEngine::load_metainfo`].
        metainfo: Box<TorrentMetainfo>,
    },
    /// Magnet URI that still needs metadata from peers.
    Magnet {
        /// Magnet URI to resolve and add.
        uri: String,
    },
}

/// Parameters handed to the engine when a new handle is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTorrentParams {
    /// Where the payload comes from.
    pub source: EngineSource,
    /// Directory the payload is stored under.
    pub save_path: PathBuf,
    /// Whether the handle starts paused.
    pub paused: bool,
    /// Whether the engine queue may start and stop the handle on its own.
    pub auto_managed: bool,
    /// Reject instead of merging when the handle already exists.
    pub duplicate_is_error: bool,
    /// Opaque recovery data from a previous session.
    #[serde(default)]
    pub resume_data: Option<Vec<u8>>,
    /// File index to relative path overrides applied before storage is opened.
    #[serde(default)]
    pub renamed_files: BTreeMap<u32, String>,
}

impl AddTorrentParams {
    /// Parameters for a fresh handle: paused, not auto-managed, duplicates rejected.
    #[must_use]
    pub fn paused(source: EngineSource, save_path: impl Into<PathBuf>) -> Self {
        Self {
            source,
            save_path: save_path.into(),
            paused: true,
            auto_managed: false,
            duplicate_is_error: true,
            resume_data: None,
            renamed_files: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paused_params_disable_auto_management() {
        let params = AddTorrentParams::paused(
            EngineSource::Magnet {
                uri: "magnet:?xt=urn:btih:demo".into(),
            },
            "/downloads",
        );
        assert!(params.paused);
        assert!(!params.auto_managed);
        assert!(params.duplicate_is_error);
        assert!(params.resume_data.is_none());
        assert_eq!(params.save_path, PathBuf::from("/downloads"));
    }
}
