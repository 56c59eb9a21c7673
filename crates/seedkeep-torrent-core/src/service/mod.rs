//! Engine capability trait implemented by adapters.
//!
//! # Design
//! - Commands return once the engine has accepted them; their outcome arrives
//!   later through [`TorrentEngine::poll_alerts`].
//! - Optional capabilities default to an error so thin adapters stay small.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::bail;
use async_trait::async_trait;
use seedkeep_events::InfoHash;

use crate::alert::Alert;
use crate::model::{
    AddTorrentParams, EngineStatus, PeerSnapshot, PieceSnapshot, TorrentMetainfo, TrackerEntry,
};

/// Primary engine trait implemented by adapters.
#[async_trait]
pub trait TorrentEngine: Send + Sync {
    /// Parse raw descriptor bytes.
    async fn load_metainfo(&self, bytes: &[u8]) -> anyhow::Result<TorrentMetainfo>;

    /// Create a handle and return its identifier.
    async fn add_torrent(&self, params: AddTorrentParams) -> anyhow::Result<InfoHash>;

    /// Drop a handle, optionally deleting its payload.
    async fn remove_torrent(&self, id: &InfoHash, purge_data: bool) -> anyhow::Result<()>;

    /// Pause a handle.
    async fn pause(&self, id: &InfoHash) -> anyhow::Result<()>;

    /// Resume a handle.
    async fn resume(&self, id: &InfoHash) -> anyhow::Result<()>;

    /// Hand the handle to, or take it from, the engine queue.
    async fn set_auto_managed(&self, id: &InfoHash, enabled: bool) -> anyhow::Result<()>;

    /// Current status of a handle.
    async fn status(&self, id: &InfoHash) -> anyhow::Result<EngineStatus>;

    /// Ask the engine to produce recovery data; the blob arrives as an alert.
    async fn save_resume_data(&self, id: &InfoHash) -> anyhow::Result<()>;

    /// Drain pending alerts.
    async fn poll_alerts(&self) -> anyhow::Result<Vec<Alert>>;

    /// Whether the whole session is paused.
    async fn is_session_paused(&self) -> bool {
        false
    }

    /// Cap peer connections; `-1` is unlimited.
    async fn set_max_connections(&self, id: &InfoHash, limit: i32) -> anyhow::Result<()> {
        let _ = (id, limit);
        bail!("connection limits not supported by this engine");
    }

    /// Cap upload slots; `-1` is unlimited.
    async fn set_max_uploads(&self, id: &InfoHash, limit: i32) -> anyhow::Result<()> {
        let _ = (id, limit);
        bail!("upload slot limits not supported by this engine");
    }

    /// Upload limit in bytes per second; `-1` is unlimited.
    async fn set_upload_limit(&self, id: &InfoHash, bytes_per_sec: i64) -> anyhow::Result<()> {
        let _ = (id, bytes_per_sec);
        bail!("upload rate limits not supported by this engine");
    }

    /// Download limit in bytes per second; `-1` is unlimited.
    async fn set_download_limit(&self, id: &InfoHash, bytes_per_sec: i64) -> anyhow::Result<()> {
        let _ = (id, bytes_per_sec);
        bail!("download rate limits not supported by this engine");
    }

    /// Apply per-file priorities.
    async fn prioritize_files(&self, id: &InfoHash, priorities: &[u8]) -> anyhow::Result<()> {
        let _ = (id, priorities);
        bail!("file priorities not supported by this engine");
    }

    /// Per-file priorities currently in effect.
    async fn file_priorities(&self, id: &InfoHash) -> anyhow::Result<Vec<u8>> {
        let _ = id;
        bail!("file priorities not supported by this engine");
    }

    /// Download the first and last piece of every file first.
    async fn prioritize_first_last(&self, id: &InfoHash, enabled: bool) -> anyhow::Result<()> {
        let _ = (id, enabled);
        bail!("first/last piece priority not supported by this engine");
    }

    /// Toggle in-order piece picking.
    async fn set_sequential_download(&self, id: &InfoHash, enabled: bool) -> anyhow::Result<()> {
        let _ = (id, enabled);
        bail!("sequential download not supported by this engine");
    }

    /// Move payload storage; completion arrives as a storage-moved alert.
    async fn move_storage(&self, id: &InfoHash, destination: &Path) -> anyhow::Result<()> {
        let _ = (id, destination);
        bail!("storage moves not supported by this engine");
    }

    /// Re-verify every piece.
    async fn force_recheck(&self, id: &InfoHash) -> anyhow::Result<()> {
        let _ = id;
        bail!("recheck not supported by this engine");
    }

    /// Announce to trackers immediately.
    async fn force_reannounce(&self, id: &InfoHash) -> anyhow::Result<()> {
        let _ = id;
        bail!("reannounce not supported by this engine");
    }

    /// Request swarm counts from the tracker.
    async fn scrape_tracker(&self, id: &InfoHash) -> anyhow::Result<()> {
        let _ = id;
        bail!("scrape not supported by this engine");
    }

    /// Connect to a specific peer.
    async fn connect_peer(&self, id: &InfoHash, peer: SocketAddr) -> anyhow::Result<()> {
        let _ = (id, peer);
        bail!("manual peer connections not supported by this engine");
    }

    /// Rename one file; completion arrives as a file-renamed alert.
    async fn rename_file(&self, id: &InfoHash, index: u32, name: &str) -> anyhow::Result<()> {
        let _ = (id, index, name);
        bail!("file renames not supported by this engine");
    }

    /// Replace the tracker list.
    async fn replace_trackers(
        &self,
        id: &InfoHash,
        trackers: &[TrackerEntry],
    ) -> anyhow::Result<()> {
        let _ = (id, trackers);
        bail!("tracker updates not supported by this engine");
    }

    /// Tracker list currently in effect.
    async fn trackers(&self, id: &InfoHash) -> anyhow::Result<Vec<TrackerEntry>> {
        let _ = id;
        bail!("tracker queries not supported by this engine");
    }

    /// Queue position; `None` when the handle is not queued (finished seeds).
    async fn queue_position(&self, id: &InfoHash) -> anyhow::Result<Option<u32>> {
        let _ = id;
        bail!("queue queries not supported by this engine");
    }

    /// Move to the front of the queue.
    async fn queue_top(&self, id: &InfoHash) -> anyhow::Result<()> {
        let _ = id;
        bail!("queue reordering not supported by this engine");
    }

    /// Move one step towards the front of the queue.
    async fn queue_up(&self, id: &InfoHash) -> anyhow::Result<()> {
        let _ = id;
        bail!("queue reordering not supported by this engine");
    }

    /// Move one step towards the back of the queue.
    async fn queue_down(&self, id: &InfoHash) -> anyhow::Result<()> {
        let _ = id;
        bail!("queue reordering not supported by this engine");
    }

    /// Move to the back of the queue.
    async fn queue_bottom(&self, id: &InfoHash) -> anyhow::Result<()> {
        let _ = id;
        bail!("queue reordering not supported by this engine");
    }

    /// Descriptor details; `None` until metadata is known.
    async fn metadata(&self, id: &InfoHash) -> anyhow::Result<Option<TorrentMetainfo>> {
        let _ = id;
        bail!("metadata queries not supported by this engine");
    }

    /// Serialise the descriptor, used once a magnet handle has metadata.
    async fn export_metainfo(&self, id: &InfoHash) -> anyhow::Result<Vec<u8>> {
        let _ = id;
        bail!("descriptor export not supported by this engine");
    }

    /// Connected peers.
    async fn peers(&self, id: &InfoHash) -> anyhow::Result<Vec<PeerSnapshot>> {
        let _ = id;
        bail!("peer queries not supported by this engine");
    }

    /// Piece availability view.
    async fn pieces(&self, id: &InfoHash) -> anyhow::Result<PieceSnapshot> {
        let _ = id;
        bail!("piece queries not supported by this engine");
    }

    /// Bytes downloaded per file.
    async fn file_progress(&self, id: &InfoHash) -> anyhow::Result<Vec<u64>> {
        let _ = id;
        bail!("file progress not supported by this engine");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MinimalEngine;

    #[async_trait]
    impl TorrentEngine for MinimalEngine {
        async fn load_metainfo(&self, _bytes: &[u8]) -> anyhow::Result<TorrentMetainfo> {
            bail!("no parser")
        }

        async fn add_torrent(&self, _params: AddTorrentParams) -> anyhow::Result<InfoHash> {
            bail!("no session")
        }

        async fn remove_torrent(&self, _id: &InfoHash, _purge: bool) -> anyhow::Result<()> {
            Ok(())
        }

        async fn pause(&self, _id: &InfoHash) -> anyhow::Result<()> {
            Ok(())
        }

        async fn resume(&self, _id: &InfoHash) -> anyhow::Result<()> {
            Ok(())
        }

        async fn set_auto_managed(&self, _id: &InfoHash, _enabled: bool) -> anyhow::Result<()> {
            Ok(())
        }

        async fn status(&self, _id: &InfoHash) -> anyhow::Result<EngineStatus> {
            Ok(EngineStatus::default())
        }

        async fn save_resume_data(&self, _id: &InfoHash) -> anyhow::Result<()> {
            Ok(())
        }

        async fn poll_alerts(&self) -> anyhow::Result<Vec<Alert>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn engine_default_methods_error() {
        let engine = MinimalEngine;
        let id: InfoHash = "0123456789abcdef0123456789abcdef01234567"
            .parse()
            .expect("hash");
        assert!(!engine.is_session_paused().await);
        assert!(engine.force_reannounce(&id).await.is_err());
        assert!(engine.force_recheck(&id).await.is_err());
        assert!(engine.peers(&id).await.is_err());
        assert!(engine.queue_top(&id).await.is_err());
        assert!(
            engine
                .move_storage(&id, Path::new("/tmp/downloads"))
                .await
                .is_err()
        );
        assert!(
            engine
                .set_sequential_download(&id, true)
                .await
                .expect_err("sequential should error")
                .to_string()
                .contains("sequential")
        );
    }
}
