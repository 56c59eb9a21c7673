//! Asynchronous notifications emitted by the engine.

use std::path::PathBuf;

use seedkeep_events::InfoHash;
use serde::{Deserialize, Serialize};

use crate::model::EnginePhase;

/// Engine alert, one variant per notification the orchestrator reacts to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Alert {
    /// All wanted pieces are present.
    Finished {
        /// Originating handle.
        torrent_id: InfoHash,
    },
    /// Handle was paused.
    Paused {
        /// Originating handle.
        torrent_id: InfoHash,
    },
    /// Handle was resumed.
    Resumed {
        /// Originating handle.
        torrent_id: InfoHash,
    },
    /// Piece verification completed.
    Checked {
        /// Originating handle.
        torrent_id: InfoHash,
    },
    /// Tracker answered an announce.
    TrackerReply {
        /// Originating handle.
        torrent_id: InfoHash,
        /// Tracker URL.
        url: String,
        /// Reply message.
        message: String,
    },
    /// Announce was sent to a tracker.
    TrackerAnnounce {
        /// Originating handle.
        torrent_id: InfoHash,
        /// Tracker URL.
        url: String,
    },
    /// Tracker replied with a warning.
    TrackerWarning {
        /// Originating handle.
        torrent_id: InfoHash,
        /// Tracker URL.
        url: String,
        /// Warning text.
        message: String,
    },
    /// Tracker request failed.
    TrackerError {
        /// Originating handle.
        torrent_id: InfoHash,
        /// Tracker URL.
        url: String,
        /// Error text.
        message: String,
    },
    /// Payload storage was moved.
    StorageMoved {
        /// Originating handle.
        torrent_id: InfoHash,
        /// New storage directory.
        path: PathBuf,
    },
    /// Coarse phase changed.
    StateChanged {
        /// Originating handle.
        torrent_id: InfoHash,
        /// Phase entered.
        phase: EnginePhase,
    },
    /// Recovery data was produced.
    ResumeDataSaved {
        /// Originating handle.
        torrent_id: InfoHash,
        /// Opaque recovery blob.
        data: Vec<u8>,
    },
    /// Recovery data could not be produced.
    ResumeDataFailed {
        /// Originating handle.
        torrent_id: InfoHash,
        /// Failure description.
        message: String,
    },
    /// A file rename completed.
    FileRenamed {
        /// Originating handle.
        torrent_id: InfoHash,
        /// File index.
        index: u32,
        /// New relative path.
        name: String,
    },
    /// Metadata for a magnet handle arrived.
    MetadataReceived {
        /// Originating handle.
        torrent_id: InfoHash,
    },
    /// A storage operation on a file failed.
    FileError {
        /// Originating handle.
        torrent_id: InfoHash,
        /// File that failed.
        file: String,
        /// Failure description.
        message: String,
    },
    /// A file finished downloading.
    FileCompleted {
        /// Originating handle.
        torrent_id: InfoHash,
        /// File index.
        index: u32,
    },
}

impl Alert {
    /// Handle the alert originated from.
    #[must_use]
    pub const fn torrent_id(&self) -> &InfoHash {
        match self {
            Self::Finished { torrent_id }
            | Self::Paused { torrent_id }
            | Self::Resumed { torrent_id }
            | Self::Checked { torrent_id }
            | Self::TrackerReply { torrent_id, .. }
            | Self::TrackerAnnounce { torrent_id, .. }
            | Self::TrackerWarning { torrent_id, .. }
            | Self::TrackerError { torrent_id, .. }
            | Self::StorageMoved { torrent_id, .. }
            | Self::StateChanged { torrent_id, .. }
            | Self::ResumeDataSaved { torrent_id, .. }
            | Self::ResumeDataFailed { torrent_id, .. }
            | Self::FileRenamed { torrent_id, .. }
            | Self::MetadataReceived { torrent_id }
            | Self::FileError { torrent_id, .. }
            | Self::FileCompleted { torrent_id, .. } => torrent_id,
        }
    }

    /// Stable label used for logging and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Finished { .. } => "finished",
            Self::Paused { .. } => "paused",
            Self::Resumed { .. } => "resumed",
            Self::Checked { .. } => "checked",
            Self::TrackerReply { .. } => "tracker_reply",
            Self::TrackerAnnounce { .. } => "tracker_announce",
            Self::TrackerWarning { .. } => "tracker_warning",
            Self::TrackerError { .. } => "tracker_error",
            Self::StorageMoved { .. } => "storage_moved",
            Self::StateChanged { .. } => "state_changed",
            Self::ResumeDataSaved { .. } => "resume_data_saved",
            Self::ResumeDataFailed { .. } => "resume_data_failed",
            Self::FileRenamed { .. } => "file_renamed",
            Self::MetadataReceived { .. } => "metadata_received",
            Self::FileError { .. } => "file_error",
            Self::FileCompleted { .. } => "file_completed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_exposes_origin_and_kind() {
        let torrent_id: InfoHash = "0123456789abcdef0123456789abcdef01234567"
            .parse()
            .expect("hash");
        let alert = Alert::FileRenamed {
            torrent_id: torrent_id.clone(),
            index: 1,
            name: "a/b".into(),
        };
        assert_eq!(alert.torrent_id(), &torrent_id);
        assert_eq!(alert.kind(), "file_renamed");
        assert_eq!(
            Alert::StateChanged {
                torrent_id,
                phase: EnginePhase::Seeding
            }
            .kind(),
            "state_changed"
        );
    }
}
