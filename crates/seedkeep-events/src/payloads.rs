//! Event payload types carried across the orchestrator.

use chrono::{DateTime, Utc};

use crate::id::InfoHash;

/// Identifier assigned to each event emitted by the bus.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
pub const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Typed domain events surfaced to observers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A torrent was registered with the orchestrator.
    TorrentAdded {
        /// Identifier for the torrent that was added.
        torrent_id: InfoHash,
        /// Whether the torrent was restored from saved state rather than newly added.
        from_state: bool,
    },
    /// A torrent is about to be removed; observers may still query it.
    PreTorrentRemoved {
        /// Identifier for the torrent being removed.
        torrent_id: InfoHash,
    },
    /// Torrent was removed from the registry.
    TorrentRemoved {
        /// Identifier for the torrent that was removed.
        torrent_id: InfoHash,
    },
    /// Torrent transitioned into a new lifecycle state.
    StateChanged {
        /// Identifier for the torrent whose state changed.
        torrent_id: InfoHash,
        /// Updated lifecycle state.
        state: TorrentState,
    },
    /// Torrent finished downloading its wanted payload.
    TorrentFinished {
        /// Identifier for the finished torrent.
        torrent_id: InfoHash,
    },
    /// Torrent was resumed by the engine.
    TorrentResumed {
        /// Identifier for the resumed torrent.
        torrent_id: InfoHash,
    },
    /// A single file inside a torrent was renamed.
    FileRenamed {
        /// Identifier for the torrent owning the file.
        torrent_id: InfoHash,
        /// File index within the torrent.
        index: u32,
        /// New relative path of the file.
        name: String,
    },
    /// Every file of a staged folder rename has been moved.
    FolderRenamed {
        /// Identifier for the torrent owning the folder.
        torrent_id: InfoHash,
        /// Folder prefix before the rename.
        old_folder: String,
        /// Folder prefix after the rename.
        new_folder: String,
    },
    /// A file finished downloading.
    FileCompleted {
        /// Identifier for the torrent owning the file.
        torrent_id: InfoHash,
        /// File index within the torrent.
        index: u32,
    },
    /// Saved state was restored and the orchestrator is accepting commands.
    SessionStarted,
    /// System health status changed (degraded or restored components).
    HealthChanged {
        /// Components currently considered degraded.
        degraded: Vec<String>,
    },
}

impl Event {
    /// Machine-friendly discriminator for subscribers and metrics labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TorrentAdded { .. } => "torrent_added",
            Self::PreTorrentRemoved { .. } => "pre_torrent_removed",
            Self::TorrentRemoved { .. } => "torrent_removed",
            Self::StateChanged { .. } => "state_changed",
            Self::TorrentFinished { .. } => "torrent_finished",
            Self::TorrentResumed { .. } => "torrent_resumed",
            Self::FileRenamed { .. } => "file_renamed",
            Self::FolderRenamed { .. } => "folder_renamed",
            Self::FileCompleted { .. } => "file_completed",
            Self::SessionStarted => "session_started",
            Self::HealthChanged { .. } => "health_changed",
        }
    }

    /// Torrent the event refers to, when it is torrent scoped.
    #[must_use]
    pub const fn torrent_id(&self) -> Option<&InfoHash> {
        match self {
            Self::TorrentAdded { torrent_id, .. }
            | Self::PreTorrentRemoved { torrent_id }
            | Self::TorrentRemoved { torrent_id }
            | Self::StateChanged { torrent_id, .. }
            | Self::TorrentFinished { torrent_id }
            | Self::TorrentResumed { torrent_id }
            | Self::FileRenamed { torrent_id, .. }
            | Self::FolderRenamed { torrent_id, .. }
            | Self::FileCompleted { torrent_id, .. } => Some(torrent_id),
            Self::SessionStarted | Self::HealthChanged { .. } => None,
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and emission timestamp.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Monotonic identifier assigned to the wrapped event.
    pub id: EventId,
    /// Timestamp recording when the envelope was produced.
    pub timestamp: DateTime<Utc>,
    /// Wrapped event payload.
    pub event: Event,
}

/// Lifecycle states derived for every managed torrent.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TorrentState {
    /// Pieces are being verified against data on disk.
    Checking,
    /// Payload or metadata is being fetched from peers.
    Downloading,
    /// All wanted data is present and the torrent uploads to peers.
    Seeding,
    /// Storage is being allocated on disk.
    Allocating,
    /// Held back by the engine's queue throttling rather than by the user.
    Queued,
    /// Stopped by the user or by a global session pause.
    Paused,
    /// The engine reported an error for the torrent.
    Error,
}

impl TorrentState {
    /// Human readable label used in status records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Checking => "Checking",
            Self::Downloading => "Downloading",
            Self::Seeding => "Seeding",
            Self::Allocating => "Allocating",
            Self::Queued => "Queued",
            Self::Paused => "Paused",
            Self::Error => "Error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash() -> InfoHash {
        "0123456789abcdef0123456789abcdef01234567"
            .parse()
            .expect("valid hash")
    }

    #[test]
    fn event_kind_maps_torrent_variants() {
        assert_event_kind(
            &Event::TorrentAdded {
                torrent_id: hash(),
                from_state: false,
            },
            "torrent_added",
        );
        assert_event_kind(
            &Event::PreTorrentRemoved { torrent_id: hash() },
            "pre_torrent_removed",
        );
        assert_event_kind(
            &Event::StateChanged {
                torrent_id: hash(),
                state: TorrentState::Queued,
            },
            "state_changed",
        );
        assert_event_kind(
            &Event::FolderRenamed {
                torrent_id: hash(),
                old_folder: "a/".into(),
                new_folder: "b/".into(),
            },
            "folder_renamed",
        );
        assert_event_kind(&Event::SessionStarted, "session_started");
    }

    #[test]
    fn torrent_id_is_exposed_for_scoped_events() {
        let event = Event::FileCompleted {
            torrent_id: hash(),
            index: 2,
        };
        assert_eq!(event.torrent_id(), Some(&hash()));
        assert!(Event::SessionStarted.torrent_id().is_none());
        assert!(
            Event::HealthChanged {
                degraded: vec!["persistence".into()]
            }
            .torrent_id()
            .is_none()
        );
    }

    #[test]
    fn event_serialises_with_type_tag() {
        let event = Event::StateChanged {
            torrent_id: hash(),
            state: TorrentState::Seeding,
        };
        let json = serde_json::to_value(&event).expect("serialise");
        assert_eq!(json["type"], "state_changed");
        assert_eq!(json["state"], "seeding");
        assert_eq!(TorrentState::Seeding.as_str(), "Seeding");
    }

    #[test]
    fn envelope_carries_fields() {
        let event = Event::TorrentResumed { torrent_id: hash() };
        let envelope = EventEnvelope {
            id: 42,
            timestamp: Utc::now(),
            event: event.clone(),
        };
        assert_eq!(envelope.id, 42);
        assert_eq!(envelope.event, event);
    }

    fn assert_event_kind(event: &Event, expected: &str) {
        assert_eq!(event.kind(), expected);
    }
}
