//! Status records: key catalogue, lazy engine queries, and per-session diffs.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use seedkeep_torrent_core::{EngineStatus, PieceSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

use super::Torrent;
use crate::error::OrchestratorError;
use crate::options::TorrentOptions;
use crate::session::SessionDirectory;

/// One status record, keyed by field.
pub type StatusMap = BTreeMap<StatusKey, Value>;

macro_rules! status_keys {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Field of a torrent status record.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        #[allow(missing_docs)]
        pub enum StatusKey {
            $($variant),+
        }

        impl StatusKey {
            /// Every key, in record order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Wire name of the key.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $name),+
                }
            }
        }
    };
}

status_keys! {
    ActiveTime => "active_time",
    AllTimeDownload => "all_time_download",
    Comment => "comment",
    DistributedCopies => "distributed_copies",
    DownloadLocation => "download_location",
    DownloadPayloadRate => "download_payload_rate",
    Eta => "eta",
    FilePriorities => "file_priorities",
    FileProgress => "file_progress",
    Files => "files",
    Hash => "hash",
    IsAutoManaged => "is_auto_managed",
    IsFinished => "is_finished",
    IsSeed => "is_seed",
    LastSeenComplete => "last_seen_complete",
    MaxConnections => "max_connections",
    MaxDownloadSpeed => "max_download_speed",
    MaxUploadSlots => "max_upload_slots",
    MaxUploadSpeed => "max_upload_speed",
    Message => "message",
    MoveCompleted => "move_completed",
    MoveCompletedPath => "move_completed_path",
    Name => "name",
    NextAnnounce => "next_announce",
    NumFiles => "num_files",
    NumPeers => "num_peers",
    NumPieces => "num_pieces",
    NumSeeds => "num_seeds",
    Owner => "owner",
    Paused => "paused",
    Peers => "peers",
    PieceLength => "piece_length",
    Pieces => "pieces",
    PrioritizeFirstLastPieces => "prioritize_first_last_pieces",
    Private => "private",
    Progress => "progress",
    Queue => "queue",
    Ratio => "ratio",
    RemoveAtRatio => "remove_at_ratio",
    SavePath => "save_path",
    SeedRank => "seed_rank",
    SeedingTime => "seeding_time",
    SeedsPeersRatio => "seeds_peers_ratio",
    SequentialDownload => "sequential_download",
    Shared => "shared",
    State => "state",
    StopAtRatio => "stop_at_ratio",
    StopRatio => "stop_ratio",
    TimeAdded => "time_added",
    TotalDone => "total_done",
    TotalPayloadDownload => "total_payload_download",
    TotalPayloadUpload => "total_payload_upload",
    TotalPeers => "total_peers",
    TotalSeeds => "total_seeds",
    TotalSize => "total_size",
    TotalUploaded => "total_uploaded",
    TotalWanted => "total_wanted",
    Tracker => "tracker",
    TrackerHost => "tracker_host",
    TrackerStatus => "tracker_status",
    Trackers => "trackers",
    UploadPayloadRate => "upload_payload_rate",
}

/// Where the value of a key comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    /// Fields held by the entity or its cached metadata.
    Stored,
    /// The engine status sample.
    Engine,
    /// A dedicated engine query.
    Query,
}

impl StatusKey {
    const fn source(self) -> Source {
        match self {
            Self::ActiveTime
            | Self::AllTimeDownload
            | Self::DistributedCopies
            | Self::DownloadPayloadRate
            | Self::Eta
            | Self::IsSeed
            | Self::LastSeenComplete
            | Self::NextAnnounce
            | Self::NumPeers
            | Self::NumSeeds
            | Self::Paused
            | Self::Progress
            | Self::Ratio
            | Self::SeedRank
            | Self::SeedingTime
            | Self::SeedsPeersRatio
            | Self::TotalDone
            | Self::TotalPayloadDownload
            | Self::TotalPayloadUpload
            | Self::TotalPeers
            | Self::TotalSeeds
            | Self::TotalUploaded
            | Self::TotalWanted
            | Self::Tracker
            | Self::UploadPayloadRate => Source::Engine,
            Self::FileProgress | Self::Peers | Self::Pieces | Self::Queue => Source::Query,
            _ => Source::Stored,
        }
    }

    const fn needs_metadata(self) -> bool {
        matches!(
            self,
            Self::Comment
                | Self::FileProgress
                | Self::Files
                | Self::Name
                | Self::NumFiles
                | Self::NumPieces
                | Self::PieceLength
                | Self::Pieces
                | Self::Private
                | Self::TotalSize
        )
    }
}

impl fmt::Display for StatusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusKey {
    type Err = OrchestratorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == value)
            .ok_or_else(|| {
                OrchestratorError::invalid("status_key", "unknown", Some(value.to_string()))
            })
    }
}

impl Torrent {
    /// Status record for `keys`, or every key when `keys` is empty.
    ///
    /// With a `session`, only fields that changed since the record last
    /// delivered to that session are returned.
    pub async fn get_status(&mut self, keys: &[StatusKey], session: Option<Uuid>) -> StatusMap {
        let mut wanted: Vec<StatusKey> = if keys.is_empty() {
            StatusKey::ALL.to_vec()
        } else {
            keys.to_vec()
        };
        wanted.sort_unstable();
        wanted.dedup();

        if self.metainfo.is_none() && wanted.iter().any(|key| key.needs_metadata()) {
            self.refresh_metadata().await;
        }
        let tracker_host = if wanted.contains(&StatusKey::TrackerHost) {
            self.tracker_host().await
        } else {
            String::new()
        };

        let mut sample: Option<EngineStatus> = None;
        let mut record = StatusMap::new();
        for key in wanted {
            let value = match key.source() {
                Source::Stored => self.stored_value(key, &tracker_host),
                Source::Engine => {
                    if sample.is_none() {
                        sample = Some(self.engine_status().await.unwrap_or_default());
                    }
                    sample
                        .as_ref()
                        .map_or(Value::Null, |status| self.engine_value(key, status))
                }
                Source::Query => self.query_value(key).await,
            };
            record.insert(key, value);
        }

        match session {
            Some(session_id) => {
                let changed = status_diff(self.previous_status.get(&session_id), &record);
                self.previous_status.insert(session_id, record);
                changed
            }
            None => record,
        }
    }

    /// Drop diff caches of sessions the transport no longer holds.
    pub(crate) fn purge_status_caches(&mut self, directory: &dyn SessionDirectory) -> usize {
        let before = self.previous_status.len();
        self.previous_status
            .retain(|session_id, _| directory.is_session_valid(*session_id));
        before - self.previous_status.len()
    }

    fn stored_value(&self, key: StatusKey, tracker_host: &str) -> Value {
        let options = &self.options;
        let metainfo = self.metainfo.as_ref();
        match key {
            StatusKey::Comment => json!(metainfo.map_or("", |info| info.comment.as_str())),
            StatusKey::DownloadLocation | StatusKey::SavePath => {
                json!(options.download_location.to_string_lossy())
            }
            StatusKey::FilePriorities => json!(options.file_priorities),
            StatusKey::Files => metainfo.map_or_else(
                || json!([]),
                |info| {
                    Value::Array(
                        info.files
                            .iter()
                            .map(|file| {
                                json!({
                                    "index": file.index,
                                    "path": file.path,
                                    "size": file.size,
                                    "offset": file.offset,
                                })
                            })
                            .collect(),
                    )
                },
            ),
            StatusKey::Hash => json!(self.id.as_str()),
            StatusKey::IsAutoManaged => json!(options.auto_managed),
            StatusKey::IsFinished => json!(self.is_finished),
            StatusKey::MaxConnections => json!(options.max_connections),
            StatusKey::MaxDownloadSpeed => json!(options.max_download_speed),
            StatusKey::MaxUploadSlots => json!(options.max_upload_slots),
            StatusKey::MaxUploadSpeed => json!(options.max_upload_speed),
            StatusKey::Message => json!(self.message),
            StatusKey::MoveCompleted => json!(options.move_completed),
            StatusKey::MoveCompletedPath => json!(options.move_completed_path.to_string_lossy()),
            StatusKey::Name => json!(self.name()),
            StatusKey::NumFiles => json!(metainfo.map_or(0, |info| info.files.len())),
            StatusKey::NumPieces => json!(metainfo.map_or(0, |info| info.num_pieces)),
            StatusKey::Owner => json!(self.owner),
            StatusKey::PieceLength => json!(metainfo.map_or(0, |info| info.piece_length)),
            StatusKey::PrioritizeFirstLastPieces => json!(options.prioritize_first_last_pieces),
            StatusKey::Private => json!(metainfo.is_some_and(|info| info.private)),
            StatusKey::RemoveAtRatio => json!(options.remove_at_ratio),
            StatusKey::SequentialDownload => json!(options.sequential_download),
            StatusKey::Shared => json!(options.shared),
            StatusKey::State => json!(self.state.as_str()),
            StatusKey::StopAtRatio => json!(options.stop_at_ratio),
            StatusKey::StopRatio => json!(options.stop_ratio),
            StatusKey::TimeAdded => json!(self.time_added.timestamp()),
            StatusKey::TotalSize => json!(metainfo.map_or(0, |info| info.total_size)),
            StatusKey::TrackerHost => json!(tracker_host),
            StatusKey::TrackerStatus => json!(self.tracker_status),
            StatusKey::Trackers => Value::Array(
                self.trackers
                    .iter()
                    .map(|tracker| json!({ "url": tracker.url, "tier": tracker.tier }))
                    .collect(),
            ),
            _ => Value::Null,
        }
    }

    fn engine_value(&self, key: StatusKey, status: &EngineStatus) -> Value {
        match key {
            StatusKey::ActiveTime => json!(status.active_time),
            StatusKey::AllTimeDownload => json!(status.all_time_download),
            StatusKey::DistributedCopies => json!(f64::from(status.distributed_copies.max(0.0))),
            StatusKey::DownloadPayloadRate => json!(status.download_payload_rate),
            StatusKey::Eta => json!(eta(status, self.is_finished, &self.options)),
            StatusKey::IsSeed => json!(status.is_seed),
            StatusKey::LastSeenComplete => {
                json!(self.last_seen_complete.max(status.last_seen_complete))
            }
            StatusKey::NextAnnounce => json!(status.next_announce),
            StatusKey::NumPeers => json!(status.num_peers.saturating_sub(status.num_seeds)),
            StatusKey::NumSeeds => json!(status.num_seeds),
            StatusKey::Paused => json!(status.paused),
            StatusKey::Progress => json!(f64::from(status.progress) * 100.0),
            StatusKey::Ratio => json!(ratio(self.uploaded_total(status), status.total_done)),
            StatusKey::SeedRank => json!(status.seed_rank),
            StatusKey::SeedingTime => json!(status.seeding_time),
            StatusKey::SeedsPeersRatio => json!(seeds_peers_ratio(status)),
            StatusKey::TotalDone => json!(status.total_done),
            StatusKey::TotalPayloadDownload => json!(status.total_payload_download),
            StatusKey::TotalPayloadUpload => json!(status.total_payload_upload),
            StatusKey::TotalPeers => json!(status.num_incomplete),
            StatusKey::TotalSeeds => json!(status.num_complete),
            StatusKey::TotalUploaded => json!(self.uploaded_total(status)),
            StatusKey::TotalWanted => json!(status.total_wanted),
            StatusKey::Tracker => json!(status.current_tracker),
            StatusKey::UploadPayloadRate => json!(status.upload_payload_rate),
            _ => Value::Null,
        }
    }

    async fn query_value(&self, key: StatusKey) -> Value {
        match key {
            StatusKey::Queue => match self.engine.queue_position(&self.id).await {
                Ok(Some(position)) => json!(position),
                Ok(None) => json!(-1),
                Err(err) => {
                    warn!(torrent_id = %self.id, error = %err, "queue position unavailable");
                    json!(-1)
                }
            },
            StatusKey::Peers => match self.engine.peers(&self.id).await {
                Ok(peers) => Value::Array(
                    peers
                        .iter()
                        .map(|peer| {
                            json!({
                                "ip": peer.address.to_string(),
                                "client": peer.client,
                                "country": peer.country,
                                "down_speed": peer.down_speed,
                                "up_speed": peer.up_speed,
                                "progress": f64::from(peer.progress),
                                "seed": peer.seed,
                            })
                        })
                        .collect(),
                ),
                Err(err) => {
                    warn!(torrent_id = %self.id, error = %err, "peer list unavailable");
                    json!([])
                }
            },
            StatusKey::Pieces => {
                if self.metainfo.is_none() {
                    return json!([]);
                }
                match self.engine.pieces(&self.id).await {
                    Ok(snapshot) => json!(piece_states(&snapshot)),
                    Err(err) => {
                        warn!(torrent_id = %self.id, error = %err, "piece map unavailable");
                        json!([])
                    }
                }
            }
            StatusKey::FileProgress => {
                let Some(metainfo) = &self.metainfo else {
                    return json!([]);
                };
                match self.engine.file_progress(&self.id).await {
                    Ok(done) => json!(file_fractions(
                        metainfo.files.iter().map(|file| file.size),
                        &done
                    )),
                    Err(err) => {
                        warn!(torrent_id = %self.id, error = %err, "file progress unavailable");
                        json!([])
                    }
                }
            }
            _ => Value::Null,
        }
    }
}

/// Fields of `current` that differ from `previous`; everything when unseen.
pub(crate) fn status_diff(previous: Option<&StatusMap>, current: &StatusMap) -> StatusMap {
    let Some(previous) = previous else {
        return current.clone();
    };
    current
        .iter()
        .filter(|(key, value)| previous.get(key) != Some(value))
        .map(|(key, value)| (*key, value.clone()))
        .collect()
}

/// Share ratio, `-1` while nothing has been downloaded.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn ratio(uploaded: u64, total_done: u64) -> f64 {
    if total_done == 0 {
        -1.0
    } else {
        uploaded as f64 / total_done as f64
    }
}

/// Seconds until the torrent finishes downloading, or until it reaches its
/// stop ratio when already finished. Zero when unknown.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub(crate) fn eta(status: &EngineStatus, is_finished: bool, options: &TorrentOptions) -> u64 {
    if is_finished && options.stop_at_ratio {
        if status.upload_payload_rate == 0 {
            return 0;
        }
        let remaining = (status.all_time_download as f64)
            .mul_add(options.stop_ratio, -(status.all_time_upload as f64));
        let seconds = remaining / status.upload_payload_rate as f64;
        return if seconds.is_finite() && seconds > 0.0 {
            seconds as u64
        } else {
            0
        };
    }
    let left = status.total_wanted.saturating_sub(status.total_wanted_done);
    if left == 0 || status.download_payload_rate == 0 {
        0
    } else {
        left / status.download_payload_rate
    }
}

#[allow(clippy::cast_precision_loss)]
fn seeds_peers_ratio(status: &EngineStatus) -> f64 {
    if status.num_incomplete <= 0 {
        -1.0
    } else {
        f64::from(status.num_complete.max(0)) / f64::from(status.num_incomplete)
    }
}

/// Per-piece view: 3 complete, 2 downloading, 1 available from peers, 0 missing.
pub(crate) fn piece_states(snapshot: &PieceSnapshot) -> Vec<u8> {
    snapshot
        .have
        .iter()
        .zip(0_u32..)
        .map(|(have, index)| {
            if snapshot.downloading.contains(&index) {
                2
            } else if *have {
                3
            } else if snapshot
                .availability
                .get(index as usize)
                .is_some_and(|peers| *peers > 0)
            {
                1
            } else {
                0
            }
        })
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn file_fractions(sizes: impl Iterator<Item = u64>, done: &[u64]) -> Vec<f64> {
    sizes
        .enumerate()
        .map(|(index, size)| {
            let completed = done.get(index).copied().unwrap_or(0);
            if size == 0 {
                1.0
            } else {
                completed.min(size) as f64 / size as f64
            }
        })
        .collect()
}
