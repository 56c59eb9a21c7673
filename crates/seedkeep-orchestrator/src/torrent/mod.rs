//! Managed torrent entity.
//!
//! Layout: `mod.rs` (entity, option setters, engine commands), `state.rs`
//! (lifecycle derivation), `status.rs` (status records and diffs),
//! `paths.rs` (path sanitising and tracker host names).

mod paths;
mod state;
mod status;

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use seedkeep_events::{InfoHash, TorrentState};
use seedkeep_torrent_core::{EngineStatus, MagnetLink, TorrentEngine, TorrentMetainfo, TrackerEntry};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::options::{TorrentOptions, TorrentOptionsUpdate, speed_limit_bytes};
use crate::persistence::TorrentRecord;

use paths::sanitize_filepath;
use state::derive_state;
pub use status::{StatusKey, StatusMap};

const STATUS_OK: &str = "OK";

/// Folder rename waiting on per-file confirmations from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRename {
    /// Folder prefix before the rename, ending in `/`.
    pub old_folder: String,
    /// Folder prefix after the rename, ending in `/`.
    pub new_folder: String,
    pending: BTreeSet<u32>,
}

/// What a file-renamed confirmation completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RenameProgress {
    /// A standalone file rename.
    File,
    /// Part of a folder rename that still waits on other files.
    FolderPending,
    /// The last file of a folder rename.
    FolderDone(FolderRename),
}

/// Inputs for constructing a [`Torrent`] around an engine handle.
pub(crate) struct NewTorrent {
    pub(crate) id: InfoHash,
    pub(crate) options: TorrentOptions,
    pub(crate) owner: String,
    pub(crate) filename: Option<String>,
    pub(crate) magnet: Option<String>,
    pub(crate) metainfo: Option<TorrentMetainfo>,
    pub(crate) restored: Option<TorrentRecord>,
}

/// One managed torrent.
///
/// Holds only a shared engine reference plus the handle id; the registry owns
/// the entity and is the only caller of its mutating methods.
pub struct Torrent {
    engine: Arc<dyn TorrentEngine>,
    id: InfoHash,
    options: TorrentOptions,
    owner: String,
    filename: String,
    magnet: Option<String>,
    metainfo: Option<TorrentMetainfo>,
    time_added: DateTime<Utc>,
    last_seen_complete: i64,
    total_uploaded: u64,
    trackers: Vec<TrackerEntry>,
    tracker_host: Option<String>,
    tracker_status: String,
    state: TorrentState,
    message: String,
    is_finished: bool,
    waiting_on_resume_data: bool,
    forced_recheck: Option<bool>,
    folder_renames: Vec<FolderRename>,
    previous_status: HashMap<Uuid, StatusMap>,
}

impl Torrent {
    /// Wrap an engine handle, apply every option and derive the initial state.
    pub(crate) async fn new(engine: Arc<dyn TorrentEngine>, seed: NewTorrent) -> Self {
        let NewTorrent {
            id,
            options,
            owner,
            filename,
            magnet,
            metainfo,
            restored,
        } = seed;
        let mut torrent = Self {
            engine,
            filename: filename.unwrap_or_else(|| id.to_string()),
            id,
            options: options.clone(),
            owner,
            magnet,
            metainfo,
            time_added: Utc::now(),
            last_seen_complete: 0,
            total_uploaded: 0,
            trackers: Vec::new(),
            tracker_host: None,
            tracker_status: String::new(),
            state: TorrentState::Paused,
            message: STATUS_OK.to_string(),
            is_finished: false,
            waiting_on_resume_data: false,
            forced_recheck: None,
            folder_renames: Vec::new(),
            previous_status: HashMap::new(),
        };

        if let Some(record) = restored {
            torrent.total_uploaded = record.total_uploaded;
            torrent.is_finished = record.is_finished;
            torrent.time_added = record.time_added;
            torrent.last_seen_complete = record.last_seen_complete;
            if !record.filename.is_empty() {
                torrent.filename = record.filename;
            }
            torrent.set_trackers(Some(record.trackers)).await;
        } else {
            torrent.set_trackers(None).await;
        }

        torrent.apply_options(options).await;
        torrent.update_state().await;
        torrent
    }

    /// Info hash of the torrent.
    #[must_use]
    pub const fn id(&self) -> &InfoHash {
        &self.id
    }

    /// Last derived lifecycle state.
    #[must_use]
    pub const fn state(&self) -> TorrentState {
        self.state
    }

    /// Human readable status message, `OK` unless the engine reported an error.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Stored option values.
    #[must_use]
    pub const fn options(&self) -> &TorrentOptions {
        &self.options
    }

    /// Owning account.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Descriptor filename supplied at add time.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Magnet URI the torrent came from, if any.
    #[must_use]
    pub fn magnet(&self) -> Option<&str> {
        self.magnet.as_deref()
    }

    /// Current tracker list.
    #[must_use]
    pub fn trackers(&self) -> &[TrackerEntry] {
        &self.trackers
    }

    /// Whether every wanted byte has been downloaded.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.is_finished
    }

    /// Whether a recovery-data request is still unanswered.
    #[must_use]
    pub const fn is_waiting_on_resume_data(&self) -> bool {
        self.waiting_on_resume_data
    }

    /// Folder renames still waiting on file confirmations.
    #[must_use]
    pub fn folder_renames(&self) -> &[FolderRename] {
        &self.folder_renames
    }

    /// Display name: metadata name, magnet `dn`, or the info hash.
    #[must_use]
    pub fn name(&self) -> String {
        if let Some(metainfo) = &self.metainfo {
            return metainfo.display_name().to_string();
        }
        self.magnet
            .as_deref()
            .and_then(|uri| MagnetLink::parse(uri).ok())
            .and_then(|magnet| magnet.display_name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.id.to_string())
    }

    /// Whether the visible shares of the torrent include `user`.
    #[must_use]
    pub fn is_visible_to(&self, user: &str) -> bool {
        self.options.shared || self.owner == user
    }

    pub(crate) const fn set_finished(&mut self, finished: bool) {
        self.is_finished = finished;
    }

    pub(crate) const fn clear_resume_wait(&mut self) {
        self.waiting_on_resume_data = false;
    }

    pub(crate) const fn take_forced_recheck(&mut self) -> Option<bool> {
        self.forced_recheck.take()
    }

    /// Re-derive the lifecycle state from the engine.
    ///
    /// When the engine cannot be queried the previous state is kept.
    pub async fn update_state(&mut self) -> TorrentState {
        let Some(status) = self.engine_status().await else {
            return self.state;
        };
        let session_paused = self.engine.is_session_paused().await;
        let state = derive_state(&status, session_paused);
        if state == TorrentState::Error {
            self.message.clone_from(&status.error);
            if status.paused {
                let result = self.engine.set_auto_managed(&self.id, false).await;
                self.report("set_auto_managed", result);
            }
        }
        self.last_seen_complete = self.last_seen_complete.max(status.last_seen_complete);
        self.state = state;
        state
    }

    /// Apply a full option set through the individual setters.
    pub(crate) async fn apply_options(&mut self, options: TorrentOptions) {
        self.set_options(TorrentOptionsUpdate {
            max_connections: Some(options.max_connections),
            max_upload_slots: Some(options.max_upload_slots),
            max_upload_speed: Some(options.max_upload_speed),
            max_download_speed: Some(options.max_download_speed),
            prioritize_first_last_pieces: Some(options.prioritize_first_last_pieces),
            sequential_download: Some(options.sequential_download),
            download_location: Some(options.download_location),
            auto_managed: Some(options.auto_managed),
            stop_at_ratio: Some(options.stop_at_ratio),
            stop_ratio: Some(options.stop_ratio),
            remove_at_ratio: Some(options.remove_at_ratio),
            move_completed: Some(options.move_completed),
            move_completed_path: Some(options.move_completed_path),
            add_paused: Some(options.add_paused),
            shared: Some(options.shared),
            file_priorities: Some(options.file_priorities),
            mapped_files: Some(options.mapped_files),
        })
        .await;
    }

    /// Apply every present key of `update` through its setter.
    pub async fn set_options(&mut self, update: TorrentOptionsUpdate) {
        let TorrentOptionsUpdate {
            max_connections,
            max_upload_slots,
            max_upload_speed,
            max_download_speed,
            prioritize_first_last_pieces,
            sequential_download,
            download_location,
            auto_managed,
            stop_at_ratio,
            stop_ratio,
            remove_at_ratio,
            move_completed,
            move_completed_path,
            add_paused,
            shared,
            file_priorities,
            mapped_files,
        } = update;

        if let Some(value) = auto_managed {
            self.set_auto_managed(value).await;
        }
        if let Some(value) = download_location {
            self.set_download_location(value);
        }
        if let Some(value) = file_priorities {
            self.set_file_priorities(value).await;
        }
        if let Some(value) = max_connections {
            self.set_max_connections(value).await;
        }
        if let Some(value) = max_download_speed {
            self.set_max_download_speed(value).await;
        }
        if let Some(value) = max_upload_slots {
            self.set_max_upload_slots(value).await;
        }
        if let Some(value) = max_upload_speed {
            self.set_max_upload_speed(value).await;
        }
        if let Some(value) = prioritize_first_last_pieces {
            self.set_prioritize_first_last_pieces(value).await;
        }
        if let Some(value) = sequential_download {
            self.set_sequential_download(value).await;
        }
        if let Some(value) = stop_at_ratio {
            self.set_stop_at_ratio(value);
        }
        if let Some(value) = stop_ratio {
            self.set_stop_ratio(value);
        }
        if let Some(value) = remove_at_ratio {
            self.set_remove_at_ratio(value);
        }
        if let Some(value) = move_completed {
            self.set_move_completed(value);
        }
        if let Some(value) = move_completed_path {
            self.set_move_completed_path(value);
        }
        if let Some(value) = shared {
            self.set_shared(value);
        }
        if let Some(value) = add_paused {
            self.options.add_paused = value;
        }
        if let Some(value) = mapped_files {
            self.options.mapped_files = value;
        }
    }

    /// Connection limit, `-1` for unlimited.
    pub async fn set_max_connections(&mut self, limit: i32) {
        let result = self.engine.set_max_connections(&self.id, limit).await;
        if self.report("set_max_connections", result) {
            self.options.max_connections = limit;
        }
    }

    /// Upload slot limit, `-1` for unlimited.
    pub async fn set_max_upload_slots(&mut self, limit: i32) {
        let result = self.engine.set_max_uploads(&self.id, limit).await;
        if self.report("set_max_uploads", result) {
            self.options.max_upload_slots = limit;
        }
    }

    /// Upload limit in KiB/s, `-1` for unlimited.
    pub async fn set_max_upload_speed(&mut self, kib_per_sec: f64) {
        let result = self
            .engine
            .set_upload_limit(&self.id, speed_limit_bytes(kib_per_sec))
            .await;
        if self.report("set_upload_limit", result) {
            self.options.max_upload_speed = kib_per_sec;
        }
    }

    /// Download limit in KiB/s, `-1` for unlimited.
    pub async fn set_max_download_speed(&mut self, kib_per_sec: f64) {
        let result = self
            .engine
            .set_download_limit(&self.id, speed_limit_bytes(kib_per_sec))
            .await;
        if self.report("set_download_limit", result) {
            self.options.max_download_speed = kib_per_sec;
        }
    }

    /// Fetch the first and last pieces of each file early.
    pub async fn set_prioritize_first_last_pieces(&mut self, enabled: bool) {
        let result = self.engine.prioritize_first_last(&self.id, enabled).await;
        if self.report("prioritize_first_last", result) {
            self.options.prioritize_first_last_pieces = enabled;
        }
    }

    /// Download pieces in order.
    pub async fn set_sequential_download(&mut self, enabled: bool) {
        let result = self.engine.set_sequential_download(&self.id, enabled).await;
        if self.report("set_sequential_download", result) {
            self.options.sequential_download = enabled;
        }
    }

    /// Let the engine queue start and stop the torrent.
    ///
    /// A user-paused handle keeps auto management off until it is resumed.
    pub async fn set_auto_managed(&mut self, enabled: bool) {
        self.options.auto_managed = enabled;
        let Some(status) = self.engine_status().await else {
            return;
        };
        if status.paused && !status.auto_managed {
            return;
        }
        let result = self.engine.set_auto_managed(&self.id, enabled).await;
        if self.report("set_auto_managed", result) {
            self.update_state().await;
        }
    }

    /// Apply per-file priorities.
    ///
    /// A length mismatch keeps the engine's priorities. The stored value is
    /// always read back from the engine afterwards.
    pub async fn set_file_priorities(&mut self, priorities: Vec<u8>) {
        if self.metainfo.is_none() {
            self.refresh_metadata().await;
        }
        let file_count = self.metainfo.as_ref().map_or(0, |info| info.files.len());
        if priorities.len() != file_count {
            debug!(
                torrent_id = %self.id,
                requested = priorities.len(),
                files = file_count,
                "file priority count mismatch; keeping engine priorities"
            );
            self.reload_file_priorities().await;
            return;
        }

        let result = self.engine.prioritize_files(&self.id, &priorities).await;
        if !self.report("prioritize_files", result) {
            self.reload_file_priorities().await;
            return;
        }

        let reincluded = self
            .options
            .file_priorities
            .iter()
            .zip(&priorities)
            .any(|(previous, next)| *previous == 0 && *next > 0);
        if reincluded {
            self.is_finished = false;
            self.update_state().await;
        }

        self.reload_file_priorities().await;
        if self.options.file_priorities != priorities {
            warn!(
                torrent_id = %self.id,
                requested = ?priorities,
                applied = ?self.options.file_priorities,
                "engine applied different file priorities"
            );
        }

        let first_last = self.options.prioritize_first_last_pieces;
        self.set_prioritize_first_last_pieces(first_last).await;
    }

    /// Replace the tracker list, or reload it from the engine when `None`.
    ///
    /// A non-empty replacement triggers a reannounce.
    pub async fn set_trackers(&mut self, trackers: Option<Vec<TrackerEntry>>) {
        match trackers {
            None => match self.engine.trackers(&self.id).await {
                Ok(current) => self.trackers = current,
                Err(err) => warn!(torrent_id = %self.id, error = %err, "tracker list unavailable"),
            },
            Some(replacement) => {
                let result = self.engine.replace_trackers(&self.id, &replacement).await;
                if !self.report("replace_trackers", result) {
                    return;
                }
                self.trackers = replacement;
                if !self.trackers.is_empty() {
                    self.force_reannounce().await;
                }
            }
        }
        self.tracker_host = None;
    }

    /// Add trackers not yet present, keeping the existing order.
    pub(crate) async fn merge_trackers(&mut self, extra: &[TrackerEntry]) {
        let mut merged = self.trackers.clone();
        for tracker in extra {
            if !merged.iter().any(|known| known.url == tracker.url) {
                merged.push(tracker.clone());
            }
        }
        if merged.len() != self.trackers.len() {
            self.set_trackers(Some(merged)).await;
        }
    }

    /// Payload directory, effective for later moves and status.
    pub fn set_download_location(&mut self, location: PathBuf) {
        self.options.download_location = location;
    }

    /// Stop seeding once the stop ratio is reached.
    pub const fn set_stop_at_ratio(&mut self, enabled: bool) {
        self.options.stop_at_ratio = enabled;
    }

    /// Ratio at which seeding stops.
    pub const fn set_stop_ratio(&mut self, ratio: f64) {
        self.options.stop_ratio = ratio;
    }

    /// Remove instead of pausing at the stop ratio.
    pub const fn set_remove_at_ratio(&mut self, enabled: bool) {
        self.options.remove_at_ratio = enabled;
    }

    /// Move the payload once it finishes.
    pub const fn set_move_completed(&mut self, enabled: bool) {
        self.options.move_completed = enabled;
    }

    /// Destination for completed payloads.
    pub fn set_move_completed_path(&mut self, path: PathBuf) {
        self.options.move_completed_path = path;
    }

    /// Share the torrent with every account.
    pub const fn set_shared(&mut self, shared: bool) {
        self.options.shared = shared;
    }

    /// Hand the torrent to another account.
    pub fn set_owner(&mut self, owner: String) {
        self.owner = owner;
    }

    /// Pause the torrent and take it out of the engine queue.
    pub async fn pause(&mut self) -> bool {
        let result = self.engine.set_auto_managed(&self.id, false).await;
        if !self.report("set_auto_managed", result) {
            return false;
        }
        let Some(status) = self.engine_status().await else {
            return false;
        };
        if status.paused {
            self.update_state().await;
            return true;
        }
        let result = self.engine.pause(&self.id).await;
        self.report("pause", result)
    }

    /// Resume the torrent.
    ///
    /// Refused for handles already managed by the engine queue and for
    /// finished torrents that already reached their stop ratio.
    pub async fn resume(&mut self) -> bool {
        let Some(status) = self.engine_status().await else {
            return false;
        };
        if status.paused && status.auto_managed {
            debug!(torrent_id = %self.id, "torrent is queued by the engine; resume skipped");
            return false;
        }
        self.message = STATUS_OK.to_string();
        if self.is_finished
            && self.options.stop_at_ratio
            && status::ratio(self.uploaded_total(&status), status.total_done) >= self.options.stop_ratio
        {
            debug!(torrent_id = %self.id, "stop ratio reached; resume skipped");
            return false;
        }
        if self.options.auto_managed {
            let result = self.engine.set_auto_managed(&self.id, true).await;
            if !self.report("set_auto_managed", result) {
                return false;
            }
        }
        let result = self.engine.resume(&self.id).await;
        self.report("resume", result)
    }

    /// Ask the engine to connect to `peer`.
    pub async fn connect_peer(&self, peer: SocketAddr) -> bool {
        let result = self.engine.connect_peer(&self.id, peer).await;
        self.report("connect_peer", result)
    }

    /// Move the payload to `destination`, creating the directory first.
    pub async fn move_storage(&self, destination: &Path) -> bool {
        if let Err(err) = tokio::fs::create_dir_all(destination).await {
            warn!(
                torrent_id = %self.id,
                destination = %destination.display(),
                error = %err,
                "could not create storage destination"
            );
            return false;
        }
        let result = self.engine.move_storage(&self.id, destination).await;
        self.report("move_storage", result)
    }

    /// Request recovery data; the answer arrives as an alert.
    pub async fn save_resume_data(&mut self) -> bool {
        let result = self.engine.save_resume_data(&self.id).await;
        let requested = self.report("save_resume_data", result);
        if requested {
            self.waiting_on_resume_data = true;
        }
        requested
    }

    /// Announce to every tracker now.
    pub async fn force_reannounce(&self) -> bool {
        let result = self.engine.force_reannounce(&self.id).await;
        self.report("force_reannounce", result)
    }

    /// Scrape the current tracker.
    pub async fn scrape_tracker(&self) -> bool {
        let result = self.engine.scrape_tracker(&self.id).await;
        self.report("scrape_tracker", result)
    }

    /// Re-verify on-disk data; a paused torrent is paused again once checked.
    pub async fn force_recheck(&mut self) -> bool {
        let Some(status) = self.engine_status().await else {
            return false;
        };
        let result = self.engine.force_recheck(&self.id).await;
        if !self.report("force_recheck", result) {
            return false;
        }
        let result = self.engine.resume(&self.id).await;
        if !self.report("resume", result) {
            return false;
        }
        self.forced_recheck = Some(status.paused);
        true
    }

    /// Rename individual files; each confirmation arrives as an alert.
    pub async fn rename_files(&self, renames: &[(u32, String)]) -> bool {
        let mut all_sent = true;
        for (index, name) in renames {
            let name = sanitize_filepath(name, false);
            let result = self.engine.rename_file(&self.id, *index, &name).await;
            all_sent &= self.report("rename_file", result);
        }
        all_sent
    }

    /// Rename every file under `folder` to live under `new_folder`.
    ///
    /// Returns `false` when the new name is empty or no file was renamed.
    pub async fn rename_folder(&mut self, folder: &str, new_folder: &str) -> bool {
        let new_folder = sanitize_filepath(new_folder, true);
        if new_folder == "/" {
            warn!(torrent_id = %self.id, "refusing to rename folder to an empty name");
            return false;
        }
        let old_folder = sanitize_filepath(folder, true);
        if self.metainfo.is_none() {
            self.refresh_metadata().await;
        }
        let targets: Vec<(u32, String)> = self
            .metainfo
            .iter()
            .flat_map(|info| info.files.iter())
            .filter(|file| file.path.starts_with(&old_folder))
            .map(|file| (file.index, file.path.replacen(&old_folder, &new_folder, 1)))
            .collect();

        let mut pending = BTreeSet::new();
        for (index, path) in targets {
            let result = self.engine.rename_file(&self.id, index, &path).await;
            if self.report("rename_file", result) {
                pending.insert(index);
            }
        }
        if pending.is_empty() {
            debug!(torrent_id = %self.id, folder = %old_folder, "no files renamed under folder");
            return false;
        }
        self.folder_renames.push(FolderRename {
            old_folder,
            new_folder,
            pending,
        });
        true
    }

    /// Record a file rename confirmed by the engine.
    pub(crate) fn complete_file_rename(&mut self, index: u32, name: &str) -> RenameProgress {
        if let Some(file) = self
            .metainfo
            .as_mut()
            .and_then(|info| info.files.iter_mut().find(|file| file.index == index))
        {
            name.clone_into(&mut file.path);
        }
        let Some(position) = self
            .folder_renames
            .iter()
            .position(|rename| rename.pending.contains(&index))
        else {
            return RenameProgress::File;
        };
        let rename = &mut self.folder_renames[position];
        rename.pending.remove(&index);
        if rename.pending.is_empty() {
            RenameProgress::FolderDone(self.folder_renames.remove(position))
        } else {
            RenameProgress::FolderPending
        }
    }

    /// Record a tracker outcome as `"<host>: <status>"`.
    pub(crate) async fn set_tracker_status(&mut self, status: &str) {
        let host = self.tracker_host().await;
        self.tracker_status = format!("{host}: {status}");
    }

    /// Share ratio from the engine's current counters.
    pub async fn ratio(&self) -> f64 {
        self.engine_status().await.map_or(-1.0, |status| {
            status::ratio(self.uploaded_total(&status), status.total_done)
        })
    }

    /// Engine-reported status, logged and `None` when the engine fails.
    pub(crate) async fn engine_status(&self) -> Option<EngineStatus> {
        match self.engine.status(&self.id).await {
            Ok(status) => Some(status),
            Err(err) => {
                warn!(torrent_id = %self.id, error = %err, "engine status unavailable");
                None
            }
        }
    }

    /// Reload metadata from the engine, keeping the cached copy on failure.
    pub(crate) async fn refresh_metadata(&mut self) {
        match self.engine.metadata(&self.id).await {
            Ok(Some(metainfo)) => self.metainfo = Some(metainfo),
            Ok(None) => {}
            Err(err) => warn!(torrent_id = %self.id, error = %err, "metadata unavailable"),
        }
    }

    /// Snapshot record for the registry state file.
    pub(crate) async fn to_record(&self) -> TorrentRecord {
        let status = self.engine_status().await;
        let queue = match self.engine.queue_position(&self.id).await {
            Ok(position) => position,
            Err(err) => {
                warn!(torrent_id = %self.id, error = %err, "queue position unavailable");
                None
            }
        };
        TorrentRecord {
            torrent_id: self.id.clone(),
            filename: self.filename.clone(),
            total_uploaded: status
                .as_ref()
                .map_or(self.total_uploaded, |status| self.uploaded_total(status)),
            trackers: self.trackers.clone(),
            paused: status.as_ref().map_or(self.state == TorrentState::Paused, |status| status.paused),
            queue,
            is_finished: self.is_finished,
            last_seen_complete: status.as_ref().map_or(self.last_seen_complete, |status| {
                self.last_seen_complete.max(status.last_seen_complete)
            }),
            owner: self.owner.clone(),
            magnet: self.magnet.clone(),
            time_added: self.time_added,
            options: self.options.clone(),
        }
    }

    async fn reload_file_priorities(&mut self) {
        match self.engine.file_priorities(&self.id).await {
            Ok(priorities) => self.options.file_priorities = priorities,
            Err(err) => warn!(torrent_id = %self.id, error = %err, "file priorities unavailable"),
        }
    }

    async fn tracker_host(&mut self) -> String {
        if let Some(host) = &self.tracker_host {
            return host.clone();
        }
        let current = self
            .engine_status()
            .await
            .map(|status| status.current_tracker)
            .unwrap_or_default();
        let tracker = if current.is_empty() {
            self.trackers
                .first()
                .map(|tracker| tracker.url.clone())
                .unwrap_or_default()
        } else {
            current
        };
        if tracker.is_empty() {
            return String::new();
        }
        let host = paths::tracker_host(&tracker);
        self.tracker_host = Some(host.clone());
        host
    }

    fn uploaded_total(&self, status: &EngineStatus) -> u64 {
        self.total_uploaded.max(status.all_time_upload)
    }

    fn report(&self, operation: &'static str, result: anyhow::Result<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(torrent_id = %self.id, operation, error = %err, "engine command failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use seedkeep_test_support::{LoopbackEngine, info_hash, magnet_uri, sample_metainfo};
    use seedkeep_torrent_core::{AddTorrentParams, Alert, EngineSource};

    use crate::session::DEFAULT_OWNER;

    const FILES: &[(&str, u64)] = &[("demo/a.bin", 10), ("demo/b.bin", 20), ("demo/sub/c.bin", 30)];

    async fn managed(engine: &Arc<LoopbackEngine>, options: TorrentOptions) -> Result<Torrent> {
        let metainfo = sample_metainfo(1, "demo", FILES);
        let id = engine
            .add_torrent(AddTorrentParams::paused(
                EngineSource::Metainfo {
                    metainfo: Box::new(metainfo.clone()),
                },
                "/downloads",
            ))
            .await?;
        let shared: Arc<dyn TorrentEngine> = engine.clone();
        Ok(Torrent::new(
            shared,
            NewTorrent {
                id,
                options,
                owner: DEFAULT_OWNER.to_string(),
                filename: None,
                magnet: None,
                metainfo: Some(metainfo),
                restored: None,
            },
        )
        .await)
    }

    #[tokio::test]
    async fn new_torrent_starts_paused_with_engine_priorities() -> Result<()> {
        let engine = Arc::new(LoopbackEngine::new());
        let torrent = managed(&engine, TorrentOptions::default()).await?;
        assert_eq!(torrent.state(), TorrentState::Paused);
        assert_eq!(torrent.message(), STATUS_OK);
        assert_eq!(torrent.options().file_priorities, vec![1, 1, 1]);
        assert_eq!(torrent.name(), "demo");
        assert_eq!(engine.call_count("set_auto_managed", torrent.id()), 0);
        Ok(())
    }

    #[tokio::test]
    async fn engine_error_sets_error_state_and_message() -> Result<()> {
        let engine = Arc::new(LoopbackEngine::new());
        let mut torrent = managed(&engine, TorrentOptions::default()).await?;
        engine.update_status(torrent.id(), |status| {
            status.error = "read-only filesystem".into();
            status.auto_managed = true;
        })?;
        assert_eq!(torrent.update_state().await, TorrentState::Error);
        assert_eq!(torrent.message(), "read-only filesystem");
        let status = engine.status_of(torrent.id()).expect("status");
        assert!(!status.auto_managed);
        Ok(())
    }

    #[tokio::test]
    async fn failed_setter_keeps_previous_value() -> Result<()> {
        let engine = Arc::new(LoopbackEngine::new());
        let mut torrent = managed(&engine, TorrentOptions::default()).await?;
        torrent.set_max_download_speed(64.0).await;
        assert_eq!(engine.limit(torrent.id(), "set_download_limit"), Some(65_536));

        engine.fail_operation("set_max_connections");
        torrent.set_max_connections(12).await;
        assert_eq!(torrent.options().max_connections, -1);
        Ok(())
    }

    #[tokio::test]
    async fn file_priorities_ignore_length_mismatch_and_reset_finished() -> Result<()> {
        let engine = Arc::new(LoopbackEngine::new());
        let mut torrent = managed(&engine, TorrentOptions::default()).await?;
        torrent.set_file_priorities(vec![0]).await;
        assert_eq!(torrent.options().file_priorities, vec![1, 1, 1]);

        torrent.set_file_priorities(vec![0, 1, 1]).await;
        assert_eq!(torrent.options().file_priorities, vec![0, 1, 1]);
        torrent.set_finished(true);
        torrent.set_file_priorities(vec![4, 1, 1]).await;
        assert!(!torrent.is_finished());
        assert_eq!(torrent.options().file_priorities, vec![4, 1, 1]);
        Ok(())
    }

    #[tokio::test]
    async fn pause_and_resume_respect_queue_and_ratio() -> Result<()> {
        let engine = Arc::new(LoopbackEngine::new());
        let mut torrent = managed(&engine, TorrentOptions::default()).await?;
        assert!(torrent.resume().await);
        assert!(!engine.status_of(torrent.id()).expect("status").paused);
        assert!(torrent.pause().await);
        assert!(engine.status_of(torrent.id()).expect("status").paused);

        engine.update_status(torrent.id(), |status| status.auto_managed = true)?;
        assert!(!torrent.resume().await);

        engine.update_status(torrent.id(), |status| {
            status.auto_managed = false;
            status.total_done = 100;
            status.all_time_upload = 300;
        })?;
        torrent.set_stop_at_ratio(true);
        torrent.set_stop_ratio(2.0);
        torrent.set_finished(true);
        assert!(!torrent.resume().await);
        Ok(())
    }

    #[tokio::test]
    async fn best_effort_commands_return_false_on_engine_failure() -> Result<()> {
        let engine = Arc::new(LoopbackEngine::new());
        let mut torrent = managed(&engine, TorrentOptions::default()).await?;
        engine.fail_operation("force_reannounce");
        engine.fail_operation("scrape_tracker");
        engine.fail_operation("save_resume_data");
        assert!(!torrent.force_reannounce().await);
        assert!(!torrent.scrape_tracker().await);
        assert!(!torrent.save_resume_data().await);
        assert!(!torrent.is_waiting_on_resume_data());
        engine.restore_operation("save_resume_data");
        assert!(torrent.save_resume_data().await);
        assert!(torrent.is_waiting_on_resume_data());
        Ok(())
    }

    #[tokio::test]
    async fn force_recheck_remembers_paused_flag() -> Result<()> {
        let engine = Arc::new(LoopbackEngine::new());
        let mut torrent = managed(&engine, TorrentOptions::default()).await?;
        assert!(torrent.force_recheck().await);
        assert_eq!(torrent.take_forced_recheck(), Some(true));
        assert_eq!(torrent.take_forced_recheck(), None);
        Ok(())
    }

    #[tokio::test]
    async fn folder_rename_stages_every_matching_file() -> Result<()> {
        let engine = Arc::new(LoopbackEngine::new());
        let mut torrent = managed(&engine, TorrentOptions::default()).await?;
        assert!(!torrent.rename_folder("demo/", "  ").await);
        assert!(!torrent.rename_folder("missing/", "other").await);
        assert!(torrent.rename_folder("demo", "renamed").await);

        let staged = &torrent.folder_renames()[0];
        assert_eq!(staged.old_folder, "demo/");
        assert_eq!(staged.new_folder, "renamed/");
        assert_eq!(torrent.complete_file_rename(0, "renamed/a.bin"), RenameProgress::FolderPending);
        assert_eq!(torrent.complete_file_rename(1, "renamed/b.bin"), RenameProgress::FolderPending);
        assert!(matches!(
            torrent.complete_file_rename(2, "renamed/sub/c.bin"),
            RenameProgress::FolderDone(_)
        ));
        assert!(torrent.folder_renames().is_empty());
        assert_eq!(torrent.complete_file_rename(0, "again.bin"), RenameProgress::File);
        Ok(())
    }

    #[tokio::test]
    async fn tracker_replacement_reannounces_and_sets_status() -> Result<()> {
        let engine = Arc::new(LoopbackEngine::new());
        let mut torrent = managed(&engine, TorrentOptions::default()).await?;
        engine.poll_alerts().await?;
        torrent
            .set_trackers(Some(vec![TrackerEntry::new("udp://tracker.example.org:80/announce", 0)]))
            .await;
        let alerts = engine.poll_alerts().await?;
        assert!(matches!(alerts.as_slice(), [Alert::TrackerAnnounce { .. }]));
        torrent.set_tracker_status("Announce OK").await;
        assert_eq!(torrent.tracker_status, "example.org: Announce OK");
        Ok(())
    }

    #[tokio::test]
    async fn magnet_name_falls_back_to_display_name_then_hash() -> Result<()> {
        let engine = Arc::new(LoopbackEngine::new());
        let id = info_hash(9);
        let uri = magnet_uri(&id, "Night Sky");
        engine
            .add_torrent(AddTorrentParams::paused(
                EngineSource::Magnet { uri: uri.clone() },
                "/downloads",
            ))
            .await?;
        let shared: Arc<dyn TorrentEngine> = engine.clone();
        let torrent = Torrent::new(
            shared,
            NewTorrent {
                id: id.clone(),
                options: TorrentOptions::default(),
                owner: DEFAULT_OWNER.to_string(),
                filename: None,
                magnet: Some(uri),
                metainfo: None,
                restored: None,
            },
        )
        .await;
        assert_eq!(torrent.name(), "Night Sky");
        assert_eq!(torrent.filename(), id.as_str());
        Ok(())
    }
}
