//! In-memory engine used by orchestrator tests.
//!
//! Commands mutate a per-handle [`EngineStatus`] and queue the alerts a real
//! engine would emit, which tests drain through [`TorrentEngine::poll_alerts`].

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use seedkeep_events::InfoHash;
use seedkeep_torrent_core::{
    AddTorrentParams, Alert, EnginePhase, EngineSource, EngineStatus, MagnetLink, PeerSnapshot,
    PieceSnapshot, TorrentEngine, TorrentError, TorrentMetainfo, TrackerEntry,
};
use serde_json::json;

const DEFAULT_FILE_PRIORITY: u8 = 1;

/// Command observed by the loopback engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCall {
    /// Operation name, matching the trait method.
    pub operation: &'static str,
    /// Handle the command targeted.
    pub torrent_id: Option<InfoHash>,
}

/// In-memory test double for the engine capability trait.
#[derive(Default)]
pub struct LoopbackEngine {
    state: Mutex<LoopbackState>,
}

#[derive(Default)]
struct LoopbackState {
    torrents: HashMap<InfoHash, LoopbackTorrent>,
    queue: Vec<InfoHash>,
    pending: Vec<Alert>,
    calls: Vec<EngineCall>,
    failing: HashSet<&'static str>,
    session_paused: bool,
    queue_throttled: bool,
}

struct LoopbackTorrent {
    metainfo: Option<TorrentMetainfo>,
    status: EngineStatus,
    file_priorities: Vec<u8>,
    trackers: Vec<TrackerEntry>,
    peers: Vec<PeerSnapshot>,
    pieces: PieceSnapshot,
    file_progress: Vec<u64>,
    limits: HashMap<&'static str, i64>,
}

impl LoopbackTorrent {
    fn from_params(params: &AddTorrentParams) -> Result<(InfoHash, Self)> {
        let (id, metainfo, trackers, phase) = match &params.source {
            EngineSource::Metainfo { metainfo } => {
                let mut metainfo = (**metainfo).clone();
                for file in &mut metainfo.files {
                    if let Some(name) = params.renamed_files.get(&file.index) {
                        file.path.clone_from(name);
                    }
                }
                let trackers = metainfo.trackers.clone();
                (
                    metainfo.info_hash.clone(),
                    Some(metainfo),
                    trackers,
                    EnginePhase::Downloading,
                )
            }
            EngineSource::Magnet { uri } => {
                let magnet = MagnetLink::parse(uri)?;
                (
                    magnet.info_hash,
                    None,
                    magnet.trackers,
                    EnginePhase::DownloadingMetadata,
                )
            }
        };
        let file_count = metainfo.as_ref().map_or(0, |info| info.files.len());
        let status = EngineStatus {
            phase,
            paused: params.paused,
            auto_managed: params.auto_managed,
            has_metadata: metainfo.is_some(),
            num_complete: -1,
            num_incomplete: -1,
            distributed_copies: -1.0,
            total_wanted: metainfo.as_ref().map_or(0, |info| info.total_size),
            save_path: params.save_path.clone(),
            ..EngineStatus::default()
        };
        Ok((
            id,
            Self {
                metainfo,
                status,
                file_priorities: vec![DEFAULT_FILE_PRIORITY; file_count],
                trackers,
                peers: Vec::new(),
                pieces: PieceSnapshot::default(),
                file_progress: vec![0; file_count],
                limits: HashMap::new(),
            },
        ))
    }
}

impl LoopbackEngine {
    /// Empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call of `operation` fail.
    pub fn fail_operation(&self, operation: &'static str) {
        self.lock().failing.insert(operation);
    }

    /// Undo [`LoopbackEngine::fail_operation`].
    pub fn restore_operation(&self, operation: &'static str) {
        self.lock().failing.remove(operation);
    }

    /// Pause or unpause the whole session.
    pub fn set_session_paused(&self, paused: bool) {
        self.lock().session_paused = paused;
    }

    /// When set, resuming an auto-managed handle leaves it paused as the queue would.
    pub fn set_queue_throttled(&self, throttled: bool) {
        self.lock().queue_throttled = throttled;
    }

    /// Queue an alert as if the engine emitted it.
    pub fn push_alert(&self, alert: Alert) {
        self.lock().pending.push(alert);
    }

    /// Mutate the status of a handle in place.
    ///
    /// # Errors
    ///
    /// Returns an error when the handle is unknown.
    pub fn update_status<F>(&self, id: &InfoHash, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut EngineStatus),
    {
        let mut state = self.lock();
        let torrent = state
            .torrents
            .get_mut(id)
            .ok_or_else(|| anyhow!(TorrentError::NotFound {
                torrent_id: id.clone()
            }))?;
        mutate(&mut torrent.status);
        Ok(())
    }

    /// Finish a magnet download's metadata exchange and queue the
    /// matching alert.
    ///
    /// # Errors
    ///
    /// Returns an error when the handle is unknown.
    pub fn deliver_metadata(&self, id: &InfoHash, metainfo: TorrentMetainfo) -> Result<()> {
        let mut state = self.lock();
        let torrent = state.torrent_mut(id)?;
        let file_count = metainfo.files.len();
        torrent.status.has_metadata = true;
        torrent.status.phase = EnginePhase::Downloading;
        torrent.status.total_wanted = metainfo.total_size;
        torrent.file_priorities = vec![DEFAULT_FILE_PRIORITY; file_count];
        torrent.file_progress = vec![0; file_count];
        torrent.metainfo = Some(metainfo);
        state.pending.push(Alert::MetadataReceived {
            torrent_id: id.clone(),
        });
        Ok(())
    }

    /// Current status of a handle, if present.
    #[must_use]
    pub fn status_of(&self, id: &InfoHash) -> Option<EngineStatus> {
        self.lock().torrents.get(id).map(|torrent| torrent.status.clone())
    }

    /// Replace the connected peers of a handle.
    pub fn set_peers(&self, id: &InfoHash, peers: Vec<PeerSnapshot>) {
        if let Some(torrent) = self.lock().torrents.get_mut(id) {
            torrent.peers = peers;
        }
    }

    /// Replace the piece view of a handle.
    pub fn set_pieces(&self, id: &InfoHash, pieces: PieceSnapshot) {
        if let Some(torrent) = self.lock().torrents.get_mut(id) {
            torrent.pieces = pieces;
        }
    }

    /// Replace per-file progress of a handle.
    pub fn set_file_progress(&self, id: &InfoHash, progress: Vec<u64>) {
        if let Some(torrent) = self.lock().torrents.get_mut(id) {
            torrent.file_progress = progress;
        }
    }

    /// Rate or connection limit last applied, keyed by operation name.
    #[must_use]
    pub fn limit(&self, id: &InfoHash, operation: &'static str) -> Option<i64> {
        self.lock()
            .torrents
            .get(id)
            .and_then(|torrent| torrent.limits.get(operation).copied())
    }

    /// Whether the engine holds a handle.
    #[must_use]
    pub fn contains(&self, id: &InfoHash) -> bool {
        self.lock().torrents.contains_key(id)
    }

    /// Number of handles held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().torrents.len()
    }

    /// Whether the engine holds no handles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every command received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    /// Number of times `operation` was called for `id`.
    #[must_use]
    pub fn call_count(&self, operation: &str, id: &InfoHash) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.operation == operation && call.torrent_id.as_ref() == Some(id))
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(
        &self,
        operation: &'static str,
        id: Option<&InfoHash>,
    ) -> Result<MutexGuard<'_, LoopbackState>> {
        let mut state = self.lock();
        state.calls.push(EngineCall {
            operation,
            torrent_id: id.cloned(),
        });
        if state.failing.contains(operation) {
            bail!("{operation} failed in loopback engine");
        }
        if let Some(id) = id
            && !state.torrents.contains_key(id)
        {
            return Err(anyhow!(TorrentError::NotFound {
                torrent_id: id.clone()
            }));
        }
        Ok(state)
    }
}

impl LoopbackState {
    fn torrent_mut(&mut self, id: &InfoHash) -> Result<&mut LoopbackTorrent> {
        self.torrents.get_mut(id).ok_or_else(|| {
            anyhow!(TorrentError::NotFound {
                torrent_id: id.clone()
            })
        })
    }

    fn torrent(&self, id: &InfoHash) -> Result<&LoopbackTorrent> {
        self.torrents.get(id).ok_or_else(|| {
            anyhow!(TorrentError::NotFound {
                torrent_id: id.clone()
            })
        })
    }

    fn move_in_queue(&mut self, id: &InfoHash, target: impl FnOnce(usize, usize) -> usize) {
        if let Some(position) = self.queue.iter().position(|queued| queued == id) {
            let last = self.queue.len() - 1;
            let entry = self.queue.remove(position);
            let destination = target(position, last).min(last);
            self.queue.insert(destination, entry);
        }
    }

    fn record_limit(&mut self, id: &InfoHash, operation: &'static str, value: i64) -> Result<()> {
        self.torrent_mut(id)?.limits.insert(operation, value);
        Ok(())
    }
}

#[async_trait]
impl TorrentEngine for LoopbackEngine {
    async fn load_metainfo(&self, bytes: &[u8]) -> Result<TorrentMetainfo> {
        drop(self.begin("load_metainfo", None)?);
        if bytes.is_empty() {
            return Err(anyhow!(TorrentError::InvalidMetainfo { reason: "empty" }));
        }
        let mut metainfo: TorrentMetainfo = serde_json::from_slice(bytes)
            .map_err(|_| anyhow!(TorrentError::InvalidMetainfo { reason: "malformed" }))?;
        metainfo.raw = bytes.to_vec();
        Ok(metainfo)
    }

    async fn add_torrent(&self, params: AddTorrentParams) -> Result<InfoHash> {
        let mut state = self.begin("add_torrent", None)?;
        let (id, torrent) = LoopbackTorrent::from_params(&params)?;
        if state.torrents.contains_key(&id) {
            bail!("duplicate torrent {id}");
        }
        state.torrents.insert(id.clone(), torrent);
        state.queue.push(id.clone());
        Ok(id)
    }

    async fn remove_torrent(&self, id: &InfoHash, _purge_data: bool) -> Result<()> {
        let mut state = self.begin("remove_torrent", Some(id))?;
        state.torrents.remove(id);
        state.queue.retain(|queued| queued != id);
        Ok(())
    }

    async fn pause(&self, id: &InfoHash) -> Result<()> {
        let mut state = self.begin("pause", Some(id))?;
        state.torrent_mut(id)?.status.paused = true;
        state.pending.push(Alert::Paused {
            torrent_id: id.clone(),
        });
        Ok(())
    }

    async fn resume(&self, id: &InfoHash) -> Result<()> {
        let mut state = self.begin("resume", Some(id))?;
        let throttled = state.queue_throttled;
        let torrent = state.torrent_mut(id)?;
        if torrent.status.auto_managed && throttled {
            return Ok(());
        }
        let was_paused = torrent.status.paused;
        torrent.status.paused = false;
        if was_paused {
            state.pending.push(Alert::Resumed {
                torrent_id: id.clone(),
            });
        }
        Ok(())
    }

    async fn set_auto_managed(&self, id: &InfoHash, enabled: bool) -> Result<()> {
        let mut state = self.begin("set_auto_managed", Some(id))?;
        state.torrent_mut(id)?.status.auto_managed = enabled;
        Ok(())
    }

    async fn status(&self, id: &InfoHash) -> Result<EngineStatus> {
        let state = self.begin("status", Some(id))?;
        Ok(state.torrent(id)?.status.clone())
    }

    async fn save_resume_data(&self, id: &InfoHash) -> Result<()> {
        let mut state = self.begin("save_resume_data", Some(id))?;
        let torrent = state.torrent(id)?;
        let data = json!({
            "info_hash": id.as_str(),
            "save_path": torrent.status.save_path,
            "paused": torrent.status.paused,
            "file_priorities": torrent.file_priorities,
        })
        .to_string()
        .into_bytes();
        state.pending.push(Alert::ResumeDataSaved {
            torrent_id: id.clone(),
            data,
        });
        Ok(())
    }

    async fn poll_alerts(&self) -> Result<Vec<Alert>> {
        Ok(std::mem::take(&mut self.lock().pending))
    }

    async fn is_session_paused(&self) -> bool {
        self.lock().session_paused
    }

    async fn set_max_connections(&self, id: &InfoHash, limit: i32) -> Result<()> {
        let mut state = self.begin("set_max_connections", Some(id))?;
        state.record_limit(id, "set_max_connections", i64::from(limit))
    }

    async fn set_max_uploads(&self, id: &InfoHash, limit: i32) -> Result<()> {
        let mut state = self.begin("set_max_uploads", Some(id))?;
        state.record_limit(id, "set_max_uploads", i64::from(limit))
    }

    async fn set_upload_limit(&self, id: &InfoHash, bytes_per_sec: i64) -> Result<()> {
        let mut state = self.begin("set_upload_limit", Some(id))?;
        state.record_limit(id, "set_upload_limit", bytes_per_sec)
    }

    async fn set_download_limit(&self, id: &InfoHash, bytes_per_sec: i64) -> Result<()> {
        let mut state = self.begin("set_download_limit", Some(id))?;
        state.record_limit(id, "set_download_limit", bytes_per_sec)
    }

    async fn prioritize_files(&self, id: &InfoHash, priorities: &[u8]) -> Result<()> {
        let mut state = self.begin("prioritize_files", Some(id))?;
        let torrent = state.torrent_mut(id)?;
        for (slot, priority) in torrent.file_priorities.iter_mut().zip(priorities) {
            *slot = *priority;
        }
        Ok(())
    }

    async fn file_priorities(&self, id: &InfoHash) -> Result<Vec<u8>> {
        let state = self.lock();
        Ok(state.torrent(id)?.file_priorities.clone())
    }

    async fn prioritize_first_last(&self, id: &InfoHash, enabled: bool) -> Result<()> {
        let mut state = self.begin("prioritize_first_last", Some(id))?;
        state.record_limit(id, "prioritize_first_last", i64::from(enabled))
    }

    async fn set_sequential_download(&self, id: &InfoHash, enabled: bool) -> Result<()> {
        let mut state = self.begin("set_sequential_download", Some(id))?;
        state.record_limit(id, "set_sequential_download", i64::from(enabled))
    }

    async fn move_storage(&self, id: &InfoHash, destination: &Path) -> Result<()> {
        let mut state = self.begin("move_storage", Some(id))?;
        state.torrent_mut(id)?.status.save_path = destination.to_path_buf();
        state.pending.push(Alert::StorageMoved {
            torrent_id: id.clone(),
            path: destination.to_path_buf(),
        });
        Ok(())
    }

    async fn force_recheck(&self, id: &InfoHash) -> Result<()> {
        let mut state = self.begin("force_recheck", Some(id))?;
        let status = &mut state.torrent_mut(id)?.status;
        status.paused = false;
        state.pending.push(Alert::StateChanged {
            torrent_id: id.clone(),
            phase: EnginePhase::CheckingFiles,
        });
        state.pending.push(Alert::Checked {
            torrent_id: id.clone(),
        });
        Ok(())
    }

    async fn force_reannounce(&self, id: &InfoHash) -> Result<()> {
        let mut state = self.begin("force_reannounce", Some(id))?;
        let url = state
            .torrent(id)?
            .trackers
            .first()
            .map(|tracker| tracker.url.clone())
            .unwrap_or_default();
        state.pending.push(Alert::TrackerAnnounce {
            torrent_id: id.clone(),
            url,
        });
        Ok(())
    }

    async fn scrape_tracker(&self, id: &InfoHash) -> Result<()> {
        drop(self.begin("scrape_tracker", Some(id))?);
        Ok(())
    }

    async fn connect_peer(&self, id: &InfoHash, _peer: SocketAddr) -> Result<()> {
        drop(self.begin("connect_peer", Some(id))?);
        Ok(())
    }

    async fn rename_file(&self, id: &InfoHash, index: u32, name: &str) -> Result<()> {
        let mut state = self.begin("rename_file", Some(id))?;
        let torrent = state.torrent_mut(id)?;
        let file = torrent
            .metainfo
            .as_mut()
            .and_then(|info| info.files.iter_mut().find(|file| file.index == index))
            .ok_or_else(|| anyhow!("file index {index} out of range"))?;
        name.clone_into(&mut file.path);
        state.pending.push(Alert::FileRenamed {
            torrent_id: id.clone(),
            index,
            name: name.to_string(),
        });
        Ok(())
    }

    async fn replace_trackers(&self, id: &InfoHash, trackers: &[TrackerEntry]) -> Result<()> {
        let mut state = self.begin("replace_trackers", Some(id))?;
        state.torrent_mut(id)?.trackers = trackers.to_vec();
        Ok(())
    }

    async fn trackers(&self, id: &InfoHash) -> Result<Vec<TrackerEntry>> {
        let state = self.lock();
        Ok(state.torrent(id)?.trackers.clone())
    }

    async fn queue_position(&self, id: &InfoHash) -> Result<Option<u32>> {
        let state = self.lock();
        let torrent = state.torrent(id)?;
        if torrent.status.is_seed && torrent.status.is_finished {
            return Ok(None);
        }
        Ok(state
            .queue
            .iter()
            .position(|queued| queued == id)
            .and_then(|position| u32::try_from(position).ok()))
    }

    async fn queue_top(&self, id: &InfoHash) -> Result<()> {
        let mut state = self.begin("queue_top", Some(id))?;
        state.move_in_queue(id, |_, _| 0);
        Ok(())
    }

    async fn queue_up(&self, id: &InfoHash) -> Result<()> {
        let mut state = self.begin("queue_up", Some(id))?;
        state.move_in_queue(id, |position, _| position.saturating_sub(1));
        Ok(())
    }

    async fn queue_down(&self, id: &InfoHash) -> Result<()> {
        let mut state = self.begin("queue_down", Some(id))?;
        state.move_in_queue(id, |position, _| position + 1);
        Ok(())
    }

    async fn queue_bottom(&self, id: &InfoHash) -> Result<()> {
        let mut state = self.begin("queue_bottom", Some(id))?;
        state.move_in_queue(id, |_, last| last);
        Ok(())
    }

    async fn metadata(&self, id: &InfoHash) -> Result<Option<TorrentMetainfo>> {
        let state = self.lock();
        Ok(state.torrent(id)?.metainfo.clone())
    }

    async fn export_metainfo(&self, id: &InfoHash) -> Result<Vec<u8>> {
        let state = self.lock();
        let metainfo = state
            .torrent(id)?
            .metainfo
            .clone()
            .ok_or_else(|| anyhow!("metadata not yet available for {id}"))?;
        Ok(serde_json::to_vec(&TorrentMetainfo {
            raw: Vec::new(),
            ..metainfo
        })?)
    }

    async fn peers(&self, id: &InfoHash) -> Result<Vec<PeerSnapshot>> {
        let state = self.begin("peers", Some(id))?;
        Ok(state.torrent(id)?.peers.clone())
    }

    async fn pieces(&self, id: &InfoHash) -> Result<PieceSnapshot> {
        let state = self.begin("pieces", Some(id))?;
        Ok(state.torrent(id)?.pieces.clone())
    }

    async fn file_progress(&self, id: &InfoHash) -> Result<Vec<u64>> {
        let state = self.begin("file_progress", Some(id))?;
        Ok(state.torrent(id)?.file_progress.clone())
    }
}
