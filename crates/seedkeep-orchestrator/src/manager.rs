//! Torrent registry and the bookkeeping that outlives a single torrent.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::slice;
use std::sync::Arc;
use std::time::Duration;

use seedkeep_config::CoreConfig;
use seedkeep_events::{Event, EventBus, InfoHash, TorrentState};
use seedkeep_telemetry::Metrics;
use seedkeep_torrent_core::{
    AddTorrentParams, EngineSource, MagnetLink, TorrentEngine, TorrentMetainfo, TrackerEntry,
};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::options::{TorrentOptions, TorrentOptionsUpdate};
use crate::persistence::{StateStore, TorrentRecord, remove_optional, write_atomic};
use crate::session::{Caller, SessionDirectory, resolve_owner};
use crate::torrent::{NewTorrent, StatusKey, StatusMap, Torrent};

const PERSISTENCE_COMPONENT: &str = "persistence";

/// Where a new torrent comes from.
#[derive(Debug, Clone)]
pub enum TorrentSource {
    /// Already parsed descriptor.
    Metainfo(Box<TorrentMetainfo>),
    /// Raw descriptor bytes, parsed by the engine.
    MetainfoBytes(Vec<u8>),
    /// Magnet URI.
    Magnet(String),
    /// Record from a previous registry snapshot.
    SavedState(Box<TorrentRecord>),
}

/// Everything needed to add one torrent.
#[derive(Debug, Clone)]
pub struct AddTorrentRequest {
    /// Descriptor, magnet, or saved record.
    pub source: TorrentSource,
    /// Overrides applied on top of the configured defaults.
    pub options: Option<TorrentOptionsUpdate>,
    /// Engine recovery data from a previous run.
    pub resume_data: Option<Vec<u8>>,
    /// Requested owner; unknown accounts fall back to the local client.
    pub owner: Option<String>,
    /// Original descriptor filename.
    pub filename: Option<String>,
    /// Write a registry snapshot once the torrent is registered.
    pub save_state: bool,
}

impl AddTorrentRequest {
    /// Request with defaults for everything but the source.
    #[must_use]
    pub const fn new(source: TorrentSource) -> Self {
        Self {
            source,
            options: None,
            resume_data: None,
            owner: None,
            filename: None,
            save_state: true,
        }
    }
}

/// Queue movement requested by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueDirection {
    /// Move to the first position.
    Top,
    /// Move one position towards the front.
    Up,
    /// Move one position towards the back.
    Down,
    /// Move to the last position.
    Bottom,
}

/// Best-effort command applied to one torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TorrentAction {
    /// Pause and take out of the engine queue.
    Pause,
    /// Resume, honouring auto management.
    Resume,
    /// Re-verify on-disk data.
    ForceRecheck,
    /// Announce to trackers now.
    ForceReannounce,
    /// Scrape the current tracker.
    ScrapeTracker,
    /// Connect to a specific peer.
    ConnectPeer(SocketAddr),
    /// Move the payload to another directory.
    MoveStorage(PathBuf),
    /// Rename files by index.
    RenameFiles(Vec<(u32, String)>),
    /// Rename a folder and every file below it.
    RenameFolder {
        /// Current folder prefix.
        from: String,
        /// New folder prefix.
        to: String,
    },
    /// Request recovery data now.
    SaveResumeData,
}

/// Publishes events and counts them.
#[derive(Clone)]
pub(crate) struct Notifier {
    pub(crate) events: EventBus,
    pub(crate) metrics: Metrics,
}

impl Notifier {
    pub(crate) fn publish(&self, event: Event) {
        self.metrics.inc_event(event.kind());
        let _ = self.events.publish(event);
    }
}

/// Resolved add source.
struct Prepared {
    id: InfoHash,
    engine_source: EngineSource,
    metainfo: Option<TorrentMetainfo>,
    magnet: Option<String>,
    descriptor: Option<Vec<u8>>,
    trackers: Vec<TrackerEntry>,
    record: Option<TorrentRecord>,
}

/// Owns every managed torrent and the bookkeeping around them.
///
/// All methods take `&mut self`; the service task is the only owner, so no
/// two commands or alert handlers run concurrently.
pub struct TorrentManager {
    pub(crate) engine: Arc<dyn TorrentEngine>,
    pub(crate) notifier: Notifier,
    sessions: Arc<dyn SessionDirectory>,
    pub(crate) config: CoreConfig,
    pub(crate) store: StateStore,
    pub(crate) torrents: HashMap<InfoHash, Torrent>,
    pub(crate) queued: HashSet<InfoHash>,
    pub(crate) shutdown_pause: HashSet<InfoHash>,
    /// Torrents paused by shutdown; saved as running.
    paused_for_shutdown: HashSet<InfoHash>,
    pub(crate) resume_batch: HashMap<InfoHash, Vec<u8>>,
    pub(crate) pending_resume: usize,
    pub(crate) alerts_paused: bool,
    pub(crate) timers_running: bool,
    health: BTreeSet<String>,
}

impl TorrentManager {
    /// Registry over `engine`, persisting under `config.state_dir`.
    #[must_use]
    pub fn new(
        engine: Arc<dyn TorrentEngine>,
        events: EventBus,
        metrics: Metrics,
        sessions: Arc<dyn SessionDirectory>,
        config: CoreConfig,
    ) -> Self {
        Self {
            engine,
            notifier: Notifier { events, metrics },
            sessions,
            store: StateStore::new(config.state_dir.clone()),
            config,
            torrents: HashMap::new(),
            queued: HashSet::new(),
            shutdown_pause: HashSet::new(),
            paused_for_shutdown: HashSet::new(),
            resume_batch: HashMap::new(),
            pending_resume: 0,
            alerts_paused: false,
            timers_running: false,
            health: BTreeSet::new(),
        }
    }

    /// Number of managed torrents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.torrents.len()
    }

    /// Whether no torrent is managed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.torrents.is_empty()
    }

    /// Whether `id` is managed.
    #[must_use]
    pub fn contains(&self, id: &InfoHash) -> bool {
        self.torrents.contains_key(id)
    }

    /// Borrow a managed torrent.
    #[must_use]
    pub fn torrent(&self, id: &InfoHash) -> Option<&Torrent> {
        self.torrents.get(id)
    }

    /// Components currently reported as degraded.
    #[must_use]
    pub fn degraded(&self) -> Vec<String> {
        self.health.iter().cloned().collect()
    }

    /// Outstanding recovery-data requests.
    #[must_use]
    pub const fn pending_resume_data(&self) -> usize {
        self.pending_resume
    }

    /// Add a torrent, returning its id.
    ///
    /// A torrent that is already managed only has new trackers merged in.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidArgument`] for malformed sources
    /// and [`OrchestratorError::EngineRejected`] when the engine refuses the
    /// handle.
    pub async fn add(&mut self, request: AddTorrentRequest) -> OrchestratorResult<InfoHash> {
        let AddTorrentRequest {
            source,
            options,
            resume_data,
            owner,
            filename,
            save_state,
        } = request;
        let from_state = matches!(source, TorrentSource::SavedState(_));
        let prepared = self.prepare(source).await?;
        let id = prepared.id.clone();

        if let Some(existing) = self.torrents.get_mut(&id) {
            debug!(torrent_id = %id, "torrent already managed; merging trackers");
            existing.merge_trackers(&prepared.trackers).await;
            return Ok(id);
        }

        let mut torrent_options = prepared.record.as_ref().map_or_else(
            || TorrentOptions::from_config(&self.config),
            |record| TorrentOptions {
                add_paused: record.paused,
                ..record.options.clone()
            },
        );
        if let Some(update) = options {
            update.merge_into(&mut torrent_options);
        }
        let owner = match &prepared.record {
            Some(record) => record.owner.clone(),
            None => resolve_owner(self.sessions.as_ref(), owner.as_deref()),
        };

        let mut params = AddTorrentParams::paused(
            prepared.engine_source,
            torrent_options.download_location.clone(),
        );
        params.resume_data = resume_data;
        params.renamed_files = torrent_options.mapped_files.clone();

        self.alerts_paused = true;
        let registered = self
            .register(
                params,
                NewTorrent {
                    id: id.clone(),
                    options: torrent_options,
                    owner,
                    filename: filename.clone(),
                    magnet: prepared.magnet,
                    metainfo: prepared.metainfo,
                    restored: prepared.record,
                },
            )
            .await;
        self.alerts_paused = false;
        registered?;

        if self.config.queue_new_to_top
            && !from_state
            && let Err(err) = self.engine.queue_top(&id).await
        {
            warn!(torrent_id = %id, error = %err, "could not move new torrent to the queue top");
        }

        let (add_paused, finished) = self
            .torrents
            .get(&id)
            .map_or((true, false), |torrent| {
                (torrent.options().add_paused, torrent.is_finished())
            });
        if !add_paused && let Some(torrent) = self.torrents.get_mut(&id) {
            torrent.resume().await;
            torrent.update_state().await;
        }
        if !finished {
            self.queued.insert(id.clone());
        }

        if !from_state {
            self.persist_descriptor(&id, prepared.descriptor, filename.as_deref())
                .await;
        }
        if save_state {
            self.save_state().await;
        }
        self.notifier.metrics.set_active_torrents(self.torrents.len());
        info!(torrent_id = %id, from_state, "torrent added");
        self.notifier.publish(Event::TorrentAdded {
            torrent_id: id.clone(),
            from_state,
        });
        Ok(id)
    }

    /// Remove a torrent, optionally deleting its payload.
    ///
    /// Returns `false` when the engine refuses to drop the handle.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] for unknown ids.
    pub async fn remove(&mut self, id: &InfoHash, purge_data: bool) -> OrchestratorResult<bool> {
        let filename = self.require(id)?.filename().to_string();
        self.notifier.publish(Event::PreTorrentRemoved {
            torrent_id: id.clone(),
        });

        if let Err(err) = self.engine.remove_torrent(id, purge_data).await {
            warn!(torrent_id = %id, error = %err, "engine refused to remove torrent");
            return Ok(false);
        }

        self.resume_batch.remove(id);
        if let Err(err) = self.store.remove_resume_entry(id).await {
            self.persistence_failed("resume", &err);
        }
        if let Err(err) = self.store.delete_descriptor(id).await {
            self.persistence_failed("descriptor", &err);
        }
        if self.config.del_copy_torrent_file {
            self.delete_user_copy(&filename).await;
        }

        self.queued.remove(id);
        self.shutdown_pause.remove(id);
        self.paused_for_shutdown.remove(id);
        if self
            .torrents
            .remove(id)
            .as_ref()
            .is_some_and(Torrent::is_waiting_on_resume_data)
        {
            self.pending_resume = self.pending_resume.saturating_sub(1);
            self.notifier
                .metrics
                .set_resume_data_pending(self.pending_resume);
        }
        self.notifier.metrics.set_active_torrents(self.torrents.len());
        self.save_state().await;
        info!(torrent_id = %id, purge_data, "torrent removed");
        self.notifier.publish(Event::TorrentRemoved {
            torrent_id: id.clone(),
        });
        Ok(true)
    }

    /// Ids visible to `caller`, in queue order with finished seeds last.
    pub async fn list(&self, caller: &Caller) -> Vec<InfoHash> {
        let mut visible = Vec::new();
        for (id, torrent) in &self.torrents {
            if caller.is_admin() || torrent.is_visible_to(&caller.user) {
                visible.push((queue_key(self.queue_position(id).await), id.clone()));
            }
        }
        visible.sort();
        visible.into_iter().map(|(_, id)| id).collect()
    }

    /// Every managed id.
    #[must_use]
    pub fn session_state(&self) -> Vec<InfoHash> {
        let mut ids: Vec<InfoHash> = self.torrents.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Status record of one torrent, diffed per `session` when given.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] for unknown ids.
    pub async fn get_status(
        &mut self,
        id: &InfoHash,
        keys: &[StatusKey],
        session: Option<Uuid>,
    ) -> OrchestratorResult<StatusMap> {
        let torrent = self.require_mut(id)?;
        Ok(torrent.get_status(keys, session).await)
    }

    /// Run a best-effort command against one torrent.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] for unknown ids; engine
    /// failures surface as `Ok(false)`.
    pub async fn perform(&mut self, id: &InfoHash, action: TorrentAction) -> OrchestratorResult<bool> {
        if action == TorrentAction::SaveResumeData {
            self.require(id)?;
            return Ok(self.save_resume_data(Some(slice::from_ref(id))).await == 1);
        }
        let torrent = self.require_mut(id)?;
        let done = match action {
            TorrentAction::Pause => torrent.pause().await,
            TorrentAction::Resume => torrent.resume().await,
            TorrentAction::ForceRecheck => torrent.force_recheck().await,
            TorrentAction::ForceReannounce => torrent.force_reannounce().await,
            TorrentAction::ScrapeTracker => torrent.scrape_tracker().await,
            TorrentAction::ConnectPeer(peer) => torrent.connect_peer(peer).await,
            TorrentAction::MoveStorage(destination) => torrent.move_storage(&destination).await,
            TorrentAction::RenameFiles(renames) => torrent.rename_files(&renames).await,
            TorrentAction::RenameFolder { from, to } => torrent.rename_folder(&from, &to).await,
            TorrentAction::SaveResumeData => false,
        };
        self.refresh_state(id).await;
        Ok(done)
    }

    /// Apply option overrides to one torrent.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] for unknown ids.
    pub async fn set_options(
        &mut self,
        id: &InfoHash,
        update: TorrentOptionsUpdate,
    ) -> OrchestratorResult<()> {
        let torrent = self.require_mut(id)?;
        let was_finished = torrent.is_finished();
        torrent.set_options(update).await;
        if was_finished && !torrent.is_finished() {
            self.queued.insert(id.clone());
        }
        Ok(())
    }

    /// Replace the tracker list of one torrent.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] for unknown ids.
    pub async fn set_trackers(
        &mut self,
        id: &InfoHash,
        trackers: Vec<TrackerEntry>,
    ) -> OrchestratorResult<()> {
        self.require_mut(id)?.set_trackers(Some(trackers)).await;
        Ok(())
    }

    /// Hand a torrent to another account.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidArgument`] when the account does
    /// not exist and [`OrchestratorError::NotFound`] for unknown ids.
    pub fn set_owner(&mut self, id: &InfoHash, owner: &str) -> OrchestratorResult<()> {
        if !self.sessions.has_account(owner) {
            return Err(OrchestratorError::invalid(
                "owner",
                "unknown_account",
                Some(owner.to_string()),
            ));
        }
        self.require_mut(id)?.set_owner(owner.to_string());
        Ok(())
    }

    /// Move a torrent within the engine queue.
    ///
    /// Returns `false` at the queue boundary or for torrents without a queue
    /// position.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] for unknown ids and
    /// [`OrchestratorError::EngineRejected`] when the engine refuses the move.
    pub async fn queue(&mut self, id: &InfoHash, direction: QueueDirection) -> OrchestratorResult<bool> {
        self.require(id)?;
        let Some(position) = self.queue_position(id).await else {
            return Ok(false);
        };
        let last = u32::try_from(self.queued.len().saturating_sub(1)).unwrap_or(u32::MAX);
        let at_boundary = match direction {
            QueueDirection::Top | QueueDirection::Up => position == 0,
            QueueDirection::Down | QueueDirection::Bottom => position >= last,
        };
        if at_boundary {
            return Ok(false);
        }
        let (operation, result) = match direction {
            QueueDirection::Top => ("queue_top", self.engine.queue_top(id).await),
            QueueDirection::Up => ("queue_up", self.engine.queue_up(id).await),
            QueueDirection::Down => ("queue_down", self.engine.queue_down(id).await),
            QueueDirection::Bottom => ("queue_bottom", self.engine.queue_bottom(id).await),
        };
        result.map_err(|err| OrchestratorError::engine(operation, Some(id), err))?;
        Ok(true)
    }

    /// Pause every torrent.
    pub async fn pause_all(&mut self) {
        for id in self.session_state() {
            if let Some(torrent) = self.torrents.get_mut(&id) {
                torrent.pause().await;
            }
        }
    }

    /// Resume every torrent.
    pub async fn resume_all(&mut self) {
        for id in self.session_state() {
            if let Some(torrent) = self.torrents.get_mut(&id) {
                torrent.resume().await;
            }
        }
    }

    /// Adopt a new configuration, pushing changed per-torrent limits to
    /// every torrent.
    pub async fn apply_config(&mut self, config: CoreConfig) {
        let previous = TorrentOptions::from_config(&self.config);
        let next = TorrentOptions::from_config(&config);
        let update = TorrentOptionsUpdate {
            max_connections: changed(previous.max_connections, next.max_connections),
            max_upload_slots: changed(previous.max_upload_slots, next.max_upload_slots),
            max_upload_speed: changed(previous.max_upload_speed, next.max_upload_speed),
            max_download_speed: changed(previous.max_download_speed, next.max_download_speed),
            ..TorrentOptionsUpdate::default()
        };
        if config.state_dir != self.config.state_dir {
            warn!(
                current = %self.config.state_dir.display(),
                requested = %config.state_dir.display(),
                "state directory changes apply after restart"
            );
        }
        self.config = CoreConfig {
            state_dir: self.config.state_dir.clone(),
            ..config
        };
        if update == TorrentOptionsUpdate::default() {
            return;
        }
        for id in self.session_state() {
            if let Some(torrent) = self.torrents.get_mut(&id) {
                torrent.set_options(update.clone()).await;
            }
        }
    }

    /// Pause or remove finished torrents that reached their stop ratio.
    ///
    /// Iterates a snapshot of ids; torrents removed meanwhile are skipped.
    pub async fn sweep(&mut self) {
        for id in self.session_state() {
            let Some(torrent) = self.torrents.get_mut(&id) else {
                continue;
            };
            let options = torrent.options();
            let (stop_ratio, remove) = (options.stop_ratio, options.remove_at_ratio);
            if !options.stop_at_ratio
                || !torrent.is_finished()
                || matches!(
                    torrent.state(),
                    TorrentState::Checking
                        | TorrentState::Allocating
                        | TorrentState::Paused
                        | TorrentState::Queued
                )
            {
                continue;
            }
            if torrent.ratio().await < stop_ratio {
                continue;
            }
            if remove {
                info!(torrent_id = %id, stop_ratio, "stop ratio reached; removing torrent");
                if let Err(err) = self.remove(&id, false).await {
                    warn!(torrent_id = %id, error = %err, "could not remove torrent at stop ratio");
                }
            } else {
                info!(torrent_id = %id, stop_ratio, "stop ratio reached; pausing torrent");
                torrent.pause().await;
                self.refresh_state(&id).await;
            }
        }
    }

    /// Write the registry snapshot in queue order.
    ///
    /// Failures are logged and mark persistence degraded; the next timer
    /// tick retries.
    pub async fn save_state(&mut self) -> bool {
        let mut records = Vec::with_capacity(self.torrents.len());
        for (id, torrent) in &self.torrents {
            let mut record = torrent.to_record().await;
            if self.paused_for_shutdown.contains(id) {
                record.paused = false;
            }
            records.push(record);
        }
        records.sort_by(|left, right| {
            (queue_key(left.queue), &left.torrent_id).cmp(&(queue_key(right.queue), &right.torrent_id))
        });
        match self.store.write_state(&records).await {
            Ok(()) => {
                self.mark_recovered(PERSISTENCE_COMPONENT);
                true
            }
            Err(err) => {
                self.persistence_failed("state", &err);
                false
            }
        }
    }

    /// Restore torrents from the registry snapshot in queue order.
    ///
    /// Records that cannot be re-added are logged and skipped.
    pub async fn load_state(&mut self) -> usize {
        let defaults = TorrentOptions::from_config(&self.config);
        let mut records = match self.store.read_state(&defaults).await {
            Ok(records) => records,
            Err(err) => {
                warn!(error = ?err, "registry snapshot unreadable; starting empty");
                Vec::new()
            }
        };
        records.sort_by(|left, right| {
            (queue_key(left.queue), &left.torrent_id).cmp(&(queue_key(right.queue), &right.torrent_id))
        });
        let mut resume = match self.store.read_resume_map().await {
            Ok(resume) => resume,
            Err(err) => {
                warn!(error = ?err, "recovery map unreadable; torrents will recheck");
                HashMap::new()
            }
        };

        let mut restored = 0;
        for record in records {
            let id = record.torrent_id.clone();
            let request = AddTorrentRequest {
                resume_data: resume.remove(&id),
                save_state: false,
                ..AddTorrentRequest::new(TorrentSource::SavedState(Box::new(record)))
            };
            match self.add(request).await {
                Ok(_) => restored += 1,
                Err(err) => warn!(torrent_id = %id, error = ?err, "could not restore torrent"),
            }
        }
        info!(restored, "registry restored");
        self.notifier.publish(Event::SessionStarted);
        restored
    }

    /// Request recovery data for `ids`, or every torrent when `None`.
    ///
    /// Returns the number of requests the engine accepted.
    pub async fn save_resume_data(&mut self, ids: Option<&[InfoHash]>) -> usize {
        let targets = ids.map_or_else(|| self.session_state(), <[InfoHash]>::to_vec);
        let mut requested = 0;
        for id in targets {
            if let Some(torrent) = self.torrents.get_mut(&id)
                && torrent.save_resume_data().await
            {
                requested += 1;
            }
        }
        self.pending_resume += requested;
        self.notifier
            .metrics
            .set_resume_data_pending(self.pending_resume);
        requested
    }

    /// Merge the batched recovery data into the on-disk map.
    ///
    /// Only runs once no request is outstanding; the batch is kept when the
    /// write fails.
    pub async fn flush_resume_data(&mut self) -> bool {
        if self.pending_resume > 0 || self.resume_batch.is_empty() {
            return false;
        }
        self.write_resume_batch().await
    }

    /// Drop status diff caches of sessions the transport no longer holds.
    pub fn cleanup_status_caches(&mut self) -> usize {
        let purged: usize = self
            .torrents
            .values_mut()
            .map(|torrent| torrent.purge_status_caches(self.sessions.as_ref()))
            .sum();
        if purged > 0 {
            debug!(purged, "purged stale status caches");
        }
        purged
    }

    /// Start periodic recovery-data requests from alert handlers.
    pub const fn start_timers(&mut self) {
        self.timers_running = true;
    }

    /// Pause every running torrent, wait for the engine to confirm pauses
    /// and recovery data, then write the final snapshot.
    pub async fn shutdown(&mut self, timeout: Duration, poll: Duration) {
        self.timers_running = false;
        for id in self.session_state() {
            let Some(torrent) = self.torrents.get(&id) else {
                continue;
            };
            let Some(status) = torrent.engine_status().await else {
                continue;
            };
            if status.paused {
                continue;
            }
            if let Err(err) = self.engine.set_auto_managed(&id, false).await {
                warn!(torrent_id = %id, error = %err, "could not disable auto management");
            }
            match self.engine.pause(&id).await {
                Ok(()) => {
                    self.paused_for_shutdown.insert(id.clone());
                    self.shutdown_pause.insert(id);
                }
                Err(err) => warn!(torrent_id = %id, error = %err, "could not pause torrent"),
            }
        }
        self.save_resume_data(None).await;

        let deadline = Instant::now() + timeout;
        loop {
            self.dispatch_alerts().await;
            let waiting = self
                .torrents
                .values()
                .any(Torrent::is_waiting_on_resume_data);
            if self.shutdown_pause.is_empty() && !waiting {
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    unpaused = self.shutdown_pause.len(),
                    pending_resume = self.pending_resume,
                    "shutdown timed out waiting for engine confirmations"
                );
                break;
            }
            tokio::time::sleep(poll).await;
        }

        if !self.resume_batch.is_empty() {
            self.write_resume_batch().await;
        }
        self.save_state().await;
        info!(torrents = self.torrents.len(), "orchestrator stopped");
    }

    /// Re-derive one torrent's state and announce a change.
    pub(crate) async fn refresh_state(&mut self, id: &InfoHash) {
        let Some(torrent) = self.torrents.get_mut(id) else {
            return;
        };
        let before = torrent.state();
        let after = torrent.update_state().await;
        if before != after {
            debug!(torrent_id = %id, from = before.as_str(), to = after.as_str(), "state changed");
            self.notifier.publish(Event::StateChanged {
                torrent_id: id.clone(),
                state: after,
            });
        }
    }

    pub(crate) fn persistence_failed(&mut self, artifact: &'static str, err: &OrchestratorError) {
        warn!(artifact, error = ?err, "persistence write failed");
        self.notifier.metrics.inc_persistence_failure(artifact);
        self.mark_degraded(PERSISTENCE_COMPONENT);
    }

    fn mark_degraded(&mut self, component: &str) {
        if self.health.insert(component.to_string()) {
            let degraded = self.health.iter().cloned().collect::<Vec<_>>();
            self.notifier.publish(Event::HealthChanged { degraded });
            warn!(component, "orchestrator component degraded");
        }
    }

    fn mark_recovered(&mut self, component: &str) {
        if self.health.remove(component) {
            let degraded = self.health.iter().cloned().collect::<Vec<_>>();
            self.notifier.publish(Event::HealthChanged { degraded });
            info!(component, "orchestrator component recovered");
        }
    }

    async fn write_resume_batch(&mut self) -> bool {
        match self.store.merge_resume_map(&self.resume_batch).await {
            Ok(()) => {
                debug!(entries = self.resume_batch.len(), "recovery data flushed");
                self.resume_batch.clear();
                self.mark_recovered(PERSISTENCE_COMPONENT);
                true
            }
            Err(err) => {
                self.persistence_failed("resume", &err);
                false
            }
        }
    }

    async fn prepare(&self, source: TorrentSource) -> OrchestratorResult<Prepared> {
        match source {
            TorrentSource::Metainfo(metainfo) => {
                let descriptor = (!metainfo.raw.is_empty()).then(|| metainfo.raw.clone());
                Ok(Prepared::from_metainfo(*metainfo, descriptor, None))
            }
            TorrentSource::MetainfoBytes(bytes) => {
                if bytes.is_empty() {
                    return Err(OrchestratorError::invalid("metainfo", "empty", None));
                }
                let metainfo = self.parse_metainfo(&bytes).await?;
                Ok(Prepared::from_metainfo(metainfo, Some(bytes), None))
            }
            TorrentSource::Magnet(uri) => {
                let magnet = MagnetLink::parse(&uri).map_err(|_| {
                    OrchestratorError::invalid("magnet", "missing_btih", Some(uri.clone()))
                })?;
                Ok(Prepared::from_magnet(magnet, None))
            }
            TorrentSource::SavedState(record) => {
                let descriptor = self.store.read_descriptor(&record.torrent_id).await?;
                if let Some(bytes) = descriptor {
                    let metainfo = self.parse_metainfo(&bytes).await?;
                    return Ok(Prepared::from_metainfo(metainfo, None, Some(*record)));
                }
                let Some(uri) = record.magnet.clone() else {
                    return Err(OrchestratorError::invalid(
                        "state",
                        "no_descriptor_or_magnet",
                        Some(record.torrent_id.to_string()),
                    ));
                };
                let magnet = MagnetLink::parse(&uri).map_err(|_| {
                    OrchestratorError::invalid("magnet", "missing_btih", Some(uri.clone()))
                })?;
                Ok(Prepared::from_magnet(magnet, Some(*record)))
            }
        }
    }

    async fn parse_metainfo(&self, bytes: &[u8]) -> OrchestratorResult<TorrentMetainfo> {
        self.engine.load_metainfo(bytes).await.map_err(|err| {
            debug!(error = %err, "descriptor rejected by engine");
            OrchestratorError::invalid("metainfo", "malformed", None)
        })
    }

    async fn register(&mut self, params: AddTorrentParams, seed: NewTorrent) -> OrchestratorResult<()> {
        let expected = seed.id.clone();
        let id = self
            .engine
            .add_torrent(params)
            .await
            .map_err(|err| OrchestratorError::engine("add_torrent", Some(&expected), err))?;
        if id != expected {
            warn!(expected = %expected, actual = %id, "engine reported a different info hash");
        }
        let torrent = Torrent::new(Arc::clone(&self.engine), NewTorrent { id: id.clone(), ..seed }).await;
        self.torrents.insert(id, torrent);
        Ok(())
    }

    async fn persist_descriptor(&mut self, id: &InfoHash, descriptor: Option<Vec<u8>>, filename: Option<&str>) {
        let bytes = match descriptor {
            Some(bytes) => bytes,
            None => match self.engine.export_metainfo(id).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    debug!(torrent_id = %id, error = %err, "descriptor not available yet");
                    return;
                }
            },
        };
        if let Err(err) = self.store.write_descriptor(id, &bytes).await {
            self.persistence_failed("descriptor", &err);
        }
        if !self.config.copy_torrent_file {
            return;
        }
        let (Some(location), Some(filename)) = (self.config.torrentfiles_location.clone(), filename)
        else {
            return;
        };
        if let Err(err) = tokio::fs::create_dir_all(&location).await {
            self.persistence_failed("descriptor_copy", &OrchestratorError::io("create_copy_dir", &location, err));
            return;
        }
        let path = location.join(filename);
        if let Err(err) = write_atomic(&path, &bytes).await {
            self.persistence_failed("descriptor_copy", &OrchestratorError::io("copy_descriptor", path, err));
        }
    }

    async fn delete_user_copy(&mut self, filename: &str) {
        let Some(location) = self.config.torrentfiles_location.clone() else {
            return;
        };
        if filename.is_empty() {
            return;
        }
        let path = location.join(filename);
        if let Err(err) = remove_optional(&path).await {
            self.persistence_failed("descriptor_copy", &OrchestratorError::io("delete_copy", path, err));
        }
    }

    async fn queue_position(&self, id: &InfoHash) -> Option<u32> {
        match self.engine.queue_position(id).await {
            Ok(position) => position,
            Err(err) => {
                warn!(torrent_id = %id, error = %err, "queue position unavailable");
                None
            }
        }
    }

    fn require(&self, id: &InfoHash) -> OrchestratorResult<&Torrent> {
        self.torrents
            .get(id)
            .ok_or_else(|| OrchestratorError::NotFound {
                torrent_id: id.clone(),
            })
    }

    fn require_mut(&mut self, id: &InfoHash) -> OrchestratorResult<&mut Torrent> {
        self.torrents
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound {
                torrent_id: id.clone(),
            })
    }
}

impl Prepared {
    fn from_metainfo(
        metainfo: TorrentMetainfo,
        descriptor: Option<Vec<u8>>,
        record: Option<TorrentRecord>,
    ) -> Self {
        Self {
            id: metainfo.info_hash.clone(),
            trackers: metainfo.trackers.clone(),
            engine_source: EngineSource::Metainfo {
                metainfo: Box::new(metainfo.clone()),
            },
            metainfo: Some(metainfo),
            magnet: None,
            descriptor,
            record,
        }
    }

    fn from_magnet(magnet: MagnetLink, record: Option<TorrentRecord>) -> Self {
        Self {
            id: magnet.info_hash,
            trackers: magnet.trackers,
            engine_source: EngineSource::Magnet {
                uri: magnet.uri.clone(),
            },
            metainfo: None,
            magnet: Some(magnet.uri),
            descriptor: None,
            record,
        }
    }
}

/// Sort key placing torrents without a queue position last.
const fn queue_key(position: Option<u32>) -> (bool, u32) {
    match position {
        Some(position) => (false, position),
        None => (true, 0),
    }
}

fn changed<T: PartialEq>(previous: T, next: T) -> Option<T> {
    (previous != next).then_some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use seedkeep_events::EventEnvelope;
    use seedkeep_test_support::{
        LoopbackEngine, info_hash, magnet_uri, metainfo_bytes, sample_metainfo,
    };
    use seedkeep_torrent_core::{Alert, EnginePhase};
    use tempfile::TempDir;
    use tokio_stream::StreamExt;

    use crate::session::{AuthLevel, DEFAULT_OWNER, LocalSessions};

    struct Harness {
        engine: Arc<LoopbackEngine>,
        events: EventBus,
        manager: TorrentManager,
        _dir: TempDir,
    }

    fn harness_with(configure: impl FnOnce(&mut CoreConfig)) -> Result<Harness> {
        let dir = tempfile::tempdir()?;
        let mut config = CoreConfig::default();
        config.state_dir = dir.path().join("state");
        config.download_location = dir.path().join("downloads");
        configure(&mut config);
        let engine = Arc::new(LoopbackEngine::new());
        let events = EventBus::new();
        let shared: Arc<dyn TorrentEngine> = engine.clone();
        let manager = TorrentManager::new(
            shared,
            events.clone(),
            Metrics::new()?,
            Arc::new(LocalSessions),
            config,
        );
        Ok(Harness {
            engine,
            events,
            manager,
            _dir: dir,
        })
    }

    fn harness() -> Result<Harness> {
        harness_with(|_| {})
    }

    fn bytes_request(seed: u8, name: &str) -> AddTorrentRequest {
        let files = [(format!("{name}/a.bin"), 10), (format!("{name}/b.bin"), 20)];
        let files: Vec<(&str, u64)> = files.iter().map(|(path, size)| (path.as_str(), *size)).collect();
        AddTorrentRequest::new(TorrentSource::MetainfoBytes(metainfo_bytes(&sample_metainfo(
            seed, name, &files,
        ))))
    }

    fn paused_request(seed: u8, name: &str) -> AddTorrentRequest {
        AddTorrentRequest {
            options: Some(TorrentOptionsUpdate {
                add_paused: Some(true),
                ..TorrentOptionsUpdate::default()
            }),
            ..bytes_request(seed, name)
        }
    }

    async fn drain(events: &mut seedkeep_events::EventStream) -> Vec<Event> {
        let mut seen = Vec::new();
        while let Ok(Some(Ok(EventEnvelope { event, .. }))) =
            tokio::time::timeout(Duration::from_millis(20), events.next()).await
        {
            seen.push(event);
        }
        seen
    }

    fn count_state_changes(events: &[Event]) -> usize {
        events
            .iter()
            .filter(|event| matches!(event, Event::StateChanged { .. }))
            .count()
    }

    #[tokio::test]
    async fn add_registers_and_persists_descriptor() -> Result<()> {
        let mut harness = harness()?;
        let mut stream = harness.events.subscribe();
        let id = harness.manager.add(bytes_request(1, "alpha")).await?;

        assert!(harness.manager.contains(&id));
        assert!(harness.manager.queued.contains(&id));
        assert!(harness.engine.contains(&id));
        assert!(harness.manager.store.descriptor_path(&id).exists());
        assert!(harness.manager.store.state_path().exists());
        let torrent = harness.manager.torrent(&id).expect("registered");
        assert_eq!(torrent.owner(), DEFAULT_OWNER);
        assert!(!harness.engine.status_of(&id).expect("status").paused);

        let events = drain(&mut stream).await;
        assert!(events.contains(&Event::TorrentAdded {
            torrent_id: id,
            from_state: false
        }));
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_add_merges_trackers_without_growing() -> Result<()> {
        let mut harness = harness()?;
        let id = harness.manager.add(bytes_request(1, "alpha")).await?;
        let mut stream = harness.events.subscribe();
        let uri = format!(
            "{}&tr=http%3A%2F%2Fextra.example.net%2Fannounce",
            magnet_uri(&id, "alpha")
        );
        let again = harness
            .manager
            .add(AddTorrentRequest::new(TorrentSource::Magnet(uri)))
            .await?;

        assert_eq!(again, id);
        assert_eq!(harness.manager.len(), 1);
        let trackers = harness.manager.torrent(&id).expect("registered").trackers();
        assert_eq!(trackers.len(), 2);
        let events = drain(&mut stream).await;
        assert!(
            !events
                .iter()
                .any(|event| matches!(event, Event::TorrentAdded { .. }))
        );
        Ok(())
    }

    #[tokio::test]
    async fn malformed_sources_are_invalid_arguments() -> Result<()> {
        let mut harness = harness()?;
        for source in [
            TorrentSource::MetainfoBytes(Vec::new()),
            TorrentSource::MetainfoBytes(b"not json".to_vec()),
            TorrentSource::Magnet("magnet:?dn=nothing".into()),
        ] {
            let err = harness
                .manager
                .add(AddTorrentRequest::new(source))
                .await
                .expect_err("malformed source");
            assert!(matches!(err, OrchestratorError::InvalidArgument { .. }));
        }
        assert!(harness.manager.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn remove_unknown_is_not_found() -> Result<()> {
        let mut harness = harness()?;
        harness.manager.add(bytes_request(1, "alpha")).await?;
        let err = harness
            .manager
            .remove(&info_hash(9), false)
            .await
            .expect_err("unknown id");
        assert!(matches!(err, OrchestratorError::NotFound { .. }));
        assert_eq!(harness.manager.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn remove_deletes_artifacts_and_announces() -> Result<()> {
        let mut harness = harness()?;
        let id = harness.manager.add(bytes_request(1, "alpha")).await?;
        let mut stream = harness.events.subscribe();
        assert!(harness.manager.remove(&id, false).await?);

        assert!(!harness.manager.contains(&id));
        assert!(!harness.engine.contains(&id));
        assert!(!harness.manager.store.descriptor_path(&id).exists());
        let events = drain(&mut stream).await;
        let kinds: Vec<&str> = events.iter().map(Event::kind).collect();
        assert_eq!(kinds.first(), Some(&"pre_torrent_removed"));
        assert!(kinds.contains(&"torrent_removed"));
        Ok(())
    }

    #[tokio::test]
    async fn engine_refusal_keeps_torrent() -> Result<()> {
        let mut harness = harness()?;
        let id = harness.manager.add(bytes_request(1, "alpha")).await?;
        harness.engine.fail_operation("remove_torrent");
        assert!(!harness.manager.remove(&id, true).await?);
        assert!(harness.manager.contains(&id));
        Ok(())
    }

    #[tokio::test]
    async fn sweep_removes_seed_past_stop_ratio() -> Result<()> {
        let mut harness = harness()?;
        let request = AddTorrentRequest {
            options: Some(TorrentOptionsUpdate {
                stop_at_ratio: Some(true),
                stop_ratio: Some(1.0),
                remove_at_ratio: Some(true),
                ..TorrentOptionsUpdate::default()
            }),
            ..bytes_request(1, "alpha")
        };
        let id = harness.manager.add(request).await?;
        harness.engine.update_status(&id, |status| {
            status.phase = EnginePhase::Seeding;
            status.is_finished = true;
            status.is_seed = true;
            status.total_done = 100;
            status.total_payload_download = 100;
            status.all_time_upload = 150;
        })?;
        harness.engine.push_alert(Alert::Finished {
            torrent_id: id.clone(),
        });
        harness.manager.dispatch_alerts().await;
        let torrent = harness.manager.torrent(&id).expect("registered");
        assert!(torrent.is_finished());
        assert_eq!(torrent.state(), TorrentState::Seeding);

        harness.manager.sweep().await;
        assert!(!harness.manager.contains(&id));
        assert!(!harness.engine.contains(&id));
        Ok(())
    }

    #[tokio::test]
    async fn sweep_pause_announces_state_without_waiting_for_alert() -> Result<()> {
        let mut harness = harness()?;
        let request = AddTorrentRequest {
            options: Some(TorrentOptionsUpdate {
                stop_at_ratio: Some(true),
                stop_ratio: Some(1.0),
                ..TorrentOptionsUpdate::default()
            }),
            ..bytes_request(1, "alpha")
        };
        let id = harness.manager.add(request).await?;
        harness.engine.update_status(&id, |status| {
            status.phase = EnginePhase::Seeding;
            status.is_finished = true;
            status.is_seed = true;
            status.total_done = 100;
            status.total_payload_download = 100;
            status.all_time_upload = 150;
        })?;
        harness.engine.push_alert(Alert::Finished {
            torrent_id: id.clone(),
        });
        harness.manager.dispatch_alerts().await;
        let mut stream = harness.events.subscribe();

        harness.manager.sweep().await;
        assert!(harness.manager.contains(&id));
        assert!(harness.engine.status_of(&id).expect("status").paused);
        assert_eq!(
            harness.manager.torrent(&id).expect("registered").state(),
            TorrentState::Paused
        );
        let events = drain(&mut stream).await;
        assert!(events.contains(&Event::StateChanged {
            torrent_id: id,
            state: TorrentState::Paused
        }));
        Ok(())
    }

    #[tokio::test]
    async fn removing_torrent_with_outstanding_recovery_data_keeps_flushing() -> Result<()> {
        let mut harness = harness()?;
        let gone = harness.manager.add(bytes_request(1, "alpha")).await?;
        assert_eq!(
            harness.manager.save_resume_data(Some(slice::from_ref(&gone))).await,
            1
        );
        assert!(harness.manager.remove(&gone, false).await?);
        assert_eq!(harness.manager.pending_resume_data(), 0);
        harness.manager.dispatch_alerts().await;

        let kept = harness.manager.add(bytes_request(2, "beta")).await?;
        assert_eq!(
            harness.manager.save_resume_data(Some(slice::from_ref(&kept))).await,
            1
        );
        harness.manager.dispatch_alerts().await;

        assert_eq!(harness.manager.pending_resume_data(), 0);
        assert!(harness.manager.resume_batch.is_empty());
        let resume = harness.manager.store.read_resume_map().await?;
        assert!(resume.contains_key(&kept));
        assert!(!resume.contains_key(&gone));
        Ok(())
    }

    #[tokio::test]
    async fn paused_add_then_resume_emits_single_state_change() -> Result<()> {
        let mut harness = harness()?;
        let id = harness.manager.add(paused_request(1, "alpha")).await?;
        assert_eq!(
            harness.manager.torrent(&id).expect("registered").state(),
            TorrentState::Paused
        );

        let mut stream = harness.events.subscribe();
        assert!(harness.manager.perform(&id, TorrentAction::Resume).await?);
        harness.manager.dispatch_alerts().await;
        let events = drain(&mut stream).await;
        assert_eq!(count_state_changes(&events), 1);
        assert!(events.contains(&Event::StateChanged {
            torrent_id: id.clone(),
            state: TorrentState::Downloading
        }));
        assert!(events.contains(&Event::TorrentResumed { torrent_id: id }));
        Ok(())
    }

    #[tokio::test]
    async fn throttled_resume_reports_queued_once() -> Result<()> {
        let mut harness = harness()?;
        let id = harness.manager.add(paused_request(1, "alpha")).await?;
        harness.engine.set_queue_throttled(true);

        let mut stream = harness.events.subscribe();
        assert!(harness.manager.perform(&id, TorrentAction::Resume).await?);
        harness.manager.dispatch_alerts().await;
        let events = drain(&mut stream).await;
        assert_eq!(count_state_changes(&events), 1);
        assert!(events.contains(&Event::StateChanged {
            torrent_id: id.clone(),
            state: TorrentState::Queued
        }));
        assert_eq!(
            harness.manager.torrent(&id).expect("registered").state(),
            TorrentState::Queued
        );
        Ok(())
    }

    #[tokio::test]
    async fn shutdown_collects_recovery_data_for_every_torrent() -> Result<()> {
        let mut harness = harness()?;
        let mut ids = Vec::new();
        for (seed, name) in [(1, "alpha"), (2, "beta"), (3, "gamma")] {
            ids.push(harness.manager.add(bytes_request(seed, name)).await?);
        }
        harness.manager.start_timers();
        harness
            .manager
            .shutdown(Duration::from_secs(2), Duration::from_millis(5))
            .await;

        assert!(harness.manager.shutdown_pause.is_empty());
        assert!(
            !harness
                .manager
                .torrents
                .values()
                .any(Torrent::is_waiting_on_resume_data)
        );
        assert_eq!(harness.manager.pending_resume_data(), 0);
        let resume = harness.manager.store.read_resume_map().await?;
        for id in &ids {
            assert!(resume.contains_key(id), "missing recovery data for {id}");
            assert!(harness.engine.status_of(id).expect("status").paused);
        }
        Ok(())
    }

    #[tokio::test]
    async fn state_round_trips_through_restart() -> Result<()> {
        let mut harness = harness()?;
        let first = harness.manager.add(bytes_request(1, "alpha")).await?;
        let second = harness.manager.add(paused_request(2, "beta")).await?;
        let magnet = harness
            .manager
            .add(AddTorrentRequest::new(TorrentSource::Magnet(magnet_uri(
                &info_hash(3),
                "gamma",
            ))))
            .await?;
        harness.manager.start_timers();
        harness
            .manager
            .shutdown(Duration::from_secs(2), Duration::from_millis(5))
            .await;
        assert!(harness.engine.status_of(&first).expect("status").paused);

        let defaults = TorrentOptions::from_config(&harness.manager.config);
        let records = harness.manager.store.read_state(&defaults).await?;
        let paused: HashMap<InfoHash, bool> = records
            .into_iter()
            .map(|record| (record.torrent_id, record.paused))
            .collect();
        assert_eq!(paused.get(&first), Some(&false));
        assert_eq!(paused.get(&second), Some(&true));

        let config = harness.manager.config.clone();
        let engine = Arc::new(LoopbackEngine::new());
        let shared: Arc<dyn TorrentEngine> = engine.clone();
        let events = EventBus::new();
        let mut stream = events.subscribe();
        let mut restarted =
            TorrentManager::new(shared, events, Metrics::new()?, Arc::new(LocalSessions), config);
        assert_eq!(restarted.load_state().await, 3);

        assert_eq!(restarted.session_state().len(), 3);
        assert!(engine.status_of(&second).expect("status").paused);
        assert!(!engine.status_of(&first).expect("status").paused);
        assert_ne!(
            restarted.torrent(&first).expect("restored").state(),
            TorrentState::Paused
        );
        assert_eq!(
            restarted.torrent(&magnet).expect("restored").name(),
            "gamma"
        );
        let events = drain(&mut stream).await;
        assert!(events.contains(&Event::SessionStarted));
        assert!(events.contains(&Event::TorrentAdded {
            torrent_id: first,
            from_state: true
        }));
        Ok(())
    }

    #[tokio::test]
    async fn list_filters_by_owner_and_orders_by_queue() -> Result<()> {
        let mut harness = harness()?;
        let first = harness.manager.add(bytes_request(1, "alpha")).await?;
        let second = harness.manager.add(bytes_request(2, "beta")).await?;
        let shared = harness
            .manager
            .add(AddTorrentRequest {
                options: Some(TorrentOptionsUpdate {
                    shared: Some(true),
                    ..TorrentOptionsUpdate::default()
                }),
                ..bytes_request(3, "gamma")
            })
            .await?;

        assert!(harness.manager.queue(&second, QueueDirection::Top).await?);
        let admin = Caller::local_admin();
        assert_eq!(
            harness.manager.list(&admin).await,
            vec![second, first, shared.clone()]
        );

        let stranger = Caller::new(Uuid::new_v4(), "bob", AuthLevel::Normal);
        assert_eq!(harness.manager.list(&stranger).await, vec![shared]);
        Ok(())
    }

    #[tokio::test]
    async fn queue_moves_stop_at_boundaries() -> Result<()> {
        let mut harness = harness()?;
        let first = harness.manager.add(bytes_request(1, "alpha")).await?;
        let second = harness.manager.add(bytes_request(2, "beta")).await?;
        assert!(!harness.manager.queue(&first, QueueDirection::Up).await?);
        assert!(!harness.manager.queue(&second, QueueDirection::Bottom).await?);
        assert!(harness.manager.queue(&first, QueueDirection::Down).await?);
        assert!(!harness.manager.queue(&first, QueueDirection::Down).await?);
        assert!(matches!(
            harness.manager.queue(&info_hash(7), QueueDirection::Top).await,
            Err(OrchestratorError::NotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn persistence_failure_degrades_health_until_next_write() -> Result<()> {
        let mut harness = harness()?;
        let blocker = harness.manager.store.dir().to_path_buf();
        std::fs::create_dir_all(blocker.parent().expect("parent"))?;
        std::fs::write(&blocker, b"not a directory")?;
        let mut stream = harness.events.subscribe();

        assert!(!harness.manager.save_state().await);
        assert_eq!(harness.manager.degraded(), vec![PERSISTENCE_COMPONENT.to_string()]);
        assert!(!harness.manager.save_state().await);

        std::fs::remove_file(&blocker)?;
        assert!(harness.manager.save_state().await);
        assert!(harness.manager.degraded().is_empty());
        let health: Vec<Event> = drain(&mut stream).await
            .into_iter()
            .filter(|event| matches!(event, Event::HealthChanged { .. }))
            .collect();
        assert_eq!(
            health,
            vec![
                Event::HealthChanged {
                    degraded: vec![PERSISTENCE_COMPONENT.to_string()]
                },
                Event::HealthChanged { degraded: vec![] },
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn apply_config_pushes_changed_limits() -> Result<()> {
        let mut harness = harness()?;
        let id = harness.manager.add(bytes_request(1, "alpha")).await?;
        let mut config = harness.manager.config.clone();
        config.torrent_defaults.max_connections_per_torrent = 25;
        config.torrent_defaults.max_upload_speed_per_torrent = 10.0;
        harness.manager.apply_config(config).await;

        assert_eq!(harness.engine.limit(&id, "set_max_connections"), Some(25));
        assert_eq!(harness.engine.limit(&id, "set_upload_limit"), Some(10_240));
        let options = harness.manager.torrent(&id).expect("registered").options();
        assert_eq!(options.max_connections, 25);
        Ok(())
    }

    #[tokio::test]
    async fn copied_descriptor_follows_torrent_lifecycle() -> Result<()> {
        let copies = tempfile::tempdir()?;
        let location = copies.path().to_path_buf();
        let mut harness = harness_with(|config| {
            config.copy_torrent_file = true;
            config.del_copy_torrent_file = true;
            config.torrentfiles_location = Some(location);
        })?;
        let id = harness
            .manager
            .add(AddTorrentRequest {
                filename: Some("alpha.torrent".into()),
                ..bytes_request(1, "alpha")
            })
            .await?;
        let copy = copies.path().join("alpha.torrent");
        assert!(copy.exists());

        assert!(harness.manager.remove(&id, false).await?);
        assert!(!copy.exists());
        Ok(())
    }
}
