//! Engine alert dispatch.
//!
//! Alerts are drained in engine order and handled one at a time on the
//! service task, so handlers see a consistent registry.

use std::fs;
use std::path::{Path, PathBuf};

use seedkeep_events::{Event, InfoHash, TorrentState};
use seedkeep_torrent_core::Alert;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::manager::TorrentManager;
use crate::torrent::RenameProgress;

const DHT_REPLY: &str = "Got peers from DHT";

impl TorrentManager {
    /// Drain pending engine alerts and apply them.
    ///
    /// Alerts for ids that are no longer managed are dropped. Returns the
    /// number of alerts handled.
    pub async fn dispatch_alerts(&mut self) -> usize {
        if self.alerts_paused {
            return 0;
        }
        let alerts = match self.engine.poll_alerts().await {
            Ok(alerts) => alerts,
            Err(err) => {
                warn!(error = %err, "alert poll failed");
                return 0;
            }
        };
        let mut handled = 0;
        for alert in alerts {
            if !self.torrents.contains_key(alert.torrent_id()) {
                debug!(torrent_id = %alert.torrent_id(), kind = alert.kind(), "alert for unmanaged torrent dropped");
                self.notifier.metrics.inc_alert_dropped();
                continue;
            }
            self.notifier.metrics.inc_alert(alert.kind());
            self.handle_alert(alert).await;
            handled += 1;
        }
        handled
    }

    async fn handle_alert(&mut self, alert: Alert) {
        match alert {
            Alert::Finished { torrent_id } => self.on_finished(&torrent_id).await,
            Alert::Paused { torrent_id } => {
                self.refresh_state(&torrent_id).await;
                if self.timers_running {
                    self.save_resume_data(Some(&[torrent_id.clone()])).await;
                }
                self.shutdown_pause.remove(&torrent_id);
            }
            Alert::Resumed { torrent_id } => {
                self.refresh_state(&torrent_id).await;
                self.notifier.publish(Event::TorrentResumed { torrent_id });
            }
            Alert::Checked { torrent_id } => {
                let repause = self
                    .torrents
                    .get_mut(&torrent_id)
                    .and_then(crate::torrent::Torrent::take_forced_recheck)
                    == Some(true);
                if repause && let Some(torrent) = self.torrents.get_mut(&torrent_id) {
                    torrent.pause().await;
                }
                self.refresh_state(&torrent_id).await;
            }
            Alert::StateChanged { torrent_id, .. } => {
                self.refresh_state(&torrent_id).await;
                let active = self.torrents.get_mut(&torrent_id).is_some_and(|torrent| {
                    let active = matches!(
                        torrent.state(),
                        TorrentState::Checking | TorrentState::Downloading
                    );
                    if active {
                        torrent.set_finished(false);
                    }
                    active
                });
                if active {
                    self.queued.insert(torrent_id);
                }
            }
            Alert::FileError {
                torrent_id,
                file,
                message,
            } => {
                warn!(torrent_id = %torrent_id, file = %file, message = %message, "engine reported a file error");
                self.refresh_state(&torrent_id).await;
            }
            Alert::TrackerReply {
                torrent_id,
                message,
                ..
            } => self.on_tracker_reply(&torrent_id, &message).await,
            Alert::TrackerAnnounce { torrent_id, .. } => {
                self.set_tracker_status(&torrent_id, "Announce Sent").await;
            }
            Alert::TrackerWarning {
                torrent_id,
                message,
                ..
            } => {
                self.set_tracker_status(&torrent_id, &format!("Warning: {message}"))
                    .await;
            }
            Alert::TrackerError {
                torrent_id,
                message,
                ..
            } => {
                self.set_tracker_status(&torrent_id, &format!("Error: {message}"))
                    .await;
            }
            Alert::StorageMoved { torrent_id, path } => {
                if let Some(torrent) = self.torrents.get_mut(&torrent_id) {
                    debug!(torrent_id = %torrent_id, path = %path.display(), "storage moved");
                    torrent.set_download_location(path);
                    torrent.set_move_completed(false);
                }
            }
            Alert::ResumeDataSaved { torrent_id, data } => {
                self.on_resume_data(&torrent_id, Some(data)).await;
            }
            Alert::ResumeDataFailed {
                torrent_id,
                message,
            } => {
                warn!(torrent_id = %torrent_id, message = %message, "engine could not produce recovery data");
                self.on_resume_data(&torrent_id, None).await;
            }
            Alert::FileRenamed {
                torrent_id,
                index,
                name,
            } => self.on_file_renamed(torrent_id, index, &name).await,
            Alert::MetadataReceived { torrent_id } => self.on_metadata_received(&torrent_id).await,
            Alert::FileCompleted { torrent_id, index } => {
                self.notifier
                    .publish(Event::FileCompleted { torrent_id, index });
            }
        }
    }

    async fn on_finished(&mut self, id: &InfoHash) {
        let Some(torrent) = self.torrents.get_mut(id) else {
            return;
        };
        let payload = torrent
            .engine_status()
            .await
            .map_or(0, |status| status.total_payload_download);
        if !torrent.is_finished() && payload > 0 {
            let options = torrent.options();
            if options.move_completed && options.move_completed_path != options.download_location {
                let destination = options.move_completed_path.clone();
                torrent.move_storage(&destination).await;
            }
            self.notifier.publish(Event::TorrentFinished {
                torrent_id: id.clone(),
            });
        }
        if let Some(torrent) = self.torrents.get_mut(id) {
            torrent.set_finished(true);
        }
        self.refresh_state(id).await;
        self.queued.remove(id);
        if payload > 0 {
            self.save_resume_data(Some(std::slice::from_ref(id))).await;
        }
    }

    async fn on_tracker_reply(&mut self, id: &InfoHash, message: &str) {
        if message != DHT_REPLY {
            self.set_tracker_status(id, "Announce OK").await;
        }
        let Some(torrent) = self.torrents.get(id) else {
            return;
        };
        let unknown_counts = torrent
            .engine_status()
            .await
            .is_some_and(|status| status.num_complete == -1 || status.num_incomplete == -1);
        if unknown_counts {
            torrent.scrape_tracker().await;
        }
    }

    async fn set_tracker_status(&mut self, id: &InfoHash, status: &str) {
        if let Some(torrent) = self.torrents.get_mut(id) {
            torrent.set_tracker_status(status).await;
        }
    }

    async fn on_resume_data(&mut self, id: &InfoHash, data: Option<Vec<u8>>) {
        self.pending_resume = self.pending_resume.saturating_sub(1);
        self.notifier
            .metrics
            .set_resume_data_pending(self.pending_resume);
        if let Some(data) = data {
            self.resume_batch.insert(id.clone(), data);
        }
        if let Some(torrent) = self.torrents.get_mut(id) {
            torrent.clear_resume_wait();
        }
        self.flush_resume_data().await;
    }

    async fn on_file_renamed(&mut self, id: InfoHash, index: u32, name: &str) {
        let Some(torrent) = self.torrents.get_mut(&id) else {
            return;
        };
        let download_location = torrent.options().download_location.clone();
        match torrent.complete_file_rename(index, name) {
            RenameProgress::File => {
                self.notifier.publish(Event::FileRenamed {
                    torrent_id: id,
                    index,
                    name: name.to_string(),
                });
            }
            RenameProgress::FolderPending => {}
            RenameProgress::FolderDone(rename) => {
                let old_root = download_location.join(rename.old_folder.trim_end_matches('/'));
                self.notifier.publish(Event::FolderRenamed {
                    torrent_id: id.clone(),
                    old_folder: rename.old_folder,
                    new_folder: rename.new_folder,
                });
                prune_empty_dirs(old_root).await;
                self.save_resume_data(Some(&[id])).await;
            }
        }
    }

    async fn on_metadata_received(&mut self, id: &InfoHash) {
        let Some(torrent) = self.torrents.get_mut(id) else {
            return;
        };
        torrent.refresh_metadata().await;
        match self.engine.export_metainfo(id).await {
            Ok(bytes) => {
                if let Err(err) = self.store.write_descriptor(id, &bytes).await {
                    self.persistence_failed("descriptor", &err);
                }
            }
            Err(err) => warn!(torrent_id = %id, error = %err, "descriptor export failed"),
        }
        if let Some(torrent) = self.torrents.get_mut(id) {
            torrent.set_file_priorities(Vec::new()).await;
        }
    }
}

/// Remove every empty directory under `root`, deepest first, `root` included.
async fn prune_empty_dirs(root: PathBuf) {
    let result = tokio::task::spawn_blocking(move || remove_empty_dirs(&root)).await;
    if let Err(err) = result {
        warn!(error = %err, "empty directory cleanup task failed");
    }
}

fn remove_empty_dirs(root: &Path) {
    let mut directories: Vec<_> = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
        .collect();
    directories.sort_by_key(walkdir::DirEntry::depth);
    directories.reverse();
    for entry in directories {
        let is_empty = fs::read_dir(entry.path())
            .map(|mut contents| contents.next().is_none())
            .unwrap_or(false);
        if is_empty && let Err(err) = fs::remove_dir(entry.path()) {
            debug!(path = %entry.path().display(), error = %err, "could not remove empty directory");
        }
    }
}
