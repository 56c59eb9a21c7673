//! Single-owner service task wrapping the [`TorrentManager`].
//!
//! Callers hold a cloneable [`OrchestratorHandle`]; every request travels
//! over a bounded channel with a oneshot reply, and the task interleaves
//! requests with alert polling and periodic timers.

use std::time::Duration;

use seedkeep_config::{CoreConfig, TimerConfig};
use seedkeep_events::InfoHash;
use seedkeep_torrent_core::TrackerEntry;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::manager::{AddTorrentRequest, QueueDirection, TorrentAction, TorrentManager};
use crate::options::TorrentOptionsUpdate;
use crate::session::Caller;
use crate::torrent::{StatusKey, StatusMap};

const COMMAND_BUFFER: usize = 128;

#[derive(Debug)]
pub(crate) enum ManagerCommand {
    Add {
        request: Box<AddTorrentRequest>,
        respond_to: oneshot::Sender<OrchestratorResult<InfoHash>>,
    },
    Remove {
        id: InfoHash,
        purge_data: bool,
        respond_to: oneshot::Sender<OrchestratorResult<bool>>,
    },
    Perform {
        id: InfoHash,
        action: TorrentAction,
        respond_to: oneshot::Sender<OrchestratorResult<bool>>,
    },
    PauseAll {
        respond_to: oneshot::Sender<()>,
    },
    ResumeAll {
        respond_to: oneshot::Sender<()>,
    },
    Status {
        id: InfoHash,
        keys: Vec<StatusKey>,
        session: Option<Uuid>,
        respond_to: oneshot::Sender<OrchestratorResult<StatusMap>>,
    },
    List {
        caller: Caller,
        respond_to: oneshot::Sender<Vec<InfoHash>>,
    },
    SessionState {
        respond_to: oneshot::Sender<Vec<InfoHash>>,
    },
    Queue {
        id: InfoHash,
        direction: QueueDirection,
        respond_to: oneshot::Sender<OrchestratorResult<bool>>,
    },
    SetOptions {
        id: InfoHash,
        update: Box<TorrentOptionsUpdate>,
        respond_to: oneshot::Sender<OrchestratorResult<()>>,
    },
    SetTrackers {
        id: InfoHash,
        trackers: Vec<TrackerEntry>,
        respond_to: oneshot::Sender<OrchestratorResult<()>>,
    },
    SetOwner {
        id: InfoHash,
        owner: String,
        respond_to: oneshot::Sender<OrchestratorResult<()>>,
    },
    ApplyConfig {
        config: Box<CoreConfig>,
        respond_to: oneshot::Sender<()>,
    },
    SaveState {
        respond_to: oneshot::Sender<bool>,
    },
    Health {
        respond_to: oneshot::Sender<Vec<String>>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Cloneable client of the orchestrator task.
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::Sender<ManagerCommand>,
}

impl OrchestratorHandle {
    /// Add a torrent.
    ///
    /// # Errors
    ///
    /// Propagates admission failures and returns
    /// [`OrchestratorError::Unavailable`] once the task has stopped.
    pub async fn add(&self, request: AddTorrentRequest) -> OrchestratorResult<InfoHash> {
        self.request("add", |respond_to| ManagerCommand::Add {
            request: Box::new(request),
            respond_to,
        })
        .await?
    }

    /// Remove a torrent.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] for unknown ids and
    /// [`OrchestratorError::Unavailable`] once the task has stopped.
    pub async fn remove(&self, id: InfoHash, purge_data: bool) -> OrchestratorResult<bool> {
        self.request("remove", |respond_to| ManagerCommand::Remove {
            id,
            purge_data,
            respond_to,
        })
        .await?
    }

    /// Run a best-effort command against one torrent.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] for unknown ids and
    /// [`OrchestratorError::Unavailable`] once the task has stopped.
    pub async fn perform(&self, id: InfoHash, action: TorrentAction) -> OrchestratorResult<bool> {
        self.request("perform", |respond_to| ManagerCommand::Perform {
            id,
            action,
            respond_to,
        })
        .await?
    }

    /// Pause every torrent.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Unavailable`] once the task has stopped.
    pub async fn pause_all(&self) -> OrchestratorResult<()> {
        self.request("pause_all", |respond_to| ManagerCommand::PauseAll { respond_to })
            .await
    }

    /// Resume every torrent.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Unavailable`] once the task has stopped.
    pub async fn resume_all(&self) -> OrchestratorResult<()> {
        self.request("resume_all", |respond_to| ManagerCommand::ResumeAll { respond_to })
            .await
    }

    /// Status record of one torrent; `session` enables diffing.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] for unknown ids and
    /// [`OrchestratorError::Unavailable`] once the task has stopped.
    pub async fn status(
        &self,
        id: InfoHash,
        keys: Vec<StatusKey>,
        session: Option<Uuid>,
    ) -> OrchestratorResult<StatusMap> {
        self.request("status", |respond_to| ManagerCommand::Status {
            id,
            keys,
            session,
            respond_to,
        })
        .await?
    }

    /// Ids visible to `caller` in queue order.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Unavailable`] once the task has stopped.
    pub async fn list(&self, caller: Caller) -> OrchestratorResult<Vec<InfoHash>> {
        self.request("list", |respond_to| ManagerCommand::List { caller, respond_to })
            .await
    }

    /// Every managed id.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Unavailable`] once the task has stopped.
    pub async fn session_state(&self) -> OrchestratorResult<Vec<InfoHash>> {
        self.request("session_state", |respond_to| ManagerCommand::SessionState {
            respond_to,
        })
        .await
    }

    /// Move a torrent within the queue.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] for unknown ids,
    /// [`OrchestratorError::EngineRejected`] when the engine refuses, and
    /// [`OrchestratorError::Unavailable`] once the task has stopped.
    pub async fn queue(&self, id: InfoHash, direction: QueueDirection) -> OrchestratorResult<bool> {
        self.request("queue", |respond_to| ManagerCommand::Queue {
            id,
            direction,
            respond_to,
        })
        .await?
    }

    /// Apply option overrides to one torrent.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] for unknown ids and
    /// [`OrchestratorError::Unavailable`] once the task has stopped.
    pub async fn set_options(
        &self,
        id: InfoHash,
        update: TorrentOptionsUpdate,
    ) -> OrchestratorResult<()> {
        self.request("set_options", |respond_to| ManagerCommand::SetOptions {
            id,
            update: Box::new(update),
            respond_to,
        })
        .await?
    }

    /// Replace the tracker list of one torrent.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] for unknown ids and
    /// [`OrchestratorError::Unavailable`] once the task has stopped.
    pub async fn set_trackers(
        &self,
        id: InfoHash,
        trackers: Vec<TrackerEntry>,
    ) -> OrchestratorResult<()> {
        self.request("set_trackers", |respond_to| ManagerCommand::SetTrackers {
            id,
            trackers,
            respond_to,
        })
        .await?
    }

    /// Hand a torrent to another account.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidArgument`] for unknown accounts,
    /// [`OrchestratorError::NotFound`] for unknown ids, and
    /// [`OrchestratorError::Unavailable`] once the task has stopped.
    pub async fn set_owner(&self, id: InfoHash, owner: impl Into<String>) -> OrchestratorResult<()> {
        let owner = owner.into();
        self.request("set_owner", |respond_to| ManagerCommand::SetOwner {
            id,
            owner,
            respond_to,
        })
        .await?
    }

    /// Adopt a reloaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Unavailable`] once the task has stopped.
    pub async fn apply_config(&self, config: CoreConfig) -> OrchestratorResult<()> {
        self.request("apply_config", |respond_to| ManagerCommand::ApplyConfig {
            config: Box::new(config),
            respond_to,
        })
        .await
    }

    /// Write the registry snapshot now; `false` when the write failed.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Unavailable`] once the task has stopped.
    pub async fn save_state(&self) -> OrchestratorResult<bool> {
        self.request("save_state", |respond_to| ManagerCommand::SaveState { respond_to })
            .await
    }

    /// Components currently reported as degraded.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Unavailable`] once the task has stopped.
    pub async fn health(&self) -> OrchestratorResult<Vec<String>> {
        self.request("health", |respond_to| ManagerCommand::Health { respond_to })
            .await
    }

    /// Run the shutdown protocol and stop the task.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Unavailable`] when the task already
    /// stopped.
    pub async fn shutdown(&self) -> OrchestratorResult<()> {
        self.request("shutdown", |respond_to| ManagerCommand::Shutdown { respond_to })
            .await
    }

    async fn request<T>(
        &self,
        operation: &'static str,
        build: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand,
    ) -> OrchestratorResult<T> {
        let (respond_to, rx) = oneshot::channel();
        self.commands
            .send(build(respond_to))
            .await
            .map_err(|_| OrchestratorError::Unavailable { operation })?;
        rx.await
            .map_err(|_| OrchestratorError::Unavailable { operation })
    }
}

/// Start the service task: restore state, then serve commands and timers
/// until shutdown is requested or every handle is dropped.
#[must_use]
pub fn spawn(manager: TorrentManager, timers: TimerConfig) -> (OrchestratorHandle, JoinHandle<()>) {
    let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
    let task = tokio::spawn(run(manager, receiver, timers));
    (OrchestratorHandle { commands }, task)
}

async fn run(
    mut manager: TorrentManager,
    mut commands: mpsc::Receiver<ManagerCommand>,
    timers: TimerConfig,
) {
    manager.load_state().await;
    manager.start_timers();

    let mut alert_poll = ticker(timers.alert_poll_interval());
    let mut sweep = ticker(timers.sweep_interval());
    let mut save_state = ticker(timers.save_state_interval());
    let mut save_resume = ticker(timers.save_resume_interval());
    let mut cache_cleanup = ticker(timers.status_cache_cleanup_interval());
    let shutdown_timeout = timers.shutdown_timeout();
    let shutdown_poll = timers.shutdown_poll_interval();

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(ManagerCommand::Shutdown { respond_to }) => {
                        manager.shutdown(shutdown_timeout, shutdown_poll).await;
                        let _ = respond_to.send(());
                        break;
                    }
                    Some(command) => handle_command(&mut manager, command).await,
                    None => {
                        debug!("all orchestrator handles dropped; shutting down");
                        manager.shutdown(shutdown_timeout, shutdown_poll).await;
                        break;
                    }
                }
            }
            _ = alert_poll.tick() => {
                manager.dispatch_alerts().await;
            }
            _ = sweep.tick() => {
                manager.sweep().await;
            }
            _ = save_state.tick() => {
                manager.save_state().await;
            }
            _ = save_resume.tick() => {
                manager.save_resume_data(None).await;
            }
            _ = cache_cleanup.tick() => {
                manager.cleanup_status_caches();
            }
        }
    }
    info!("orchestrator task exited");
}

async fn handle_command(manager: &mut TorrentManager, command: ManagerCommand) {
    match command {
        ManagerCommand::Add {
            request,
            respond_to,
        } => {
            let _ = respond_to.send(manager.add(*request).await);
        }
        ManagerCommand::Remove {
            id,
            purge_data,
            respond_to,
        } => {
            let _ = respond_to.send(manager.remove(&id, purge_data).await);
        }
        ManagerCommand::Perform {
            id,
            action,
            respond_to,
        } => {
            let _ = respond_to.send(manager.perform(&id, action).await);
        }
        ManagerCommand::PauseAll { respond_to } => {
            manager.pause_all().await;
            let _ = respond_to.send(());
        }
        ManagerCommand::ResumeAll { respond_to } => {
            manager.resume_all().await;
            let _ = respond_to.send(());
        }
        ManagerCommand::Status {
            id,
            keys,
            session,
            respond_to,
        } => {
            let _ = respond_to.send(manager.get_status(&id, &keys, session).await);
        }
        ManagerCommand::List { caller, respond_to } => {
            let _ = respond_to.send(manager.list(&caller).await);
        }
        ManagerCommand::SessionState { respond_to } => {
            let _ = respond_to.send(manager.session_state());
        }
        ManagerCommand::Queue {
            id,
            direction,
            respond_to,
        } => {
            let _ = respond_to.send(manager.queue(&id, direction).await);
        }
        ManagerCommand::SetOptions {
            id,
            update,
            respond_to,
        } => {
            let _ = respond_to.send(manager.set_options(&id, *update).await);
        }
        ManagerCommand::SetTrackers {
            id,
            trackers,
            respond_to,
        } => {
            let _ = respond_to.send(manager.set_trackers(&id, trackers).await);
        }
        ManagerCommand::SetOwner {
            id,
            owner,
            respond_to,
        } => {
            let _ = respond_to.send(manager.set_owner(&id, &owner));
        }
        ManagerCommand::ApplyConfig { config, respond_to } => {
            manager.apply_config(*config).await;
            let _ = respond_to.send(());
        }
        ManagerCommand::SaveState { respond_to } => {
            let _ = respond_to.send(manager.save_state().await);
        }
        ManagerCommand::Health { respond_to } => {
            let _ = respond_to.send(manager.degraded());
        }
        ManagerCommand::Shutdown { respond_to } => {
            let _ = respond_to.send(());
        }
    }
}

/// Interval whose first tick fires one period from now.
fn ticker(period: Duration) -> Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use seedkeep_events::{Event, EventBus, EventEnvelope};
    use seedkeep_telemetry::Metrics;
    use seedkeep_test_support::{LoopbackEngine, info_hash, metainfo_bytes, sample_metainfo};
    use seedkeep_torrent_core::TorrentEngine;
    use tokio_stream::StreamExt;

    use super::*;
    use crate::manager::TorrentSource;
    use crate::persistence::StateStore;
    use crate::session::LocalSessions;

    fn fast_timers() -> TimerConfig {
        TimerConfig {
            alert_poll_interval_ms: 10,
            shutdown_timeout_secs: 2,
            shutdown_poll_interval_ms: 5,
            ..TimerConfig::default()
        }
    }

    fn manager(state_dir: &std::path::Path, engine: Arc<LoopbackEngine>, events: EventBus) -> Result<TorrentManager> {
        let mut config = CoreConfig::default();
        config.state_dir = state_dir.join("state");
        config.download_location = state_dir.join("downloads");
        let engine: Arc<dyn TorrentEngine> = engine;
        Ok(TorrentManager::new(
            engine,
            events,
            Metrics::new()?,
            Arc::new(LocalSessions),
            config,
        ))
    }

    fn request(seed: u8, name: &str) -> AddTorrentRequest {
        let path = format!("{name}/payload.bin");
        AddTorrentRequest::new(TorrentSource::MetainfoBytes(metainfo_bytes(&sample_metainfo(
            seed,
            name,
            &[(path.as_str(), 64)],
        ))))
    }

    #[tokio::test]
    async fn handle_drives_manager_until_shutdown() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = Arc::new(LoopbackEngine::new());
        let events = EventBus::new();
        let mut stream = events.subscribe();
        let (handle, task) = spawn(manager(dir.path(), engine.clone(), events)?, fast_timers());

        let id = handle.add(request(1, "alpha")).await?;
        assert_eq!(handle.session_state().await?, vec![id.clone()]);
        assert_eq!(handle.list(Caller::local_admin()).await?, vec![id.clone()]);

        let status = handle
            .status(id.clone(), vec![StatusKey::Name, StatusKey::Paused], None)
            .await?;
        assert_eq!(status[&StatusKey::Name], serde_json::json!("alpha"));

        assert!(handle.perform(id.clone(), TorrentAction::Pause).await?);
        let missing = handle.remove(info_hash(9), false).await;
        assert!(matches!(missing, Err(OrchestratorError::NotFound { .. })));
        assert!(handle.health().await?.is_empty());

        handle.shutdown().await?;
        task.await?;
        assert!(matches!(
            handle.session_state().await,
            Err(OrchestratorError::Unavailable {
                operation: "session_state"
            })
        ));

        let store = StateStore::new(dir.path().join("state"));
        let records = store.read_state(&crate::options::TorrentOptions::default()).await?;
        assert_eq!(records.len(), 1);
        assert!(records[0].paused);
        assert!(store.read_resume_map().await?.contains_key(&id));

        let mut kinds = Vec::new();
        while let Ok(Some(Ok(EventEnvelope { event, .. }))) =
            time::timeout(Duration::from_millis(20), stream.next()).await
        {
            kinds.push(event.kind());
        }
        assert_eq!(kinds.first(), Some(&Event::SessionStarted.kind()));
        assert!(kinds.contains(&"torrent_added"));
        Ok(())
    }

    #[tokio::test]
    async fn restart_restores_previous_torrents() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (handle, task) = spawn(
            manager(dir.path(), Arc::new(LoopbackEngine::new()), EventBus::new())?,
            fast_timers(),
        );
        let first = handle.add(request(1, "alpha")).await?;
        let second = handle.add(request(2, "beta")).await?;
        handle.shutdown().await?;
        task.await?;

        let engine = Arc::new(LoopbackEngine::new());
        let (handle, task) = spawn(
            manager(dir.path(), engine.clone(), EventBus::new())?,
            fast_timers(),
        );
        let mut restored = handle.session_state().await?;
        restored.sort();
        let mut expected = vec![first, second];
        expected.sort();
        assert_eq!(restored, expected);
        assert_eq!(engine.len(), 2);
        drop(handle);
        task.await?;
        Ok(())
    }
}
