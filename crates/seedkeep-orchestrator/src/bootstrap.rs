//! Process wiring: configuration, logging, metrics, and the service task.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use seedkeep_config::CoreConfig;
use seedkeep_events::EventBus;
use seedkeep_telemetry::{LogFormat, LoggingConfig, Metrics};
use seedkeep_torrent_core::TorrentEngine;
use tokio::task::JoinHandle;
use tracing::info;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::manager::TorrentManager;
use crate::service::{self, OrchestratorHandle};
use crate::session::{LocalSessions, SessionDirectory};

/// Environment variable naming the configuration file.
pub const ENV_CONFIG_PATH: &str = "SEEDKEEP_CONFIG";
/// Environment variable selecting `json` or `pretty` log output.
pub const ENV_LOG_FORMAT: &str = "SEEDKEEP_LOG_FORMAT";
/// Configuration file used when [`ENV_CONFIG_PATH`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "seedkeep.json";

/// Everything the orchestrator needs from its host process.
pub struct BootstrapDependencies {
    /// Validated configuration.
    pub config: CoreConfig,
    /// Torrent engine the orchestrator drives.
    pub engine: Arc<dyn TorrentEngine>,
    /// Session and account lookups of the transport layer.
    pub sessions: Arc<dyn SessionDirectory>,
    /// Bus the orchestrator publishes on.
    pub events: EventBus,
    /// Metrics registry.
    pub metrics: Metrics,
}

impl BootstrapDependencies {
    /// Load configuration from [`ENV_CONFIG_PATH`] (or
    /// [`DEFAULT_CONFIG_PATH`]) for a single local user.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration cannot be loaded or the
    /// metrics registry cannot be built.
    pub fn from_env(engine: Arc<dyn TorrentEngine>) -> OrchestratorResult<Self> {
        let path = std::env::var_os(ENV_CONFIG_PATH)
            .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
        Self::from_config_path(&path, engine)
    }

    /// Load configuration from `path`; a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration cannot be loaded or the
    /// metrics registry cannot be built.
    pub fn from_config_path(path: &Path, engine: Arc<dyn TorrentEngine>) -> OrchestratorResult<Self> {
        let config = seedkeep_config::load_or_default(path).map_err(|source| {
            OrchestratorError::Config {
                operation: "config.load",
                source,
            }
        })?;
        let metrics = Metrics::new().map_err(|source| OrchestratorError::Telemetry {
            operation: "telemetry.metrics",
            source,
        })?;
        Ok(Self {
            config,
            engine,
            sessions: Arc::new(LocalSessions),
            events: EventBus::new(),
            metrics,
        })
    }
}

/// Install the global tracing subscriber, honouring [`ENV_LOG_FORMAT`].
///
/// # Errors
///
/// Returns an error when a subscriber is already installed.
pub fn init_logging() -> OrchestratorResult<()> {
    let format = std::env::var(ENV_LOG_FORMAT).ok();
    let logging = LoggingConfig {
        format: LogFormat::parse_or_infer(format.as_deref()),
        ..LoggingConfig::default()
    };
    seedkeep_telemetry::init_logging(&logging).map_err(|source| OrchestratorError::Telemetry {
        operation: "telemetry.init",
        source,
    })
}

/// A running orchestrator.
pub struct Orchestrator {
    handle: OrchestratorHandle,
    events: EventBus,
    metrics: Metrics,
    task: JoinHandle<()>,
}

impl Orchestrator {
    /// Client handle; clone it freely.
    #[must_use]
    pub const fn handle(&self) -> &OrchestratorHandle {
        &self.handle
    }

    /// Bus carrying orchestrator events.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Metrics registry shared with the service task.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Run the shutdown protocol and wait for the task to exit.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Unavailable`] when the task already
    /// stopped or panicked.
    pub async fn shutdown(self) -> OrchestratorResult<()> {
        self.handle.shutdown().await?;
        self.task
            .await
            .map_err(|_| OrchestratorError::Unavailable { operation: "join" })
    }

    /// Serve until Ctrl-C, then shut down.
    ///
    /// # Errors
    ///
    /// Returns an error when the signal cannot be awaited or shutdown fails.
    pub async fn run_until_ctrl_c(self) -> OrchestratorResult<()> {
        tokio::signal::ctrl_c()
            .await
            .map_err(|source| OrchestratorError::io("signal.ctrl_c", PathBuf::new(), source))?;
        info!("shutdown signal received");
        self.shutdown().await
    }
}

/// Spawn the service task. Must be called from within a Tokio runtime.
#[must_use]
pub fn start(dependencies: BootstrapDependencies) -> Orchestrator {
    let BootstrapDependencies {
        config,
        engine,
        sessions,
        events,
        metrics,
    } = dependencies;
    info!(
        state_dir = %config.state_dir.display(),
        download_location = %config.download_location.display(),
        build_sha = seedkeep_telemetry::build_sha(),
        "orchestrator starting"
    );
    let timers = config.timers.clone();
    let manager = TorrentManager::new(engine, events.clone(), metrics.clone(), sessions, config);
    let (handle, task) = service::spawn(manager, timers);
    Orchestrator {
        handle,
        events,
        metrics,
        task,
    }
}
