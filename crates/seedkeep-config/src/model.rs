//! Typed configuration models.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoreConfig {
    /// Directory new torrents download into.
    pub download_location: PathBuf,
    /// Directory holding the registry snapshot, recovery data and descriptors.
    pub state_dir: PathBuf,
    /// Directory that receives user-visible copies of added descriptors.
    pub torrentfiles_location: Option<PathBuf>,
    /// Copy added descriptors to `torrentfiles_location`.
    pub copy_torrent_file: bool,
    /// Delete the user copy when the torrent is removed.
    pub del_copy_torrent_file: bool,
    /// Put new torrents at the front of the queue.
    pub queue_new_to_top: bool,
    /// Defaults applied to every new torrent.
    pub torrent_defaults: TorrentDefaults,
    /// Periodic driver intervals.
    pub timers: TimerConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            download_location: defaults::download_location(),
            state_dir: defaults::state_dir(),
            torrentfiles_location: None,
            copy_torrent_file: false,
            del_copy_torrent_file: false,
            queue_new_to_top: false,
            torrent_defaults: TorrentDefaults::default(),
            timers: TimerConfig::default(),
        }
    }
}

/// Per-torrent option defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TorrentDefaults {
    /// Peer connection cap; `-1` is unlimited.
    pub max_connections_per_torrent: i32,
    /// Upload slot cap; `-1` is unlimited.
    pub max_upload_slots_per_torrent: i32,
    /// Upload rate cap in KiB/s; `-1.0` is unlimited.
    pub max_upload_speed_per_torrent: f64,
    /// Download rate cap in KiB/s; `-1.0` is unlimited.
    pub max_download_speed_per_torrent: f64,
    /// Fetch first and last pieces of each file early.
    pub prioritize_first_last_pieces: bool,
    /// Pick pieces in order.
    pub sequential_download: bool,
    /// Let the engine queue start and stop torrents.
    #[serde(default = "defaults::enabled")]
    pub auto_managed: bool,
    /// Stop seeding once `stop_seed_ratio` is reached.
    pub stop_seed_at_ratio: bool,
    /// Ratio at which seeding stops.
    #[serde(default = "defaults::stop_seed_ratio")]
    pub stop_seed_ratio: f64,
    /// Remove instead of pausing once the ratio is reached.
    pub remove_seed_at_ratio: bool,
    /// Move payload when the download finishes.
    pub move_completed: bool,
    /// Destination for finished payloads.
    pub move_completed_path: PathBuf,
    /// Keep new torrents paused.
    pub add_paused: bool,
    /// Make new torrents visible to every user.
    pub shared: bool,
}

impl Default for TorrentDefaults {
    fn default() -> Self {
        Self {
            max_connections_per_torrent: defaults::unlimited(),
            max_upload_slots_per_torrent: defaults::unlimited(),
            max_upload_speed_per_torrent: defaults::unlimited_speed(),
            max_download_speed_per_torrent: defaults::unlimited_speed(),
            prioritize_first_last_pieces: false,
            sequential_download: false,
            auto_managed: defaults::enabled(),
            stop_seed_at_ratio: false,
            stop_seed_ratio: defaults::stop_seed_ratio(),
            remove_seed_at_ratio: false,
            move_completed: false,
            move_completed_path: PathBuf::new(),
            add_paused: false,
            shared: false,
        }
    }
}

/// Intervals driving the orchestrator's periodic work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimerConfig {
    /// How often pending engine alerts are drained.
    pub alert_poll_interval_ms: u64,
    /// How often the stop-at-ratio sweep runs.
    pub sweep_interval_secs: u64,
    /// How often the registry snapshot is written.
    pub save_state_interval_secs: u64,
    /// How often recovery data is requested for every torrent.
    pub save_resume_interval_secs: u64,
    /// How often stale per-session status caches are purged.
    pub status_cache_cleanup_interval_secs: u64,
    /// Upper bound on the shutdown drain.
    pub shutdown_timeout_secs: u64,
    /// Sleep between shutdown drain iterations.
    pub shutdown_poll_interval_ms: u64,
}

impl TimerConfig {
    /// Alert drain period.
    #[must_use]
    pub const fn alert_poll_interval(&self) -> Duration {
        Duration::from_millis(self.alert_poll_interval_ms)
    }

    /// Sweep period.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Snapshot period.
    #[must_use]
    pub const fn save_state_interval(&self) -> Duration {
        Duration::from_secs(self.save_state_interval_secs)
    }

    /// Recovery data period.
    #[must_use]
    pub const fn save_resume_interval(&self) -> Duration {
        Duration::from_secs(self.save_resume_interval_secs)
    }

    /// Status cache purge period.
    #[must_use]
    pub const fn status_cache_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.status_cache_cleanup_interval_secs)
    }

    /// Shutdown drain bound.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Shutdown drain sleep.
    #[must_use]
    pub const fn shutdown_poll_interval(&self) -> Duration {
        Duration::from_millis(self.shutdown_poll_interval_ms)
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            alert_poll_interval_ms: defaults::alert_poll_interval_ms(),
            sweep_interval_secs: defaults::sweep_interval_secs(),
            save_state_interval_secs: defaults::save_state_interval_secs(),
            save_resume_interval_secs: defaults::save_resume_interval_secs(),
            status_cache_cleanup_interval_secs: defaults::status_cache_cleanup_interval_secs(),
            shutdown_timeout_secs: defaults::shutdown_timeout_secs(),
            shutdown_poll_interval_ms: defaults::shutdown_poll_interval_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_document_keeps_defaults() {
        let config: CoreConfig = serde_json::from_str(
            r#"{"queue_new_to_top": true, "torrent_defaults": {"stop_seed_at_ratio": true}}"#,
        )
        .expect("parse");
        assert!(config.queue_new_to_top);
        assert!(config.torrent_defaults.stop_seed_at_ratio);
        assert!(config.torrent_defaults.auto_managed);
        assert!((config.torrent_defaults.stop_seed_ratio - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.torrent_defaults.max_connections_per_torrent, -1);
        assert_eq!(config.timers, TimerConfig::default());
    }

    #[test]
    fn timer_helpers_convert_units() {
        let timers = TimerConfig::default();
        assert_eq!(timers.alert_poll_interval(), Duration::from_millis(200));
        assert_eq!(timers.sweep_interval(), Duration::from_secs(5));
        assert_eq!(timers.save_state_interval(), Duration::from_secs(200));
        assert_eq!(timers.save_resume_interval(), Duration::from_secs(190));
    }
}
