//! Per-torrent option set and partial updates.

use std::collections::BTreeMap;
use std::path::PathBuf;

use seedkeep_config::CoreConfig;
use serde::{Deserialize, Serialize};

/// Configurable knobs of one torrent.
///
/// Speeds are KiB/s and `-1` means unlimited for every limit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TorrentOptions {
    /// Connection limit.
    pub max_connections: i32,
    /// Upload slot limit.
    pub max_upload_slots: i32,
    /// Upload speed limit in KiB/s.
    pub max_upload_speed: f64,
    /// Download speed limit in KiB/s.
    pub max_download_speed: f64,
    /// Fetch the first and last pieces of each file early.
    pub prioritize_first_last_pieces: bool,
    /// Download pieces in order.
    pub sequential_download: bool,
    /// Directory the payload is stored under.
    pub download_location: PathBuf,
    /// Let the engine queue start and stop the torrent.
    pub auto_managed: bool,
    /// Stop seeding once `stop_ratio` is reached.
    pub stop_at_ratio: bool,
    /// Share ratio at which seeding stops.
    pub stop_ratio: f64,
    /// Remove instead of pausing when `stop_ratio` is reached.
    pub remove_at_ratio: bool,
    /// Move the payload once it finishes.
    pub move_completed: bool,
    /// Destination used by `move_completed`.
    pub move_completed_path: PathBuf,
    /// Keep the torrent paused after it is added.
    pub add_paused: bool,
    /// Visible to every account, not only the owner.
    pub shared: bool,
    /// Per-file priorities, `0` skips the file.
    pub file_priorities: Vec<u8>,
    /// File index to relative path overrides applied at add time.
    pub mapped_files: BTreeMap<u32, String>,
}

impl TorrentOptions {
    /// Options seeded from the global per-torrent defaults.
    #[must_use]
    pub fn from_config(config: &CoreConfig) -> Self {
        let defaults = &config.torrent_defaults;
        Self {
            max_connections: defaults.max_connections_per_torrent,
            max_upload_slots: defaults.max_upload_slots_per_torrent,
            max_upload_speed: defaults.max_upload_speed_per_torrent,
            max_download_speed: defaults.max_download_speed_per_torrent,
            prioritize_first_last_pieces: defaults.prioritize_first_last_pieces,
            sequential_download: defaults.sequential_download,
            download_location: config.download_location.clone(),
            auto_managed: defaults.auto_managed,
            stop_at_ratio: defaults.stop_seed_at_ratio,
            stop_ratio: defaults.stop_seed_ratio,
            remove_at_ratio: defaults.remove_seed_at_ratio,
            move_completed: defaults.move_completed,
            move_completed_path: defaults.move_completed_path.clone(),
            add_paused: defaults.add_paused,
            shared: defaults.shared,
            file_priorities: Vec::new(),
            mapped_files: BTreeMap::new(),
        }
    }
}

impl Default for TorrentOptions {
    fn default() -> Self {
        Self::from_config(&CoreConfig::default())
    }
}

/// Partial option override; every present key replaces the stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
#[allow(missing_docs)]
pub struct TorrentOptionsUpdate {
    pub max_connections: Option<i32>,
    pub max_upload_slots: Option<i32>,
    pub max_upload_speed: Option<f64>,
    pub max_download_speed: Option<f64>,
    pub prioritize_first_last_pieces: Option<bool>,
    pub sequential_download: Option<bool>,
    pub download_location: Option<PathBuf>,
    pub auto_managed: Option<bool>,
    pub stop_at_ratio: Option<bool>,
    pub stop_ratio: Option<f64>,
    pub remove_at_ratio: Option<bool>,
    pub move_completed: Option<bool>,
    pub move_completed_path: Option<PathBuf>,
    pub add_paused: Option<bool>,
    pub shared: Option<bool>,
    pub file_priorities: Option<Vec<u8>>,
    pub mapped_files: Option<BTreeMap<u32, String>>,
}

impl TorrentOptionsUpdate {
    /// Merge the present keys into `options` without touching the engine.
    pub fn merge_into(self, options: &mut TorrentOptions) {
        macro_rules! merge {
            ($($field:ident),+ $(,)?) => {
                $(if let Some(value) = self.$field {
                    options.$field = value;
                })+
            };
        }
        merge!(
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
        );
    }
}

/// Convert a KiB/s limit into the engine's bytes/s, negatives meaning unlimited.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn speed_limit_bytes(kib_per_sec: f64) -> i64 {
    if kib_per_sec < 0.0 || !kib_per_sec.is_finite() {
        -1
    } else {
        (kib_per_sec * 1024.0) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_follow_configured_defaults() {
        let mut config = CoreConfig::default();
        config.download_location = PathBuf::from("/data/incoming");
        config.torrent_defaults.stop_seed_at_ratio = true;
        config.torrent_defaults.stop_seed_ratio = 1.5;
        config.torrent_defaults.max_connections_per_torrent = 40;

        let options = TorrentOptions::from_config(&config);
        assert_eq!(options.download_location, PathBuf::from("/data/incoming"));
        assert!(options.stop_at_ratio);
        assert!((options.stop_ratio - 1.5).abs() < f64::EPSILON);
        assert_eq!(options.max_connections, 40);
        assert!(options.file_priorities.is_empty());
    }

    #[test]
    fn update_merges_only_present_keys() {
        let mut options = TorrentOptions::default();
        let before = options.clone();
        TorrentOptionsUpdate {
            add_paused: Some(true),
            stop_ratio: Some(3.0),
            ..TorrentOptionsUpdate::default()
        }
        .merge_into(&mut options);

        assert!(options.add_paused);
        assert!((options.stop_ratio - 3.0).abs() < f64::EPSILON);
        assert_eq!(options.max_connections, before.max_connections);
        assert_eq!(options.download_location, before.download_location);
    }

    #[test]
    fn speed_limits_convert_to_bytes() {
        assert_eq!(speed_limit_bytes(-1.0), -1);
        assert_eq!(speed_limit_bytes(f64::NAN), -1);
        assert_eq!(speed_limit_bytes(0.0), 0);
        assert_eq!(speed_limit_bytes(1.5), 1536);
    }

    #[test]
    fn missing_fields_deserialize_to_defaults() {
        let options: TorrentOptions =
            serde_json::from_str(r#"{"shared": true}"#).expect("options");
        assert!(options.shared);
        assert_eq!(options.max_upload_slots, -1);
        assert!(options.auto_managed);
    }
}
