//! Default values for configuration fields.
//!
//! # Design
//! - Centralise defaults so serde and `Default` impls agree.
//! - `-1` means unlimited for every per-torrent limit.

use std::path::PathBuf;

pub(crate) const UNLIMITED: i32 = -1;
pub(crate) const UNLIMITED_SPEED: f64 = -1.0;
pub(crate) const STOP_SEED_RATIO: f64 = 2.0;

pub(crate) const ALERT_POLL_INTERVAL_MS: u64 = 200;
pub(crate) const SWEEP_INTERVAL_SECS: u64 = 5;
pub(crate) const SAVE_STATE_INTERVAL_SECS: u64 = 200;
pub(crate) const SAVE_RESUME_INTERVAL_SECS: u64 = 190;
pub(crate) const STATUS_CACHE_CLEANUP_INTERVAL_SECS: u64 = 10;
pub(crate) const SHUTDOWN_TIMEOUT_SECS: u64 = 30;
pub(crate) const SHUTDOWN_POLL_INTERVAL_MS: u64 = 10;

pub(crate) fn download_location() -> PathBuf {
    PathBuf::from("downloads")
}

pub(crate) fn state_dir() -> PathBuf {
    PathBuf::from("state")
}

pub(crate) const fn unlimited() -> i32 {
    UNLIMITED
}

pub(crate) const fn unlimited_speed() -> f64 {
    UNLIMITED_SPEED
}

pub(crate) const fn stop_seed_ratio() -> f64 {
    STOP_SEED_RATIO
}

pub(crate) const fn enabled() -> bool {
    true
}

pub(crate) const fn alert_poll_interval_ms() -> u64 {
    ALERT_POLL_INTERVAL_MS
}

pub(crate) const fn sweep_interval_secs() -> u64 {
    SWEEP_INTERVAL_SECS
}

pub(crate) const fn save_state_interval_secs() -> u64 {
    SAVE_STATE_INTERVAL_SECS
}

pub(crate) const fn save_resume_interval_secs() -> u64 {
    SAVE_RESUME_INTERVAL_SECS
}

pub(crate) const fn status_cache_cleanup_interval_secs() -> u64 {
    STATUS_CACHE_CLEANUP_INTERVAL_SECS
}

pub(crate) const fn shutdown_timeout_secs() -> u64 {
    SHUTDOWN_TIMEOUT_SECS
}

pub(crate) const fn shutdown_poll_interval_ms() -> u64 {
    SHUTDOWN_POLL_INTERVAL_MS
}
