//! Lifecycle state derived from engine-reported status.

use seedkeep_events::TorrentState;
use seedkeep_torrent_core::{EnginePhase, EngineStatus};

/// Recompute the lifecycle state from one engine status sample.
///
/// An engine error always wins. Checking phases return before the pause
/// overrides; otherwise queue throttling and user pauses override the phase.
pub(crate) fn derive_state(status: &EngineStatus, session_paused: bool) -> TorrentState {
    if !status.error.is_empty() {
        return TorrentState::Error;
    }

    let from_phase = match status.phase {
        EnginePhase::QueuedForChecking
        | EnginePhase::CheckingFiles
        | EnginePhase::CheckingResumeData => {
            return if status.paused {
                TorrentState::Paused
            } else {
                TorrentState::Checking
            };
        }
        EnginePhase::Downloading | EnginePhase::DownloadingMetadata => TorrentState::Downloading,
        EnginePhase::Finished | EnginePhase::Seeding => TorrentState::Seeding,
        EnginePhase::Allocating => TorrentState::Allocating,
    };

    if status.paused && status.auto_managed && !session_paused {
        TorrentState::Queued
    } else if session_paused || (status.paused && !status.auto_managed) {
        TorrentState::Paused
    } else {
        from_phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(phase: EnginePhase, paused: bool, auto_managed: bool) -> EngineStatus {
        EngineStatus {
            phase,
            paused,
            auto_managed,
            ..EngineStatus::default()
        }
    }

    #[test]
    fn engine_error_wins_over_every_phase() {
        for phase in [
            EnginePhase::QueuedForChecking,
            EnginePhase::CheckingFiles,
            EnginePhase::Downloading,
            EnginePhase::Seeding,
            EnginePhase::Allocating,
        ] {
            let mut sample = status(phase, true, true);
            sample.error = "disk full".into();
            assert_eq!(derive_state(&sample, false), TorrentState::Error);
            assert_eq!(derive_state(&sample, true), TorrentState::Error);
        }
    }

    #[test]
    fn checking_phases_ignore_queue_overrides() {
        let running = status(EnginePhase::CheckingFiles, false, true);
        assert_eq!(derive_state(&running, true), TorrentState::Checking);
        let paused = status(EnginePhase::QueuedForChecking, true, true);
        assert_eq!(derive_state(&paused, false), TorrentState::Paused);
    }

    #[test]
    fn active_phases_map_directly() {
        assert_eq!(
            derive_state(&status(EnginePhase::DownloadingMetadata, false, false), false),
            TorrentState::Downloading
        );
        assert_eq!(
            derive_state(&status(EnginePhase::Finished, false, true), false),
            TorrentState::Seeding
        );
        assert_eq!(
            derive_state(&status(EnginePhase::Allocating, false, false), false),
            TorrentState::Allocating
        );
    }

    #[test]
    fn throttled_auto_managed_handle_is_queued() {
        let sample = status(EnginePhase::Downloading, true, true);
        assert_eq!(derive_state(&sample, false), TorrentState::Queued);
        assert_eq!(derive_state(&sample, true), TorrentState::Paused);
    }

    #[test]
    fn user_pause_and_session_pause_report_paused() {
        let user_paused = status(EnginePhase::Seeding, true, false);
        assert_eq!(derive_state(&user_paused, false), TorrentState::Paused);
        let running = status(EnginePhase::Downloading, false, true);
        assert_eq!(derive_state(&running, true), TorrentState::Paused);
    }
}
