//! Error types for torrent core helpers.

use seedkeep_events::InfoHash;
use thiserror::Error;

/// Primary error type for torrent descriptor handling.
#[derive(Debug, Error)]
pub enum TorrentError {
    /// Magnet URI could not be interpreted.
    #[error("invalid magnet uri")]
    InvalidMagnet {
        /// Machine-readable reason for the rejection.
        reason: &'static str,
    },
    /// Descriptor bytes could not be interpreted by the engine.
    #[error("invalid torrent descriptor")]
    InvalidMetainfo {
        /// Machine-readable reason for the rejection.
        reason: &'static str,
    },
    /// Torrent was not found.
    #[error("torrent not found")]
    NotFound {
        /// Missing torrent identifier.
        torrent_id: InfoHash,
    },
}

/// Convenience alias for torrent operation results.
pub type TorrentResult<T> = Result<T, TorrentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_constant_messages() {
        assert_eq!(
            TorrentError::InvalidMagnet { reason: "scheme" }.to_string(),
            "invalid magnet uri"
        );
        assert_eq!(
            TorrentError::InvalidMetainfo { reason: "empty" }.to_string(),
            "invalid torrent descriptor"
        );
        let torrent_id: InfoHash = "0123456789abcdef0123456789abcdef01234567"
            .parse()
            .expect("hash");
        assert_eq!(
            TorrentError::NotFound { torrent_id }.to_string(),
            "torrent not found"
        );
    }
}
