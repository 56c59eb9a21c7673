//! # Design
//!
//! - Centralize orchestrator errors for admission, removal, and persistence.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use std::io;
use std::path::PathBuf;

use seedkeep_events::InfoHash;
use thiserror::Error;

/// Result alias for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Orchestrator-level error type.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The operation referenced a torrent that is not registered.
    #[error("torrent not found")]
    NotFound {
        /// Identifier that was looked up.
        torrent_id: InfoHash,
    },
    /// An add request or command argument was malformed.
    #[error("invalid argument")]
    InvalidArgument {
        /// Argument that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Optional value associated with the failure.
        value: Option<String>,
    },
    /// The engine refused a command.
    #[error("engine rejected command")]
    EngineRejected {
        /// Engine operation that failed.
        operation: &'static str,
        /// Torrent the command targeted, if any.
        torrent_id: Option<InfoHash>,
        /// Error reported by the engine adapter.
        source: anyhow::Error,
    },
    /// Reading or writing a persisted artifact failed.
    #[error("persistence io failed")]
    PersistenceIo {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
    /// A persisted artifact could not be encoded or decoded.
    #[error("persistence format invalid")]
    PersistenceFormat {
        /// Artifact name (`state`, `resume`).
        artifact: &'static str,
        /// Path of the artifact.
        path: PathBuf,
        /// Source serialization error.
        source: serde_json::Error,
    },
    /// Configuration loading failed during bootstrap.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: seedkeep_config::ConfigError,
    },
    /// Telemetry setup failed during bootstrap.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: seedkeep_telemetry::TelemetryError,
    },
    /// The orchestrator task is no longer accepting commands.
    #[error("orchestrator unavailable")]
    Unavailable {
        /// Command that could not be delivered or answered.
        operation: &'static str,
    },
}

impl OrchestratorError {
    pub(crate) fn engine(
        operation: &'static str,
        torrent_id: Option<&InfoHash>,
        source: anyhow::Error,
    ) -> Self {
        Self::EngineRejected {
            operation,
            torrent_id: torrent_id.cloned(),
            source,
        }
    }

    pub(crate) const fn invalid(
        field: &'static str,
        reason: &'static str,
        value: Option<String>,
    ) -> Self {
        Self::InvalidArgument {
            field,
            reason,
            value,
        }
    }

    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::PersistenceIo {
            operation,
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn helpers_build_variants_with_sources() {
        let id: InfoHash = "a".repeat(40).parse().expect("hash");
        let engine = OrchestratorError::engine("pause", Some(&id), anyhow::anyhow!("handle gone"));
        assert!(matches!(
            &engine,
            OrchestratorError::EngineRejected {
                operation: "pause",
                torrent_id: Some(_),
                ..
            }
        ));
        assert_eq!(engine.to_string(), "engine rejected command");
        assert!(engine.source().is_some());

        let invalid = OrchestratorError::invalid("magnet", "missing_btih", None);
        assert!(matches!(invalid, OrchestratorError::InvalidArgument { field: "magnet", .. }));

        let io_error = OrchestratorError::io("write", "/state", io::Error::other("disk full"));
        assert!(io_error.source().is_some());
    }
}
