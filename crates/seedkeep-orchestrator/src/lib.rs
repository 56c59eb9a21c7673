#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::redundant_pub_crate)]

//! Torrent job orchestration on top of an injected engine.
//!
//! Layout: `bootstrap.rs` (process wiring), `service.rs` (service task and
//! handle), `manager.rs` (registry), `alerts.rs` (alert handlers),
//! `torrent/` (per-torrent entity), `persistence.rs` (state files),
//! `options.rs`, `session.rs`, `error.rs`.

mod alerts;
/// Process wiring and startup.
pub mod bootstrap;
/// Error types.
pub mod error;
/// Torrent registry.
pub mod manager;
/// Per-torrent options.
pub mod options;
/// State, recovery data, and descriptor files.
pub mod persistence;
/// Service task and its client handle.
pub mod service;
/// Caller identity and session lookups.
pub mod session;
/// Managed torrent entity and status records.
pub mod torrent;

pub use bootstrap::{BootstrapDependencies, Orchestrator, init_logging, start};
pub use error::{OrchestratorError, OrchestratorResult};
pub use manager::{AddTorrentRequest, QueueDirection, TorrentAction, TorrentManager, TorrentSource};
pub use options::{TorrentOptions, TorrentOptionsUpdate};
pub use persistence::{StateStore, TorrentRecord};
pub use service::OrchestratorHandle;
pub use session::{AuthLevel, Caller, DEFAULT_OWNER, LocalSessions, SessionDirectory};
pub use torrent::{FolderRename, StatusKey, StatusMap, Torrent};
