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

//! Engine-agnostic torrent interfaces and DTOs.
//!
//! Layout: `model/` (metainfo, magnet, engine status DTOs), `alert.rs` (the
//! closed set of asynchronous engine notifications), `service/` (the engine
//! capability trait), `error.rs` (parsing and lookup failures).

pub mod alert;
pub mod error;
pub mod model;
pub mod service;

pub use alert::Alert;
pub use error::{TorrentError, TorrentResult};
pub use model::{
    AddTorrentParams, EnginePhase, EngineSource, EngineStatus, FileEntry, MagnetLink,
    PeerSnapshot, PieceSnapshot, TorrentMetainfo, TrackerEntry,
};
pub use seedkeep_events::InfoHash;
pub use service::TorrentEngine;
