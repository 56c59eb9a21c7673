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

//! Core event bus for the Seedkeep orchestrator.
//!
//! The bus provides a typed event enum, sequential identifiers, and support for
//! replaying recent events when subscribers reconnect. Internally it uses
//! `tokio::broadcast` with a bounded buffer; when the channel overflows, the
//! oldest events are dropped.
//!
//! Layout: `id.rs` (torrent identifiers), `payloads.rs` (event enum and
//! envelope), `routing.rs` (the bus itself), `error.rs` (identifier parsing
//! failures).

pub mod error;
pub mod id;
pub mod payloads;
pub mod routing;

pub use error::InfoHashError;
pub use id::InfoHash;
pub use payloads::{DEFAULT_REPLAY_CAPACITY, Event, EventEnvelope, EventId, TorrentState};
pub use routing::{EventBus, EventStream};
