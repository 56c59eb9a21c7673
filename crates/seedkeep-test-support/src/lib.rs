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

//! Shared test helpers used across the workspace.
//! Layout: fixtures.rs (descriptor and magnet builders), mocks.rs (in-memory engine).

pub mod fixtures;
pub mod mocks;

pub use fixtures::{info_hash, magnet_uri, metainfo_bytes, sample_metainfo};
pub use mocks::{EngineCall, LoopbackEngine};
