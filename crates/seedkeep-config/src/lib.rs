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

//! File-backed configuration for the Seedkeep orchestrator.
//!
//! Layout: `model.rs` (typed config models), `defaults.rs` (default values),
//! `loader.rs` (JSON file + environment overrides), `validate.rs`
//! (validation helpers), `error.rs` (`ConfigError`).

mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ENV_DOWNLOAD_LOCATION, ENV_STATE_DIR, apply_env_overrides, load, load_or_default};
pub use model::{CoreConfig, TimerConfig, TorrentDefaults};
pub use validate::validate;
