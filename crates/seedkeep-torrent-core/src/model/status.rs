//! Live status snapshots queried from the engine.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Coarse phase the engine reports for a handle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnginePhase {
    /// Waiting for a checking slot.
    #[default]
    QueuedForChecking,
    /// Hashing pieces already on disk.
    CheckingFiles,
    /// Fetching the info dictionary from peers.
    DownloadingMetadata,
    /// Fetching payload.
    Downloading,
    /// All wanted pieces present, not every piece.
    Finished,
    /// Every piece present.
    Seeding,
    /// Allocating storage.
    Allocating,
    /// Validating recovery data.
    CheckingResumeData,
}

/// Engine-side status of a single handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EngineStatus {
    /// Coarse phase.
    pub phase: EnginePhase,
    /// Error string; empty when healthy.
    #[serde(default)]
    pub error: String,
    /// Handle is paused.
    pub paused: bool,
    /// Engine queue controls the handle.
    pub auto_managed: bool,
    /// All wanted pieces are present.
    pub is_finished: bool,
    /// Every piece is present.
    pub is_seed: bool,
    /// The info dictionary is known.
    pub has_metadata: bool,
    /// Completion of wanted data in `0.0..=1.0`.
    pub progress: f32,
    /// Bytes of verified data on disk, across all sources.
    pub total_done: u64,
    /// Bytes selected for download.
    pub total_wanted: u64,
    /// Bytes of selected data already on disk.
    pub total_wanted_done: u64,
    /// Payload bytes downloaded over the handle's lifetime.
    pub all_time_download: u64,
    /// Payload bytes uploaded over the handle's lifetime.
    pub all_time_upload: u64,
    /// Payload bytes downloaded this session.
    pub total_payload_download: u64,
    /// Payload bytes uploaded this session.
    pub total_payload_upload: u64,
    /// Current payload download rate in bytes per second.
    pub download_payload_rate: u64,
    /// Current payload upload rate in bytes per second.
    pub upload_payload_rate: u64,
    /// Connected peers, seeds included.
    pub num_peers: u32,
    /// Connected seeds.
    pub num_seeds: u32,
    /// Seeds in the swarm per the last scrape; `-1` when unknown.
    pub num_complete: i32,
    /// Leechers in the swarm per the last scrape; `-1` when unknown.
    pub num_incomplete: i32,
    /// Distributed copies; `-1.0` when not computed.
    pub distributed_copies: f32,
    /// Seconds the handle has been active.
    pub active_time: u64,
    /// Seconds the handle has been seeding.
    pub seeding_time: u64,
    /// Engine seeding priority rank.
    pub seed_rank: i32,
    /// Seconds until the next announce.
    pub next_announce: u64,
    /// Tracker currently in use.
    #[serde(default)]
    pub current_tracker: String,
    /// Directory the payload is stored in.
    pub save_path: PathBuf,
    /// Unix time at which the swarm last had every piece; 0 when never seen.
    pub last_seen_complete: i64,
}

/// Peer connected to a handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerSnapshot {
    /// Remote endpoint.
    pub address: SocketAddr,
    /// Client identification string.
    pub client: String,
    /// Two letter country code, blank when unknown.
    pub country: String,
    /// Download rate from the peer in bytes per second.
    pub down_speed: u64,
    /// Upload rate to the peer in bytes per second.
    pub up_speed: u64,
    /// Fraction of pieces the peer has.
    pub progress: f32,
    /// Peer is a seed.
    pub seed: bool,
}

/// Piece level view used to build availability maps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PieceSnapshot {
    /// Pieces verified locally.
    pub have: Vec<bool>,
    /// Number of connected peers holding each piece.
    pub availability: Vec<u32>,
    /// Pieces currently being requested.
    pub downloading: BTreeSet<u32>,
}
