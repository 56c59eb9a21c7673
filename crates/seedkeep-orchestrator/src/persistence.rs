//! Durable artifacts under the state directory.
//!
//! # Design
//!
//! - `torrents.state` holds one record per torrent in queue order.
//! - `torrents.fastresume` maps info hashes to base64 engine recovery blobs.
//! - `<id>.torrent` keeps the descriptor bytes so a restart can re-add the torrent.
//! - Every write goes to a sibling temp file that is synced, renamed over the
//!   target, and followed by a directory sync.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use seedkeep_events::InfoHash;
use seedkeep_torrent_core::TrackerEntry;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::options::TorrentOptions;
use crate::session::DEFAULT_OWNER;

/// Registry snapshot file name.
pub const STATE_FILE: &str = "torrents.state";
/// Recovery-data map file name.
pub const RESUME_FILE: &str = "torrents.fastresume";
const DESCRIPTOR_EXTENSION: &str = "torrent";
const TEMP_SUFFIX: &str = ".new";

/// Persisted view of one torrent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TorrentRecord {
    /// Info hash of the torrent.
    pub torrent_id: InfoHash,
    /// Original descriptor filename supplied by the user.
    #[serde(default)]
    pub filename: String,
    /// Uploaded bytes carried across restarts.
    #[serde(default)]
    pub total_uploaded: u64,
    /// Tracker list at the time of the snapshot.
    #[serde(default)]
    pub trackers: Vec<TrackerEntry>,
    /// Whether the torrent was paused.
    #[serde(default)]
    pub paused: bool,
    /// Queue position, absent for finished seeds.
    #[serde(default)]
    pub queue: Option<u32>,
    /// Whether every wanted byte was downloaded.
    #[serde(default)]
    pub is_finished: bool,
    /// Unix timestamp of the last time a full copy was seen.
    #[serde(default)]
    pub last_seen_complete: i64,
    /// Owning account.
    #[serde(default = "default_owner")]
    pub owner: String,
    /// Magnet URI the torrent was added from, if any.
    #[serde(default)]
    pub magnet: Option<String>,
    /// When the torrent was first added.
    #[serde(default = "Utc::now")]
    pub time_added: DateTime<Utc>,
    /// Every option, flattened into the record.
    #[serde(flatten)]
    pub options: TorrentOptions,
}

fn default_owner() -> String {
    DEFAULT_OWNER.to_string()
}

/// Decode snapshot records, filling absent option keys from `defaults`.
///
/// Records that fail to decode are logged and skipped.
fn decode_records(entries: Vec<Value>, defaults: &TorrentOptions) -> Vec<TorrentRecord> {
    let base = match serde_json::to_value(defaults) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    entries
        .into_iter()
        .enumerate()
        .filter_map(|(position, entry)| {
            let mut merged = base.clone();
            if let Value::Object(fields) = entry {
                merged.extend(fields);
            }
            match serde_json::from_value::<TorrentRecord>(Value::Object(merged)) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(position, error = %err, "skipping unreadable torrent record");
                    None
                }
            }
        })
        .collect()
}

/// Reads and writes the artifacts under one state directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Store rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root state directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the registry snapshot.
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    /// Path of the recovery-data map.
    #[must_use]
    pub fn resume_path(&self) -> PathBuf {
        self.dir.join(RESUME_FILE)
    }

    /// Path of the descriptor kept for `id`.
    #[must_use]
    pub fn descriptor_path(&self, id: &InfoHash) -> PathBuf {
        self.dir.join(format!("{id}.{DESCRIPTOR_EXTENSION}"))
    }

    /// Create the state directory when missing.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::PersistenceIo`] when the directory cannot be created.
    pub async fn ensure_dir(&self) -> OrchestratorResult<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| OrchestratorError::io("create_state_dir", &self.dir, err))
    }

    /// Replace the registry snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error when the records cannot be encoded or written.
    pub async fn write_state(&self, records: &[TorrentRecord]) -> OrchestratorResult<()> {
        let path = self.state_path();
        let bytes = serde_json::to_vec_pretty(records).map_err(|source| {
            OrchestratorError::PersistenceFormat {
                artifact: "state",
                path: path.clone(),
                source,
            }
        })?;
        self.ensure_dir().await?;
        write_atomic(&path, &bytes)
            .await
            .map_err(|err| OrchestratorError::io("write_state", path, err))
    }

    /// Read the registry snapshot; a missing file yields no records.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or is not a
    /// JSON array.
    pub async fn read_state(&self, defaults: &TorrentOptions) -> OrchestratorResult<Vec<TorrentRecord>> {
        let path = self.state_path();
        let Some(bytes) = read_optional(&path)
            .await
            .map_err(|err| OrchestratorError::io("read_state", &path, err))?
        else {
            return Ok(Vec::new());
        };
        let entries: Vec<Value> =
            serde_json::from_slice(&bytes).map_err(|source| OrchestratorError::PersistenceFormat {
                artifact: "state",
                path,
                source,
            })?;
        Ok(decode_records(entries, defaults))
    }

    /// Read the recovery-data map; a missing file yields an empty map.
    ///
    /// Entries whose blob is not valid base64 are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    pub async fn read_resume_map(&self) -> OrchestratorResult<HashMap<InfoHash, Vec<u8>>> {
        let path = self.resume_path();
        let Some(bytes) = read_optional(&path)
            .await
            .map_err(|err| OrchestratorError::io("read_resume", &path, err))?
        else {
            return Ok(HashMap::new());
        };
        let encoded: BTreeMap<String, String> =
            serde_json::from_slice(&bytes).map_err(|source| OrchestratorError::PersistenceFormat {
                artifact: "resume",
                path,
                source,
            })?;
        let mut decoded = HashMap::with_capacity(encoded.len());
        for (key, blob) in encoded {
            let id = match key.parse::<InfoHash>() {
                Ok(id) => id,
                Err(err) => {
                    warn!(key = %key, error = %err, "skipping recovery entry with invalid id");
                    continue;
                }
            };
            match STANDARD.decode(blob.as_bytes()) {
                Ok(data) => {
                    decoded.insert(id, data);
                }
                Err(err) => warn!(torrent_id = %id, error = %err, "skipping undecodable recovery entry"),
            }
        }
        Ok(decoded)
    }

    /// Merge `batch` into the on-disk recovery map.
    ///
    /// # Errors
    ///
    /// Returns an error when the merged map cannot be written.
    pub async fn merge_resume_map(&self, batch: &HashMap<InfoHash, Vec<u8>>) -> OrchestratorResult<()> {
        let mut current = self.encoded_resume_map().await;
        for (id, data) in batch {
            current.insert(id.to_string(), STANDARD.encode(data));
        }
        self.write_resume_map(&current).await
    }

    /// Drop the recovery entry of `id` from disk.
    ///
    /// # Errors
    ///
    /// Returns an error when the updated map cannot be written.
    pub async fn remove_resume_entry(&self, id: &InfoHash) -> OrchestratorResult<()> {
        let mut current = self.encoded_resume_map().await;
        if current.remove(id.as_str()).is_none() {
            return Ok(());
        }
        self.write_resume_map(&current).await
    }

    /// Persist descriptor bytes for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::PersistenceIo`] when the write fails.
    pub async fn write_descriptor(&self, id: &InfoHash, bytes: &[u8]) -> OrchestratorResult<()> {
        let path = self.descriptor_path(id);
        self.ensure_dir().await?;
        write_atomic(&path, bytes)
            .await
            .map_err(|err| OrchestratorError::io("write_descriptor", path, err))
    }

    /// Descriptor bytes kept for `id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::PersistenceIo`] when the file exists but cannot be read.
    pub async fn read_descriptor(&self, id: &InfoHash) -> OrchestratorResult<Option<Vec<u8>>> {
        let path = self.descriptor_path(id);
        read_optional(&path)
            .await
            .map_err(|err| OrchestratorError::io("read_descriptor", path, err))
    }

    /// Delete the descriptor kept for `id`; a missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::PersistenceIo`] when deletion fails.
    pub async fn delete_descriptor(&self, id: &InfoHash) -> OrchestratorResult<()> {
        let path = self.descriptor_path(id);
        remove_optional(&path)
            .await
            .map_err(|err| OrchestratorError::io("delete_descriptor", path, err))
    }

    async fn encoded_resume_map(&self) -> BTreeMap<String, String> {
        let path = self.resume_path();
        match read_optional(&path).await {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                warn!(path = %path.display(), error = %err, "replacing unreadable recovery map");
                BTreeMap::new()
            }),
            Ok(None) => BTreeMap::new(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "recovery map unreadable; rewriting");
                BTreeMap::new()
            }
        }
    }

    async fn write_resume_map(&self, map: &BTreeMap<String, String>) -> OrchestratorResult<()> {
        let path = self.resume_path();
        let bytes = serde_json::to_vec(map).map_err(|source| OrchestratorError::PersistenceFormat {
            artifact: "resume",
            path: path.clone(),
            source,
        })?;
        self.ensure_dir().await?;
        write_atomic(&path, &bytes)
            .await
            .map_err(|err| OrchestratorError::io("write_resume", path, err))
    }
}

/// Write `bytes` to `path` through a synced temp file and rename.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(TEMP_SUFFIX);
    let temp = PathBuf::from(temp);

    let mut file = File::create(&temp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&temp, path).await?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fsync_dir(parent).await?;
    }
    Ok(())
}

/// Sync a directory so renames and new entries survive a crash.
async fn fsync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir).await?.sync_all().await
}

async fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Remove a file, treating an already missing file as success.
pub(crate) async fn remove_optional(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use seedkeep_test_support::info_hash;
    use tempfile::tempdir;

    fn record(seed: u8, queue: Option<u32>) -> TorrentRecord {
        TorrentRecord {
            torrent_id: info_hash(seed),
            filename: format!("{seed}.torrent"),
            total_uploaded: 42,
            trackers: vec![TrackerEntry::new("http://tracker.example/announce", 0)],
            paused: false,
            queue,
            is_finished: false,
            last_seen_complete: 0,
            owner: DEFAULT_OWNER.to_string(),
            magnet: None,
            time_added: Utc::now(),
            options: TorrentOptions::default(),
        }
    }

    #[tokio::test]
    async fn state_round_trips_and_missing_file_is_empty() -> Result<()> {
        let dir = tempdir()?;
        let store = StateStore::new(dir.path().join("state"));
        assert!(store.read_state(&TorrentOptions::default()).await?.is_empty());

        let records = vec![record(1, Some(0)), record(2, None)];
        store.write_state(&records).await?;
        let restored = store.read_state(&TorrentOptions::default()).await?;
        assert_eq!(restored, records);
        assert!(!dir.path().join("state").join("torrents.state.new").exists());
        Ok(())
    }

    #[tokio::test]
    async fn missing_record_fields_take_supplied_defaults() -> Result<()> {
        let dir = tempdir()?;
        let store = StateStore::new(dir.path());
        let id = info_hash(3);
        let partial = serde_json::json!([
            { "torrent_id": id.as_str(), "stop_ratio": 4.0 },
            { "filename": "no-id.torrent" }
        ]);
        write_atomic(&store.state_path(), &serde_json::to_vec(&partial)?).await?;

        let defaults = TorrentOptions {
            max_connections: 77,
            ..TorrentOptions::default()
        };
        let restored = store.read_state(&defaults).await?;
        assert_eq!(restored.len(), 1);
        let only = &restored[0];
        assert_eq!(only.torrent_id, id);
        assert_eq!(only.options.max_connections, 77);
        assert!((only.options.stop_ratio - 4.0).abs() < f64::EPSILON);
        assert_eq!(only.owner, DEFAULT_OWNER);
        assert!(only.queue.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn resume_map_merges_and_skips_bad_entries() -> Result<()> {
        let dir = tempdir()?;
        let store = StateStore::new(dir.path());
        let first = info_hash(1);
        let second = info_hash(2);

        store
            .merge_resume_map(&HashMap::from([(first.clone(), b"one".to_vec())]))
            .await?;
        store
            .merge_resume_map(&HashMap::from([(second.clone(), b"two".to_vec())]))
            .await?;
        let map = store.read_resume_map().await?;
        assert_eq!(map.get(&first), Some(&b"one".to_vec()));
        assert_eq!(map.get(&second), Some(&b"two".to_vec()));

        store.remove_resume_entry(&first).await?;
        assert!(!store.read_resume_map().await?.contains_key(&first));

        let corrupt = serde_json::json!({ second.as_str(): "***", "zz": "AAAA" });
        write_atomic(&store.resume_path(), &serde_json::to_vec(&corrupt)?).await?;
        assert!(store.read_resume_map().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn descriptors_are_written_and_deleted() -> Result<()> {
        let dir = tempdir()?;
        let store = StateStore::new(dir.path());
        let id = info_hash(5);
        store.write_descriptor(&id, b"bytes").await?;
        assert_eq!(store.read_descriptor(&id).await?, Some(b"bytes".to_vec()));
        store.delete_descriptor(&id).await?;
        store.delete_descriptor(&id).await?;
        assert_eq!(store.read_descriptor(&id).await?, None);
        Ok(())
    }
}
