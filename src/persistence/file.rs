//! File Store
//!
//! Two-file JSON snapshots: `<stem>.json` holds the value, `<stem>.meta.json`
//! holds its expiration.

use std::fs;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{ExpirationPolicy, FullKey};
use crate::error::{PersistenceError, PersistenceResult};
use crate::persistence::{PersistenceOptions, PersistentStore};

const SNAPSHOT_SUFFIX: &str = ".json";
const META_SUFFIX: &str = ".meta.json";

// == Snapshot Metadata ==
/// Expiration record written next to each snapshot.
///
/// Reads of the in-memory entry never touch the files, so a sliding window
/// is measured from the last write (populate or refresh), not the last read.
/// A sweep may therefore delete the snapshot of an entry that is still being
/// read from memory; the entry is then written again on its next refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotMeta {
    group: String,
    key: String,
    written_at: DateTime<Utc>,
    /// `None` never expires
    expires_at: Option<DateTime<Utc>>,
    /// Sliding window the deadline was derived from, if any
    #[serde(default)]
    sliding_window_ms: Option<u64>,
}

impl SnapshotMeta {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

// == File Store ==
/// [`PersistentStore`] writing JSON snapshots into one directory.
#[derive(Debug)]
pub struct FileStore<V> {
    base_directory: PathBuf,
    max_file_size: u64,
    _values: PhantomData<fn() -> V>,
}

impl<V> FileStore<V>
where
    V: Serialize + DeserializeOwned,
{
    /// Opens (creating if needed) the snapshot directory.
    pub fn open(options: &PersistenceOptions) -> PersistenceResult<Self> {
        fs::create_dir_all(&options.base_directory)?;
        info!(
            "Persistence: snapshots in {} (max {} bytes)",
            options.base_directory.display(),
            options.max_file_size
        );
        Ok(Self {
            base_directory: options.base_directory.clone(),
            max_file_size: options.max_file_size,
            _values: PhantomData,
        })
    }

    pub fn base_directory(&self) -> &Path {
        &self.base_directory
    }

    fn snapshot_path(&self, key: &FullKey) -> PathBuf {
        self.base_directory
            .join(format!("{}{}", key.file_stem(), SNAPSHOT_SUFFIX))
    }

    fn meta_path(&self, key: &FullKey) -> PathBuf {
        self.base_directory
            .join(format!("{}{}", key.file_stem(), META_SUFFIX))
    }

    fn read_meta(path: &Path) -> PersistenceResult<SnapshotMeta> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Writes through a temporary file so readers never see a torn snapshot.
fn write_atomic(path: &Path, bytes: &[u8]) -> PersistenceResult<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn remove_if_present(path: &Path) -> PersistenceResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

impl<V> PersistentStore<V> for FileStore<V>
where
    V: Serialize + DeserializeOwned,
{
    fn load(&self, key: &FullKey) -> PersistenceResult<Option<V>> {
        let meta_path = self.meta_path(key);
        let meta = match Self::read_meta(&meta_path) {
            Ok(meta) => meta,
            Err(PersistenceError::Io(err)) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        if meta.is_expired(Utc::now()) {
            debug!("Persistence: snapshot for {} expired, deleting", key);
            self.delete(key)?;
            return Ok(None);
        }

        let bytes = match fs::read(self.snapshot_path(key)) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn save(&self, key: &FullKey, value: &V, expiration: &ExpirationPolicy) -> PersistenceResult<()> {
        let bytes = serde_json::to_vec(value)?;
        let size = bytes.len() as u64;
        if size > self.max_file_size {
            // An older snapshot would now be stale
            self.delete(key)?;
            return Err(PersistenceError::TooLarge {
                key: key.to_string(),
                size,
                max: self.max_file_size,
            });
        }

        let now = Utc::now();
        let meta = SnapshotMeta {
            group: key.group().to_string(),
            key: key.key().to_string(),
            written_at: now,
            expires_at: expiration.deadline(now),
            sliding_window_ms: expiration
                .sliding
                .map(|window| u64::try_from(window.as_millis()).unwrap_or(u64::MAX)),
        };
        write_atomic(&self.snapshot_path(key), &bytes)?;
        write_atomic(&self.meta_path(key), &serde_json::to_vec(&meta)?)?;
        Ok(())
    }

    fn delete(&self, key: &FullKey) -> PersistenceResult<()> {
        remove_if_present(&self.snapshot_path(key))?;
        remove_if_present(&self.meta_path(key))?;
        Ok(())
    }

    fn sweep_expired(&self) -> PersistenceResult<usize> {
        let now = Utc::now();
        let mut removed = 0;

        for dir_entry in fs::read_dir(&self.base_directory)? {
            let path = dir_entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(stem) = name.strip_suffix(META_SUFFIX) else {
                continue;
            };

            let expired = match Self::read_meta(&path) {
                Ok(meta) => meta.is_expired(now),
                Err(err) => {
                    warn!("Persistence: unreadable metadata {}: {}", path.display(), err);
                    true
                }
            };
            if expired {
                let snapshot = self.base_directory.join(format!("{}{}", stem, SNAPSHOT_SUFFIX));
                remove_if_present(&snapshot)?;
                remove_if_present(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
