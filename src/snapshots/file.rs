//! File-backed snapshot store.

use super::memory::expiry_after;
use super::SnapshotStore;
use crate::error::{LedgerError, Result};
use crate::schedule::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Magic bytes for snapshot files.
const SNAPSHOT_MAGIC: &[u8; 4] = b"TSN\0";

/// Current snapshot file format version.
const SNAPSHOT_VERSION: u8 = 1;

/// Magic, version, expiry and key length.
const HEADER_LEN: u64 = 4 + 1 + 8 + 2;

const VALUE_LEN_FIELD: u64 = 8;

const CHECKSUM_LEN: u64 = 4;

/// Cached file contents.
#[derive(Clone)]
struct CachedSnapshot {
    value: Vec<u8>,
    expires_at: DateTime<Utc>,
}

/// Snapshot store keeping one file per key.
///
/// File layout: magic, version, expiry (unix micros, i64 LE), key length
/// (u16 LE), key, value length (u64 LE), value, CRC32 of value (u32 LE).
/// Writes go to a temporary file renamed into place, so readers never see
/// a half-written snapshot.
pub struct FileSnapshotStore {
    /// Base directory.
    path: PathBuf,

    /// Exclusive lock on the directory.
    _lock_file: File,

    /// Recently read or written snapshots.
    cache: Mutex<LruCache<String, CachedSnapshot>>,

    clock: Arc<dyn Clock>,
}

impl FileSnapshotStore {
    /// Open (creating if needed) a store rooted at `path`.
    pub fn open(path: impl AsRef<Path>, cache_size: usize) -> Result<Self> {
        Self::open_with_clock(path, cache_size, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        path: impl AsRef<Path>,
        cache_size: usize,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;
        let lock_file = Self::acquire_lock(&path)?;

        let cache_size = NonZeroUsize::new(cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            path,
            _lock_file: lock_file,
            cache: Mutex::new(LruCache::new(cache_size)),
            clock,
        })
    }

    /// Remove every expired snapshot file. Returns how many were deleted.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut removed = 0;

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            for file_entry in fs::read_dir(entry.path())? {
                let file_path = file_entry?.path();
                if file_path.extension().is_some() {
                    continue;
                }
                let expired = match Self::read_file(&file_path) {
                    Ok((_, _, expires_at)) => expires_at <= now,
                    Err(LedgerError::Io(e)) => return Err(LedgerError::Io(e)),
                    Err(_) => false,
                };
                if expired {
                    fs::remove_file(&file_path)?;
                    removed += 1;
                }
            }
        }

        self.cache.lock().clear();
        Ok(removed)
    }

    /// Keys of all unexpired snapshots, sorted.
    pub fn keys(&self) -> Result<Vec<String>> {
        let now = self.clock.now();
        let mut keys = Vec::new();

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            for file_entry in fs::read_dir(entry.path())? {
                let file_path = file_entry?.path();
                if file_path.extension().is_some() {
                    continue;
                }
                if let Ok((key, _, expires_at)) = Self::read_file(&file_path) {
                    if expires_at > now {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn key_hash(key: &str) -> String {
        hex::encode(Sha256::digest(key.as_bytes()))
    }

    /// Get the shard directory for a key.
    fn shard_path(&self, hash: &str) -> PathBuf {
        self.path.join(&hash[..2])
    }

    /// Get the full path for a key.
    fn file_path(&self, key: &str) -> PathBuf {
        let hash = Self::key_hash(key);
        self.shard_path(&hash).join(hash)
    }

    fn write_file(path: &Path, key: &str, value: &[u8], expires_at: DateTime<Utc>) -> Result<()> {
        let tmp_path = path.with_extension("tmp");
        let mut file = File::create(&tmp_path)?;

        // Header
        file.write_all(SNAPSHOT_MAGIC)?;
        file.write_all(&[SNAPSHOT_VERSION])?;
        file.write_all(&expires_at.timestamp_micros().to_le_bytes())?;

        // Key
        let key_bytes = key.as_bytes();
        let key_len = u16::try_from(key_bytes.len())
            .map_err(|_| LedgerError::InvalidFormat(format!("key too long: {} bytes", key_bytes.len())))?;
        file.write_all(&key_len.to_le_bytes())?;
        file.write_all(key_bytes)?;

        // Value
        file.write_all(&(value.len() as u64).to_le_bytes())?;
        file.write_all(value)?;

        // Checksum
        file.write_all(&crc32fast::hash(value).to_le_bytes())?;

        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Read a snapshot file: (key, value, expiry).
    ///
    /// Length fields are checked against the file size before anything is
    /// allocated, so a damaged header reads as `InvalidFormat`.
    fn read_file(path: &Path) -> Result<(String, Vec<u8>, DateTime<Utc>)> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < HEADER_LEN + VALUE_LEN_FIELD + CHECKSUM_LEN {
            return Err(LedgerError::InvalidFormat(format!(
                "Snapshot file too short: {} bytes",
                file_len
            )));
        }

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != SNAPSHOT_MAGIC {
            return Err(LedgerError::InvalidFormat("Invalid snapshot magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != SNAPSHOT_VERSION {
            return Err(LedgerError::InvalidFormat(format!(
                "Unsupported snapshot version: {}",
                version[0]
            )));
        }

        let mut expiry_bytes = [0u8; 8];
        file.read_exact(&mut expiry_bytes)?;
        let expires_at = DateTime::<Utc>::from_timestamp_micros(i64::from_le_bytes(expiry_bytes))
            .ok_or_else(|| LedgerError::InvalidFormat("Invalid expiry timestamp".into()))?;

        let mut key_len_bytes = [0u8; 2];
        file.read_exact(&mut key_len_bytes)?;
        let key_len = u64::from(u16::from_le_bytes(key_len_bytes));
        if HEADER_LEN + key_len + VALUE_LEN_FIELD + CHECKSUM_LEN > file_len {
            return Err(LedgerError::InvalidFormat(format!(
                "Key length {} exceeds file size {}",
                key_len, file_len
            )));
        }
        let mut key_bytes = vec![0u8; key_len as usize];
        file.read_exact(&mut key_bytes)?;
        let key = String::from_utf8_lossy(&key_bytes).into_owned();

        let mut value_len_bytes = [0u8; 8];
        file.read_exact(&mut value_len_bytes)?;
        let value_len = u64::from_le_bytes(value_len_bytes);
        let expected_len = (HEADER_LEN + key_len + VALUE_LEN_FIELD + CHECKSUM_LEN)
            .checked_add(value_len);
        if expected_len != Some(file_len) {
            return Err(LedgerError::InvalidFormat(format!(
                "Value length {} does not match file size {}",
                value_len, file_len
            )));
        }
        let mut value = vec![0u8; value_len as usize];
        file.read_exact(&mut value)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored = u32::from_le_bytes(checksum_bytes);
        let computed = crc32fast::hash(&value);
        if stored != computed {
            return Err(LedgerError::ChecksumMismatch {
                expected: stored,
                got: computed,
            });
        }

        Ok((key, value, expires_at))
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| LedgerError::Locked)?;
        Ok(lock_file)
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = self.clock.now();

        if let Some(cached) = self.cache.lock().get(key).cloned() {
            if cached.expires_at > now {
                return Ok(Some(cached.value));
            }
        }

        let path = self.file_path(key);
        let (stored_key, value, expires_at) = match Self::read_file(&path) {
            Ok(contents) => contents,
            Err(LedgerError::Io(e)) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        if stored_key != key {
            return Err(LedgerError::InvalidFormat(format!(
                "Snapshot file for {:?} holds key {:?}",
                key, stored_key
            )));
        }

        if expires_at <= now {
            debug!(key, "removing expired snapshot");
            self.cache.lock().pop(key);
            fs::remove_file(&path)?;
            return Ok(None);
        }

        self.cache.lock().put(
            key.to_string(),
            CachedSnapshot {
                value: value.clone(),
                expires_at,
            },
        );
        Ok(Some(value))
    }

    fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let expires_at = expiry_after(self.clock.now(), ttl);
        let path = self.file_path(key);
        if let Some(shard) = path.parent() {
            fs::create_dir_all(shard)?;
        }

        Self::write_file(&path, key, value, expires_at)?;

        self.cache.lock().put(
            key.to_string(),
            CachedSnapshot {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }
}
