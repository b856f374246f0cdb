//! Expiring key-value persistence for closed-period snapshots.
//!
//! The rollover engine and query service only see [`SnapshotStore`]: a
//! get / set-with-expiry capability over string keys of the form
//! `scope:period`. A write for an existing key replaces it whole.
//!
//! Implementations shipped with the crate:
//! - [`RedisSnapshotStore`]: a Redis server, `GET` / `SET EX`
//! - [`MemorySnapshotStore`]: in-process map, for tests and embedding
//! - [`FileSnapshotStore`]: one checksummed file per key, sharded by the
//!   first byte of the key's SHA-256 (like Git objects)

mod file;
mod memory;
mod redis_store;

pub use file::FileSnapshotStore;
pub use memory::MemorySnapshotStore;
pub use redis_store::RedisSnapshotStore;

use crate::accumulator::TallyState;
use crate::error::{LedgerError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// A get / set-with-expiry store.
///
/// Failures reaching the backing store surface as
/// [`LedgerError::StoreUnavailable`](crate::LedgerError::StoreUnavailable)
/// or [`LedgerError::Io`](crate::LedgerError::Io), both retryable.
pub trait SnapshotStore: Send + Sync {
    /// Fetch the bytes stored under `key`, or `None` when absent or expired.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value, expiring after `ttl`.
    fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;
}

/// Fetch and decode the snapshot under `key`.
pub fn read_snapshot(store: &dyn SnapshotStore, key: &str) -> Result<Option<TallyState>> {
    decode_snapshot(key, store.get(key))
}

/// Decode the result of a `get` on `key`.
///
/// Damaged files and undecodable payloads are logged and read as absent.
/// Store failures are passed through.
pub fn decode_snapshot(key: &str, fetched: Result<Option<Vec<u8>>>) -> Result<Option<TallyState>> {
    let bytes = match fetched {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return Ok(None),
        Err(e) if e.is_corruption() => {
            warn!(key, error = %e, "ignoring damaged snapshot");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    match TallyState::from_bytes(&bytes) {
        Ok(state) => Ok(Some(state)),
        Err(e) => {
            let err = LedgerError::MalformedSnapshot {
                key: key.to_string(),
                reason: e.to_string(),
            };
            warn!(error = %err, "ignoring unreadable snapshot");
            Ok(None)
        }
    }
}

/// Open the store named by a configuration URL.
///
/// Supported: `redis://` / `rediss://` (connects lazily), `memory://` and
/// `file:///absolute/path`.
pub fn open_url(url: &str, cache_size: usize) -> Result<Arc<dyn SnapshotStore>> {
    let url = url.trim();
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        return Ok(Arc::new(RedisSnapshotStore::open(url)?));
    }
    if url == "memory://" {
        return Ok(Arc::new(MemorySnapshotStore::new()));
    }
    if let Some(path) = url.strip_prefix("file://") {
        if path.is_empty() {
            return Err(LedgerError::Configuration("file store url has no path".into()));
        }
        return Ok(Arc::new(FileSnapshotStore::open(path, cache_size)?));
    }
    Err(LedgerError::Configuration(format!(
        "unsupported snapshot store url: {}",
        url
    )))
}
