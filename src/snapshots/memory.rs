//! In-process snapshot store.

use super::SnapshotStore;
use crate::error::Result;
use crate::schedule::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: DateTime<Utc>,
}

/// Snapshot store backed by a `HashMap`, with expiry measured on an injected clock.
pub struct MemorySnapshotStore {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    writes: AtomicU64,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            writes: AtomicU64::new(0),
        }
    }

    /// Total `set_with_expiry` calls served.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Live (unexpired) keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = self.clock.now();
        let mut keys: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(_, e)| e.expires_at > now)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }
}

impl Default for MemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = self.clock.now();
        Ok(self
            .entries
            .read()
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.clone()))
    }

    fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let expires_at = expiry_after(self.clock.now(), ttl);
        self.entries.write().insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at,
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// `now + ttl`, saturating at the maximum representable instant.
pub(super) fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::ManualClock;
    use chrono::TimeZone;

    fn store() -> (Arc<ManualClock>, MemorySnapshotStore) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap(),
        ));
        let store = MemorySnapshotStore::with_clock(clock.clone());
        (clock, store)
    }

    #[test]
    fn test_get_missing() {
        let (_, store) = store();
        assert!(store.get("c1:2024-7").unwrap().is_none());
    }

    #[test]
    fn test_set_overwrites() {
        let (_, store) = store();
        store.set_with_expiry("k", b"one", Duration::from_secs(60)).unwrap();
        store.set_with_expiry("k", b"two", Duration::from_secs(60)).unwrap();
        assert_eq!(store.get("k").unwrap().unwrap(), b"two");
        assert_eq!(store.write_count(), 2);
    }

    #[test]
    fn test_expiry() {
        let (clock, store) = store();
        store.set_with_expiry("k", b"v", Duration::from_secs(60)).unwrap();

        clock.advance(chrono::Duration::seconds(59));
        assert!(store.get("k").unwrap().is_some());

        clock.advance(chrono::Duration::seconds(1));
        assert!(store.get("k").unwrap().is_none());
        assert!(store.keys().is_empty());
        assert_eq!(store.purge_expired(), 1);
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let (_, store) = store();
        store.set_with_expiry("k", b"v", Duration::from_secs(u64::MAX)).unwrap();
        assert!(store.get("k").unwrap().is_some());
    }
}
