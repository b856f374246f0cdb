//! Redis-backed snapshot store.

use super::SnapshotStore;
use crate::error::{LedgerError, Result};
use parking_lot::Mutex;
use redis::Commands;
use std::time::Duration;
use tracing::{debug, warn};

/// Connect, read and write timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Snapshot store over a Redis server, using `GET` and `SET key value EX ttl`.
///
/// The connection is opened on first use and dropped after any command
/// error, so the next call reconnects. Every failure surfaces as
/// [`LedgerError::StoreUnavailable`].
pub struct RedisSnapshotStore {
    client: redis::Client,
    connection: Mutex<Option<redis::Connection>>,
    timeout: Duration,
}

impl RedisSnapshotStore {
    /// Parse `url` (`redis://host:port/db`). Does not connect.
    pub fn open(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| LedgerError::Configuration(format!("invalid redis url: {}", e)))?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn connect(&self) -> Result<redis::Connection> {
        let conn = self
            .client
            .get_connection_with_timeout(self.timeout)
            .map_err(unavailable)?;
        conn.set_read_timeout(Some(self.timeout)).map_err(unavailable)?;
        conn.set_write_timeout(Some(self.timeout)).map_err(unavailable)?;
        debug!("connected to redis");
        Ok(conn)
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    ) -> Result<T> {
        let mut slot = self.connection.lock();
        if slot.is_none() {
            *slot = Some(self.connect()?);
        }
        let result = match slot.as_mut() {
            Some(conn) => op(conn),
            None => return Err(LedgerError::StoreUnavailable("not connected".into())),
        };

        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(error = %e, "redis command failed, dropping connection");
                *slot = None;
                Err(unavailable(e))
            }
        }
    }
}

impl SnapshotStore for RedisSnapshotStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.with_connection(|conn| conn.get::<_, Option<Vec<u8>>>(key))
    }

    fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        // EX rejects zero.
        let seconds = ttl.as_secs().max(1);
        self.with_connection(|conn| conn.set_ex::<_, _, ()>(key, value, seconds))
    }
}

fn unavailable(e: redis::RedisError) -> LedgerError {
    LedgerError::StoreUnavailable(e.to_string())
}
