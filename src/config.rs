//! Runtime configuration.

use crate::error::{LedgerError, Result};
use crate::types::ScopeId;
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DAY_SECS: u64 = 24 * 60 * 60;

/// Six 30-day months.
const DEFAULT_MONTHLY_TTL_SECS: u64 = 6 * 30 * DAY_SECS;

/// Two years.
const DEFAULT_YEARLY_TTL_SECS: u64 = 2 * 365 * DAY_SECS;

const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;

/// Five minutes after local midnight.
const DEFAULT_GRACE_WINDOW_SECS: u64 = 5 * 60;

const DEFAULT_FILE_CACHE_SIZE: usize = 64;

/// Service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Channels whose activity is tallied. Everything else is ignored.
    #[serde(default)]
    pub allowed_scopes: Vec<ScopeId>,

    /// Snapshot store location: `redis://host:port/db`, `memory://` or `file:///path`.
    #[serde(default)]
    pub store_url: String,

    /// Reference timezone as a fixed offset from UTC, in minutes.
    ///
    /// No daylight saving rules apply: in a zone that observes DST the
    /// boundaries land an hour off for part of the year.
    #[serde(default)]
    pub utc_offset_minutes: i32,

    /// Retention of monthly snapshots.
    #[serde(default = "default_monthly_ttl_secs")]
    pub monthly_ttl_secs: u64,

    /// Retention of yearly aggregates.
    #[serde(default = "default_yearly_ttl_secs")]
    pub yearly_ttl_secs: u64,

    /// Seconds between boundary checks.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// How long after local midnight a boundary still triggers.
    #[serde(default = "default_grace_window_secs")]
    pub grace_window_secs: u64,

    /// LRU size of the file store's read cache.
    #[serde(default = "default_file_cache_size")]
    pub file_cache_size: usize,
}

fn default_monthly_ttl_secs() -> u64 {
    DEFAULT_MONTHLY_TTL_SECS
}

fn default_yearly_ttl_secs() -> u64 {
    DEFAULT_YEARLY_TTL_SECS
}

fn default_tick_interval_secs() -> u64 {
    DEFAULT_TICK_INTERVAL_SECS
}

fn default_grace_window_secs() -> u64 {
    DEFAULT_GRACE_WINDOW_SECS
}

fn default_file_cache_size() -> usize {
    DEFAULT_FILE_CACHE_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            allowed_scopes: Vec::new(),
            store_url: String::new(),
            utc_offset_minutes: 0,
            monthly_ttl_secs: DEFAULT_MONTHLY_TTL_SECS,
            yearly_ttl_secs: DEFAULT_YEARLY_TTL_SECS,
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
            grace_window_secs: DEFAULT_GRACE_WINDOW_SECS,
            file_cache_size: DEFAULT_FILE_CACHE_SIZE,
        }
    }
}

impl Config {
    /// Load from process environment variables. See [`Config::from_lookup`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from a variable lookup.
    ///
    /// `CHANNEL_ID` (comma-separated) and `REDIS_URL` are required.
    /// Optional: `TALLY_UTC_OFFSET_MINUTES`, `TALLY_MONTHLY_TTL_SECS`,
    /// `TALLY_YEARLY_TTL_SECS`, `TALLY_TICK_INTERVAL_SECS`,
    /// `TALLY_GRACE_WINDOW_SECS`, `TALLY_FILE_CACHE_SIZE`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config {
            allowed_scopes: parse_scope_list(&lookup("CHANNEL_ID").unwrap_or_default()),
            store_url: lookup("REDIS_URL").unwrap_or_default(),
            ..Config::default()
        };

        if let Some(v) = lookup("TALLY_UTC_OFFSET_MINUTES") {
            config.utc_offset_minutes = parse_var("TALLY_UTC_OFFSET_MINUTES", &v)?;
        }
        if let Some(v) = lookup("TALLY_MONTHLY_TTL_SECS") {
            config.monthly_ttl_secs = parse_var("TALLY_MONTHLY_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("TALLY_YEARLY_TTL_SECS") {
            config.yearly_ttl_secs = parse_var("TALLY_YEARLY_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("TALLY_TICK_INTERVAL_SECS") {
            config.tick_interval_secs = parse_var("TALLY_TICK_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("TALLY_GRACE_WINDOW_SECS") {
            config.grace_window_secs = parse_var("TALLY_GRACE_WINDOW_SECS", &v)?;
        }
        if let Some(v) = lookup("TALLY_FILE_CACHE_SIZE") {
            config.file_cache_size = parse_var("TALLY_FILE_CACHE_SIZE", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Check required settings. Missing ones are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        if self.allowed_scopes.is_empty() {
            return Err(LedgerError::Configuration(
                "no allowed scopes configured".into(),
            ));
        }
        if self.store_url.trim().is_empty() {
            return Err(LedgerError::Configuration("store url is empty".into()));
        }
        if self.tick_interval_secs == 0 {
            return Err(LedgerError::Configuration(
                "tick interval must be positive".into(),
            ));
        }
        if self.grace_window_secs < self.tick_interval_secs {
            return Err(LedgerError::Configuration(format!(
                "grace window ({}s) shorter than tick interval ({}s) could miss a boundary",
                self.grace_window_secs, self.tick_interval_secs
            )));
        }
        self.offset()?;
        Ok(())
    }

    pub fn is_allowed(&self, scope: &ScopeId) -> bool {
        self.allowed_scopes.contains(scope)
    }

    /// The reference timezone.
    pub fn offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            LedgerError::Configuration(format!(
                "utc offset {} minutes out of range",
                self.utc_offset_minutes
            ))
        })
    }

    pub fn monthly_ttl(&self) -> Duration {
        Duration::from_secs(self.monthly_ttl_secs)
    }

    pub fn yearly_ttl(&self) -> Duration {
        Duration::from_secs(self.yearly_ttl_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn grace_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.grace_window_secs as i64)
    }
}

/// Split a comma-separated scope list, dropping blanks.
pub fn parse_scope_list(s: &str) -> Vec<ScopeId> {
    s.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(ScopeId::from)
        .collect()
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        LedgerError::Configuration(format!("{} has invalid value {:?}", name, value))
    })
}
