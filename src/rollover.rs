//! Closing periods: persist, announce, reset.
//!
//! Ordering per scope is fixed: snapshot, persist, announce, reset, all
//! under the scope's lock. A crash after persisting but before resetting
//! only causes the same snapshot to be written again on the next tick of
//! the grace window; the reverse order could lose a month, so reset never
//! runs unless the store acknowledged the write.

use crate::accumulator::{Accumulator, TallyState};
use crate::error::Result;
use crate::report::render;
use crate::sink::OutboundSink;
use crate::snapshots::{decode_snapshot, SnapshotStore};
use crate::types::{snapshot_key, Period, ScopeId};
use chrono::{DateTime, Datelike, TimeZone};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Backoff schedule for rollover persistence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before each retry; its length is the retry count.
    pub backoff: Vec<Duration>,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self { backoff: Vec::new() }
    }

    /// Run `op`, retrying retryable errors per the schedule.
    pub fn run<T>(&self, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.backoff.len() => {
                    let delay = self.backoff[attempt];
                    attempt += 1;
                    warn!(
                        what,
                        attempt,
                        max_attempts = self.backoff.len() + 1,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after store failure"
                    );
                    thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: vec![
                Duration::from_millis(50),
                Duration::from_millis(200),
                Duration::from_millis(500),
            ],
        }
    }
}

/// Rollover engine settings.
#[derive(Clone, Debug)]
pub struct RolloverConfig {
    pub monthly_ttl: Duration,
    pub yearly_ttl: Duration,
    pub retry: RetryPolicy,
}

/// What a rollover did, per scope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RolloverSummary {
    /// The period that was closed.
    pub period: Period,
    /// Scopes whose snapshot was written.
    pub persisted: Vec<ScopeId>,
    /// Scopes with nothing to do (empty, or already closed).
    pub skipped: Vec<ScopeId>,
    /// Scopes that could not be closed, with the error.
    pub failed: Vec<(ScopeId, String)>,
}

impl RolloverSummary {
    fn new(period: Period) -> Self {
        Self {
            period,
            persisted: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

enum ScopeOutcome {
    Persisted,
    Skipped,
}

/// Closes monthly and yearly periods.
pub struct RolloverEngine {
    accumulator: Arc<Accumulator>,
    store: Arc<dyn SnapshotStore>,
    sink: Arc<dyn OutboundSink>,
    /// Scopes that get a yearly report even without activity.
    known_scopes: Vec<ScopeId>,
    config: RolloverConfig,
}

impl RolloverEngine {
    pub fn new(
        accumulator: Arc<Accumulator>,
        store: Arc<dyn SnapshotStore>,
        sink: Arc<dyn OutboundSink>,
        known_scopes: Vec<ScopeId>,
        config: RolloverConfig,
    ) -> Self {
        Self {
            accumulator,
            store,
            sink,
            known_scopes,
            config,
        }
    }

    /// Close the month preceding the one `now` falls in.
    pub fn monthly_rollover<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> RolloverSummary {
        self.close_month(Period::containing(now).prev())
    }

    /// Persist, announce and reset every scope with activity, keyed by `period`.
    pub fn close_month(&self, period: Period) -> RolloverSummary {
        let mut summary = RolloverSummary::new(period);

        for scope in self.accumulator.scopes() {
            match self.close_scope_month(&scope, period) {
                Ok(ScopeOutcome::Persisted) => summary.persisted.push(scope),
                Ok(ScopeOutcome::Skipped) => summary.skipped.push(scope),
                Err(e) => {
                    error!(scope = %scope, period = %period, error = %e, "monthly rollover failed, counters kept");
                    summary.failed.push((scope, e.to_string()));
                }
            }
        }

        info!(
            period = %period,
            persisted = summary.persisted.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            "monthly rollover finished"
        );
        summary
    }

    fn close_scope_month(&self, scope: &ScopeId, period: Period) -> Result<ScopeOutcome> {
        let key = snapshot_key(scope, period);

        self.accumulator.with_scope(scope, |state| {
            if state.is_empty() {
                debug!(scope = %scope, period = %period, "nothing to roll over");
                return Ok(ScopeOutcome::Skipped);
            }

            let bytes = state.to_bytes()?;
            self.config.retry.run(&key, || {
                self.store.set_with_expiry(&key, &bytes, self.config.monthly_ttl)
            })?;

            self.announce(scope, &render(state, &period.key()));
            state.clear();
            info!(scope = %scope, period = %period, "month closed");
            Ok(ScopeOutcome::Persisted)
        })
    }

    /// Close the year preceding the one `now` falls in.
    pub fn yearly_rollover<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> RolloverSummary {
        self.close_year(now.year() - 1)
    }

    /// Merge the twelve monthly snapshots of `year` for every known scope.
    pub fn close_year(&self, year: i32) -> RolloverSummary {
        self.close_year_deferring(year, &[])
    }

    /// Like [`close_year`](Self::close_year), but scopes in `deferred` are
    /// reported as failed without being merged.
    ///
    /// Used on January 1st for scopes whose December could not be
    /// persisted: the aggregate doubles as the done marker, so writing it
    /// early would leave December out for good.
    pub fn close_year_deferring(&self, year: i32, deferred: &[ScopeId]) -> RolloverSummary {
        let period = Period::yearly(year);
        let mut summary = RolloverSummary::new(period);

        for scope in self.yearly_scopes() {
            if deferred.contains(&scope) {
                warn!(scope = %scope, period = %period, "yearly rollover deferred until the last month is persisted");
                summary
                    .failed
                    .push((scope, "last month of the year not persisted".to_string()));
                continue;
            }
            match self.close_scope_year(&scope, year) {
                Ok(ScopeOutcome::Persisted) => summary.persisted.push(scope),
                Ok(ScopeOutcome::Skipped) => summary.skipped.push(scope),
                Err(e) => {
                    error!(scope = %scope, period = %period, error = %e, "yearly rollover failed");
                    summary.failed.push((scope, e.to_string()));
                }
            }
        }

        info!(
            period = %period,
            persisted = summary.persisted.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            "yearly rollover finished"
        );
        summary
    }

    fn close_scope_year(&self, scope: &ScopeId, year: i32) -> Result<ScopeOutcome> {
        let period = Period::yearly(year);
        let key = snapshot_key(scope, period);

        match self.config.retry.run(&key, || self.store.get(&key)) {
            Ok(Some(_)) => {
                debug!(scope = %scope, period = %period, "year already closed");
                return Ok(ScopeOutcome::Skipped);
            }
            Ok(None) => {}
            Err(e) if e.is_corruption() => {
                warn!(key = %key, error = %e, "rebuilding damaged yearly aggregate");
            }
            Err(e) => return Err(e),
        }

        let months = self.load_months(scope, year)?;
        let aggregate = TallyState::merge_yearly(months);

        let bytes = aggregate.to_bytes()?;
        self.config.retry.run(&key, || {
            self.store.set_with_expiry(&key, &bytes, self.config.yearly_ttl)
        })?;

        self.announce(scope, &render(&aggregate, &format!("{} 年度", year)));
        info!(scope = %scope, period = %period, "year closed");
        Ok(ScopeOutcome::Persisted)
    }

    /// Stored months of `year`. Missing, damaged or unreadable months contribute nothing.
    fn load_months(&self, scope: &ScopeId, year: i32) -> Result<Vec<TallyState>> {
        let mut months = Vec::new();
        for period in Period::months_of(year) {
            let key = snapshot_key(scope, period);
            let fetched = self.config.retry.run(&key, || self.store.get(&key));
            if let Some(state) = decode_snapshot(&key, fetched)? {
                months.push(state);
            }
        }
        Ok(months)
    }

    fn yearly_scopes(&self) -> Vec<ScopeId> {
        let mut scopes = self.known_scopes.clone();
        for scope in self.accumulator.scopes() {
            if !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }
        scopes
    }

    /// Report delivery failures never undo a persisted rollover.
    fn announce(&self, scope: &ScopeId, text: &str) {
        if let Err(e) = self.sink.send(scope, text) {
            warn!(scope = %scope, error = %e, "failed to send report");
        }
    }
}
