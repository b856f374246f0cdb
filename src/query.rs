//! Leaderboard lookups for the open period and stored snapshots.

use crate::accumulator::{Accumulator, TallyState};
use crate::error::Result;
use crate::snapshots::{read_snapshot, SnapshotStore};
use crate::types::{snapshot_key, Period, ScopeId};
use std::sync::Arc;

/// Result of a leaderboard lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryOutcome {
    Found(TallyState),
    /// The open period has no activity yet.
    NoData,
    /// No snapshot is stored for the requested period.
    NotFound,
}

/// Answers current and historical leaderboard requests.
pub struct QueryService {
    accumulator: Arc<Accumulator>,
    store: Arc<dyn SnapshotStore>,
}

impl QueryService {
    pub fn new(accumulator: Arc<Accumulator>, store: Arc<dyn SnapshotStore>) -> Self {
        Self { accumulator, store }
    }

    /// Counters of the open period.
    pub fn current_period(&self, scope: &ScopeId) -> QueryOutcome {
        let state = self.accumulator.snapshot(scope);
        if state.is_empty() {
            QueryOutcome::NoData
        } else {
            QueryOutcome::Found(state)
        }
    }

    /// The stored snapshot for `period`.
    ///
    /// Damaged or unreadable snapshots are logged and reported as not found.
    /// Store failures are returned once, without retrying.
    pub fn historical_period(&self, scope: &ScopeId, period: Period) -> Result<QueryOutcome> {
        let key = snapshot_key(scope, period);
        match read_snapshot(self.store.as_ref(), &key)? {
            Some(state) => Ok(QueryOutcome::Found(state)),
            None => Ok(QueryOutcome::NotFound),
        }
    }

    /// A month given by a user (1 to 12). Anything else is not found.
    pub fn month_of_year(&self, scope: &ScopeId, year: i32, month: u32) -> Result<QueryOutcome> {
        match Period::monthly(year, month) {
            Ok(period) => self.historical_period(scope, period),
            Err(_) => Ok(QueryOutcome::NotFound),
        }
    }
}
