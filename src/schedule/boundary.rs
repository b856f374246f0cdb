//! Calendar boundary detection in a fixed reference timezone.

use crate::types::Period;
use chrono::{DateTime, Datelike, Duration, FixedOffset, Timelike, Utc};

/// Which rollovers a boundary calls for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundaryKind {
    /// First of a month.
    Monthly,
    /// First of January: the monthly rollover, then the yearly one.
    MonthlyAndYearly,
}

/// A detected period boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Boundary {
    pub kind: BoundaryKind,
    /// The month that just opened.
    pub opened: Period,
    /// The tick instant that detected it.
    pub at: DateTime<Utc>,
}

impl Boundary {
    /// The month being closed.
    pub fn closing_month(&self) -> Period {
        self.opened.prev()
    }

    /// The year being closed, when this is a yearly boundary.
    pub fn closing_year(&self) -> Option<Period> {
        match self.kind {
            BoundaryKind::MonthlyAndYearly => Some(Period::yearly(self.opened.year() - 1)),
            BoundaryKind::Monthly => None,
        }
    }
}

/// Decides whether a tick lands on a boundary.
///
/// Reports each boundary at most once per detector even though several
/// ticks fall inside the grace window.
#[derive(Debug)]
pub struct BoundaryDetector {
    offset: FixedOffset,
    grace: Duration,
    last_fired: Option<Period>,
}

impl BoundaryDetector {
    pub fn new(offset: FixedOffset, grace: Duration) -> Self {
        Self {
            offset,
            grace,
            last_fired: None,
        }
    }

    /// Convert an instant into the reference timezone.
    pub fn local(&self, at: DateTime<Utc>) -> DateTime<FixedOffset> {
        at.with_timezone(&self.offset)
    }

    /// Whether `at` lies inside a boundary window, ignoring what already fired.
    pub fn in_window(&self, at: DateTime<Utc>) -> bool {
        let local = self.local(at);
        let since_midnight = i64::from(local.num_seconds_from_midnight());
        local.day() == 1 && since_midnight < self.grace.num_seconds()
    }

    /// Check a tick. Returns the boundary the first time its window is seen.
    pub fn check(&mut self, at: DateTime<Utc>) -> Option<Boundary> {
        if !self.in_window(at) {
            return None;
        }

        let local = self.local(at);
        let opened = Period::containing(&local);
        if self.last_fired == Some(opened) {
            return None;
        }
        self.last_fired = Some(opened);

        let kind = if local.month() == 1 {
            BoundaryKind::MonthlyAndYearly
        } else {
            BoundaryKind::Monthly
        };
        Some(Boundary { kind, opened, at })
    }

    /// Forget the last reported boundary so the next tick in its window reports it again.
    pub fn rearm(&mut self) {
        self.last_fired = None;
    }
}
