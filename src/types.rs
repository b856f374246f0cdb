//! Core types for the tally ledger.

use crate::error::{LedgerError, Result};
use chrono::{DateTime, Datelike, TimeZone};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                $name(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }
    };
}

string_id!(
    /// A channel whose activity is tallied independently.
    ScopeId
);

string_id!(
    /// A chat user.
    UserId
);

string_id!(
    /// A chat message.
    MessageId
);

/// A calendar bucket. Months are always numbered 1 through 12.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Period {
    Monthly { year: i32, month: u32 },
    Yearly { year: i32 },
}

impl Period {
    /// Build a monthly period, rejecting months outside 1..=12.
    pub fn monthly(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(LedgerError::InvalidPeriod(format!(
                "month {} out of range 1-12",
                month
            )));
        }
        Ok(Period::Monthly { year, month })
    }

    pub fn yearly(year: i32) -> Self {
        Period::Yearly { year }
    }

    /// The monthly period a local datetime falls into.
    pub fn containing<Tz: TimeZone>(at: &DateTime<Tz>) -> Self {
        Period::Monthly {
            year: at.year(),
            month: at.month(),
        }
    }

    pub fn year(&self) -> i32 {
        match *self {
            Period::Monthly { year, .. } | Period::Yearly { year } => year,
        }
    }

    /// The period immediately before this one at the same granularity.
    pub fn prev(self) -> Self {
        match self {
            Period::Monthly { year, month: 1 } => Period::Monthly {
                year: year - 1,
                month: 12,
            },
            Period::Monthly { year, month } => Period::Monthly {
                year,
                month: month - 1,
            },
            Period::Yearly { year } => Period::Yearly { year: year - 1 },
        }
    }

    /// The period immediately after this one at the same granularity.
    pub fn next(self) -> Self {
        match self {
            Period::Monthly { year, month: 12 } => Period::Monthly {
                year: year + 1,
                month: 1,
            },
            Period::Monthly { year, month } => Period::Monthly {
                year,
                month: month + 1,
            },
            Period::Yearly { year } => Period::Yearly { year: year + 1 },
        }
    }

    /// The twelve monthly periods of a year, January first.
    pub fn months_of(year: i32) -> impl Iterator<Item = Period> {
        (1..=12).map(move |month| Period::Monthly { year, month })
    }

    /// Canonical storage key: `"{year}-{month}"` or `"{year}"`.
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// Parse a canonical key produced by [`Period::key`].
    pub fn parse_key(s: &str) -> Result<Self> {
        let invalid = || LedgerError::InvalidPeriod(format!("unparseable period key {:?}", s));
        match s.split_once('-') {
            Some((year, month)) => {
                let year: i32 = year.parse().map_err(|_| invalid())?;
                let month: u32 = month.parse().map_err(|_| invalid())?;
                Period::monthly(year, month)
            }
            None => Ok(Period::Yearly {
                year: s.parse().map_err(|_| invalid())?,
            }),
        }
    }

    fn sort_key(&self) -> (i32, u32) {
        match *self {
            Period::Monthly { year, month } => (year, month),
            Period::Yearly { year } => (year, 0),
        }
    }
}

impl Ord for Period {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for Period {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Monthly { year, month } => write!(f, "{}-{}", year, month),
            Period::Yearly { year } => write!(f, "{}", year),
        }
    }
}

/// Storage key for a scope's snapshot of a period: `"{scope}:{period}"`.
pub fn snapshot_key(scope: &ScopeId, period: Period) -> String {
    format!("{}:{}", scope, period)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    #[test]
    fn test_monthly_rejects_out_of_range() {
        assert!(Period::monthly(2024, 0).is_err());
        assert!(Period::monthly(2024, 13).is_err());
        assert!(Period::monthly(2024, 12).is_ok());
    }

    #[test]
    fn test_period_keys() {
        assert_eq!(Period::monthly(2024, 7).unwrap().key(), "2024-7");
        assert_eq!(Period::yearly(2024).key(), "2024");
        assert_eq!(
            snapshot_key(&ScopeId::from("c1"), Period::monthly(2024, 7).unwrap()),
            "c1:2024-7"
        );
    }

    #[test]
    fn test_parse_key_roundtrip() {
        let p = Period::monthly(2023, 11).unwrap();
        assert_eq!(Period::parse_key(&p.key()).unwrap(), p);
        assert_eq!(Period::parse_key("2023").unwrap(), Period::yearly(2023));
        assert!(Period::parse_key("2023-0").is_err());
        assert!(Period::parse_key("abc").is_err());
    }

    #[test]
    fn test_navigation_wraps_years() {
        let jan = Period::monthly(2025, 1).unwrap();
        assert_eq!(jan.prev(), Period::monthly(2024, 12).unwrap());
        assert_eq!(jan.prev().next(), jan);
        assert_eq!(Period::yearly(2025).prev(), Period::yearly(2024));
    }

    #[test]
    fn test_ordering() {
        let mut periods = vec![
            Period::monthly(2024, 3).unwrap(),
            Period::yearly(2024),
            Period::monthly(2023, 12).unwrap(),
            Period::monthly(2024, 1).unwrap(),
        ];
        periods.sort();
        assert_eq!(
            periods,
            vec![
                Period::monthly(2023, 12).unwrap(),
                Period::yearly(2024),
                Period::monthly(2024, 1).unwrap(),
                Period::monthly(2024, 3).unwrap(),
            ]
        );
    }

    #[test]
    fn test_containing_uses_local_month() {
        // 2024-07-31 23:30 UTC is already August 1st at UTC+8.
        let utc = Utc.with_ymd_and_hms(2024, 7, 31, 23, 30, 0).unwrap();
        let local = utc.with_timezone(&FixedOffset::east_opt(8 * 3600).unwrap());
        assert_eq!(Period::containing(&local), Period::monthly(2024, 8).unwrap());
        assert_eq!(Period::containing(&utc), Period::monthly(2024, 7).unwrap());
    }
}
