//! Period boundary detection.
//!
//! Boundary checks are driven by coarse ticks rather than a precise
//! one-shot timer: every tick inside the grace window after local midnight
//! on the first of the month is a candidate, and the detector suppresses
//! repeats of a boundary it already reported. A process restarted inside
//! the window therefore still performs the rollover.
//!
//! Time enters only through [`Clock`] and [`Tick`] so tests can feed
//! synthetic instants instead of waiting on the wall clock.

mod boundary;
mod clock;
mod ticker;

pub use boundary::{Boundary, BoundaryDetector, BoundaryKind};
pub use clock::{Clock, ManualClock, SystemClock};
pub use ticker::{Tick, Ticker};
