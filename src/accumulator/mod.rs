//! Live counters for the currently open period.
//!
//! Each scope owns one [`TallyState`] behind its own lock, so writes to
//! different channels never contend while a rollover of one channel can
//! hold that channel exclusively from snapshot through reset.

mod ordered;
mod registry;
mod state;

pub use ordered::OrderedMap;
pub use registry::Accumulator;
pub use state::{PopularMessage, TallyState};
