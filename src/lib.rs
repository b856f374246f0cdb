//! # Tally Board
//!
//! Per-channel mention and approval tallies that roll over into expiring,
//! time-bucketed snapshots, with rendered leaderboards.
//!
//! ## Core Concepts
//!
//! - **Scopes**: Channels tracked independently of one another
//! - **Accumulator**: Live counters for the open month, one lock per scope
//! - **Snapshots**: Closed months (and merged years) in a get/set-with-expiry store
//! - **Rollover**: Persist, announce, then reset, once per boundary
//! - **Reports**: Top mentions, votes and popular messages as text
//!
//! ## Example
//!
//! ```ignore
//! use tallyboard::{ChannelSink, Config, InboundEvent, Service, SystemClock};
//! use std::sync::Arc;
//!
//! let config = Config::from_env()?;
//! let (sink, outbox) = ChannelSink::new();
//! let service = Service::open(config, Arc::new(sink), Arc::new(SystemClock))?;
//!
//! let (inputs, rx) = crossbeam_channel::unbounded();
//! let _ticker = service.spawn_ticker(inputs.clone())?;
//! inputs.send(InboundEvent::MessageCreated { /* ... */ }.into())?;
//! service.run(rx);
//! ```

pub mod accumulator;
pub mod config;
pub mod error;
pub mod events;
pub mod query;
pub mod report;
pub mod rollover;
pub mod schedule;
pub mod service;
pub mod sink;
pub mod snapshots;
pub mod types;

// Re-exports
pub use accumulator::{Accumulator, OrderedMap, PopularMessage, TallyState};
pub use config::Config;
pub use error::{LedgerError, Result};
pub use events::{Command, InboundEvent};
pub use query::{QueryOutcome, QueryService};
pub use report::render;
pub use rollover::{RetryPolicy, RolloverConfig, RolloverEngine, RolloverSummary};
pub use schedule::{Boundary, BoundaryDetector, BoundaryKind, Clock, ManualClock, SystemClock, Tick, Ticker};
pub use service::{Input, Service};
pub use sink::{ChannelSink, OutboundMessage, OutboundSink};
pub use snapshots::{FileSnapshotStore, MemorySnapshotStore, RedisSnapshotStore, SnapshotStore};
pub use types::*;
