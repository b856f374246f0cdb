//! Main Service tying all components together.

use crate::accumulator::Accumulator;
use crate::config::Config;
use crate::error::{LedgerError, Result};
use crate::events::{Command, InboundEvent};
use crate::query::{QueryOutcome, QueryService};
use crate::report::render;
use crate::rollover::{RetryPolicy, RolloverConfig, RolloverEngine, RolloverSummary};
use crate::schedule::{BoundaryDetector, Clock, Tick, Ticker};
use crate::sink::OutboundSink;
use crate::snapshots::{self, SnapshotStore};
use crate::types::{Period, ScopeId};
use chrono::{DateTime, Datelike, FixedOffset, Utc};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Reply when the open month has no activity.
const NO_DATA_REPLY: &str = "📭 本月尚無紀錄";

/// Reply after `!清空本月`.
const RESET_REPLY: &str = "🧹 本月紀錄已清空";

/// Reply when the store cannot be read.
const UNAVAILABLE_REPLY: &str = "⚠️ 暫時無法讀取紀錄，請稍後再試";

/// Work items for the service loop.
#[derive(Clone, Debug)]
pub enum Input {
    Event(InboundEvent),
    Tick(Tick),
    Shutdown,
}

impl From<InboundEvent> for Input {
    fn from(event: InboundEvent) -> Self {
        Input::Event(event)
    }
}

impl From<Tick> for Input {
    fn from(tick: Tick) -> Self {
        Input::Tick(tick)
    }
}

/// The tally service.
///
/// Owns the accumulator and wires the rollover engine, query service and
/// boundary detector around it. Events and ticks may be handed to
/// [`Service::handle_event`] / [`Service::handle_tick`] directly, or queued
/// as [`Input`]s and processed one at a time by [`Service::run`].
pub struct Service {
    config: Config,

    /// Reference timezone.
    offset: FixedOffset,

    /// Live counters, shared with the rollover engine and queries.
    accumulator: Arc<Accumulator>,

    rollover: RolloverEngine,

    query: QueryService,

    sink: Arc<dyn OutboundSink>,

    clock: Arc<dyn Clock>,

    detector: Mutex<BoundaryDetector>,
}

impl Service {
    /// Build a service over an explicit store, sink and clock.
    pub fn new(
        config: Config,
        store: Arc<dyn SnapshotStore>,
        sink: Arc<dyn OutboundSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let offset = config.offset()?;

        let accumulator = Arc::new(Accumulator::new());
        let rollover = RolloverEngine::new(
            Arc::clone(&accumulator),
            Arc::clone(&store),
            Arc::clone(&sink),
            config.allowed_scopes.clone(),
            RolloverConfig {
                monthly_ttl: config.monthly_ttl(),
                yearly_ttl: config.yearly_ttl(),
                retry: RetryPolicy::default(),
            },
        );
        let query = QueryService::new(Arc::clone(&accumulator), store);
        let detector = Mutex::new(BoundaryDetector::new(offset, config.grace_window()));

        Ok(Self {
            config,
            offset,
            accumulator,
            rollover,
            query,
            sink,
            clock,
            detector,
        })
    }

    /// Build a service whose store is opened from `config.store_url`.
    pub fn open(config: Config, sink: Arc<dyn OutboundSink>, clock: Arc<dyn Clock>) -> Result<Self> {
        let store = snapshots::open_url(&config.store_url, config.file_cache_size)?;
        Self::new(config, store, sink, clock)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn accumulator(&self) -> &Arc<Accumulator> {
        &self.accumulator
    }

    pub fn query(&self) -> &QueryService {
        &self.query
    }

    pub fn rollover(&self) -> &RolloverEngine {
        &self.rollover
    }

    fn local_now(&self) -> DateTime<FixedOffset> {
        self.clock.now().with_timezone(&self.offset)
    }

    // --- Ingestion ---

    /// Apply one inbound event.
    ///
    /// Bot activity and channels outside the allow-list are ignored. Only
    /// the first mentioned user of a message is credited.
    pub fn handle_event(&self, event: InboundEvent) -> Result<()> {
        if event.from_bot() || !self.config.is_allowed(event.scope()) {
            return Ok(());
        }

        let credited = event.credited_user().cloned();
        match event {
            InboundEvent::MessageCreated {
                scope_id,
                message_id,
                text,
                ..
            } => {
                if let Some(user) = credited {
                    debug!(scope = %scope_id, message = %message_id, user = %user, "mention");
                    self.accumulator
                        .record_mention(&scope_id, message_id, user, &text);
                }
                if let Some(command) = Command::parse(&text) {
                    self.handle_command(&scope_id, command)?;
                }
            }
            InboundEvent::ApprovalAdded {
                scope_id,
                message_id,
                ..
            } => {
                if let Some(user) = credited {
                    debug!(scope = %scope_id, message = %message_id, user = %user, "approval");
                    self.accumulator
                        .record_approval(&scope_id, &message_id, user);
                }
            }
        }
        Ok(())
    }

    /// Answer a leaderboard command in `scope`.
    ///
    /// Store failures are answered with an apology rather than returned.
    pub fn handle_command(&self, scope: &ScopeId, command: Command) -> Result<()> {
        let now = self.local_now();

        let reply = match command {
            Command::CurrentMonth => match self.query.current_period(scope) {
                QueryOutcome::Found(state) => render(&state, &Period::containing(&now).key()),
                _ => NO_DATA_REPLY.to_string(),
            },
            Command::MonthOfCurrentYear(month) => {
                match self.query.month_of_year(scope, now.year(), month) {
                    Ok(QueryOutcome::Found(state)) => {
                        render(&state, &format!("{}-{}", now.year(), month))
                    }
                    Ok(_) => format!("❌ {} 月沒有紀錄", month),
                    Err(e) => {
                        warn!(scope = %scope, error = %e, "historical query failed");
                        UNAVAILABLE_REPLY.to_string()
                    }
                }
            }
            Command::Year(year) => {
                match self.query.historical_period(scope, Period::yearly(year)) {
                    Ok(QueryOutcome::Found(state)) => render(&state, &format!("{} 年度", year)),
                    Ok(_) => format!("❌ {} 年沒有紀錄", year),
                    Err(e) => {
                        warn!(scope = %scope, error = %e, "yearly query failed");
                        UNAVAILABLE_REPLY.to_string()
                    }
                }
            }
            Command::ResetCurrentMonth => {
                self.accumulator.reset(scope);
                info!(scope = %scope, "open month cleared by command");
                RESET_REPLY.to_string()
            }
        };

        self.sink.send(scope, &reply)
    }

    // --- Scheduling ---

    /// Check a tick for a period boundary and roll over if one was crossed.
    ///
    /// Returns the monthly summary, followed by the yearly one on January 1st.
    /// The yearly merge of a scope waits until its December is persisted.
    /// If any scope failed, the boundary is re-armed so the next tick inside
    /// the grace window tries again.
    pub fn handle_tick(&self, tick: Tick) -> Vec<RolloverSummary> {
        let boundary = match self.detector.lock().check(tick.at) {
            Some(boundary) => boundary,
            None => return Vec::new(),
        };
        info!(opened = %boundary.opened, kind = ?boundary.kind, "period boundary");

        let month = self.rollover.close_month(boundary.closing_month());
        let year = boundary.closing_year().map(|year| {
            // A scope whose December failed must not be merged yet.
            let pending: Vec<ScopeId> =
                month.failed.iter().map(|(scope, _)| scope.clone()).collect();
            self.rollover.close_year_deferring(year.year(), &pending)
        });

        let mut summaries = vec![month];
        summaries.extend(year);

        if summaries.iter().any(|s| !s.is_complete()) {
            warn!(opened = %boundary.opened, "rollover incomplete, will retry on next tick");
            self.detector.lock().rearm();
        }
        summaries
    }

    /// Start a ticker feeding `sender` at the configured interval.
    pub fn spawn_ticker(&self, sender: Sender<Input>) -> Result<Ticker> {
        Ticker::spawn(self.config.tick_interval(), Arc::clone(&self.clock), sender).map_err(|e| {
            error!(error = %e, "failed to start ticker, no rollover will fire");
            LedgerError::Io(e)
        })
    }

    /// Process inputs sequentially until `Shutdown` or every sender is gone.
    pub fn run(&self, inputs: Receiver<Input>) {
        info!(scopes = self.config.allowed_scopes.len(), "tally service running");
        for input in inputs.iter() {
            match input {
                Input::Event(event) => {
                    if let Err(e) = self.handle_event(event) {
                        warn!(error = %e, "event handling failed");
                    }
                }
                Input::Tick(tick) => {
                    self.handle_tick(tick);
                }
                Input::Shutdown => break,
            }
        }
        info!("tally service stopped");
    }

    /// Current instant as seen by the service clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
