//! Integration tests for the tally service.

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use crossbeam_channel::{unbounded, Receiver};
use std::sync::Arc;
use std::thread;
use tallyboard::{
    ChannelSink, Config, FileSnapshotStore, InboundEvent, Input, ManualClock, MemorySnapshotStore,
    MessageId, OutboundMessage, Period, QueryOutcome, ScopeId, Service, SnapshotStore, TallyState,
    Tick, UserId,
};
use tempfile::TempDir;

struct Harness {
    service: Service,
    clock: Arc<ManualClock>,
    store: Arc<MemorySnapshotStore>,
    outbox: Receiver<OutboundMessage>,
}

fn utc8() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).unwrap()
}

/// An instant given in UTC+8 local time.
fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    utc8()
        .with_ymd_and_hms(y, mo, d, h, mi, 0)
        .unwrap()
        .with_timezone(&Utc)
}

fn test_config() -> Config {
    Config {
        allowed_scopes: vec![ScopeId::from("C1"), ScopeId::from("C2")],
        store_url: "memory://".into(),
        utc_offset_minutes: 480,
        ..Config::default()
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .try_init();
}

fn harness(now: DateTime<Utc>) -> Harness {
    init_tracing();
    let clock = Arc::new(ManualClock::new(now));
    let store = Arc::new(MemorySnapshotStore::with_clock(clock.clone()));
    let (sink, outbox) = ChannelSink::new();
    let service = Service::new(test_config(), store.clone(), Arc::new(sink), clock.clone()).unwrap();
    Harness {
        service,
        clock,
        store,
        outbox,
    }
}

fn message(scope: &str, id: &str, mentions: &[&str], text: &str) -> InboundEvent {
    InboundEvent::MessageCreated {
        scope_id: ScopeId::from(scope),
        message_id: MessageId::from(id),
        author_is_bot: false,
        mentioned_user_ids: mentions.iter().map(|u| UserId::from(*u)).collect(),
        text: text.to_string(),
    }
}

fn approval(scope: &str, id: &str, mentions: &[&str]) -> InboundEvent {
    InboundEvent::ApprovalAdded {
        scope_id: ScopeId::from(scope),
        message_id: MessageId::from(id),
        reacting_user_is_bot: false,
        mentioned_user_ids: mentions.iter().map(|u| UserId::from(*u)).collect(),
    }
}

fn found(outcome: QueryOutcome) -> TallyState {
    match outcome {
        QueryOutcome::Found(state) => state,
        other => panic!("expected Found, got {:?}", other),
    }
}

// --- Ingestion ---

#[test]
fn test_mention_then_two_approvals() {
    let h = harness(local(2024, 7, 10, 12, 0));
    h.service.handle_event(message("C1", "1", &["U1"], "nice work <@U1>")).unwrap();
    h.service.handle_event(approval("C1", "1", &["U1"])).unwrap();
    h.service.handle_event(approval("C1", "1", &["U1"])).unwrap();

    let state = found(h.service.query().current_period(&ScopeId::from("C1")));
    assert_eq!(state.mention_count(&UserId::from("U1")), 1);
    assert_eq!(state.vote_count(&UserId::from("U1")), 2);
    assert_eq!(state.popularity.get(&MessageId::from("1")).unwrap().count, 2);
}

#[test]
fn test_only_first_mention_counts() {
    let h = harness(local(2024, 7, 10, 12, 0));
    h.service
        .handle_event(message("C1", "1", &["U1", "U2"], "<@U1> <@U2>"))
        .unwrap();
    h.service.handle_event(approval("C1", "1", &["U1", "U2"])).unwrap();

    let state = found(h.service.query().current_period(&ScopeId::from("C1")));
    assert_eq!(state.mention_count(&UserId::from("U1")), 1);
    assert_eq!(state.mention_count(&UserId::from("U2")), 0);
    assert_eq!(state.vote_count(&UserId::from("U2")), 0);
}

#[test]
fn test_ignored_events() {
    let h = harness(local(2024, 7, 10, 12, 0));

    // Bot author
    h.service
        .handle_event(InboundEvent::MessageCreated {
            scope_id: ScopeId::from("C1"),
            message_id: MessageId::from("1"),
            author_is_bot: true,
            mentioned_user_ids: vec![UserId::from("U1")],
            text: "beep".into(),
        })
        .unwrap();
    // Bot reaction
    h.service
        .handle_event(InboundEvent::ApprovalAdded {
            scope_id: ScopeId::from("C1"),
            message_id: MessageId::from("1"),
            reacting_user_is_bot: true,
            mentioned_user_ids: vec![UserId::from("U1")],
        })
        .unwrap();
    // Channel outside the allow-list
    h.service.handle_event(message("C9", "2", &["U1"], "hi")).unwrap();
    // No mentions at all
    h.service.handle_event(message("C1", "3", &[], "hello")).unwrap();
    h.service.handle_event(approval("C1", "3", &[])).unwrap();

    assert_eq!(
        h.service.query().current_period(&ScopeId::from("C1")),
        QueryOutcome::NoData
    );
    assert!(h.service.accumulator().scopes().is_empty());
    assert!(h.outbox.is_empty());
}

#[test]
fn test_approval_on_unrecorded_message() {
    let h = harness(local(2024, 7, 10, 12, 0));
    h.service.handle_event(approval("C1", "old", &["U1"])).unwrap();

    let state = found(h.service.query().current_period(&ScopeId::from("C1")));
    assert_eq!(state.vote_count(&UserId::from("U1")), 1);
    assert!(state.popularity.is_empty());
}

// --- Rollover ---

#[test]
fn test_historical_not_found_until_rollover() {
    let h = harness(local(2024, 7, 31, 23, 0));
    let c1 = ScopeId::from("C1");
    let july = Period::monthly(2024, 7).unwrap();

    h.service.handle_event(message("C1", "1", &["U1"], "<@U1>")).unwrap();
    assert_eq!(
        h.service.query().historical_period(&c1, july).unwrap(),
        QueryOutcome::NotFound
    );

    let summaries = h.service.handle_tick(Tick {
        at: local(2024, 8, 1, 0, 1),
    });
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].period, july);

    let state = found(h.service.query().historical_period(&c1, july).unwrap());
    assert_eq!(state.mention_count(&UserId::from("U1")), 1);
    assert_eq!(
        h.service.query().current_period(&c1),
        QueryOutcome::NoData
    );

    let report = h.outbox.try_recv().unwrap();
    assert_eq!(report.scope, c1);
    assert!(report.text.starts_with("📊 2024-7 排行榜"));
}

#[test]
fn test_repeated_ticks_in_window_roll_over_once() {
    let h = harness(local(2024, 7, 31, 23, 0));
    h.service.handle_event(message("C1", "1", &["U1"], "<@U1>")).unwrap();

    for minute in 0..5 {
        h.service.handle_tick(Tick {
            at: local(2024, 8, 1, 0, minute),
        });
    }

    assert_eq!(h.store.write_count(), 1);
    assert_eq!(h.outbox.len(), 1);
}

#[test]
fn test_restart_inside_window_is_harmless() {
    let h = harness(local(2024, 7, 31, 23, 0));
    h.service.handle_event(message("C1", "1", &["U1"], "<@U1>")).unwrap();
    h.service.handle_tick(Tick {
        at: local(2024, 8, 1, 0, 1),
    });

    // Direct re-fire, as a restarted process would do.
    let again = h.service.rollover().close_month(Period::monthly(2024, 7).unwrap());
    assert!(again.persisted.is_empty());
    assert_eq!(h.store.write_count(), 1);
}

#[test]
fn test_tick_outside_window_does_nothing() {
    let h = harness(local(2024, 7, 31, 23, 0));
    h.service.handle_event(message("C1", "1", &["U1"], "<@U1>")).unwrap();

    assert!(h
        .service
        .handle_tick(Tick {
            at: local(2024, 8, 1, 0, 6),
        })
        .is_empty());
    assert!(h
        .service
        .handle_tick(Tick {
            at: local(2024, 8, 2, 0, 0),
        })
        .is_empty());
    assert_eq!(h.store.write_count(), 0);
}

#[test]
fn test_new_year_closes_december_then_year() {
    let h = harness(local(2024, 12, 31, 20, 0));

    let mut june = TallyState::new();
    june.record_mention(MessageId::from("j"), UserId::from("U2"), "june");
    h.store
        .set_with_expiry(
            "C1:2024-6",
            &june.to_bytes().unwrap(),
            std::time::Duration::from_secs(86_400 * 180),
        )
        .unwrap();

    h.service.handle_event(message("C1", "d", &["U1"], "december")).unwrap();
    h.service.handle_event(approval("C1", "d", &["U1"])).unwrap();

    let summaries = h.service.handle_tick(Tick {
        at: local(2025, 1, 1, 0, 0),
    });
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].period, Period::monthly(2024, 12).unwrap());
    assert_eq!(summaries[1].period, Period::yearly(2024));
    // Both allow-listed channels get a yearly report.
    assert_eq!(summaries[1].persisted.len(), 2);

    let year = found(
        h.service
            .query()
            .historical_period(&ScopeId::from("C1"), Period::yearly(2024))
            .unwrap(),
    );
    assert_eq!(year.mention_count(&UserId::from("U1")), 1);
    assert_eq!(year.mention_count(&UserId::from("U2")), 1);
    assert_eq!(year.vote_count(&UserId::from("U1")), 1);

    let texts: Vec<String> = h.outbox.try_iter().map(|m| m.text).collect();
    assert_eq!(texts.len(), 3);
    assert!(texts[0].starts_with("📊 2024-12 排行榜"));
    assert!(texts.iter().filter(|t| t.starts_with("📊 2024 年度 排行榜")).count() == 2);
}

#[test]
fn test_snapshot_expires_after_ttl() {
    let h = harness(local(2024, 7, 31, 23, 0));
    h.service.handle_event(message("C1", "1", &["U1"], "<@U1>")).unwrap();
    h.service.handle_tick(Tick {
        at: local(2024, 8, 1, 0, 1),
    });

    let july = Period::monthly(2024, 7).unwrap();
    let c1 = ScopeId::from("C1");
    h.clock.set(local(2024, 8, 1, 0, 1) + chrono::Duration::days(179));
    assert!(matches!(
        h.service.query().historical_period(&c1, july).unwrap(),
        QueryOutcome::Found(_)
    ));

    h.clock.set(local(2024, 8, 1, 0, 1) + chrono::Duration::days(181));
    assert_eq!(
        h.service.query().historical_period(&c1, july).unwrap(),
        QueryOutcome::NotFound
    );
}

// --- Commands ---

#[test]
fn test_month_command_replies() {
    let h = harness(local(2024, 7, 31, 23, 0));
    h.service.handle_event(message("C1", "1", &["U1"], "<@U1>")).unwrap();
    h.service.handle_tick(Tick {
        at: local(2024, 8, 1, 0, 1),
    });
    h.outbox.try_iter().for_each(drop);

    h.clock.set(local(2024, 8, 15, 9, 0));
    h.service.handle_event(message("C1", "2", &[], "!7月排行")).unwrap();
    let reply = h.outbox.try_recv().unwrap();
    assert!(reply.text.starts_with("📊 2024-7 排行榜"));
    assert!(reply.text.contains("1. <@U1> - 1 次"));

    h.service.handle_event(message("C1", "3", &[], "!6月排行")).unwrap();
    assert_eq!(h.outbox.try_recv().unwrap().text, "❌ 6 月沒有紀錄");

    h.service.handle_event(message("C1", "4", &[], "!13月排行")).unwrap();
    assert_eq!(h.outbox.try_recv().unwrap().text, "❌ 13 月沒有紀錄");

    // Snapshots are per channel.
    h.service.handle_event(message("C2", "5", &[], "!7月排行")).unwrap();
    let reply = h.outbox.try_recv().unwrap();
    assert_eq!(reply.scope, ScopeId::from("C2"));
    assert_eq!(reply.text, "❌ 7 月沒有紀錄");
}

#[test]
fn test_current_month_and_reset_commands() {
    let h = harness(local(2024, 7, 10, 12, 0));

    h.service.handle_event(message("C1", "1", &[], "!本月排行")).unwrap();
    assert_eq!(h.outbox.try_recv().unwrap().text, "📭 本月尚無紀錄");

    h.service.handle_event(message("C1", "2", &["U1"], "<@U1> great")).unwrap();
    h.service.handle_event(message("C1", "3", &[], "!本月排行")).unwrap();
    let reply = h.outbox.try_recv().unwrap().text;
    assert!(reply.starts_with("📊 2024-7 排行榜"));
    assert!(reply.contains("<@U1> 「<@U1> great」 - 0 票"));

    h.service.handle_event(message("C1", "4", &[], "!清空本月")).unwrap();
    assert_eq!(h.outbox.try_recv().unwrap().text, "🧹 本月紀錄已清空");
    assert_eq!(
        h.service.query().current_period(&ScopeId::from("C1")),
        QueryOutcome::NoData
    );
}

#[test]
fn test_year_command() {
    let h = harness(local(2025, 3, 3, 10, 0));
    h.service.handle_event(message("C1", "1", &[], "!2024年排行")).unwrap();
    assert_eq!(h.outbox.try_recv().unwrap().text, "❌ 2024 年沒有紀錄");

    h.service.rollover().close_year(2024);
    h.outbox.try_iter().for_each(drop);

    h.service.handle_event(message("C1", "2", &[], "!2024年排行")).unwrap();
    assert!(h
        .outbox
        .try_recv()
        .unwrap()
        .text
        .starts_with("📊 2024 年度 排行榜"));
}

// --- Run loop ---

#[test]
fn test_run_loop_processes_inputs_in_order() {
    let h = harness(local(2024, 7, 31, 23, 0));
    let service = Arc::new(h.service);
    let (tx, rx) = unbounded::<Input>();

    let worker = {
        let service = Arc::clone(&service);
        thread::spawn(move || service.run(rx))
    };

    tx.send(message("C1", "1", &["U1"], "<@U1>").into()).unwrap();
    tx.send(approval("C1", "1", &["U1"]).into()).unwrap();
    tx.send(
        Tick {
            at: local(2024, 8, 1, 0, 0),
        }
        .into(),
    )
    .unwrap();
    // Arrives after the rollover, so it lands in August.
    tx.send(approval("C1", "1", &["U1"]).into()).unwrap();
    tx.send(Input::Shutdown).unwrap();
    worker.join().unwrap();

    let july = found(
        service
            .query()
            .historical_period(&ScopeId::from("C1"), Period::monthly(2024, 7).unwrap())
            .unwrap(),
    );
    assert_eq!(july.vote_count(&UserId::from("U1")), 1);
    assert_eq!(july.popularity.get(&MessageId::from("1")).unwrap().count, 1);

    let august = found(service.query().current_period(&ScopeId::from("C1")));
    assert_eq!(august.vote_count(&UserId::from("U1")), 1);
    assert!(august.popularity.is_empty());
    assert_eq!(august.mention_count(&UserId::from("U1")), 0);
}

#[test]
fn test_ticker_feeds_the_input_channel() {
    let clock = Arc::new(ManualClock::new(local(2024, 8, 1, 0, 0)));
    let (sink, _outbox) = ChannelSink::new();
    let config = Config {
        tick_interval_secs: 1,
        ..test_config()
    };
    let service = Service::new(config, Arc::new(MemorySnapshotStore::new()), Arc::new(sink), clock).unwrap();

    let (tx, rx) = unbounded::<Input>();
    let ticker = service.spawn_ticker(tx).unwrap();
    match rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap() {
        Input::Tick(tick) => assert_eq!(tick.at, local(2024, 8, 1, 0, 0)),
        other => panic!("expected a tick, got {:?}", other),
    }
    drop(ticker);
}

// --- Durable store ---

#[test]
fn test_file_store_round_trip_across_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("snapshots");
    let clock = Arc::new(ManualClock::new(local(2024, 7, 20, 8, 0)));

    let before = {
        let store = Arc::new(FileSnapshotStore::open_with_clock(&path, 8, clock.clone()).unwrap());
        let (sink, _outbox) = ChannelSink::new();
        let service = Service::new(test_config(), store, Arc::new(sink), clock.clone()).unwrap();

        service.handle_event(message("C1", "1", &["U1"], "line one\nline two")).unwrap();
        service.handle_event(approval("C1", "1", &["U1"])).unwrap();
        let before = service.accumulator().snapshot(&ScopeId::from("C1"));
        service.handle_tick(Tick {
            at: local(2024, 8, 1, 0, 2),
        });
        before
    };

    let store = FileSnapshotStore::open_with_clock(&path, 8, clock).unwrap();
    let bytes = store.get("C1:2024-7").unwrap().unwrap();
    assert_eq!(TallyState::from_bytes(&bytes).unwrap(), before);
}
