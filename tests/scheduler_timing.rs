// tests/scheduler_timing.rs
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, FixedOffset, Local, NaiveDate, NaiveTime, TimeZone, Timelike};
use trend_digest::config::{RunMode, ScheduleConfig};
use trend_digest::scheduler::{
    following_occurrence, next_occurrence, shutdown_channel, Scheduler, ShutdownTrigger, Trigger,
};
use trend_digest::status::{SchedulerState, StatusBoard};
use trend_digest::TickOutcome;

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn tz() -> FixedOffset {
    FixedOffset::east_opt(2 * 3600).unwrap()
}

#[test]
fn target_later_today_is_chosen() {
    let now = tz().with_ymd_and_hms(2025, 8, 16, 9, 30, 0).unwrap();
    let next = next_occurrence(&now, hm(23, 0));
    assert_eq!(next, tz().with_ymd_and_hms(2025, 8, 16, 23, 0, 0).unwrap());
}

#[test]
fn passed_target_moves_to_tomorrow() {
    let now = tz().with_ymd_and_hms(2025, 8, 16, 23, 0, 1).unwrap();
    let next = next_occurrence(&now, hm(23, 0));
    assert_eq!(next, tz().with_ymd_and_hms(2025, 8, 17, 23, 0, 0).unwrap());
}

#[test]
fn exactly_now_is_not_an_instant_fire() {
    let now = tz().with_ymd_and_hms(2025, 8, 16, 23, 0, 0).unwrap();
    let next = next_occurrence(&now, hm(23, 0));
    assert_eq!(next, tz().with_ymd_and_hms(2025, 8, 17, 23, 0, 0).unwrap());
}

#[test]
fn next_target_is_always_future_and_on_the_configured_time() {
    let start = tz().with_ymd_and_hms(2025, 12, 31, 0, 0, 0).unwrap();
    for step in 0..(48 * 4) {
        let now = start + ChronoDuration::minutes(15 * step);
        for at in [hm(0, 0), hm(7, 45), hm(12, 0), hm(23, 59)] {
            let next = next_occurrence(&now, at);
            assert!(next > now, "{next} not after {now}");
            assert!(next - now <= ChronoDuration::days(1));
            assert_eq!((next.hour(), next.minute()), (at.hour(), at.minute()));
        }
    }
}

#[test]
fn following_target_is_one_day_after_fired_target() {
    let fired = tz().with_ymd_and_hms(2025, 8, 16, 23, 0, 0).unwrap();
    // The tick took 40 minutes; the next target does not drift.
    let now = fired + ChronoDuration::minutes(40);
    let next = following_occurrence(&fired, hm(23, 0), &now);
    assert_eq!(next, tz().with_ymd_and_hms(2025, 8, 17, 23, 0, 0).unwrap());
}

#[test]
fn following_target_falls_back_when_already_past() {
    let fired = tz().with_ymd_and_hms(2025, 8, 16, 23, 0, 0).unwrap();
    let now = tz().with_ymd_and_hms(2025, 8, 18, 8, 0, 0).unwrap();
    let next = following_occurrence(&fired, hm(23, 0), &now);
    assert_eq!(next, tz().with_ymd_and_hms(2025, 8, 18, 23, 0, 0).unwrap());
}

// ---------- scheduler loop ----------

struct CountingTrigger {
    fired: AtomicU32,
    dates: Mutex<Vec<NaiveDate>>,
    stop_after_fire: Option<ShutdownTrigger>,
    panic: bool,
}

impl CountingTrigger {
    fn new(stop_after_fire: Option<ShutdownTrigger>) -> Arc<Self> {
        Arc::new(Self {
            fired: AtomicU32::new(0),
            dates: Mutex::new(Vec::new()),
            stop_after_fire,
            panic: false,
        })
    }
}

#[async_trait]
impl Trigger for CountingTrigger {
    async fn fire(&self, date: NaiveDate) -> TickOutcome {
        self.fired.fetch_add(1, Ordering::SeqCst);
        self.dates.lock().unwrap().push(date);
        if let Some(t) = &self.stop_after_fire {
            // Shutdown during Triggering must not cut the tick short.
            t.trigger();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        if self.panic {
            panic!("source exploded");
        }
        TickOutcome::Skipped {
            date,
            state: trend_digest::assemble::DayState::Generated,
        }
    }
}

fn schedule(mode: RunMode, at: NaiveTime, run_on_start: bool) -> ScheduleConfig {
    ScheduleConfig {
        mode,
        at,
        run_on_start,
        progress_log_secs: 600,
    }
}

fn two_hours_from_now() -> NaiveTime {
    (Local::now() + ChronoDuration::hours(2)).time()
}

#[tokio::test]
async fn once_mode_fires_exactly_once_for_today() {
    let trigger = CountingTrigger::new(None);
    let board = StatusBoard::new(RunMode::Once);
    let s = Scheduler::new(schedule(RunMode::Once, hm(3, 0), false), trigger.clone(), board.clone());
    let (_t, shutdown) = shutdown_channel();

    assert_eq!(s.run(shutdown).await, 1);
    assert_eq!(trigger.fired.load(Ordering::SeqCst), 1);
    assert_eq!(trigger.dates.lock().unwrap()[0], Local::now().date_naive());

    let snap = board.snapshot();
    assert_eq!(snap.state, SchedulerState::Stopped);
    assert_eq!(snap.ticks, 1);
    assert_eq!(snap.last_tick.unwrap().outcome.label(), "skipped");
}

#[tokio::test]
async fn daily_run_on_start_then_shutdown_stops_cleanly() {
    let (t, shutdown) = shutdown_channel();
    let trigger = CountingTrigger::new(Some(t));
    let s = Scheduler::new(
        schedule(RunMode::Daily, two_hours_from_now(), true),
        trigger.clone(),
        StatusBoard::new(RunMode::Daily),
    );

    let fired = tokio::time::timeout(Duration::from_secs(5), s.run(shutdown))
        .await
        .expect("scheduler should stop after shutdown");
    assert_eq!(fired, 1);
    assert_eq!(trigger.fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn daily_mode_fires_at_the_configured_time() {
    let at = (Local::now() + ChronoDuration::seconds(2)).time();
    let expected = next_occurrence(&Local::now(), at).date_naive();
    let (t, shutdown) = shutdown_channel();
    let trigger = CountingTrigger::new(Some(t));
    let board = StatusBoard::new(RunMode::Daily);
    let s = Scheduler::new(
        schedule(RunMode::Daily, at, false),
        trigger.clone(),
        board.clone(),
    );

    let fired = tokio::time::timeout(Duration::from_secs(10), s.run(shutdown))
        .await
        .expect("target two seconds out must fire");
    assert_eq!(fired, 1);
    assert_eq!(trigger.fired.load(Ordering::SeqCst), 1);
    assert_eq!(*trigger.dates.lock().unwrap(), vec![expected]);

    let snap = board.snapshot();
    assert_eq!(snap.ticks, 1);
    assert_eq!(snap.state, SchedulerState::Stopped);
}

#[tokio::test]
async fn shutdown_interrupts_waiting_without_firing() {
    let (t, shutdown) = shutdown_channel();
    let trigger = CountingTrigger::new(None);
    let board = StatusBoard::new(RunMode::Daily);
    let s = Scheduler::new(
        schedule(RunMode::Daily, two_hours_from_now(), false),
        trigger.clone(),
        board.clone(),
    );

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        t.trigger();
    });
    let fired = tokio::time::timeout(Duration::from_secs(5), s.run(shutdown))
        .await
        .expect("waiting must be cancellable");
    stopper.await.unwrap();

    assert_eq!(fired, 0);
    assert_eq!(trigger.fired.load(Ordering::SeqCst), 0);
    let snap = board.snapshot();
    assert_eq!(snap.state, SchedulerState::Stopped);
    assert!(snap.next_run.unwrap() > Local::now());
}

#[tokio::test]
async fn panicking_tick_is_recorded_as_failed() {
    let trigger = Arc::new(CountingTrigger {
        fired: AtomicU32::new(0),
        dates: Mutex::new(Vec::new()),
        stop_after_fire: None,
        panic: true,
    });
    let board = StatusBoard::new(RunMode::Once);
    let s = Scheduler::new(schedule(RunMode::Once, hm(3, 0), false), trigger, board.clone());
    let (_t, shutdown) = shutdown_channel();

    assert_eq!(s.run(shutdown).await, 1);
    match board.snapshot().last_tick.unwrap().outcome {
        TickOutcome::Failed { error, .. } => assert!(error.contains("source exploded")),
        other => panic!("unexpected outcome {other:?}"),
    }
}
