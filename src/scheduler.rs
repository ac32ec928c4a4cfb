// src/scheduler.rs
//! When to run: once now, or daily at a local wall-clock time.
//!
//! States: Idle -> Waiting(target) -> Triggering -> Idle (daily) or stop (once).
//! Waiting polls the wall clock once a second so suspend/resume and clock
//! changes are picked up; shutdown interrupts Waiting but never a tick that
//! is already Triggering.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Days, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use futures::FutureExt;
use metrics::{counter, gauge};
use tokio::sync::watch;

use crate::config::{RunMode, ScheduleConfig};
use crate::pipeline::TickOutcome;
use crate::status::{SchedulerState, StatusBoard};

const POLL: Duration = Duration::from_secs(1);

/// What a tick runs. Implemented by the pipeline; tests use scripted doubles.
#[async_trait]
pub trait Trigger: Send + Sync {
    async fn fire(&self, date: NaiveDate) -> TickOutcome;
}

// ---------- time math ----------

/// Map a local wall-clock time to an instant. Ambiguous times (DST fall-back)
/// take the earlier instant; times inside a DST gap move one hour later.
fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&naive).earliest().or_else(|| {
        tz.from_local_datetime(&(naive + chrono::Duration::hours(1)))
            .earliest()
    })
}

/// Next occurrence of `at` strictly after `now`. Exactly `now` counts as passed.
pub fn next_occurrence<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let today = now.date_naive();
    for offset in 0..=2u64 {
        let Some(day) = today.checked_add_days(Days::new(offset)) else {
            break;
        };
        if let Some(candidate) = resolve_local(&tz, day.and_time(at)) {
            if candidate > *now {
                return candidate;
            }
        }
    }
    // Unreachable for real zones; keep the loop moving regardless.
    now.clone() + chrono::Duration::days(1)
}

/// Target after `fired`: same wall-clock time on the following calendar day,
/// so a late or long tick does not shift later runs. Falls back to the next
/// occurrence after `now` if that is already in the past.
pub fn following_occurrence<Tz: TimeZone>(
    fired: &DateTime<Tz>,
    at: NaiveTime,
    now: &DateTime<Tz>,
) -> DateTime<Tz> {
    let tz = fired.timezone();
    fired
        .date_naive()
        .checked_add_days(Days::new(1))
        .and_then(|d| resolve_local(&tz, d.and_time(at)))
        .filter(|t| t > now)
        .unwrap_or_else(|| next_occurrence(now, at))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitProgress {
    pub elapsed: Duration,
    pub remaining: Duration,
    pub percent: f64,
}

impl WaitProgress {
    pub fn new(total: Duration, remaining: Duration) -> Self {
        let remaining = remaining.min(total);
        let elapsed = total - remaining;
        let percent = if total.is_zero() {
            100.0
        } else {
            elapsed.as_secs_f64() / total.as_secs_f64() * 100.0
        };
        Self {
            elapsed,
            remaining,
            percent,
        }
    }
}

// ---------- shutdown ----------

/// Sending half; trigger once on Ctrl-C / SIGTERM.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx: Arc::new(tx) }, Shutdown { rx })
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown was requested. Never resolves if every
    /// trigger is dropped without firing.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

// ---------- scheduler ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Reached,
    Cancelled,
}

pub struct Scheduler {
    cfg: ScheduleConfig,
    trigger: Arc<dyn Trigger>,
    board: StatusBoard,
}

impl Scheduler {
    pub fn new(cfg: ScheduleConfig, trigger: Arc<dyn Trigger>, board: StatusBoard) -> Self {
        Self {
            cfg,
            trigger,
            board,
        }
    }

    /// Run until done (once mode) or shutdown (daily mode).
    /// Returns the number of ticks fired.
    pub async fn run(&self, mut shutdown: Shutdown) -> u64 {
        let mut fired = 0u64;
        match self.cfg.mode {
            RunMode::Once => {
                self.tick(Local::now().date_naive()).await;
                fired += 1;
            }
            RunMode::Daily => {
                if self.cfg.run_on_start && !shutdown.is_triggered() {
                    self.tick(Local::now().date_naive()).await;
                    fired += 1;
                }
                let mut target = next_occurrence(&Local::now(), self.cfg.at);
                while !shutdown.is_triggered() {
                    self.board.set_waiting(target);
                    gauge!("scheduler_next_run_ts").set(target.timestamp() as f64);
                    tracing::info!(target: "scheduler", next_run = %target.to_rfc3339(), "waiting for next run");

                    if self.wait_until(&target, &mut shutdown).await == WaitResult::Cancelled {
                        break;
                    }
                    self.tick(target.date_naive()).await;
                    fired += 1;
                    target = following_occurrence(&target, self.cfg.at, &Local::now());
                }
            }
        }
        self.board.set_state(SchedulerState::Stopped);
        tracing::info!(target: "scheduler", ticks = fired, "scheduler stopped");
        fired
    }

    async fn wait_until(&self, target: &DateTime<Local>, shutdown: &mut Shutdown) -> WaitResult {
        let total = (*target - Local::now()).to_std().unwrap_or_default();
        let log_every = Duration::from_secs(self.cfg.progress_log_secs.max(1));
        let mut last_log = Instant::now();
        loop {
            let remaining = (*target - Local::now())
                .to_std()
                .unwrap_or_default();
            gauge!("scheduler_wait_remaining_seconds").set(remaining.as_secs_f64());
            if remaining.is_zero() {
                return WaitResult::Reached;
            }
            if last_log.elapsed() >= log_every {
                let p = WaitProgress::new(total, remaining);
                tracing::info!(
                    target: "scheduler",
                    elapsed_secs = p.elapsed.as_secs(),
                    remaining_secs = p.remaining.as_secs(),
                    percent = %format!("{:.1}", p.percent),
                    "waiting"
                );
                last_log = Instant::now();
            }
            tokio::select! {
                _ = tokio::time::sleep(remaining.min(POLL)) => {}
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "scheduler", "shutdown requested while waiting");
                    return WaitResult::Cancelled;
                }
            }
        }
    }

    /// One Triggering phase. Panics become a failed tick.
    async fn tick(&self, date: NaiveDate) -> TickOutcome {
        self.board.set_state(SchedulerState::Triggering);
        tracing::info!(target: "scheduler", %date, "tick started");
        let t0 = Instant::now();

        let outcome = match AssertUnwindSafe(self.trigger.fire(date)).catch_unwind().await {
            Ok(o) => o,
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                tracing::error!(target: "scheduler", %date, panic = %msg, "tick panicked");
                TickOutcome::Failed {
                    date,
                    error: format!("panic: {msg}"),
                }
            }
        };

        counter!("digest_ticks_total", "outcome" => outcome.label()).increment(1);
        tracing::info!(
            target: "scheduler",
            %date,
            outcome = outcome.label(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "tick finished"
        );
        self.board.record_tick(outcome.clone());
        outcome
    }
}

fn panic_message(p: &(dyn Any + Send)) -> String {
    if let Some(s) = p.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = p.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_percent() {
        let p = WaitProgress::new(Duration::from_secs(100), Duration::from_secs(25));
        assert_eq!(p.elapsed, Duration::from_secs(75));
        assert!((p.percent - 75.0).abs() < 1e-9);
        assert_eq!(WaitProgress::new(Duration::ZERO, Duration::ZERO).percent, 100.0);
    }

    #[test]
    fn panic_payloads_are_readable() {
        let s: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(s.as_ref()), "boom");
        let s: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(s.as_ref()), "bang");
    }

    #[tokio::test]
    async fn shutdown_resolves_after_trigger() {
        let (trigger, mut shutdown) = shutdown_channel();
        assert!(!shutdown.is_triggered());
        trigger.trigger();
        shutdown.cancelled().await;
        assert!(shutdown.is_triggered());
    }
}
