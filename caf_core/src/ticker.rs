//! Periodic recomputation driver.
//!
//! The ticker is owned by the application root and drives
//! [`Tracker::tick`] at a fixed interval. Time comes from a [`Clock`], so
//! tests can run the loop against logical time with [`ManualClock`].

use crate::tracker::{TickReport, Tracker};
use chrono::{DateTime, Utc};
use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Source of the current time and of waiting
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    fn sleep(&self, duration: Duration);
}

/// Wall clock time
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Logical time that only moves when told to. Sleeping advances it.
///
/// Clones share the same time.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Rc<Cell<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        self.now.set(to);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        match chrono::Duration::from_std(duration) {
            Ok(step) => self.advance(step),
            Err(e) => tracing::warn!("Sleep of {:?} out of range: {}", duration, e),
        }
    }
}

/// Stops a running [`Ticker`]. Safe to use from another thread.
#[derive(Clone, Debug)]
pub struct TickerHandle {
    running: Arc<AtomicBool>,
}

impl TickerHandle {
    /// The loop finishes its current tick and exits without sleeping again
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub struct Ticker<C: Clock> {
    clock: C,
    interval: Duration,
    handle: TickerHandle,
}

impl<C: Clock> Ticker<C> {
    pub fn new(clock: C, interval: Duration) -> Self {
        Self {
            clock,
            interval,
            handle: TickerHandle {
                running: Arc::new(AtomicBool::new(true)),
            },
        }
    }

    pub fn handle(&self) -> TickerHandle {
        self.handle.clone()
    }

    /// One tick at the clock's current time
    pub fn tick_once(&self, tracker: &mut Tracker) -> TickReport {
        tracker.tick(self.clock.now())
    }

    /// Tick, then sleep for the interval, until stopped or `max_ticks` ticks
    /// have run. Returns the number of ticks run.
    pub fn run(&self, tracker: &mut Tracker, max_ticks: Option<u64>) -> u64 {
        let limit_reached = |ticks: u64| max_ticks.is_some_and(|max| ticks >= max);
        let mut ticks = 0;

        tracing::debug!("Ticker started, interval {:?}", self.interval);
        while self.handle.is_running() && !limit_reached(ticks) {
            let report = self.tick_once(tracker);
            ticks += 1;
            tracing::debug!(
                "Tick {}: {} doses, {:.1}mg",
                ticks,
                report.remaining,
                report.total_mg
            );

            if !self.handle.is_running() || limit_reached(ticks) {
                break;
            }
            self.clock.sleep(self.interval);
        }

        tracing::debug!("Ticker stopped after {} ticks", ticks);
        ticks
    }
}
