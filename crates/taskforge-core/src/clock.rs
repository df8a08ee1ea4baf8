//! Time source for the engine.
//!
//! Every component that needs "now" takes it from a [`Clock`] so tests can
//! inject a controllable one. Trigger evaluation works on wall time in the
//! local zone; timeout bookkeeping uses the monotonic reading.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

pub trait Clock: Send + Sync {
    /// Current wall-clock time in the local zone.
    fn now(&self) -> DateTime<Local>;

    /// Monotonic reading, unaffected by wall-clock adjustments.
    fn monotonic(&self) -> Instant;
}

/// The real clock used in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    fn monotonic(&self) -> Instant {
        Instant::now()
    }
}

/// A clock tests drive by hand.
pub struct ManualClock {
    state: Mutex<ManualState>,
}

struct ManualState {
    now: DateTime<Local>,
    base: Instant,
    elapsed: Duration,
}

impl ManualClock {
    pub fn new(now: DateTime<Local>) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now,
                base: Instant::now(),
                elapsed: Duration::ZERO,
            }),
        }
    }

    /// Move both the wall clock and the monotonic reading forward.
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock().unwrap();
        state.now += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        state.elapsed += by;
    }

    pub fn set(&self, now: DateTime<Local>) {
        self.state.lock().unwrap().now = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        self.state.lock().unwrap().now
    }

    fn monotonic(&self) -> Instant {
        let state = self.state.lock().unwrap();
        state.base + state.elapsed
    }
}
