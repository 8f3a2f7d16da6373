use chrono::{DateTime, TimeDelta, Utc};
use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Time source of the scheduler.
///
/// `wall` is what timestamps and alarms are expressed in; `monotonic` never
/// jumps and is used to detect wall clock changes between ticks.
pub trait Clock {
    fn wall(&self) -> DateTime<Utc>;
    fn monotonic(&self) -> Duration;
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A clock that only moves when told to. Tests keep a [`ClockHandle`] and
/// hand the clock itself to the supervisor.
pub struct ManualClock {
    wall: Rc<Cell<DateTime<Utc>>>,
    monotonic: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            wall: Rc::new(Cell::new(start)),
            monotonic: Rc::new(Cell::new(Duration::ZERO)),
        }
    }

    pub fn handle(&self) -> ClockHandle {
        ClockHandle {
            wall: Rc::clone(&self.wall),
            monotonic: Rc::clone(&self.monotonic),
        }
    }
}

impl Clock for ManualClock {
    fn wall(&self) -> DateTime<Utc> {
        self.wall.get()
    }

    fn monotonic(&self) -> Duration {
        self.monotonic.get()
    }
}

#[derive(Clone)]
pub struct ClockHandle {
    wall: Rc<Cell<DateTime<Utc>>>,
    monotonic: Rc<Cell<Duration>>,
}

impl ClockHandle {
    /// Lets time pass: both clocks move forward together.
    pub fn advance(&self, by: Duration) {
        self.monotonic.set(self.monotonic.get() + by);
        let by = TimeDelta::from_std(by).unwrap_or(TimeDelta::zero());
        self.wall.set(self.wall.get() + by);
    }

    /// Sets the wall clock without time passing, like `date -s`.
    pub fn jump(&self, by: TimeDelta) {
        self.wall.set(self.wall.get() + by);
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.wall.get()
    }
}
