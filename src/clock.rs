// Monotonic clock and fixed-period tick scheduling
//
// Everything that waits (tick pacing, calibration polling, settle delays)
// goes through `Clock` so tests can run on virtual time.

use std::time::{Duration, Instant};

/// Monotonic time source with a blocking sleep
pub trait Clock {
    /// Time elapsed since the clock's origin
    fn now(&self) -> Duration;

    /// Block the calling thread for `duration`
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `Instant`
#[derive(Debug, Clone, Copy)]
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
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Fixed-period tick scheduler
///
/// A tick is due once at least one period has passed since the start of the
/// previous tick. The next period is measured from when the tick actually
/// began, so a late tick pushes the schedule back instead of bursting.
#[derive(Debug)]
pub struct TickTimer<C: Clock> {
    clock: C,
    period: Duration,
    last_tick: Duration,
}

impl<C: Clock> TickTimer<C> {
    pub fn new(clock: C, period: Duration) -> Self {
        let last_tick = clock.now();
        Self {
            clock,
            period,
            last_tick,
        }
    }

    /// Remaining time before the next tick is due (zero if already due)
    pub fn time_until_next(&self) -> Duration {
        let elapsed = self.clock.now().saturating_sub(self.last_tick);
        self.period.saturating_sub(elapsed)
    }

    /// Start a tick if one is due. Returns false (and changes nothing) otherwise.
    pub fn try_begin(&mut self) -> bool {
        let now = self.clock.now();
        if now.saturating_sub(self.last_tick) < self.period {
            return false;
        }
        self.last_tick = now;
        true
    }

    /// Block until the next tick is due, then start it
    pub fn wait(&mut self) {
        while !self.try_begin() {
            self.clock.sleep(self.time_until_next());
        }
    }
}
