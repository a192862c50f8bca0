//! Time management utilities
//!
//! The engine loop never reads the wall clock directly; it goes through a
//! [`Clock`] so tests can drive it with a [`ManualClock`].

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Source of engine time
pub trait Clock {
    /// Time elapsed since the clock started
    fn now(&self) -> Duration;

    /// Block until `now()` reaches `deadline`
    fn sleep_until(&self, deadline: Duration);
}

/// Wall clock based on [`Instant`]
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    /// Create a clock starting now
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn sleep_until(&self, deadline: Duration) {
        let now = self.now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
    }
}

/// Clock that only moves when told to
///
/// Clones share the same time, so a test can keep one handle and give the
/// other to the engine. Sleeping jumps straight to the deadline.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    /// Create a clock at time zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    /// Jump to an absolute time
    pub fn set(&self, to: Duration) {
        self.now.set(to);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep_until(&self, deadline: Duration) {
        if deadline > self.now.get() {
            self.now.set(deadline);
        }
    }
}

/// Change in time between successive updates
#[derive(Debug, Clone, Copy, Default)]
pub struct Delta {
    current: Duration,
    change: Duration,
}

impl Delta {
    /// Start measuring from `now`
    pub fn new(now: Duration) -> Self {
        Self {
            current: now,
            change: Duration::ZERO,
        }
    }

    /// Record a new sample
    pub fn update(&mut self, now: Duration) {
        self.change = now.saturating_sub(self.current);
        self.current = now;
    }

    /// Time between the last two samples
    pub fn change(&self) -> Duration {
        self.change
    }
}

/// Fires once every `interval`
#[derive(Debug, Clone, Copy)]
pub struct IntervalTimer {
    start: Duration,
    interval: Duration,
}

impl IntervalTimer {
    /// Timer with the given interval, started at `now`
    pub fn new(interval: Duration, now: Duration) -> Self {
        Self { start: now, interval }
    }

    /// Timer firing `rate` times per second
    pub fn from_rate(rate: f32, now: Duration) -> Self {
        Self::new(rate_to_interval(rate), now)
    }

    /// Whether a full interval has passed since the last reset
    pub fn is_passed(&self, now: Duration) -> bool {
        now.saturating_sub(self.start) >= self.interval
    }

    /// Restart the interval at `now`
    pub fn reset(&mut self, now: Duration) {
        self.start = now;
    }

    /// Time at which the timer next fires
    pub fn deadline(&self) -> Duration {
        self.start.saturating_add(self.interval)
    }

    /// Current interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Change the interval without restarting
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }
}

/// Interval between ticks at `rate` ticks per second
///
/// Rates too small for the interval to fit a [`Duration`] saturate.
pub fn rate_to_interval(rate: f32) -> Duration {
    checked_rate_to_interval(rate).unwrap_or(Duration::MAX)
}

/// Like [`rate_to_interval`], `None` if the interval does not fit a [`Duration`]
pub fn checked_rate_to_interval(rate: f32) -> Option<Duration> {
    if rate > 0.0 {
        Duration::try_from_secs_f64(1.0 / f64::from(rate)).ok()
    } else {
        Some(Duration::ZERO)
    }
}

/// Ticks per whole second
///
/// Counts ticks and, when a tick arrives in a later whole second than the
/// previous one, publishes the count of the finished second. The new tick
/// counts towards its own second.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangePerSecond {
    accumulated: u32,
    value: u32,
    last_time: f64,
}

impl ChangePerSecond {
    /// Create a counter with nothing published yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tick at `time` seconds
    pub fn update(&mut self, time: f64) {
        if time.floor() > self.last_time.floor() {
            self.value = self.accumulated;
            self.accumulated = 0;
        }
        self.accumulated += 1;
        self.last_time = time;
    }

    /// Count published for the last finished second
    pub fn value(&self) -> u32 {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_change_per_second_publishes_previous_window() {
        let mut counter = ChangePerSecond::new();
        let mut published = Vec::new();
        for time in [0.1, 0.3, 0.9, 1.2, 1.8, 2.1] {
            counter.update(time);
            published.push(counter.value());
        }

        assert_eq!(published, vec![0, 0, 0, 3, 3, 2]);
    }

    #[test]
    fn test_change_per_second_skipped_seconds() {
        let mut counter = ChangePerSecond::new();
        counter.update(0.5);
        counter.update(0.6);
        counter.update(5.0);
        assert_eq!(counter.value(), 2);
        counter.update(6.5);
        assert_eq!(counter.value(), 1);
    }

    #[test]
    fn test_interval_timer() {
        let mut timer = IntervalTimer::from_rate(4.0, Duration::ZERO);
        assert_relative_eq!(timer.interval().as_secs_f64(), 0.25);

        assert!(!timer.is_passed(Duration::from_millis(200)));
        assert!(timer.is_passed(Duration::from_millis(250)));

        timer.reset(Duration::from_millis(260));
        assert_eq!(timer.deadline(), Duration::from_millis(510));
        assert!(!timer.is_passed(Duration::from_millis(400)));
    }

    #[test]
    fn test_zero_rate_always_passes() {
        let timer = IntervalTimer::from_rate(0.0, Duration::from_secs(3));
        assert!(timer.is_passed(Duration::from_secs(3)));
    }

    #[test]
    fn test_tiny_rate_saturates() {
        assert_eq!(checked_rate_to_interval(1e-30), None);
        assert_eq!(checked_rate_to_interval(0.5), Some(Duration::from_secs(2)));

        let timer = IntervalTimer::from_rate(1e-30, Duration::from_secs(1));
        assert_eq!(timer.interval(), Duration::MAX);
        assert_eq!(timer.deadline(), Duration::MAX);
        assert!(!timer.is_passed(Duration::from_secs(1_000_000)));
    }

    #[test]
    fn test_delta() {
        let mut delta = Delta::new(Duration::from_millis(100));
        delta.update(Duration::from_millis(116));
        assert_eq!(delta.change(), Duration::from_millis(16));
        delta.update(Duration::from_millis(150));
        assert_eq!(delta.change(), Duration::from_millis(34));
    }

    #[test]
    fn test_manual_clock_is_shared() {
        let clock = ManualClock::new();
        let engine_side = clock.clone();

        clock.advance(Duration::from_millis(30));
        assert_eq!(engine_side.now(), Duration::from_millis(30));

        engine_side.sleep_until(Duration::from_millis(50));
        assert_eq!(clock.now(), Duration::from_millis(50));

        engine_side.sleep_until(Duration::from_millis(10));
        assert_eq!(clock.now(), Duration::from_millis(50));
    }
}
