//! Wall-clock elapsed time for the active tracking session.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use log::debug;

/// Source of "now". Swappable so tests can drive time explicitly.
pub trait Clock: Send {
    fn now(&self) -> DateTime<Utc>;
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = instant;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|n| *n).unwrap_or_else(|e| *e.into_inner())
    }
}

/// Elapsed = now - start, recomputed on every tick while running.
#[derive(Debug, Clone, Default)]
pub struct RouteSessionTimer {
    started_at: Option<DateTime<Utc>>,
    elapsed: Duration,
    /// Wall-clock instant of the last recompute
    last_tick: Option<DateTime<Utc>>,
}

impl RouteSessionTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Start from zero, unless already running.
    pub fn start(&mut self, now: DateTime<Utc>) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
            self.elapsed = Duration::zero();
        }
    }

    /// Continue a session that had already run for `previously_elapsed`.
    ///
    /// The start is re-derived as `now - previously_elapsed` so suspension
    /// neither freezes nor double-counts time.
    pub fn resume(&mut self, now: DateTime<Utc>, previously_elapsed: Duration) {
        let previously_elapsed = previously_elapsed.max(Duration::zero());
        self.started_at = Some(now - previously_elapsed);
        self.elapsed = previously_elapsed;
        self.last_tick = Some(now);
        debug!(
            "[RouteSessionTimer] Resumed at {}s elapsed",
            previously_elapsed.num_seconds()
        );
    }

    /// Recompute elapsed time. Never goes backwards, even if the wall clock does.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Duration {
        if let Some(started_at) = self.started_at {
            let elapsed = now - started_at;
            if elapsed < self.elapsed {
                // Wall clock moved backwards
                self.started_at = Some(now - self.elapsed);
            } else {
                self.elapsed = elapsed;
            }
            self.last_tick = Some(now);
        }
        self.elapsed
    }

    /// Recompute only when at least `period` of wall-clock time separates
    /// `now` from the last recompute (in either direction). Returns true if it
    /// recomputed.
    pub fn tick_if_due(&mut self, now: DateTime<Utc>, period: Duration) -> bool {
        let due = match self.last_tick {
            Some(last) => (now - last).abs() >= period,
            None => true,
        };
        if due && self.is_running() {
            self.tick(now);
            return true;
        }
        false
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed.num_seconds().max(0) as u64
    }

    /// Stop and reset to zero.
    pub fn stop(&mut self) {
        self.started_at = None;
        self.elapsed = Duration::zero();
        self.last_tick = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_tick_tracks_wall_clock() {
        let mut timer = RouteSessionTimer::new();
        timer.start(t0());
        assert_eq!(timer.tick(t0() + Duration::seconds(1)).num_seconds(), 1);
        assert_eq!(timer.tick(t0() + Duration::seconds(95)).num_seconds(), 95);
        assert_eq!(timer.elapsed_seconds(), 95);
    }

    #[test]
    fn test_start_is_idempotent_while_running() {
        let mut timer = RouteSessionTimer::new();
        timer.start(t0());
        timer.start(t0() + Duration::seconds(30));
        assert_eq!(timer.started_at(), Some(t0()));
    }

    #[test]
    fn test_resume_rederives_start() {
        let mut timer = RouteSessionTimer::new();
        let now = t0() + Duration::hours(2);
        timer.resume(now, Duration::seconds(600));
        assert_eq!(timer.started_at(), Some(now - Duration::seconds(600)));
        assert_eq!(timer.tick(now + Duration::seconds(5)).num_seconds(), 605);
    }

    #[test]
    fn test_backwards_clock_never_decreases_elapsed() {
        let mut timer = RouteSessionTimer::new();
        timer.start(t0());
        timer.tick(t0() + Duration::seconds(100));
        assert_eq!(timer.tick(t0() + Duration::seconds(40)).num_seconds(), 100);
        // Counting continues from the re-derived start
        assert_eq!(timer.tick(t0() + Duration::seconds(50)).num_seconds(), 110);
    }

    #[test]
    fn test_refresh_waits_for_a_full_period() {
        let mut timer = RouteSessionTimer::new();
        let period = Duration::seconds(1);
        timer.start(t0());
        assert!(timer.tick_if_due(t0(), period));

        assert!(!timer.tick_if_due(t0() + Duration::milliseconds(400), period));
        assert_eq!(timer.elapsed(), Duration::zero());

        assert!(timer.tick_if_due(t0() + Duration::milliseconds(1200), period));
        assert_eq!(timer.elapsed(), Duration::milliseconds(1200));

        // A large backwards jump is due immediately and keeps elapsed
        assert!(timer.tick_if_due(t0() - Duration::hours(1), period));
        assert_eq!(timer.elapsed(), Duration::milliseconds(1200));
    }

    #[test]
    fn test_refresh_is_noop_while_stopped() {
        let mut timer = RouteSessionTimer::new();
        assert!(!timer.tick_if_due(t0(), Duration::seconds(1)));
        assert_eq!(timer.elapsed(), Duration::zero());
    }

    #[test]
    fn test_stop_resets_to_zero() {
        let mut timer = RouteSessionTimer::new();
        timer.start(t0());
        timer.tick(t0() + Duration::seconds(10));
        timer.stop();
        assert!(!timer.is_running());
        assert_eq!(timer.tick(t0() + Duration::seconds(20)), Duration::zero());
    }

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new(t0());
        let other = clock.clone();
        clock.advance(Duration::seconds(3));
        assert_eq!(other.now(), t0() + Duration::seconds(3));
    }
}
