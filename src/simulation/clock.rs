//! Simulation time.
//!
//! Time advances in whole ticks; the wall-clock instant of a tick is
//!
//!   time = start + tick * tick_seconds
//!
//! so schedule arithmetic stays exact and no run ever reads the host clock.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

const SECONDS_PER_DAY: u64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimClock {
    /// Instant of tick 0
    pub start: DateTime<Utc>,
    pub tick_seconds: u32,
    pub current_tick: u64,
}

impl SimClock {
    pub fn new(start: DateTime<Utc>, tick_seconds: u32) -> Self {
        Self {
            start,
            tick_seconds: tick_seconds.max(1),
            current_tick: 0,
        }
    }

    #[inline]
    pub fn advance(&mut self) {
        self.current_tick += 1;
    }

    #[inline]
    pub fn dt_seconds(&self) -> f64 {
        self.tick_seconds as f64
    }

    #[inline]
    pub fn elapsed_secs(&self) -> u64 {
        self.current_tick * self.tick_seconds as u64
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.time_of_tick(self.current_tick)
    }

    pub fn time_of_tick(&self, tick: u64) -> DateTime<Utc> {
        self.start + Duration::seconds((tick * self.tick_seconds as u64) as i64)
    }

    /// Zero-based simulated day index since start
    pub fn day_index(&self) -> u64 {
        self.elapsed_secs() / SECONDS_PER_DAY
    }

    /// Fractional hour of day of the current instant (0.0..24.0)
    pub fn hour_of_day(&self) -> f64 {
        let now = self.now();
        now.hour() as f64 + now.minute() as f64 / 60.0 + now.second() as f64 / 3600.0
    }

    /// Midnight at the start of the current day
    pub fn day_start(&self) -> DateTime<Utc> {
        let now = self.now();
        now - Duration::seconds(now.num_seconds_from_midnight() as i64)
    }

    pub fn is_weekend(&self) -> bool {
        self.now().weekday().number_from_monday() >= 6
    }

    /// Ticks covering `secs` seconds, rounded up
    #[inline]
    pub fn ticks_for_secs(&self, secs: u64) -> u64 {
        secs.div_ceil(self.tick_seconds as u64)
    }

    #[inline]
    pub fn ticks_for_days(&self, days: u64) -> u64 {
        self.ticks_for_secs(days * SECONDS_PER_DAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn monday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_advance_and_time() {
        let mut clock = SimClock::new(monday(), 1);
        for _ in 0..3_661 {
            clock.advance();
        }
        assert_eq!(clock.now(), Utc.with_ymd_and_hms(2024, 6, 3, 1, 1, 1).unwrap());
        assert!((clock.hour_of_day() - (1.0 + 1.0 / 60.0 + 1.0 / 3600.0)).abs() < 1e-9);
        assert_eq!(clock.day_index(), 0);
        assert_eq!(clock.day_start(), monday());
    }

    #[test]
    fn test_tick_helpers() {
        let clock = SimClock::new(monday(), 10);
        assert_eq!(clock.ticks_for_secs(25), 3);
        assert_eq!(clock.ticks_for_days(1), 8_640);
        assert_eq!(clock.dt_seconds(), 10.0);
    }

    #[test]
    fn test_weekend_detection() {
        let mut clock = SimClock::new(monday(), 3600);
        assert!(!clock.is_weekend());
        for _ in 0..(5 * 24) {
            clock.advance();
        }
        assert!(clock.is_weekend()); // Saturday
        assert_eq!(clock.day_index(), 5);
    }

    #[test]
    fn test_zero_tick_duration_clamped() {
        let clock = SimClock::new(monday(), 0);
        assert_eq!(clock.tick_seconds, 1);
    }
}
