//! A simulated week of the calibrated COMMON_DRIVER profile

mod common;

use chrono::{DateTime, Utc};
use common::Extremes;
use ev_battery_sim::domain::{ChargingSession, TelemetrySample, UserProfile};
use ev_battery_sim::simulation::{
    AnomalyMix, AnomalyPlan, NoopObserver, SimulationConfig, SimulationObserver, StopReason,
};
use rstest::rstest;

/// Charge completion is detected on the tick after the target is crossed
const TARGET_OVERSHOOT: f64 = 0.5;

fn week(vehicle_id: &str, seed: u64) -> SimulationConfig {
    SimulationConfig {
        anomalies: AnomalyPlan::Generated(AnomalyMix::clean()),
        ..SimulationConfig::new(vehicle_id, UserProfile::CommonDriver)
            .with_days(7)
            .with_seed(seed)
    }
}

/// Consecutive samples outside the comfort band
#[derive(Debug, Clone)]
struct Excursion {
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    lowest: f64,
    highest: f64,
}

struct BandWatch {
    min: f64,
    max: f64,
    excursions: Vec<Excursion>,
    open: bool,
}

impl BandWatch {
    fn new(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            excursions: Vec::new(),
            open: false,
        }
    }
}

impl SimulationObserver for BandWatch {
    fn on_sample(&mut self, _tick: u64, sample: &TelemetrySample) {
        let soc = sample.soc_percent;
        if (self.min..=self.max).contains(&soc) {
            self.open = false;
            return;
        }
        match self.excursions.last_mut() {
            Some(current) if self.open => {
                current.to = sample.time;
                current.lowest = current.lowest.min(soc);
                current.highest = current.highest.max(soc);
            }
            _ => {
                self.excursions.push(Excursion {
                    from: sample.time,
                    to: sample.time,
                    lowest: soc,
                    highest: soc,
                });
                self.open = true;
            }
        }
    }
}

/// True when the excursion overlaps a charge the scheduler forced
fn caused_by_forced_charge(excursion: &Excursion, sessions: &[ChargingSession]) -> bool {
    sessions.iter().filter(|s| s.reason.is_forced()).any(|s| {
        let end = s.end_time.unwrap_or(DateTime::<Utc>::MAX_UTC);
        s.start_time <= excursion.to && excursion.from <= end
    })
}

#[rstest]
#[case("VEH001", 1)]
#[case("VEH001", 2024)]
#[case("VEH002", 7)]
fn test_weekly_charge_count(#[case] vehicle: &str, #[case] seed: u64) {
    let report = common::run_observed(week(vehicle, seed), &mut NoopObserver);
    assert_eq!(report.stop_reason, StopReason::Completed);
    let count = report.sessions.len();
    assert!(
        (3..=7).contains(&count),
        "{count} sessions: {:?}",
        report.sessions.iter().map(|s| s.reason).collect::<Vec<_>>()
    );
}

#[rstest]
#[case("VEH001", 1)]
#[case("VEH001", 99)]
#[case("VEH002", 7)]
fn test_soc_stays_in_comfort_band(#[case] vehicle: &str, #[case] seed: u64) {
    let behavior = UserProfile::CommonDriver.behavior();
    let mut watch = BandWatch::new(behavior.soc_comfort_min, behavior.soc_target + TARGET_OVERSHOOT);
    let report = common::run_observed(week(vehicle, seed), &mut watch);
    assert_eq!(report.stop_reason, StopReason::Completed);

    let unexplained: Vec<&Excursion> = watch
        .excursions
        .iter()
        .filter(|e| !caused_by_forced_charge(e, &report.sessions))
        .collect();
    assert!(
        unexplained.is_empty(),
        "soc left [{}, {}] outside forced charges: {unexplained:?}",
        behavior.soc_comfort_min,
        behavior.soc_target
    );
}

#[test]
fn test_drives_every_weekday() {
    let mut extremes = Extremes::default();
    common::run_observed(week("VEH001", 3), &mut extremes);
    for day in 0..5 {
        assert!(extremes.driving_days.contains(&day), "no driving on day {day}");
    }
}

#[test]
fn test_soh_never_increases() {
    let mut extremes = Extremes::default();
    let report = common::run_observed(week("VEH002", 5), &mut extremes);
    assert!(!extremes.soh_increased);
    assert!(report.final_state.soh <= 100.0);
}
