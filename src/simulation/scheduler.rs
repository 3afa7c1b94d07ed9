//! # User Behavior Scheduler
//!
//! Decides what the vehicle does next. The orchestrator asks for a new
//! [`Segment`] whenever the current one finishes, passing a snapshot of the
//! clock and pack in a [`ScheduleContext`].
//!
//! Decision order for [`UserBehaviorScheduler`]:
//!
//! 1. Forced charges: emergency SoC, stranding (days without a charge)
//! 2. Comfort charge when SoC sits below the comfort minimum (weekly cap aware)
//! 3. Opportunity charge right after a trip
//! 4. The night charging decision, once per night
//! 5. The next due trip, preceded by a safety-floor charge if the projected
//!    SoC at the end of the trip would fall below the floor
//! 6. Otherwise idle until the next thing on the agenda
//!
//! Trips for a day are planned the first time the scheduler is consulted on
//! that day.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::driving::{DriveSession, DrivingPattern};
use crate::config::ConfigError;
use crate::domain::{BatterySpecs, ChargeReason, ChargerType, UserBehavior};

const HOUR_S: f64 = 3_600.0;
/// Time allowed for protective charges
const FORCED_CHARGE_LIMIT_S: f64 = 3.0 * HOUR_S;
/// Extra SoC on top of the floor when charging for a long trip (%)
const SAFETY_FLOOR_MARGIN: f64 = 5.0;

/// One unit of scheduled activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "segment", rename_all = "snake_case")]
pub enum Segment {
    Drive {
        pattern: DrivingPattern,
        distance_km: f64,
        max_duration_s: f64,
    },
    Charge {
        charger: ChargerType,
        target_soc: f64,
        reason: ChargeReason,
        /// The session is interrupted when this runs out
        max_duration_s: Option<f64>,
    },
    Idle {
        duration_s: f64,
    },
    /// Fixed pack current for a fixed time, bypassing the drive and charge engines
    Bench {
        current_a: f64,
        duration_s: f64,
    },
}

/// What the scheduler may look at when deciding
#[derive(Debug, Clone)]
pub struct ScheduleContext<'a> {
    pub now: DateTime<Utc>,
    pub day_start: DateTime<Utc>,
    pub day_index: u64,
    pub hour: f64,
    pub is_weekend: bool,
    pub soc: f64,
    pub soh: f64,
    pub specs: &'a BatterySpecs,
}

pub trait SegmentSource {
    fn next_segment(&mut self, ctx: &ScheduleContext<'_>) -> Segment;
}

#[derive(Debug, Clone, PartialEq)]
struct PlannedTrip {
    at: DateTime<Utc>,
    pattern: DrivingPattern,
    distance_km: f64,
}

#[derive(Debug, Clone)]
pub struct UserBehaviorScheduler {
    behavior: UserBehavior,
    rng: StdRng,
    planned_day: Option<u64>,
    agenda: VecDeque<PlannedTrip>,
    week_index: u64,
    charges_this_week: u32,
    last_charge_day: u64,
    /// Night key (day the night began) of the last night decision
    night_decided: Option<i64>,
    after_trip: bool,
}

impl UserBehaviorScheduler {
    pub fn new(
        behavior: UserBehavior,
        specs: &BatterySpecs,
        rng: StdRng,
    ) -> Result<Self, ConfigError> {
        behavior.validate().map_err(|reason| ConfigError::Invalid {
            field: "profile".to_string(),
            reason,
        })?;

        // The longest possible day, driven aggressively, must fit between full and the floor
        let (_, max_km) = behavior.daily_distance_km;
        let max_km = max_km * behavior.weekend_distance_multiplier.max(1.0);
        let worst_kwh = max_km
            * specs.consumption_wh_per_km()
            * DrivingPattern::Aggressive.consumption_factor()
            / 1000.0;
        let usable_kwh = specs.nominal_capacity_kwh * (100.0 - behavior.safety_floor) / 100.0;
        if worst_kwh > usable_kwh {
            return Err(ConfigError::Unschedulable {
                kind: behavior.profile.to_string(),
                reason: format!(
                    "{:.0} km days need up to {:.1} kWh but {} has {:.1} kWh above the safety floor",
                    max_km, worst_kwh, specs.vehicle_id, usable_kwh
                ),
            });
        }

        Ok(Self {
            behavior,
            rng,
            planned_day: None,
            agenda: VecDeque::new(),
            week_index: 0,
            charges_this_week: 0,
            last_charge_day: 0,
            night_decided: None,
            after_trip: false,
        })
    }

    pub fn behavior(&self) -> &UserBehavior {
        &self.behavior
    }

    /// Preference-driven charges allowed per week
    pub fn weekly_cap(&self) -> u32 {
        self.behavior.base_charges_per_week.ceil() as u32 + 1
    }

    pub fn charges_this_week(&self) -> u32 {
        self.charges_this_week
    }

    fn under_cap(&self) -> bool {
        self.charges_this_week < self.weekly_cap()
    }

    fn roll_week(&mut self, day_index: u64) {
        let week = day_index / 7;
        if week != self.week_index {
            debug!(
                week,
                charges = self.charges_this_week,
                "Weekly charge counter reset"
            );
            self.week_index = week;
            self.charges_this_week = 0;
        }
    }

    fn plan_day(&mut self, ctx: &ScheduleContext<'_>) {
        let (lo, hi) = self.behavior.distance_range_km(ctx.is_weekend);
        let total_km = if hi > lo {
            self.rng.gen_range(lo..=hi)
        } else {
            lo
        };

        let mut hours = self.behavior.peak_activity_hours.clone();
        hours.sort_unstable();
        hours.dedup();
        hours.shuffle(&mut self.rng);
        let n = self.rng.gen_range(2..=4).min(hours.len());
        hours.truncate(n);
        hours.sort_unstable();

        let weights: Vec<f64> = hours.iter().map(|_| self.rng.gen_range(0.5..1.5)).collect();
        let weight_sum: f64 = weights.iter().sum();

        let mut trips = Vec::with_capacity(n + 1);
        for (hour, weight) in hours.iter().zip(&weights) {
            let minute = self.rng.gen_range(0..60);
            let distance_km = total_km * weight / weight_sum;
            trips.push(PlannedTrip {
                at: ctx.day_start + Duration::minutes(*hour as i64 * 60 + minute),
                pattern: self.pick_pattern(distance_km),
                distance_km,
            });
        }

        if self.rng.gen_bool(self.behavior.spontaneity_factor * 0.3) {
            let hour = self.rng.gen_range(12..21);
            let minute = self.rng.gen_range(0..60);
            let distance_km = self.rng.gen_range(5.0..20.0);
            trips.push(PlannedTrip {
                at: ctx.day_start + Duration::minutes(hour * 60 + minute),
                pattern: self.pick_pattern(distance_km),
                distance_km,
            });
        }

        trips.sort_by_key(|t| t.at);
        let cutoff = ctx.now - Duration::hours(1);
        self.agenda = trips.into_iter().filter(|t| t.at >= cutoff).collect();
        self.planned_day = Some(ctx.day_index);

        debug!(
            day = ctx.day_index,
            trips = self.agenda.len(),
            total_km,
            "Day planned"
        );
    }

    /// Driving style weighted by the profile: eco, normal, aggressive
    fn pick_pattern(&mut self, distance_km: f64) -> DrivingPattern {
        let eco = self.behavior.eco_consciousness;
        let normal = 1.0 - (self.behavior.performance_preference - 0.5).abs();
        let aggressive = self.behavior.performance_preference;
        let roll = self.rng.gen_range(0.0..(eco + normal + aggressive));
        if roll < eco {
            DrivingPattern::Eco
        } else if roll < eco + normal {
            match distance_km {
                d if d < 15.0 => DrivingPattern::City,
                d if d < 40.0 => DrivingPattern::Mixed,
                _ => DrivingPattern::Highway,
            }
        } else {
            DrivingPattern::Aggressive
        }
    }

    fn choose_charger(&mut self, soc: f64, at_home: bool) -> ChargerType {
        let urgency = 1.0 - soc / 100.0;
        let b = &self.behavior;
        if !at_home && (urgency > 0.8 || b.spontaneity_factor > 0.7) {
            if self.rng.gen_bool(0.7) {
                ChargerType::DC_FAST
            } else {
                ChargerType::SUPERCHARGER
            }
        } else if b.eco_consciousness > 0.7 {
            if self.rng.gen_bool(0.8) {
                ChargerType::AC_L2
            } else {
                ChargerType::AC_L1
            }
        } else {
            ChargerType::AC_L2
        }
    }

    fn charge(
        &mut self,
        ctx: &ScheduleContext<'_>,
        charger: ChargerType,
        target_soc: f64,
        reason: ChargeReason,
        max_duration_s: f64,
    ) -> Segment {
        self.charges_this_week += 1;
        self.last_charge_day = ctx.day_index;
        self.after_trip = false;
        if reason.is_forced() {
            warn!(
                soc = ctx.soc,
                target_soc,
                %reason,
                %charger,
                "Forced charge scheduled"
            );
        } else {
            info!(
                soc = ctx.soc,
                target_soc,
                %reason,
                %charger,
                week_count = self.charges_this_week,
                "Charge scheduled"
            );
        }
        Segment::Charge {
            charger,
            target_soc,
            reason,
            max_duration_s: Some(max_duration_s),
        }
    }

    fn forced_check(&mut self, ctx: &ScheduleContext<'_>) -> Option<Segment> {
        let b = &self.behavior;
        let target = b.soc_target;
        if ctx.soc < b.emergency_soc {
            return Some(self.charge(
                ctx,
                ChargerType::DC_FAST,
                target,
                ChargeReason::Emergency,
                FORCED_CHARGE_LIMIT_S,
            ));
        }

        let days_without = ctx.day_index.saturating_sub(self.last_charge_day);
        if days_without >= b.stranding_days as u64 && ctx.soc < b.stranding_soc {
            return Some(self.charge(
                ctx,
                ChargerType::DC_FAST,
                target,
                ChargeReason::Stranding,
                FORCED_CHARGE_LIMIT_S,
            ));
        }

        if ctx.soc <= b.charge_threshold()
            && (self.under_cap() || ctx.soc < b.weekly_cap_override_soc)
        {
            let charger = self.choose_charger(ctx.soc, false);
            return Some(self.charge(
                ctx,
                charger,
                target,
                ChargeReason::Comfort,
                charge_time_limit(charger),
            ));
        }
        None
    }

    fn opportunity_check(&mut self, ctx: &ScheduleContext<'_>) -> Option<Segment> {
        if !std::mem::take(&mut self.after_trip) {
            return None;
        }
        let b = &self.behavior;
        let target = b.soc_target;
        if ctx.soc >= target * 0.7 || !self.under_cap() {
            return None;
        }
        if !self.rng.gen_bool(self.behavior.opportunity_charging_probability) {
            return None;
        }
        let low = (ctx.soc + 15.0).min(target);
        let target_soc = if low < target {
            self.rng.gen_range(low..target)
        } else {
            target
        }
        .min(95.0);
        let charger = self.choose_charger(ctx.soc, false);
        let limit = if charger.is_dc() { HOUR_S } else { 2.0 * HOUR_S };
        Some(self.charge(ctx, charger, target_soc, ChargeReason::Opportunity, limit))
    }

    fn night_check(&mut self, ctx: &ScheduleContext<'_>) -> Option<Segment> {
        let wake = self.behavior.wake_hour_range.0 as f64;
        let key = if ctx.hour >= 22.0 {
            ctx.day_index as i64
        } else if ctx.hour < wake {
            ctx.day_index as i64 - 1
        } else {
            return None;
        };
        if self.night_decided == Some(key) {
            return None;
        }
        self.night_decided = Some(key);

        let b = &self.behavior;
        if ctx.soc >= b.soc_target * 0.9 || !self.under_cap() {
            return None;
        }
        let day_in_week = ctx.day_index % 7;
        let expected = b.base_charges_per_week * (day_in_week + 1) as f64 / 7.0;
        let behind = (self.charges_this_week as f64) < expected - 1.0;
        let p = b.night_charging_probability;
        if !(behind || self.rng.gen_bool(p)) {
            debug!(soc = ctx.soc, "Skipped night charge");
            return None;
        }

        let until_wake_h = if ctx.hour < wake {
            wake - ctx.hour
        } else {
            24.0 - ctx.hour + wake
        };
        let charger = self.choose_charger(ctx.soc, true);
        let target = self.behavior.soc_target;
        Some(self.charge(
            ctx,
            charger,
            target,
            ChargeReason::Night,
            until_wake_h * HOUR_S,
        ))
    }

    /// SoC at the end of a trip at rated consumption
    fn projected_soc(ctx: &ScheduleContext<'_>, pattern: DrivingPattern, distance_km: f64) -> f64 {
        ctx.soc - trip_soc_drop(ctx, pattern, distance_km)
    }

    fn trip_check(&mut self, ctx: &ScheduleContext<'_>) -> Option<Segment> {
        let due = self.agenda.front().map(|t| t.at <= ctx.now).unwrap_or(false);
        if !due {
            return None;
        }
        let mut trip = self.agenda.pop_front()?;
        let floor = self.behavior.safety_floor;
        let projected = Self::projected_soc(ctx, trip.pattern, trip.distance_km);

        if projected < floor {
            if ctx.soc < 99.0 {
                let drop = ctx.soc - projected;
                let target = self
                    .behavior
                    .soc_target
                    .max(floor + drop + SAFETY_FLOOR_MARGIN)
                    .min(100.0);
                info!(
                    soc = ctx.soc,
                    projected,
                    floor,
                    distance_km = trip.distance_km,
                    "Trip would breach safety floor"
                );
                self.agenda.push_front(trip);
                return Some(self.charge(
                    ctx,
                    ChargerType::DC_FAST,
                    target,
                    ChargeReason::SafetyFloor,
                    FORCED_CHARGE_LIMIT_S,
                ));
            }
            // Already full: shorten the trip to what the pack allows
            let per_km = trip_soc_drop(ctx, trip.pattern, 1.0);
            let feasible = ((ctx.soc - floor) / per_km).max(0.0);
            warn!(
                planned_km = trip.distance_km,
                feasible_km = feasible,
                "Trip shortened to respect safety floor"
            );
            trip.distance_km = feasible;
        }

        self.after_trip = true;
        Some(Segment::Drive {
            pattern: trip.pattern,
            distance_km: trip.distance_km,
            max_duration_s: DriveSession::default_time_limit_s(trip.pattern, trip.distance_km),
        })
    }

    fn idle(&self, ctx: &ScheduleContext<'_>) -> Segment {
        let midnight = ctx.day_start + Duration::days(1);
        let mut until = midnight;
        if let Some(trip) = self.agenda.front() {
            until = until.min(trip.at);
        }
        let tonight = ctx.day_start + Duration::hours(22);
        if tonight > ctx.now && self.night_decided != Some(ctx.day_index as i64) {
            until = until.min(tonight);
        }
        let seconds = (until - ctx.now).num_seconds().max(1);
        Segment::Idle {
            duration_s: seconds as f64,
        }
    }
}

/// SoC consumed by a trip at the vehicle's rated Wh/km
fn trip_soc_drop(ctx: &ScheduleContext<'_>, pattern: DrivingPattern, distance_km: f64) -> f64 {
    let usable_kwh = ctx.specs.nominal_capacity_kwh * ctx.soh / 100.0;
    let kwh = distance_km * ctx.specs.consumption_wh_per_km() * pattern.consumption_factor() / 1000.0;
    kwh / usable_kwh * 100.0
}

fn charge_time_limit(charger: ChargerType) -> f64 {
    match charger {
        ChargerType::AC_L1 => 12.0 * HOUR_S,
        ChargerType::AC_L2 => 8.0 * HOUR_S,
        ChargerType::DC_FAST | ChargerType::SUPERCHARGER => 2.0 * HOUR_S,
    }
}

impl SegmentSource for UserBehaviorScheduler {
    fn next_segment(&mut self, ctx: &ScheduleContext<'_>) -> Segment {
        self.roll_week(ctx.day_index);
        if self.planned_day != Some(ctx.day_index) {
            self.plan_day(ctx);
        }

        if let Some(segment) = self.forced_check(ctx) {
            return segment;
        }
        if let Some(segment) = self.opportunity_check(ctx) {
            return segment;
        }
        if let Some(segment) = self.night_check(ctx) {
            return segment;
        }
        if let Some(segment) = self.trip_check(ctx) {
            return segment;
        }
        self.idle(ctx)
    }
}

/// Caller-supplied segment list, optionally repeated
#[derive(Debug, Clone)]
pub struct ScriptedSchedule {
    segments: Vec<Segment>,
    next: usize,
    repeat: bool,
}

impl ScriptedSchedule {
    pub fn new(segments: Vec<Segment>, repeat: bool) -> Self {
        Self {
            segments,
            next: 0,
            repeat,
        }
    }
}

impl SegmentSource for ScriptedSchedule {
    fn next_segment(&mut self, _ctx: &ScheduleContext<'_>) -> Segment {
        if self.next >= self.segments.len() && self.repeat {
            self.next = 0;
        }
        match self.segments.get(self.next) {
            Some(segment) => {
                self.next += 1;
                segment.clone()
            }
            None => Segment::Idle {
                duration_s: 86_400.0,
            },
        }
    }
}

/// How the segment sequence is produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SchedulePlan {
    /// Driven by the run's user profile
    #[default]
    Profile,
    Scripted {
        segments: Vec<Segment>,
        #[serde(default)]
        repeat: bool,
    },
}

#[derive(Debug, Clone)]
pub enum Scheduler {
    Behavior(UserBehaviorScheduler),
    Scripted(ScriptedSchedule),
}

impl Scheduler {
    pub fn from_plan(
        plan: &SchedulePlan,
        behavior: UserBehavior,
        specs: &BatterySpecs,
        rng: StdRng,
    ) -> Result<Self, ConfigError> {
        match plan {
            SchedulePlan::Profile => Ok(Scheduler::Behavior(UserBehaviorScheduler::new(
                behavior, specs, rng,
            )?)),
            SchedulePlan::Scripted { segments, repeat } => {
                if segments.is_empty() {
                    return Err(ConfigError::Invalid {
                        field: "schedule.segments".to_string(),
                        reason: "scripted schedule needs at least one segment".to_string(),
                    });
                }
                Ok(Scheduler::Scripted(ScriptedSchedule::new(
                    segments.clone(),
                    *repeat,
                )))
            }
        }
    }
}

impl SegmentSource for Scheduler {
    fn next_segment(&mut self, ctx: &ScheduleContext<'_>) -> Segment {
        match self {
            Scheduler::Behavior(s) => s.next_segment(ctx),
            Scheduler::Scripted(s) => s.next_segment(ctx),
        }
    }
}
