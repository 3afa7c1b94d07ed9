use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

const KM_PER_MILE: f64 = 1.609_344;

/// Driver personality types
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserProfile {
    /// Calibrated baseline for a typical driver
    CommonDriver,
    NightOwl,
    EarlyBird,
    Spontaneous,
    Cautious,
    Commuter,
    WeekendWarrior,
    EcoConscious,
    PerformanceEnthusiast,
}

/// Behavior constants for a profile, read-only input to the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBehavior {
    pub profile: UserProfile,
    /// Earliest and latest first departure hour
    pub wake_hour_range: (u32, u32),
    /// Hours of the day with most trips
    pub peak_activity_hours: Vec<u32>,
    /// Daily distance range on weekdays (km)
    pub daily_distance_km: (f64, f64),
    pub weekend_distance_multiplier: f64,
    /// Lower edge of the comfort band; charging is wanted below this
    pub soc_comfort_min: f64,
    /// Upper edge of the comfort band; charge sessions target this
    pub soc_target: f64,
    /// Trips are never planned to end below this
    pub safety_floor: f64,
    /// Charge immediately below this, ignoring every other rule
    pub emergency_soc: f64,
    /// Above the weekly cap, still charge below this
    pub weekly_cap_override_soc: f64,
    /// Multiplies the comfort minimum before deciding to charge (range anxiety)
    pub charging_anxiety_factor: f64,
    pub base_charges_per_week: f64,
    pub night_charging_probability: f64,
    pub opportunity_charging_probability: f64,
    /// Days without a charge that trigger a forced one
    pub stranding_days: u32,
    /// Forced stranding charge only when SoC is under this
    pub stranding_soc: f64,
    pub spontaneity_factor: f64,
    pub planning_factor: f64,
    pub eco_consciousness: f64,
    pub performance_preference: f64,
}

impl UserProfile {
    pub fn behavior(&self) -> UserBehavior {
        let common = UserBehavior::common_driver();
        match self {
            UserProfile::CommonDriver => common,
            UserProfile::NightOwl => UserBehavior {
                profile: *self,
                wake_hour_range: (10, 12),
                peak_activity_hours: vec![14, 15, 16, 20, 21, 22, 23, 0, 1],
                daily_distance_km: (30.0, 80.0),
                weekend_distance_multiplier: 1.5,
                soc_comfort_min: 20.0,
                soc_target: 80.0,
                safety_floor: 15.0,
                charging_anxiety_factor: 0.7,
                base_charges_per_week: 3.0,
                night_charging_probability: 0.3, // Often forgets
                opportunity_charging_probability: 0.4,
                spontaneity_factor: 0.8,
                planning_factor: 0.3,
                eco_consciousness: 0.4,
                performance_preference: 0.6,
                ..common
            },
            UserProfile::EarlyBird => UserBehavior {
                profile: *self,
                wake_hour_range: (5, 6),
                peak_activity_hours: vec![6, 7, 8, 9, 10, 11],
                daily_distance_km: (40.0, 100.0),
                weekend_distance_multiplier: 0.8,
                soc_comfort_min: 40.0,
                soc_target: 90.0,
                safety_floor: 25.0,
                charging_anxiety_factor: 1.3,
                base_charges_per_week: 6.0,
                night_charging_probability: 0.9,
                opportunity_charging_probability: 0.2,
                spontaneity_factor: 0.2,
                planning_factor: 0.9,
                eco_consciousness: 0.7,
                performance_preference: 0.3,
                ..common
            },
            UserProfile::Spontaneous => UserBehavior {
                profile: *self,
                wake_hour_range: (7, 11),
                peak_activity_hours: (10..22).collect(),
                daily_distance_km: (20.0, 150.0),
                weekend_distance_multiplier: 1.2,
                soc_comfort_min: 15.0, // Lets it get low
                soc_target: 70.0,
                safety_floor: 10.0,
                emergency_soc: 10.0,
                weekly_cap_override_soc: 12.0,
                charging_anxiety_factor: 0.5,
                base_charges_per_week: 3.5,
                night_charging_probability: 0.5,
                opportunity_charging_probability: 0.6,
                spontaneity_factor: 0.95,
                planning_factor: 0.1,
                eco_consciousness: 0.5,
                performance_preference: 0.7,
                ..common
            },
            UserProfile::Cautious => UserBehavior {
                profile: *self,
                wake_hour_range: (6, 7),
                peak_activity_hours: vec![8, 9, 10, 14, 15, 16, 17],
                daily_distance_km: (30.0, 60.0),
                weekend_distance_multiplier: 0.9,
                soc_comfort_min: 50.0, // Never lets it get low
                soc_target: 95.0,
                safety_floor: 35.0,
                charging_anxiety_factor: 1.5,
                base_charges_per_week: 7.0,
                night_charging_probability: 0.95,
                opportunity_charging_probability: 0.7,
                stranding_soc: 60.0,
                spontaneity_factor: 0.1,
                planning_factor: 0.95,
                eco_consciousness: 0.8,
                performance_preference: 0.1,
                ..common
            },
            UserProfile::Commuter => UserBehavior {
                profile: *self,
                wake_hour_range: (6, 7),
                peak_activity_hours: vec![7, 8, 17, 18], // Rush hours
                daily_distance_km: (60.0, 120.0),
                weekend_distance_multiplier: 0.4,
                soc_comfort_min: 30.0,
                soc_target: 85.0,
                charging_anxiety_factor: 1.1,
                base_charges_per_week: 5.0,
                night_charging_probability: 0.8,
                opportunity_charging_probability: 0.3,
                spontaneity_factor: 0.3,
                planning_factor: 0.7,
                eco_consciousness: 0.6,
                performance_preference: 0.4,
                ..common
            },
            UserProfile::WeekendWarrior => UserBehavior {
                profile: *self,
                wake_hour_range: (7, 8),
                peak_activity_hours: vec![9, 10, 11, 14, 15, 16],
                daily_distance_km: (20.0, 40.0),
                weekend_distance_multiplier: 4.0,
                soc_comfort_min: 25.0,
                soc_target: 90.0,
                charging_anxiety_factor: 1.0,
                base_charges_per_week: 4.0,
                night_charging_probability: 0.6,
                opportunity_charging_probability: 0.5, // DC fast on trips
                spontaneity_factor: 0.6,
                planning_factor: 0.6,
                eco_consciousness: 0.4,
                performance_preference: 0.8,
                ..common
            },
            UserProfile::EcoConscious => UserBehavior {
                profile: *self,
                wake_hour_range: (6, 7),
                peak_activity_hours: vec![8, 9, 10, 11, 14, 15, 16, 17],
                daily_distance_km: (40.0, 80.0),
                weekend_distance_multiplier: 1.1,
                soc_comfort_min: 20.0,
                soc_target: 80.0,
                safety_floor: 15.0,
                charging_anxiety_factor: 0.9,
                base_charges_per_week: 5.0,
                night_charging_probability: 0.9, // Off-peak
                opportunity_charging_probability: 0.4,
                spontaneity_factor: 0.4,
                planning_factor: 0.8,
                eco_consciousness: 0.95,
                performance_preference: 0.1,
                ..common
            },
            UserProfile::PerformanceEnthusiast => UserBehavior {
                profile: *self,
                wake_hour_range: (7, 8),
                peak_activity_hours: vec![9, 10, 17, 18, 19, 20],
                daily_distance_km: (50.0, 120.0),
                weekend_distance_multiplier: 1.5,
                soc_comfort_min: 30.0,
                soc_target: 90.0,
                charging_anxiety_factor: 1.0,
                base_charges_per_week: 5.0,
                night_charging_probability: 0.7,
                opportunity_charging_probability: 0.6, // Supercharger stops
                spontaneity_factor: 0.7,
                planning_factor: 0.5,
                eco_consciousness: 0.2,
                performance_preference: 0.95,
                ..common
            },
        }
    }
}

impl UserBehavior {
    /// Baseline calibrated against published charging behavior surveys:
    /// 80-90% daily target, 20-30% comfort minimum, 3-7 sessions a week
    pub fn common_driver() -> Self {
        Self {
            profile: UserProfile::CommonDriver,
            wake_hour_range: (6, 7),
            peak_activity_hours: vec![8, 9, 10, 11, 14, 15, 16, 17],
            daily_distance_km: (28.0 * KM_PER_MILE, 40.0 * KM_PER_MILE),
            weekend_distance_multiplier: 1.2,
            soc_comfort_min: 25.0,
            soc_target: 85.0,
            safety_floor: 20.0,
            emergency_soc: 15.0,
            weekly_cap_override_soc: 20.0,
            charging_anxiety_factor: 1.0,
            base_charges_per_week: 4.5,
            night_charging_probability: 0.80,
            opportunity_charging_probability: 0.35,
            stranding_days: 4,
            stranding_soc: 40.0,
            spontaneity_factor: 0.5,
            planning_factor: 0.7,
            eco_consciousness: 0.6,
            performance_preference: 0.4,
        }
    }

    /// Comfort threshold after applying range anxiety
    pub fn charge_threshold(&self) -> f64 {
        (self.soc_comfort_min * self.charging_anxiety_factor).clamp(0.0, self.soc_target)
    }

    /// Distance range for a given day, in km
    pub fn distance_range_km(&self, is_weekend: bool) -> (f64, f64) {
        let (min, max) = self.daily_distance_km;
        if is_weekend {
            (
                min * self.weekend_distance_multiplier,
                max * self.weekend_distance_multiplier,
            )
        } else {
            (min, max)
        }
    }

    /// Check internal consistency of the constants
    pub fn validate(&self) -> Result<(), String> {
        let in_range = |v: f64| (0.0..=100.0).contains(&v);
        if !(in_range(self.safety_floor) && in_range(self.soc_comfort_min) && in_range(self.soc_target)) {
            return Err("SoC thresholds must lie within 0-100%".to_string());
        }
        if self.safety_floor > self.soc_comfort_min || self.soc_comfort_min >= self.soc_target {
            return Err(format!(
                "expected safety_floor <= soc_comfort_min < soc_target, got {} / {} / {}",
                self.safety_floor, self.soc_comfort_min, self.soc_target
            ));
        }
        if self.emergency_soc > self.safety_floor {
            return Err("emergency_soc must not exceed safety_floor".to_string());
        }
        let (min, max) = self.daily_distance_km;
        if min <= 0.0 || max < min {
            return Err("daily distance range must be positive and ordered".to_string());
        }
        if self.base_charges_per_week <= 0.0 {
            return Err("base_charges_per_week must be positive".to_string());
        }
        if self.peak_activity_hours.is_empty() || self.peak_activity_hours.iter().any(|h| *h > 23) {
            return Err("peak_activity_hours must be non-empty hours of the day".to_string());
        }
        for p in [
            self.night_charging_probability,
            self.opportunity_charging_probability,
            self.spontaneity_factor,
            self.eco_consciousness,
            self.performance_preference,
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(format!("probability/factor out of range: {}", p));
            }
        }
        Ok(())
    }
}
