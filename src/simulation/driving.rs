//! # Driving Load Generator
//!
//! Turns a driving pattern into a per-tick traction power demand, then into
//! a pack current on the 350 V nominal bus:
//!
//!   I = -P_kW * 1000 / 350
//!
//! Positive power draws from the pack (negative current); negative power is
//! regenerative braking. Each pattern is a small state machine that also
//! tracks vehicle speed so a drive segment can end on distance covered.

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Bus voltage used to convert traction power to pack current (V)
pub const NOMINAL_BUS_VOLTAGE: f64 = 350.0;

/// Pack current for a traction power demand (positive kW = draw)
#[inline]
pub fn power_to_current(power_kw: f64) -> f64 {
    -power_kw * 1000.0 / NOMINAL_BUS_VOLTAGE
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum DrivingPattern {
    City,
    Highway,
    Aggressive,
    Eco,
    Mixed,
}

impl DrivingPattern {
    /// Typical trip-average speed, stops included (km/h)
    pub fn average_speed_kmh(&self) -> f64 {
        match self {
            DrivingPattern::City => 15.0,
            DrivingPattern::Highway => 95.0,
            DrivingPattern::Aggressive => 60.0,
            DrivingPattern::Eco => 40.0,
            DrivingPattern::Mixed => 35.0,
        }
    }

    /// Energy use relative to the vehicle's rated Wh/km
    pub fn consumption_factor(&self) -> f64 {
        match self {
            DrivingPattern::City => 1.0,
            DrivingPattern::Highway => 1.1,
            DrivingPattern::Aggressive => 1.4,
            DrivingPattern::Eco => 0.85,
            DrivingPattern::Mixed => 1.05,
        }
    }

    /// Mean consumption of the unscaled power profile (Wh/km)
    pub fn profile_wh_per_km(&self) -> f64 {
        match self {
            DrivingPattern::City => 600.0,
            DrivingPattern::Highway => 425.0,
            DrivingPattern::Aggressive => 425.0,
            DrivingPattern::Eco => 330.0,
            DrivingPattern::Mixed => 500.0,
        }
    }

    /// Scale that makes the profile consume `wh_per_km * consumption_factor`
    pub fn power_scale(&self, wh_per_km: f64) -> f64 {
        wh_per_km * self.consumption_factor() / self.profile_wh_per_km()
    }
}

/// One tick of traction demand
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriveCommand {
    pub power_kw: f64,
    pub current_a: f64,
    pub speed_kmh: f64,
}

#[derive(Debug, Clone, PartialEq)]
enum CityPhase {
    Stopped { remaining_s: f64 },
    Accelerating { target_kmh: f64 },
    Cruising { remaining_s: f64 },
    Braking,
    Coasting { remaining_s: f64 },
}

#[derive(Debug, Clone, PartialEq)]
enum HighwayPhase {
    Entry { elapsed_s: f64 },
    Cruise,
}

#[derive(Debug, Clone, PartialEq)]
enum PatternState {
    City(CityPhase),
    Highway {
        phase: HighwayPhase,
        cruise_kmh: f64,
    },
    Aggressive {
        cycle_s: f64,
    },
    Eco {
        target_kmh: f64,
        since_change_s: f64,
    },
    Mixed {
        leg: usize,
        inner: Box<PatternState>,
    },
}

/// Mixed trips by share of distance: city, highway, city, eco
const MIXED_LEGS: [(f64, DrivingPattern); 4] = [
    (0.3, DrivingPattern::City),
    (0.7, DrivingPattern::Highway),
    (0.9, DrivingPattern::City),
    (1.0, DrivingPattern::Eco),
];

const ECO_TARGETS_KMH: [f64; 4] = [0.0, 50.0, 70.0, 90.0];

fn jitter(rng: &mut StdRng, sigma: f64) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    1.0 + sigma * z
}

impl PatternState {
    fn start(pattern: DrivingPattern, rng: &mut StdRng) -> Self {
        match pattern {
            DrivingPattern::City => PatternState::City(CityPhase::Stopped {
                remaining_s: rng.gen_range(30.0..90.0),
            }),
            DrivingPattern::Highway => PatternState::Highway {
                phase: HighwayPhase::Entry { elapsed_s: 0.0 },
                cruise_kmh: rng.gen_range(90.0..109.0),
            },
            DrivingPattern::Aggressive => PatternState::Aggressive { cycle_s: 0.0 },
            DrivingPattern::Eco => PatternState::Eco {
                target_kmh: ECO_TARGETS_KMH[rng.gen_range(0..ECO_TARGETS_KMH.len())],
                since_change_s: 0.0,
            },
            DrivingPattern::Mixed => PatternState::Mixed {
                leg: 0,
                inner: Box::new(PatternState::start(MIXED_LEGS[0].1, rng)),
            },
        }
    }

    /// Advance one tick; returns traction power (kW) and updates `speed`
    fn step(&mut self, speed: &mut f64, dt_s: f64, progress: f64, rng: &mut StdRng) -> f64 {
        match self {
            PatternState::City(phase) => step_city(phase, speed, dt_s, rng),
            PatternState::Highway { phase, cruise_kmh } => {
                step_highway(phase, *cruise_kmh, speed, dt_s, rng)
            }
            PatternState::Aggressive { cycle_s } => step_aggressive(cycle_s, speed, dt_s, rng),
            PatternState::Eco {
                target_kmh,
                since_change_s,
            } => {
                if *since_change_s >= 300.0 {
                    *target_kmh = ECO_TARGETS_KMH[rng.gen_range(0..ECO_TARGETS_KMH.len())];
                    *since_change_s = 0.0;
                }
                *since_change_s += dt_s;
                step_eco(*target_kmh, speed, dt_s)
            }
            PatternState::Mixed { leg, inner } => {
                let wanted = MIXED_LEGS
                    .iter()
                    .position(|(until, _)| progress < *until)
                    .unwrap_or(MIXED_LEGS.len() - 1);
                if wanted != *leg {
                    *leg = wanted;
                    **inner = PatternState::start(MIXED_LEGS[wanted].1, rng);
                }
                inner.step(speed, dt_s, progress, rng)
            }
        }
    }
}

fn step_city(phase: &mut CityPhase, speed: &mut f64, dt_s: f64, rng: &mut StdRng) -> f64 {
    match phase {
        CityPhase::Stopped { remaining_s } => {
            *speed = 0.0;
            *remaining_s -= dt_s;
            if *remaining_s <= 0.0 {
                *phase = CityPhase::Accelerating {
                    target_kmh: rng.gen_range(40.0..60.0),
                };
            }
            0.0
        }
        CityPhase::Accelerating { target_kmh } => {
            let power = rng.gen_range(30.0..60.0) * jitter(rng, 0.1);
            *speed += 4.8 * dt_s;
            if *speed >= *target_kmh {
                *speed = *target_kmh;
                *phase = CityPhase::Cruising {
                    remaining_s: rng.gen_range(10.0..30.0),
                };
            }
            power
        }
        CityPhase::Cruising { remaining_s } => {
            let power = (10.0 + 0.31 * *speed) * jitter(rng, 0.05);
            *remaining_s -= dt_s;
            if *remaining_s <= 0.0 {
                *phase = if rng.gen_bool(0.7) {
                    CityPhase::Braking
                } else {
                    CityPhase::Coasting {
                        remaining_s: rng.gen_range(5.0..15.0),
                    }
                };
            }
            power
        }
        CityPhase::Braking => {
            let regen = rng.gen_range(10.0..30.0);
            *speed -= 9.7 * dt_s;
            if *speed <= 0.0 {
                *speed = 0.0;
                *phase = CityPhase::Stopped {
                    remaining_s: rng.gen_range(30.0..90.0),
                };
            }
            -regen
        }
        CityPhase::Coasting { remaining_s } => {
            *speed = (*speed - 2.0 * dt_s).max(0.0);
            *remaining_s -= dt_s;
            if *remaining_s <= 0.0 || *speed < 19.0 {
                *phase = CityPhase::Braking;
            }
            2.0
        }
    }
}

fn step_highway(
    phase: &mut HighwayPhase,
    cruise_kmh: f64,
    speed: &mut f64,
    dt_s: f64,
    rng: &mut StdRng,
) -> f64 {
    match phase {
        HighwayPhase::Entry { elapsed_s } => {
            let power = (80.0 - 2.0 * *elapsed_s).max(20.0);
            *speed = (*speed + cruise_kmh / 30.0 * dt_s).min(cruise_kmh);
            *elapsed_s += dt_s;
            if *elapsed_s >= 30.0 {
                *speed = cruise_kmh;
                *phase = HighwayPhase::Cruise;
            }
            power
        }
        HighwayPhase::Cruise => {
            *speed = cruise_kmh;
            let base = 15.0 + 0.249 * cruise_kmh;
            if rng.gen_bool(0.05) {
                // Passing
                80.0
            } else if rng.gen_bool(0.02) {
                base * rng.gen_range(1.3..1.8)
            } else {
                base * jitter(rng, 0.03)
            }
        }
    }
}

fn step_aggressive(cycle_s: &mut f64, speed: &mut f64, dt_s: f64, rng: &mut StdRng) -> f64 {
    let position = *cycle_s % 60.0;
    let power = if position < 10.0 {
        *speed = (*speed + 6.0 * dt_s).min(130.0);
        rng.gen_range(100.0..150.0)
    } else if position < 20.0 {
        *speed = (*speed + 1.0 * dt_s).min(130.0);
        rng.gen_range(40.0..60.0)
    } else if position < 25.0 {
        *speed = (*speed - 8.0 * dt_s).max(30.0);
        -rng.gen_range(40.0..60.0)
    } else {
        rng.gen_range(20.0..40.0)
    };
    *cycle_s += dt_s;
    power * jitter(rng, 0.1)
}

fn step_eco(target_kmh: f64, speed: &mut f64, dt_s: f64) -> f64 {
    let diff = target_kmh - *speed;
    if diff > 1.0 {
        *speed = (*speed + 3.0 * dt_s).min(target_kmh);
        (diff * 2.0).min(30.0)
    } else if diff < -1.0 {
        *speed = (*speed - 8.0 * dt_s).max(target_kmh);
        -(diff.abs() * 1.5).min(25.0)
    } else if *speed > 0.0 {
        5.0 + 0.25 * *speed
    } else {
        0.0
    }
}

/// One drive segment in progress
#[derive(Debug, Clone)]
pub struct DriveSession {
    pattern: DrivingPattern,
    target_distance_km: f64,
    max_duration_s: f64,
    power_scale: f64,
    distance_km: f64,
    elapsed_s: f64,
    speed_kmh: f64,
    state: PatternState,
}

impl DriveSession {
    /// `power_scale` multiplies every power value of the pattern; 1.0 keeps
    /// the raw profile
    pub fn new(
        pattern: DrivingPattern,
        distance_km: f64,
        max_duration_s: f64,
        power_scale: f64,
        rng: &mut StdRng,
    ) -> Self {
        Self {
            pattern,
            target_distance_km: distance_km.max(0.0),
            max_duration_s,
            power_scale: power_scale.max(0.0),
            distance_km: 0.0,
            elapsed_s: 0.0,
            speed_kmh: 0.0,
            state: PatternState::start(pattern, rng),
        }
    }

    /// Default time limit: twice the expected duration, at least ten minutes
    pub fn default_time_limit_s(pattern: DrivingPattern, distance_km: f64) -> f64 {
        (2.0 * distance_km / pattern.average_speed_kmh() * 3600.0).max(600.0)
    }

    pub fn pattern(&self) -> DrivingPattern {
        self.pattern
    }

    pub fn distance_km(&self) -> f64 {
        self.distance_km
    }

    pub fn elapsed_s(&self) -> f64 {
        self.elapsed_s
    }

    pub fn is_finished(&self) -> bool {
        self.distance_km >= self.target_distance_km || self.elapsed_s >= self.max_duration_s
    }

    pub fn next(&mut self, dt_s: f64, rng: &mut StdRng) -> DriveCommand {
        let progress = if self.target_distance_km > 0.0 {
            self.distance_km / self.target_distance_km
        } else {
            1.0
        };
        let power_kw = self.state.step(&mut self.speed_kmh, dt_s, progress, rng) * self.power_scale;
        self.speed_kmh = self.speed_kmh.max(0.0);
        self.distance_km += self.speed_kmh * dt_s / 3600.0;
        self.elapsed_s += dt_s;
        DriveCommand {
            power_kw,
            current_a: power_to_current(power_kw),
            speed_kmh: self.speed_kmh,
        }
    }
}
