use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::{Validate, ValidationErrors};

use crate::domain::{BatteryError, BatterySpecs, UserProfile};
use crate::simulation::ambient::AmbientProfile;
use crate::simulation::anomaly::{AnomalyEvent, AnomalyMix, AnomalyPlan};
use crate::simulation::battery_model::PhysicsConfig;
use crate::simulation::orchestrator::{Simulation, SimulationConfig};
use crate::simulation::rng::RunSeed;
use crate::simulation::scheduler::SchedulePlan;
use crate::simulation::thermal_safety::ThermalThresholds;
use crate::sink::RetryPolicy;

const ENV_PREFIX: &str = "EVSIM__";
const SECONDS_PER_DAY: u64 = 86_400;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("Invalid configuration: {0}")]
    Validation(#[from] ValidationErrors),
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
    #[error(transparent)]
    Battery(#[from] BatteryError),
    #[error("Cannot schedule {kind}: {reason}")]
    Unschedulable { kind: String, reason: String },
    #[error("Unknown user profile: {0}")]
    UnknownProfile(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SimulationSection {
    pub start: DateTime<Utc>,
    /// Simulated days; ignored when `ticks` is set
    #[validate(range(min = 1, max = 3650))]
    pub days: u64,
    pub ticks: Option<u64>,
    #[validate(range(min = 1, max = 3600))]
    pub tick_seconds: u32,
    /// Fleet seed; each run derives its own unless overridden
    pub seed: u64,
    pub anomalies_enabled: bool,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            start: Utc
                .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_default(),
            days: 7,
            ticks: None,
            tick_seconds: 1,
            seed: 42,
            anomalies_enabled: true,
        }
    }
}

impl SimulationSection {
    pub fn duration_ticks(&self) -> u64 {
        self.ticks
            .unwrap_or(self.days * SECONDS_PER_DAY / self.tick_seconds.max(1) as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SinkSection {
    pub output_dir: PathBuf,
    #[validate(range(min = 1, max = 1_000_000))]
    pub batch_size: usize,
    #[validate(nested)]
    pub retry: RetryPolicy,
    /// Write safety events, sessions and anomaly windows next to the telemetry
    pub export_ground_truth: bool,
}

impl Default for SinkSection {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            batch_size: 1_000,
            retry: RetryPolicy::default(),
            export_ground_truth: true,
        }
    }
}

/// One vehicle in the fleet
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VehicleRun {
    pub vehicle_id: String,
    #[serde(default = "default_profile")]
    pub profile: UserProfile,
    pub seed: Option<u64>,
    #[serde(default = "default_initial_soc")]
    #[validate(range(min = 0.0, max = 100.0))]
    pub initial_soc: f64,
    #[serde(default = "default_initial_temperature")]
    #[validate(range(min = -40.0, max = 120.0))]
    pub initial_temperature_c: f64,
    #[serde(default = "default_initial_soh")]
    #[validate(range(min = 1.0, max = 100.0))]
    pub initial_soh: f64,
    #[serde(default)]
    pub ambient: AmbientProfile,
    #[serde(default)]
    pub schedule: SchedulePlan,
    /// Fixed anomaly windows instead of the generated mix
    pub anomaly_events: Option<Vec<AnomalyEvent>>,
}

fn default_profile() -> UserProfile {
    UserProfile::CommonDriver
}

fn default_initial_soc() -> f64 {
    80.0
}

fn default_initial_temperature() -> f64 {
    25.0
}

fn default_initial_soh() -> f64 {
    100.0
}

impl VehicleRun {
    pub fn new(vehicle_id: &str, profile: UserProfile) -> Self {
        Self {
            vehicle_id: vehicle_id.to_string(),
            profile,
            seed: None,
            initial_soc: default_initial_soc(),
            initial_temperature_c: default_initial_temperature(),
            initial_soh: default_initial_soh(),
            ambient: AmbientProfile::default(),
            schedule: SchedulePlan::default(),
            anomaly_events: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub simulation: SimulationSection,
    #[validate(nested)]
    pub thermal: ThermalThresholds,
    #[validate(nested)]
    pub physics: PhysicsConfig,
    #[validate(nested)]
    pub anomalies: AnomalyMix,
    #[validate(nested)]
    pub sink: SinkSection,
    #[validate(length(min = 1), nested)]
    pub fleet: Vec<VehicleRun>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            simulation: SimulationSection::default(),
            thermal: ThermalThresholds::default(),
            physics: PhysicsConfig::default(),
            anomalies: AnomalyMix::typical(),
            sink: SinkSection::default(),
            fleet: vec![VehicleRun::new("VEH001", UserProfile::CommonDriver)],
        }
    }
}

/// Command-line values that take precedence over file and environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub days: Option<u64>,
    pub seed: Option<u64>,
    pub vehicle: Option<String>,
    pub profile: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub no_anomalies: bool,
}

impl Config {
    /// Defaults, then the TOML file, then `EVSIM__*` environment variables
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        let config: Config = figment.extract().map_err(Box::new)?;
        config.check()?;
        Ok(config)
    }

    /// Field validation plus the cross-field rules validator can't express
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()?;
        self.thermal
            .check_ordering()
            .map_err(|reason| ConfigError::invalid("thermal", reason))?;
        self.physics
            .check_bounds()
            .map_err(|reason| ConfigError::invalid("physics", reason))?;
        for (i, run) in self.fleet.iter().enumerate() {
            BatterySpecs::for_vehicle(&run.vehicle_id)?;
            run.ambient
                .validate()
                .map_err(|reason| ConfigError::invalid(&format!("fleet[{i}].ambient"), reason))?;
        }
        if self.simulation.duration_ticks() == 0 {
            return Err(ConfigError::invalid(
                "simulation.ticks",
                "run must cover at least one tick",
            ));
        }
        Ok(())
    }

    pub fn apply_overrides(mut self, overrides: &Overrides) -> Result<Self, ConfigError> {
        if let Some(days) = overrides.days {
            self.simulation.days = days;
            self.simulation.ticks = None;
        }
        if let Some(seed) = overrides.seed {
            self.simulation.seed = seed;
        }
        if let Some(vehicle) = &overrides.vehicle {
            BatterySpecs::for_vehicle(vehicle)?;
            let template = self.fleet.first().cloned().unwrap_or_else(|| {
                VehicleRun::new(vehicle, UserProfile::CommonDriver)
            });
            self.fleet = vec![VehicleRun {
                vehicle_id: vehicle.clone(),
                ..template
            }];
        }
        if let Some(name) = &overrides.profile {
            let profile: UserProfile = name
                .parse()
                .map_err(|_| ConfigError::UnknownProfile(name.clone()))?;
            for run in &mut self.fleet {
                run.profile = profile;
            }
        }
        if let Some(dir) = &overrides.output_dir {
            self.sink.output_dir = dir.clone();
        }
        if overrides.no_anomalies {
            self.simulation.anomalies_enabled = false;
        }
        self.check()?;
        Ok(self)
    }

    /// One simulation config per fleet entry
    pub fn simulation_configs(&self) -> Vec<SimulationConfig> {
        let sim = &self.simulation;
        self.fleet
            .iter()
            .enumerate()
            .map(|(index, run)| {
                let seed = run
                    .seed
                    .map(RunSeed)
                    .unwrap_or_else(|| RunSeed::for_fleet_member(sim.seed, index));
                let anomalies = match (&run.anomaly_events, sim.anomalies_enabled) {
                    (_, false) => AnomalyPlan::Generated(AnomalyMix::clean()),
                    (Some(events), true) => AnomalyPlan::Explicit {
                        events: events.clone(),
                        sensor_noise_sigma: self.anomalies.sensor_noise_sigma,
                    },
                    (None, true) => AnomalyPlan::Generated(self.anomalies.clone()),
                };
                SimulationConfig {
                    vehicle_id: run.vehicle_id.clone(),
                    profile: run.profile,
                    start: sim.start,
                    duration_ticks: sim.duration_ticks(),
                    tick_seconds: sim.tick_seconds,
                    seed,
                    initial_soc: run.initial_soc,
                    initial_temperature_c: run.initial_temperature_c,
                    initial_soh: run.initial_soh,
                    ambient: run.ambient.clone(),
                    thermal: self.thermal.clone(),
                    physics: self.physics.clone(),
                    anomalies,
                    schedule: run.schedule.clone(),
                }
            })
            .collect()
    }

    /// Build every run's simulation without stepping it. Catches what only
    /// the full setup sees, such as anomaly windows that outgrow the horizon.
    pub fn build_runs(&self) -> Result<Vec<Simulation>, ConfigError> {
        self.simulation_configs()
            .into_iter()
            .map(Simulation::new)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.check().unwrap();
        assert_eq!(config.simulation.duration_ticks(), 7 * 86_400);
    }

    #[test]
    fn test_load_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[simulation]
days = 2
tick_seconds = 10
seed = 7

[thermal]
warning_c = 48.0

[[fleet]]
vehicle_id = "VEH002"
profile = "CAUTIOUS"
initial_soc = 55.0
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.simulation.duration_ticks(), 2 * 8_640);
        assert_eq!(config.thermal.warning_c, 48.0);
        assert_eq!(config.thermal.critical_c, 55.0);
        assert_eq!(config.fleet.len(), 1);
        assert_eq!(config.fleet[0].profile, UserProfile::Cautious);
        assert_eq!(config.fleet[0].initial_soh, 100.0);
    }

    #[test]
    fn test_unknown_vehicle_fails_fast() {
        let mut config = Config::default();
        config.fleet[0].vehicle_id = "VEH404".to_string();
        assert!(matches!(
            config.check(),
            Err(ConfigError::Battery(BatteryError::UnknownVehicle(_)))
        ));
    }

    #[test]
    fn test_field_range_validation() {
        let mut config = Config::default();
        config.fleet[0].initial_soc = 130.0;
        assert!(matches!(config.check(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_section_ranges_and_ordering() {
        let mut config = Config::default();
        config.thermal.critical_power_limit = 1.5;
        assert!(matches!(config.check(), Err(ConfigError::Validation(_))));

        let mut config = Config::default();
        config.physics.specific_heat_j_per_kg_k = 0.0;
        assert!(matches!(config.check(), Err(ConfigError::Validation(_))));

        let mut config = Config::default();
        config.anomalies.sensor_noise_sigma = -0.1;
        assert!(matches!(config.check(), Err(ConfigError::Validation(_))));

        let mut config = Config::default();
        config.thermal.recovery_c = 52.0;
        assert!(matches!(
            config.check(),
            Err(ConfigError::Invalid { ref field, .. }) if field == "thermal"
        ));
    }

    #[test]
    fn test_build_runs_checks_anomaly_fit() {
        let mut config = Config::default();
        config.simulation.days = 1;
        config.check().unwrap();
        assert!(matches!(
            config.build_runs(),
            Err(ConfigError::Unschedulable { .. })
        ));

        config.anomalies = AnomalyMix::clean();
        assert_eq!(config.build_runs().unwrap().len(), 1);
    }

    #[test]
    fn test_overrides() {
        let overrides = Overrides {
            days: Some(1),
            seed: Some(99),
            vehicle: Some("VEH002".to_string()),
            profile: Some("commuter".to_string()),
            output_dir: None,
            no_anomalies: true,
        };
        let config = Config::default().apply_overrides(&overrides).unwrap();
        let runs = config.simulation_configs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].vehicle_id, "VEH002");
        assert_eq!(runs[0].profile, UserProfile::Commuter);
        assert_eq!(runs[0].duration_ticks, 86_400);
        assert_eq!(runs[0].seed, RunSeed::for_fleet_member(99, 0));
        assert_eq!(runs[0].anomalies, AnomalyPlan::Generated(AnomalyMix::clean()));

        let bad = Overrides {
            profile: Some("SPEED_DEMON".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            Config::default().apply_overrides(&bad),
            Err(ConfigError::UnknownProfile(_))
        ));
    }

    #[test]
    fn test_seed_override_per_run() {
        let mut config = Config::default();
        config.fleet.push(VehicleRun {
            seed: Some(1234),
            ..VehicleRun::new("VEH002", UserProfile::EcoConscious)
        });
        let runs = config.simulation_configs();
        assert_eq!(runs[0].seed, RunSeed::for_fleet_member(42, 0));
        assert_eq!(runs[1].seed, RunSeed(1234));
    }
}
