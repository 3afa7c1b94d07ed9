//! # Battery Telemetry Simulation
//!
//! Time-stepped electro-thermal simulation of an EV traction pack, producing
//! one telemetry sample per tick.
//!
//! ## Components
//!
//! - **Battery model**: OCV/resistance/thermal physics, one pure step per tick
//! - **Thermal safety**: BMS state machine limiting power with hysteresis
//! - **Charging**: CC-CV charge controller per charger class
//! - **Driving**: traction power profiles for five driving patterns
//! - **Anomalies**: seeded fault windows perturbing physics inputs and sensor readings
//! - **Scheduler**: turns a user profile into drive/charge/idle segments
//! - **Orchestrator**: the tick loop tying the above together
//! - **Fleet**: independent runs in parallel
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ev_battery_sim::domain::UserProfile;
//! use ev_battery_sim::simulation::{Simulation, SimulationConfig};
//! use ev_battery_sim::sink::{BufferedWriter, MemorySink, RetryPolicy};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = SimulationConfig::new("VEH001", UserProfile::CommonDriver)
//!     .with_days(7)
//!     .with_seed(42);
//! let mut sim = Simulation::new(config).unwrap();
//!
//! let mut writer = BufferedWriter::new(MemorySink::new(), 1_000, RetryPolicy::default());
//! let report = sim.run(&mut writer, &CancellationToken::new());
//!
//! println!("{} sessions, {} safety events", report.sessions.len(), report.safety_events.len());
//! ```

pub mod ambient;
pub mod anomaly;
pub mod battery_model;
pub mod charging;
pub mod clock;
pub mod driving;
pub mod fleet;
pub mod orchestrator;
pub mod rng;
pub mod scheduler;
pub mod thermal_safety;

pub use ambient::AmbientProfile;
pub use anomaly::{AnomalyEvent, AnomalyInjector, AnomalyKind, AnomalyMix, AnomalyPlan, Severity};
pub use battery_model::{BatteryModel, BoundaryViolation, Perturbation, PhysicsConfig, StepOutcome};
pub use charging::{ChargingEngine, ChargingPhase};
pub use clock::SimClock;
pub use driving::{DriveCommand, DriveSession, DrivingPattern};
pub use fleet::{run_fleet, FleetOutcome};
pub use orchestrator::{
    NoopObserver, RunReport, Simulation, SimulationConfig, SimulationError, SimulationObserver,
    SimulationSnapshot, StopReason,
};
pub use rng::{RngStream, RunSeed};
pub use scheduler::{
    ScheduleContext, SchedulePlan, Scheduler, ScriptedSchedule, Segment, SegmentSource,
    UserBehaviorScheduler,
};
pub use thermal_safety::{ThermalAssessment, ThermalReport, ThermalSafetyManager, ThermalThresholds};
