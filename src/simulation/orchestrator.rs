//! # Simulation Orchestrator
//!
//! Fixed-tick driver loop. One tick:
//!
//! 1. ambient temperature for the hour of day
//! 2. thermal evaluation of the pack temperature from the previous tick
//! 3. segment bookkeeping: finish the current segment, ask the scheduler for the next
//! 4. dispatch to the drive or charge engine for the requested current
//! 5. anomaly perturbation of the request and of the physics inputs
//! 6. BMS limiting with the thermal power factor
//! 7. physics step
//! 8. charging session accounting
//! 9. sample construction, sensor perturbation and labeling
//!
//! Samples go to a [`BufferedWriter`]. A sink failure stops the run with the
//! state intact; calling `run` again retries the pending batch and resumes
//! from the next tick.

use chrono::{DateTime, TimeZone, Utc};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn};
use validator::Validate;

use super::ambient::AmbientProfile;
use super::anomaly::{AnomalyEvent, AnomalyInjector, AnomalyPlan};
use super::battery_model::{BatteryModel, PhysicsConfig};
use super::charging::{ChargingEngine, ChargingPhase};
use super::clock::SimClock;
use super::driving::DriveSession;
use super::rng::{RngStream, RunSeed};
use super::scheduler::{ScheduleContext, SchedulePlan, Scheduler, Segment, SegmentSource};
use super::thermal_safety::{ThermalAssessment, ThermalReport, ThermalSafetyManager, ThermalThresholds};
use crate::config::ConfigError;
use crate::domain::{
    BatterySpecs, BatteryState, ChargingSession, InterruptReason, SafetyEvent, SessionOutcome,
    TelemetrySample, UserBehavior, UserProfile,
};
use crate::sink::{BufferedWriter, SinkError, TelemetrySink};

/// Scheduler calls per tick before falling back to a short idle
const MAX_SEGMENT_ATTEMPTS: usize = 3;
const FALLBACK_IDLE_S: u64 = 60;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("Simulation task failed: {0}")]
    Task(String),
}

/// Everything needed to reproduce one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub vehicle_id: String,
    pub profile: UserProfile,
    pub start: DateTime<Utc>,
    pub duration_ticks: u64,
    pub tick_seconds: u32,
    pub seed: RunSeed,
    pub initial_soc: f64,
    pub initial_temperature_c: f64,
    pub initial_soh: f64,
    pub ambient: AmbientProfile,
    pub thermal: ThermalThresholds,
    pub physics: PhysicsConfig,
    pub anomalies: AnomalyPlan,
    pub schedule: SchedulePlan,
}

impl SimulationConfig {
    /// One day at 1 Hz with default physics and no scheduled faults
    pub fn new(vehicle_id: &str, profile: UserProfile) -> Self {
        Self {
            vehicle_id: vehicle_id.to_string(),
            profile,
            start: Utc
                .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_default(),
            duration_ticks: 86_400,
            tick_seconds: 1,
            seed: RunSeed(42),
            initial_soc: 80.0,
            initial_temperature_c: 25.0,
            initial_soh: 100.0,
            ambient: AmbientProfile::default(),
            thermal: ThermalThresholds::default(),
            physics: PhysicsConfig::default(),
            anomalies: AnomalyPlan::default(),
            schedule: SchedulePlan::Profile,
        }
    }

    pub fn with_days(mut self, days: u64) -> Self {
        self.duration_ticks = days * 86_400 / self.tick_seconds.max(1) as u64;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = RunSeed(seed);
        self
    }
}

/// Observation hooks, all optional
pub trait SimulationObserver {
    fn on_tick_start(&mut self, _tick: u64, _state: &BatteryState) {}
    fn on_sample(&mut self, _tick: u64, _sample: &TelemetrySample) {}
    fn on_safety_event(&mut self, _event: &SafetyEvent) {}
    fn on_session_closed(&mut self, _session: &ChargingSession) {}
    fn on_run_end(&mut self, _report: &RunReport) {}
}

pub struct NoopObserver;

impl SimulationObserver for NoopObserver {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    Cancelled,
    SinkFailed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub vehicle_id: String,
    pub seed: u64,
    /// Ticks simulated so far, across resumes
    pub ticks_run: u64,
    pub sessions: Vec<ChargingSession>,
    pub safety_events: Vec<SafetyEvent>,
    pub anomaly_events: Vec<AnomalyEvent>,
    pub boundary_violations: u64,
    pub deep_discharges: u64,
    pub last_persisted_tick: Option<u64>,
    pub stop_reason: StopReason,
    pub final_state: BatteryState,
    pub thermal: ThermalReport,
}

#[derive(Debug, Clone)]
enum ActiveSegment {
    Drive(DriveSession),
    Charge {
        engine: ChargingEngine,
        session: ChargingSession,
        ends_at_tick: Option<u64>,
    },
    Idle {
        ends_at_tick: u64,
    },
    Bench {
        current_a: f64,
        ends_at_tick: u64,
    },
}

/// Frozen copy of a run between ticks
#[derive(Debug, Clone)]
pub struct SimulationSnapshot {
    inner: Simulation,
}

impl SimulationSnapshot {
    pub fn tick(&self) -> u64 {
        self.inner.clock.current_tick
    }

    pub fn state(&self) -> &BatteryState {
        &self.inner.state
    }
}

#[derive(Debug, Clone)]
pub struct Simulation {
    config: SimulationConfig,
    model: BatteryModel,
    behavior: UserBehavior,
    clock: SimClock,
    state: BatteryState,
    thermal: ThermalSafetyManager,
    scheduler: Scheduler,
    anomalies: AnomalyInjector,
    driving_rng: StdRng,
    segment: Option<ActiveSegment>,
    sessions: Vec<ChargingSession>,
    boundary_violations: u64,
    deep_discharges: u64,
    events_forwarded: usize,
}

impl Simulation {
    /// Validate the configuration and build the initial state. Nothing is
    /// simulated until `run` is called.
    pub fn new(config: SimulationConfig) -> Result<Self, ConfigError> {
        if config.tick_seconds == 0 {
            return Err(ConfigError::invalid("tick_seconds", "must be at least 1"));
        }
        if config.duration_ticks == 0 {
            return Err(ConfigError::invalid(
                "duration_ticks",
                "run must cover at least one tick",
            ));
        }
        config.thermal.validate()?;
        config
            .thermal
            .check_ordering()
            .map_err(|reason| ConfigError::invalid("thermal", reason))?;
        config
            .ambient
            .validate()
            .map_err(|reason| ConfigError::invalid("ambient", reason))?;

        let specs = BatterySpecs::for_vehicle(&config.vehicle_id)?;
        let model = BatteryModel::new(specs, config.physics.clone())?;
        let state = model.initial_state(
            config.initial_soc,
            config.initial_temperature_c,
            config.initial_soh,
        )?;

        let behavior = config.profile.behavior();
        let scheduler = Scheduler::from_plan(
            &config.schedule,
            behavior.clone(),
            model.specs(),
            config.seed.stream(RngStream::Scheduler),
        )?;
        let anomalies =
            config
                .anomalies
                .build(config.seed, config.duration_ticks, config.tick_seconds)?;

        info!(
            vehicle_id = %config.vehicle_id,
            profile = %config.profile,
            seed = config.seed.0,
            ticks = config.duration_ticks,
            tick_seconds = config.tick_seconds,
            anomalies = anomalies.events().len(),
            "Simulation configured"
        );

        Ok(Self {
            clock: SimClock::new(config.start, config.tick_seconds),
            thermal: ThermalSafetyManager::new(
                &config.vehicle_id,
                config.thermal.clone(),
                config.start,
            ),
            driving_rng: config.seed.stream(RngStream::Driving),
            model,
            behavior,
            state,
            scheduler,
            anomalies,
            segment: None,
            sessions: Vec::new(),
            boundary_violations: 0,
            deep_discharges: 0,
            events_forwarded: 0,
            config,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn state(&self) -> &BatteryState {
        &self.state
    }

    pub fn current_tick(&self) -> u64 {
        self.clock.current_tick
    }

    pub fn is_complete(&self) -> bool {
        self.clock.current_tick >= self.config.duration_ticks
    }

    pub fn thermal(&self) -> &ThermalSafetyManager {
        &self.thermal
    }

    /// Closed sessions, oldest first
    pub fn sessions(&self) -> &[ChargingSession] {
        &self.sessions
    }

    pub fn open_session(&self) -> Option<&ChargingSession> {
        match &self.segment {
            Some(ActiveSegment::Charge { session, .. }) => Some(session),
            _ => None,
        }
    }

    pub fn anomaly_events(&self) -> &[AnomalyEvent] {
        self.anomalies.events()
    }

    pub fn snapshot(&self) -> SimulationSnapshot {
        SimulationSnapshot {
            inner: self.clone(),
        }
    }

    pub fn from_snapshot(snapshot: SimulationSnapshot) -> Self {
        snapshot.inner
    }

    pub fn run<S: TelemetrySink>(
        &mut self,
        writer: &mut BufferedWriter<S>,
        cancel: &CancellationToken,
    ) -> RunReport {
        self.run_with_observer(writer, cancel, &mut NoopObserver)
    }

    /// Run until the configured duration, cancellation or a sink failure
    pub fn run_with_observer<S: TelemetrySink>(
        &mut self,
        writer: &mut BufferedWriter<S>,
        cancel: &CancellationToken,
        observer: &mut dyn SimulationObserver,
    ) -> RunReport {
        let span = info_span!(
            "simulation",
            vehicle_id = %self.config.vehicle_id,
            seed = self.config.seed.0
        );
        let _guard = span.enter();

        if writer.has_pending() {
            info!(pending = writer.pending_len(), "Retrying pending batch before resuming");
            if let Err(e) = writer.flush_pending() {
                return self.stop(StopReason::SinkFailed { error: e.to_string() }, writer, observer);
            }
        }

        let start_tick = self.clock.current_tick;
        while !self.is_complete() {
            if cancel.is_cancelled() {
                info!(tick = self.clock.current_tick, "Simulation cancelled");
                return self.stop(StopReason::Cancelled, writer, observer);
            }
            let tick = self.clock.current_tick;
            let sample = self.step(observer);
            observer.on_sample(tick, &sample);
            if let Err(e) = writer.push(tick, sample) {
                error!(tick, error = %e, "Telemetry sink failed, stopping run");
                return self.stop(StopReason::SinkFailed { error: e.to_string() }, writer, observer);
            }
        }

        let now = self.clock.now();
        self.finish_segment(now, Some(InterruptReason::SegmentEnded), observer);
        if let Err(e) = writer.finish() {
            error!(error = %e, "Final flush failed");
            return self.stop(StopReason::SinkFailed { error: e.to_string() }, writer, observer);
        }
        info!(
            ticks = self.clock.current_tick - start_tick,
            sessions = self.sessions.len(),
            safety_events = self.thermal.events().len(),
            final_soc = self.state.soc,
            final_soh = self.state.soh,
            "Simulation complete"
        );
        self.stop(StopReason::Completed, writer, observer)
    }

    /// Advance exactly one tick and return its sample
    pub fn step(&mut self, observer: &mut dyn SimulationObserver) -> TelemetrySample {
        let tick = self.clock.current_tick;
        let now = self.clock.now();
        let dt = self.clock.dt_seconds();
        observer.on_tick_start(tick, &self.state);

        let ambient = self.config.ambient.at_hour(self.clock.hour_of_day());
        let assessment = self.thermal.evaluate(self.state.temperature, now, tick, dt);
        for event in &self.thermal.events()[self.events_forwarded..] {
            observer.on_safety_event(event);
        }
        self.events_forwarded = self.thermal.events().len();

        self.ensure_segment(tick, now, assessment.power_limit_factor, observer);
        let (mut requested, speed, driving) = self.dispatch(&assessment, dt);
        if requested > 0.0 && !driving {
            requested *= self.anomalies.charging_multiplier(tick);
        }
        let perturbation = self.anomalies.perturbation(tick);

        let applied = self
            .model
            .limit_current(requested, &self.state, assessment.power_limit_factor);
        let outcome = self
            .model
            .step(&self.state, applied, ambient, dt, &perturbation);
        if outcome.deep_discharge {
            self.deep_discharges += 1;
            warn!(tick, "Deep discharge, current forced to zero");
        }
        for violation in &outcome.violations {
            warn!(tick, ?violation, "Boundary violation clamped");
        }
        self.boundary_violations += outcome.violations.len() as u64;
        self.state = outcome.state;

        if let Some(ActiveSegment::Charge { session, .. }) = &mut self.segment {
            session.record_tick(self.state.current, self.state.voltage, dt);
        }

        let mut sample = TelemetrySample {
            time: now,
            vehicle_id: self.config.vehicle_id.clone(),
            soc_percent: self.state.soc,
            voltage: self.state.voltage,
            current: self.state.current,
            temperature: self.state.temperature,
            power: self.state.power_w(),
            soh_percent: self.state.soh,
            is_charging: self.state.current > 0.0 && !driving,
            is_driving: driving,
            speed,
            thermal_status: assessment.status,
            anomaly_active: None,
        };
        self.anomalies.apply_to_sample(tick, &mut sample);

        self.clock.advance();
        sample
    }

    fn dispatch(&mut self, assessment: &ThermalAssessment, dt: f64) -> (f64, f64, bool) {
        match &mut self.segment {
            Some(ActiveSegment::Drive(session)) => {
                let command = session.next(dt, &mut self.driving_rng);
                (command.current_a, command.speed_kmh, true)
            }
            Some(ActiveSegment::Charge { engine, .. }) => {
                let current = engine.command(
                    &self.state,
                    assessment.status,
                    assessment.charge_permission,
                    dt,
                );
                (current, 0.0, false)
            }
            Some(ActiveSegment::Bench { current_a, .. }) => (*current_a, 0.0, false),
            Some(ActiveSegment::Idle { .. }) | None => (0.0, 0.0, false),
        }
    }

    /// Drive and bench segments also end once the pack has no power to give
    fn segment_finished(&self, tick: u64, power_limit_factor: f64) -> bool {
        let powered = power_limit_factor > 0.0;
        match &self.segment {
            None => true,
            Some(ActiveSegment::Drive(session)) => {
                if session.is_finished() {
                    return true;
                }
                if !powered {
                    warn!(
                        temperature_c = self.state.temperature,
                        driven_km = session.distance_km(),
                        "Drive ended, pack power cut by thermal protection"
                    );
                    return true;
                }
                let floor_applies = matches!(self.scheduler, Scheduler::Behavior(_));
                if floor_applies && self.state.soc <= self.behavior.safety_floor {
                    info!(
                        soc = self.state.soc,
                        floor = self.behavior.safety_floor,
                        driven_km = session.distance_km(),
                        "Drive cut short at safety floor"
                    );
                    return true;
                }
                false
            }
            Some(ActiveSegment::Charge {
                engine,
                ends_at_tick,
                ..
            }) => engine.phase().is_terminal() || ends_at_tick.is_some_and(|end| tick >= end),
            Some(ActiveSegment::Idle { ends_at_tick }) => tick >= *ends_at_tick,
            Some(ActiveSegment::Bench { ends_at_tick, .. }) => !powered || tick >= *ends_at_tick,
        }
    }

    fn ensure_segment(
        &mut self,
        tick: u64,
        now: DateTime<Utc>,
        power_limit_factor: f64,
        observer: &mut dyn SimulationObserver,
    ) {
        if !self.segment_finished(tick, power_limit_factor) {
            return;
        }
        self.finish_segment(now, Some(InterruptReason::SegmentEnded), observer);

        for _ in 0..MAX_SEGMENT_ATTEMPTS {
            let ctx = ScheduleContext {
                now,
                day_start: self.clock.day_start(),
                day_index: self.clock.day_index(),
                hour: self.clock.hour_of_day(),
                is_weekend: self.clock.is_weekend(),
                soc: self.state.soc,
                soh: self.state.soh,
                specs: self.model.specs(),
            };
            let next = self.scheduler.next_segment(&ctx);
            if let Some(active) = self.start_segment(next, tick, now, power_limit_factor) {
                self.segment = Some(active);
                return;
            }
        }
        debug!(tick, "No usable segment, idling");
        self.segment = Some(ActiveSegment::Idle {
            ends_at_tick: tick + self.clock.ticks_for_secs(FALLBACK_IDLE_S).max(1),
        });
    }

    fn ticks_for(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) / self.clock.dt_seconds()).ceil().max(1.0) as u64
    }

    fn start_segment(
        &mut self,
        segment: Segment,
        tick: u64,
        now: DateTime<Utc>,
        power_limit_factor: f64,
    ) -> Option<ActiveSegment> {
        let draws_power = matches!(segment, Segment::Drive { .. } | Segment::Bench { .. });
        if draws_power && power_limit_factor <= 0.0 {
            debug!(tick, temperature_c = self.state.temperature, "Segment refused, pack power cut");
            return None;
        }
        match segment {
            Segment::Drive {
                pattern,
                distance_km,
                max_duration_s,
            } => {
                if distance_km <= 0.01 {
                    return None;
                }
                let scale = pattern.power_scale(self.model.specs().consumption_wh_per_km());
                debug!(%pattern, distance_km, soc = self.state.soc, "Drive started");
                Some(ActiveSegment::Drive(DriveSession::new(
                    pattern,
                    distance_km,
                    max_duration_s,
                    scale,
                    &mut self.driving_rng,
                )))
            }
            Segment::Charge {
                charger,
                target_soc,
                reason,
                max_duration_s,
            } => {
                if self.state.soc >= target_soc {
                    debug!(soc = self.state.soc, target_soc, "Charge skipped, already at target");
                    return None;
                }
                let session = ChargingSession::open(
                    &self.config.vehicle_id,
                    now,
                    charger,
                    reason,
                    self.state.soc,
                    target_soc,
                );
                info!(%charger, %reason, soc = self.state.soc, target_soc, "Charging session opened");
                Some(ActiveSegment::Charge {
                    engine: ChargingEngine::new(charger, self.model.specs(), target_soc),
                    session,
                    ends_at_tick: max_duration_s.map(|s| tick + self.ticks_for(s)),
                })
            }
            Segment::Idle { duration_s } => Some(ActiveSegment::Idle {
                ends_at_tick: tick + self.ticks_for(duration_s),
            }),
            Segment::Bench {
                current_a,
                duration_s,
            } => Some(ActiveSegment::Bench {
                current_a,
                ends_at_tick: tick + self.ticks_for(duration_s),
            }),
        }
    }

    /// Drop the current segment, closing its session if it had one.
    /// `interrupt` applies only when the engine has not already stopped.
    fn finish_segment(
        &mut self,
        now: DateTime<Utc>,
        interrupt: Option<InterruptReason>,
        observer: &mut dyn SimulationObserver,
    ) {
        let Some(ActiveSegment::Charge {
            mut engine,
            mut session,
            ..
        }) = self.segment.take()
        else {
            return;
        };
        if let Some(reason) = interrupt {
            engine.interrupt(reason);
        }
        let outcome = match engine.phase() {
            ChargingPhase::Complete => SessionOutcome::Complete,
            ChargingPhase::Interrupted(reason) => SessionOutcome::Interrupted(reason),
            _ => SessionOutcome::Interrupted(InterruptReason::SegmentEnded),
        };
        session.close(now, self.state.soc, outcome);
        info!(
            charger = %session.charger_type,
            reason = %session.reason,
            outcome = ?session.outcome,
            start_soc = session.start_soc,
            end_soc = self.state.soc,
            energy_kwh = session.energy_delivered_kwh,
            "Charging session closed"
        );
        observer.on_session_closed(&session);
        self.sessions.push(session);
    }

    fn stop<S: TelemetrySink>(
        &mut self,
        stop_reason: StopReason,
        writer: &BufferedWriter<S>,
        observer: &mut dyn SimulationObserver,
    ) -> RunReport {
        let report = RunReport {
            vehicle_id: self.config.vehicle_id.clone(),
            seed: self.config.seed.0,
            ticks_run: self.clock.current_tick,
            sessions: self.sessions.clone(),
            safety_events: self.thermal.events().to_vec(),
            anomaly_events: self.anomalies.events().to_vec(),
            boundary_violations: self.boundary_violations,
            deep_discharges: self.deep_discharges,
            last_persisted_tick: writer.last_persisted_tick(),
            stop_reason,
            final_state: self.state,
            thermal: self.thermal.report(),
        };
        observer.on_run_end(&report);
        report
    }
}
