#![allow(dead_code)]

use ev_battery_sim::domain::{ChargingSession, SafetyEvent, TelemetrySample, UserProfile};
use ev_battery_sim::simulation::{
    AmbientProfile, AnomalyMix, AnomalyPlan, RunReport, SchedulePlan, Segment, Simulation,
    SimulationConfig, SimulationObserver,
};
use ev_battery_sim::sink::{BufferedWriter, MemorySink, RetryPolicy, SinkError, TelemetrySink};
use tokio_util::sync::CancellationToken;

/// Scripted run on VEH001 with no faults and no sensor noise
pub fn scripted(segments: Vec<Segment>, repeat: bool, ticks: u64) -> SimulationConfig {
    SimulationConfig {
        duration_ticks: ticks,
        ambient: AmbientProfile::Constant {
            temperature_c: 20.0,
        },
        anomalies: AnomalyPlan::Generated(AnomalyMix::clean()),
        schedule: SchedulePlan::Scripted { segments, repeat },
        ..SimulationConfig::new("VEH001", UserProfile::CommonDriver)
    }
}

/// The typical fault mix, with capacity fade short enough for a one-day horizon
pub fn one_day_mix() -> AnomalyMix {
    let mut mix = AnomalyMix::typical();
    mix.capacity_fade.min_duration_s = 3_600;
    mix.capacity_fade.max_duration_s = 14_400;
    mix
}

pub fn memory_writer(batch_size: usize) -> BufferedWriter<MemorySink> {
    BufferedWriter::new(MemorySink::new(), batch_size, RetryPolicy::immediate(1))
}

/// Run to completion in memory
pub fn run_in_memory(config: SimulationConfig) -> (RunReport, Vec<TelemetrySample>) {
    let mut sim = Simulation::new(config).expect("valid config");
    let mut writer = memory_writer(10_000);
    let report = sim.run(&mut writer, &CancellationToken::new());
    (report, writer.into_inner().into_samples())
}

/// Accepts and drops everything
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn write_batch(&mut self, _samples: &[TelemetrySample]) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Run to completion, showing samples only to `observer`
pub fn run_observed(config: SimulationConfig, observer: &mut dyn SimulationObserver) -> RunReport {
    let mut sim = Simulation::new(config).expect("valid config");
    let mut writer = BufferedWriter::new(NullSink, 10_000, RetryPolicy::immediate(1));
    sim.run_with_observer(&mut writer, &CancellationToken::new(), observer)
}

/// Tracks extremes without keeping samples
pub struct Extremes {
    pub min_soc: f64,
    pub max_soc: f64,
    pub soh_increased: bool,
    last_soh: f64,
    pub driving_days: Vec<u64>,
}

impl Default for Extremes {
    fn default() -> Self {
        Self {
            min_soc: f64::MAX,
            max_soc: f64::MIN,
            soh_increased: false,
            last_soh: f64::MAX,
            driving_days: Vec::new(),
        }
    }
}

impl SimulationObserver for Extremes {
    fn on_sample(&mut self, tick: u64, sample: &TelemetrySample) {
        self.min_soc = self.min_soc.min(sample.soc_percent);
        self.max_soc = self.max_soc.max(sample.soc_percent);
        if sample.soh_percent > self.last_soh + 1e-12 {
            self.soh_increased = true;
        }
        self.last_soh = sample.soh_percent;
        let day = tick / 86_400;
        if sample.is_driving && sample.speed > 0.0 && self.driving_days.last() != Some(&day) {
            self.driving_days.push(day);
        }
    }
}

#[derive(Default)]
pub struct Recorder {
    pub samples: Vec<(u64, TelemetrySample)>,
    pub safety_events: Vec<SafetyEvent>,
    pub sessions: Vec<ChargingSession>,
}

impl SimulationObserver for Recorder {
    fn on_sample(&mut self, tick: u64, sample: &TelemetrySample) {
        self.samples.push((tick, sample.clone()));
    }

    fn on_safety_event(&mut self, event: &SafetyEvent) {
        self.safety_events.push(*event);
    }

    fn on_session_closed(&mut self, session: &ChargingSession) {
        self.sessions.push(session.clone());
    }
}
