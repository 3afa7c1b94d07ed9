//! # Charging Profile Engine
//!
//! CC-CV charge controller. Each call to [`ChargingEngine::command`] advances
//! the phase machine by one tick and returns the current to request from the
//! pack before BMS limiting.
//!
//! ```text
//! ConstantCurrent --(soc ≥ cv_soc | V ≥ V_cv)--> ConstantVoltage
//!        |                                             |
//!        +-------(within taper band of target)---------+--> Tapering
//!                                                          |
//!   any active phase --(thermal shutdown | segment end)--> Interrupted
//!   any active phase --(soc ≥ target)--------------------> Complete
//! ```
//!
//! From the first ConstantVoltage or Tapering tick onwards the commanded
//! current never increases.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{
    BatterySpecs, BatteryState, ChargePermission, ChargerType, InterruptReason, ThermalStatus,
};

/// Soft start in constant current (s)
const STARTUP_RAMP_S: f64 = 10.0;
/// Distance from target where tapering begins (% SoC)
const TAPER_BAND_PERCENT: f64 = 2.0;
/// Current floor while tapering (A)
const COMPLETION_CURRENT_A: f64 = 1.0;
/// e-folding SoC distance of the CV decay (% SoC)
const CV_DECAY_PERCENT: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "reason", rename_all = "snake_case")]
pub enum ChargingPhase {
    ConstantCurrent,
    ConstantVoltage,
    Tapering,
    Complete,
    Interrupted(InterruptReason),
}

impl ChargingPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChargingPhase::Complete | ChargingPhase::Interrupted(_))
    }
}

#[derive(Debug, Clone)]
pub struct ChargingEngine {
    charger: ChargerType,
    target_soc: f64,
    rated_current: f64,
    cv_voltage: f64,
    cv_soc: f64,
    phase: ChargingPhase,
    elapsed_s: f64,
    /// Last commanded current, the ceiling once CV starts
    last_command: f64,
    /// Current at the moment tapering began
    taper_entry: f64,
}

impl ChargingEngine {
    pub fn new(charger: ChargerType, specs: &BatterySpecs, target_soc: f64) -> Self {
        Self {
            charger,
            target_soc: target_soc.clamp(0.0, 100.0),
            rated_current: charger.rated_current(specs),
            cv_voltage: charger.cv_voltage(specs),
            cv_soc: charger.cv_transition_soc(),
            phase: ChargingPhase::ConstantCurrent,
            elapsed_s: 0.0,
            last_command: 0.0,
            taper_entry: 0.0,
        }
    }

    pub fn charger(&self) -> ChargerType {
        self.charger
    }

    pub fn phase(&self) -> ChargingPhase {
        self.phase
    }

    pub fn target_soc(&self) -> f64 {
        self.target_soc
    }

    pub fn rated_current(&self) -> f64 {
        self.rated_current
    }

    /// Stop an active session from outside, e.g. when its time slot runs out
    pub fn interrupt(&mut self, reason: InterruptReason) {
        if !self.phase.is_terminal() {
            debug!(charger = %self.charger, ?reason, "Charging interrupted");
            self.phase = ChargingPhase::Interrupted(reason);
        }
    }

    /// Advance one tick and return the commanded charging current (A, ≥ 0)
    pub fn command(
        &mut self,
        state: &BatteryState,
        thermal: ThermalStatus,
        permission: ChargePermission,
        dt_s: f64,
    ) -> f64 {
        let next = self.next_phase(state, thermal);
        if next != self.phase {
            debug!(
                charger = %self.charger,
                from = ?self.phase,
                to = ?next,
                soc = state.soc,
                voltage = state.voltage,
                "Charging phase change"
            );
            if next == ChargingPhase::Tapering {
                self.taper_entry = self.last_command.max(COMPLETION_CURRENT_A);
            }
            self.phase = next;
        }

        let current = match self.phase {
            ChargingPhase::Complete | ChargingPhase::Interrupted(_) => return 0.0,
            ChargingPhase::ConstantCurrent => {
                let ramp = ((self.elapsed_s + dt_s) / STARTUP_RAMP_S).min(1.0);
                self.rated_current * ramp * self.power_factor(state.soc)
            }
            ChargingPhase::ConstantVoltage => {
                let decay = (-(state.soc - self.cv_soc) / CV_DECAY_PERCENT).exp();
                let cv = (self.rated_current * 0.5 * decay).min(self.rated_current);
                self.held(cv)
            }
            ChargingPhase::Tapering => {
                let remaining = (self.target_soc - state.soc).max(0.0);
                let taper = (self.taper_entry * remaining / TAPER_BAND_PERCENT)
                    .max(COMPLETION_CURRENT_A);
                self.held(taper)
            }
        };

        self.elapsed_s += dt_s;
        self.last_command = current;

        if permission == ChargePermission::Denied {
            // Plugged in but paused; the phase and ceiling are kept
            0.0
        } else {
            current
        }
    }

    /// Once past constant current the command may only fall
    fn held(&self, candidate: f64) -> f64 {
        if self.last_command > 0.0 {
            candidate.min(self.last_command)
        } else {
            candidate
        }
    }

    /// SoC-dependent power share; only the supercharger tapers its CC stage
    fn power_factor(&self, soc: f64) -> f64 {
        if self.charger != ChargerType::SUPERCHARGER {
            return 1.0;
        }
        if soc < 20.0 {
            1.0
        } else if soc < 50.0 {
            0.9
        } else {
            (0.8 - (soc - 50.0) * 0.005).max(0.1)
        }
    }

    fn next_phase(&self, state: &BatteryState, thermal: ThermalStatus) -> ChargingPhase {
        let in_taper_band = state.soc >= self.target_soc - TAPER_BAND_PERCENT;
        match self.phase {
            ChargingPhase::Complete => ChargingPhase::Complete,
            ChargingPhase::Interrupted(reason) => ChargingPhase::Interrupted(reason),
            _ if thermal == ThermalStatus::Shutdown => {
                ChargingPhase::Interrupted(InterruptReason::ThermalShutdown)
            }
            _ if state.soc >= self.target_soc => ChargingPhase::Complete,
            ChargingPhase::ConstantCurrent => {
                if in_taper_band {
                    ChargingPhase::Tapering
                } else if state.soc >= self.cv_soc || state.voltage >= self.cv_voltage {
                    ChargingPhase::ConstantVoltage
                } else {
                    ChargingPhase::ConstantCurrent
                }
            }
            ChargingPhase::ConstantVoltage => {
                if in_taper_band {
                    ChargingPhase::Tapering
                } else {
                    ChargingPhase::ConstantVoltage
                }
            }
            ChargingPhase::Tapering => ChargingPhase::Tapering,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn state(soc: f64, voltage: f64) -> BatteryState {
        BatteryState {
            soc,
            voltage,
            current: 0.0,
            temperature: 25.0,
            soh: 100.0,
            internal_resistance: 0.05,
            cycle_count: 0.0,
        }
    }

    fn run_until_settled(engine: &mut ChargingEngine, soc: f64) -> f64 {
        let mut out = 0.0;
        for _ in 0..20 {
            out = engine.command(&state(soc, 360.0), ThermalStatus::Normal, ChargePermission::Allowed, 1.0);
        }
        out
    }

    #[test]
    fn test_startup_ramp() {
        let specs = BatterySpecs::tesla_model_3();
        let mut engine = ChargingEngine::new(ChargerType::DC_FAST, &specs, 80.0);
        let first = engine.command(&state(30.0, 360.0), ThermalStatus::Normal, ChargePermission::Allowed, 1.0);
        assert!((first - engine.rated_current() * 0.1).abs() < 1e-9);
        let settled = run_until_settled(&mut engine, 30.0);
        assert!((settled - engine.rated_current()).abs() < 1e-9);
    }

    #[rstest]
    #[case(ChargerType::AC_L1)]
    #[case(ChargerType::AC_L2)]
    #[case(ChargerType::DC_FAST)]
    #[case(ChargerType::SUPERCHARGER)]
    fn test_never_exceeds_rated(#[case] charger: ChargerType) {
        let specs = BatterySpecs::tesla_model_3();
        let mut engine = ChargingEngine::new(charger, &specs, 95.0);
        let mut soc = 10.0;
        while !engine.phase().is_terminal() {
            let i = engine.command(&state(soc, 380.0), ThermalStatus::Normal, ChargePermission::Allowed, 1.0);
            assert!(i <= charger.rated_current(&specs) + 1e-9);
            soc += 0.05;
        }
        assert_eq!(engine.phase(), ChargingPhase::Complete);
    }

    #[rstest]
    #[case(ChargerType::SUPERCHARGER, 10.0, 1.0)]
    #[case(ChargerType::SUPERCHARGER, 30.0, 0.9)]
    #[case(ChargerType::SUPERCHARGER, 60.0, 0.75)]
    #[case(ChargerType::DC_FAST, 60.0, 1.0)]
    fn test_supercharger_power_factor(#[case] charger: ChargerType, #[case] soc: f64, #[case] factor: f64) {
        let specs = BatterySpecs::tesla_model_3();
        let engine = ChargingEngine::new(charger, &specs, 90.0);
        assert!((engine.power_factor(soc) - factor).abs() < 1e-9);
    }

    #[test]
    fn test_current_non_increasing_after_cv() {
        let specs = BatterySpecs::tesla_model_3();
        let mut engine = ChargingEngine::new(ChargerType::DC_FAST, &specs, 95.0);
        let mut soc = 70.0;
        let mut in_cv = false;
        let mut last = f64::MAX;
        while !engine.phase().is_terminal() {
            let i = engine.command(&state(soc, 395.0), ThermalStatus::Normal, ChargePermission::Allowed, 1.0);
            if matches!(engine.phase(), ChargingPhase::ConstantVoltage | ChargingPhase::Tapering) {
                if in_cv {
                    assert!(i <= last + 1e-12, "current rose from {} to {}", last, i);
                }
                in_cv = true;
                last = i;
            }
            soc += 0.01;
        }
        assert!(in_cv);
    }

    #[test]
    fn test_voltage_triggers_cv_early() {
        let specs = BatterySpecs::tesla_model_3();
        let mut engine = ChargingEngine::new(ChargerType::DC_FAST, &specs, 90.0);
        engine.command(&state(50.0, 420.0), ThermalStatus::Normal, ChargePermission::Allowed, 1.0);
        assert_eq!(engine.phase(), ChargingPhase::ConstantVoltage);
    }

    #[test]
    fn test_tapering_and_completion() {
        let specs = BatterySpecs::tesla_model_3();
        let mut engine = ChargingEngine::new(ChargerType::AC_L2, &specs, 60.0);
        run_until_settled(&mut engine, 50.0);
        engine.command(&state(58.5, 370.0), ThermalStatus::Normal, ChargePermission::Allowed, 1.0);
        assert_eq!(engine.phase(), ChargingPhase::Tapering);
        let near = engine.command(&state(59.99, 370.0), ThermalStatus::Normal, ChargePermission::Allowed, 1.0);
        assert_eq!(near, COMPLETION_CURRENT_A);
        let done = engine.command(&state(60.0, 370.0), ThermalStatus::Normal, ChargePermission::Allowed, 1.0);
        assert_eq!(done, 0.0);
        assert_eq!(engine.phase(), ChargingPhase::Complete);
    }

    #[test]
    fn test_thermal_shutdown_interrupts() {
        let specs = BatterySpecs::tesla_model_3();
        let mut engine = ChargingEngine::new(ChargerType::SUPERCHARGER, &specs, 80.0);
        run_until_settled(&mut engine, 40.0);
        let i = engine.command(&state(41.0, 370.0), ThermalStatus::Shutdown, ChargePermission::Denied, 1.0);
        assert_eq!(i, 0.0);
        assert_eq!(
            engine.phase(),
            ChargingPhase::Interrupted(InterruptReason::ThermalShutdown)
        );
        // Terminal: cooling down does not restart the session
        let i = engine.command(&state(41.0, 370.0), ThermalStatus::Normal, ChargePermission::Allowed, 1.0);
        assert_eq!(i, 0.0);
    }

    #[test]
    fn test_denied_permission_pauses() {
        let specs = BatterySpecs::tesla_model_3();
        let mut engine = ChargingEngine::new(ChargerType::AC_L2, &specs, 80.0);
        run_until_settled(&mut engine, 40.0);
        let paused = engine.command(&state(40.0, 370.0), ThermalStatus::Critical, ChargePermission::Denied, 1.0);
        assert_eq!(paused, 0.0);
        assert_eq!(engine.phase(), ChargingPhase::ConstantCurrent);
    }

    #[test]
    fn test_segment_end_interrupts() {
        let specs = BatterySpecs::nissan_leaf();
        let mut engine = ChargingEngine::new(ChargerType::AC_L1, &specs, 80.0);
        engine.interrupt(InterruptReason::SegmentEnded);
        assert_eq!(
            engine.phase(),
            ChargingPhase::Interrupted(InterruptReason::SegmentEnded)
        );
        engine.interrupt(InterruptReason::Cancelled);
        assert_eq!(
            engine.phase(),
            ChargingPhase::Interrupted(InterruptReason::SegmentEnded)
        );
    }
}
