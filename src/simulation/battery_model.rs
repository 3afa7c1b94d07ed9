//! # Battery Pack Model
//!
//! Electro-thermal model of an EV traction pack, advanced one tick at a time.
//! [`BatteryModel::step`] is a pure function of its inputs: no clock, no RNG,
//! no interior mutability.
//!
//! ## Electrical
//!
//! - Open-circuit voltage is a piecewise-linear function of SoC over the
//!   chemistry window (steep below 10% and above 90%), lowered below the
//!   reference temperature.
//! - Terminal voltage: V = OCV + I * R (I > 0 charges, so charging lifts and
//!   discharging sags the terminal voltage).
//! - R grows as SoH falls and as the pack cools below the reference.
//! - Coulomb counting: soc' = soc + I * dt / Q * 100.
//!
//! ## Thermal
//!
//! Lumped thermal mass:
//!
//! m * c_p * dT/dt = Q_gen - k * (T - T_ambient)
//!
//! Where:
//! - Q_gen = I² * R + charging losses + anomaly heating (W)
//! - k = cooling coefficient * cooling multiplier (W/K)
//!
//! Q_gen is held constant over the tick and the ODE is solved exactly, which
//! keeps the update stable for any tick length.
//!
//! ## Ageing
//!
//! Equivalent full cycles accumulate as |I * dt| / (2 * Q_nominal); each cycle
//! removes a fixed fraction of SoH. Anomalies can scale the fade, add calendar
//! fade, or knock SoH down in one step.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::domain::{BatteryError, BatterySpecs, BatteryState};

/// Physics constants shared by every pack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct PhysicsConfig {
    /// Specific heat capacity of the pack (J/kg·K)
    #[validate(range(exclusive_min = 0.0))]
    pub specific_heat_j_per_kg_k: f64,

    /// Heat removed per kelvin above ambient (W/K), active cooling included
    #[validate(range(min = 0.0))]
    pub cooling_coefficient_w_per_k: f64,

    /// Share of charging power lost as heat
    #[validate(range(min = 0.0, exclusive_max = 1.0))]
    pub charging_heat_fraction: f64,

    /// Temperature where OCV and resistance are nominal (°C)
    pub reference_temp_c: f64,

    /// OCV drop per degree below the reference (V/°C)
    pub cold_ocv_coefficient_v_per_c: f64,

    /// Relative resistance increase per degree below the reference
    pub cold_resistance_coefficient_per_c: f64,

    /// Relative resistance increase per 100% of lost SoH
    pub soh_resistance_coefficient: f64,

    /// SoH lost per equivalent full cycle (%)
    pub fade_per_cycle_percent: f64,

    /// Usable capacity fraction below 0°C
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub cold_capacity_factor: f64,

    /// Physical temperature bounds; values outside are clamped and reported
    pub min_temp_c: f64,
    pub max_temp_c: f64,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            specific_heat_j_per_kg_k: 1000.0,       // Approximate for Li-ion packs
            cooling_coefficient_w_per_k: 250.0,     // Liquid-cooled pack
            charging_heat_fraction: 0.05,           // 5% charging inefficiency
            reference_temp_c: 25.0,
            cold_ocv_coefficient_v_per_c: 0.15,
            cold_resistance_coefficient_per_c: 0.02, // +50% at 0°C
            soh_resistance_coefficient: 1.5,        // +30% at 80% SoH
            fade_per_cycle_percent: 0.02,           // 20% after 1000 cycles
            cold_capacity_factor: 0.8,
            min_temp_c: -40.0,
            max_temp_c: 120.0,
        }
    }
}

impl PhysicsConfig {
    /// Passive air cooling, as found on older packs
    pub fn air_cooled() -> Self {
        Self {
            cooling_coefficient_w_per_k: 60.0,
            ..Default::default()
        }
    }

    /// Aggressive chiller loop
    pub fn chiller_cooled() -> Self {
        Self {
            cooling_coefficient_w_per_k: 600.0,
            ..Default::default()
        }
    }

    /// Temperature bound ordering, on top of the per-field ranges
    pub fn check_bounds(&self) -> Result<(), String> {
        if self.min_temp_c >= self.max_temp_c {
            return Err("min_temp_c must be below max_temp_c".to_string());
        }
        Ok(())
    }
}

/// Anomaly effects applied to one physics step; `Default` is the clean case
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Perturbation {
    /// Scales the cooling coefficient (cooling system failure)
    pub cooling_multiplier: f64,
    /// Heat rise independent of current (°C/s)
    pub extra_heating_c_per_s: f64,
    /// One-off SoH loss applied this tick (%)
    pub soh_step_percent: f64,
    /// Scales cycle fade
    pub fade_multiplier: f64,
    /// Calendar fade applied per second (%)
    pub calendar_fade_percent_per_s: f64,
    /// Fade never pushes SoH below this
    pub soh_floor: f64,
}

impl Default for Perturbation {
    fn default() -> Self {
        Self {
            cooling_multiplier: 1.0,
            extra_heating_c_per_s: 0.0,
            soh_step_percent: 0.0,
            fade_multiplier: 1.0,
            calendar_fade_percent_per_s: 0.0,
            soh_floor: 0.0,
        }
    }
}

/// Quantity that left its physical range and was clamped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoundaryViolation {
    SocAboveFull,
    VoltageAboveMax,
    VoltageBelowMin,
    TemperatureAboveMax,
    TemperatureBelowMin,
}

/// Result of one physics step
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub state: BatteryState,
    /// SoC would have gone below zero; current was forced to zero
    pub deep_discharge: bool,
    pub violations: Vec<BoundaryViolation>,
    /// Net heat into the pack this tick (W)
    pub heat_generation_w: f64,
}

/// Pack model bound to one vehicle's specs
#[derive(Debug, Clone)]
pub struct BatteryModel {
    specs: BatterySpecs,
    config: PhysicsConfig,
}

impl BatteryModel {
    pub fn new(specs: BatterySpecs, config: PhysicsConfig) -> Result<Self, BatteryError> {
        specs.validate()?;
        config
            .validate()
            .map_err(|e| e.to_string())
            .and_then(|_| config.check_bounds())
            .map_err(|reason| BatteryError::InvalidSpecs {
                vehicle_id: specs.vehicle_id.clone(),
                reason,
            })?;
        Ok(Self { specs, config })
    }

    pub fn specs(&self) -> &BatterySpecs {
        &self.specs
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    /// Resting state at simulation start
    pub fn initial_state(
        &self,
        soc: f64,
        temperature_c: f64,
        soh: f64,
    ) -> Result<BatteryState, BatteryError> {
        if !(0.0..=100.0).contains(&soc) {
            return Err(BatteryError::SocOutOfBounds(soc));
        }
        if !(soh > 0.0 && soh <= 100.0) {
            return Err(BatteryError::SohOutOfBounds(soh));
        }
        let temperature = temperature_c.clamp(self.config.min_temp_c, self.config.max_temp_c);
        Ok(BatteryState {
            soc,
            voltage: self.open_circuit_voltage(soc, temperature),
            current: 0.0,
            temperature,
            soh,
            internal_resistance: self.internal_resistance(soh, temperature),
            cycle_count: 0.0,
        })
    }

    /// Open-circuit voltage from SoC and temperature
    pub fn open_circuit_voltage(&self, soc: f64, temperature_c: f64) -> f64 {
        let s = (soc / 100.0).clamp(0.0, 1.0);
        let normalized = if s < 0.1 {
            (s / 0.1) * 0.2
        } else if s < 0.9 {
            0.2 + ((s - 0.1) / 0.8) * 0.6
        } else {
            0.8 + ((s - 0.9) / 0.1) * 0.2
        };
        let window = self.specs.max_voltage - self.specs.min_voltage;
        let cold_drop = (self.config.reference_temp_c - temperature_c).max(0.0)
            * self.config.cold_ocv_coefficient_v_per_c;
        self.specs.min_voltage + normalized * window - cold_drop
    }

    /// Effective pack resistance
    pub fn internal_resistance(&self, soh: f64, temperature_c: f64) -> f64 {
        let ageing = 1.0 + self.config.soh_resistance_coefficient * (100.0 - soh).max(0.0) / 100.0;
        let cold = 1.0
            + self.config.cold_resistance_coefficient_per_c
                * (self.config.reference_temp_c - temperature_c).max(0.0);
        self.specs.internal_resistance_ohm * ageing * cold
    }

    /// Usable charge in coulombs at the given health and temperature
    pub fn capacity_coulombs(&self, soh: f64, temperature_c: f64) -> f64 {
        let cold = if temperature_c < 0.0 {
            self.config.cold_capacity_factor
        } else {
            1.0
        };
        self.specs.nominal_capacity_coulombs() * (soh / 100.0) * cold
    }

    /// BMS power derating from pack temperature alone
    pub fn derate_factor(temperature_c: f64) -> f64 {
        match temperature_c {
            t if t > 45.0 => (1.0 - (t - 45.0) / 20.0).max(0.5),
            t if t < 0.0 => (1.0 + t / 20.0).max(0.3),
            _ => 1.0,
        }
    }

    /// Clamp a requested current to pack limits scaled by the stricter of
    /// temperature derating and the thermal safety power limit
    pub fn limit_current(&self, requested: f64, state: &BatteryState, power_limit_factor: f64) -> f64 {
        let factor = Self::derate_factor(state.temperature).min(power_limit_factor.clamp(0.0, 1.0));
        let applied = if requested > 0.0 {
            requested.min(self.specs.max_charge_current * factor)
        } else {
            requested.max(self.specs.max_discharge_current * factor)
        };
        positive_zero(applied)
    }

    /// Advance the pack by one tick under `applied_current`
    pub fn step(
        &self,
        state: &BatteryState,
        applied_current: f64,
        ambient_c: f64,
        dt_s: f64,
        perturbation: &Perturbation,
    ) -> StepOutcome {
        let mut violations = Vec::new();
        let resistance = self.internal_resistance(state.soh, state.temperature);
        let capacity = self.capacity_coulombs(state.soh, state.temperature);

        // Coulomb counting
        let mut current = applied_current;
        let mut soc = state.soc + current * dt_s / capacity * 100.0;
        let deep_discharge = soc < 0.0;
        if deep_discharge {
            soc = 0.0;
            current = 0.0;
        } else if soc > 100.0 {
            soc = 100.0;
            violations.push(BoundaryViolation::SocAboveFull);
        }

        // Terminal voltage
        let mut voltage = self.open_circuit_voltage(soc, state.temperature) + current * resistance;
        if voltage > self.specs.max_voltage {
            voltage = self.specs.max_voltage;
            violations.push(BoundaryViolation::VoltageAboveMax);
        } else if voltage < self.specs.min_voltage {
            voltage = self.specs.min_voltage;
            violations.push(BoundaryViolation::VoltageBelowMin);
        }

        // Heat balance
        let mut heat_w = current * current * resistance;
        if current > 0.0 {
            heat_w += current * voltage * self.config.charging_heat_fraction;
        }
        let heat_capacity = self.specs.thermal_mass_kg * self.config.specific_heat_j_per_kg_k;
        heat_w += perturbation.extra_heating_c_per_s * heat_capacity;

        let k = self.config.cooling_coefficient_w_per_k * perturbation.cooling_multiplier.max(0.0);
        let mut temperature = if k > 0.0 {
            let equilibrium = ambient_c + heat_w / k;
            equilibrium + (state.temperature - equilibrium) * (-k * dt_s / heat_capacity).exp()
        } else {
            state.temperature + heat_w * dt_s / heat_capacity
        };
        if temperature > self.config.max_temp_c {
            temperature = self.config.max_temp_c;
            violations.push(BoundaryViolation::TemperatureAboveMax);
        } else if temperature < self.config.min_temp_c {
            temperature = self.config.min_temp_c;
            violations.push(BoundaryViolation::TemperatureBelowMin);
        }

        // Ageing
        let cycles = (current * dt_s).abs() / (2.0 * self.specs.nominal_capacity_coulombs());
        let fade = cycles * self.config.fade_per_cycle_percent * perturbation.fade_multiplier.max(0.0)
            + perturbation.calendar_fade_percent_per_s.max(0.0) * dt_s;
        let mut soh = state.soh - fade;
        if fade > 0.0 {
            soh = soh.max(perturbation.soh_floor.min(state.soh));
        }
        soh -= perturbation.soh_step_percent.max(0.0);
        let soh = soh.clamp(0.0, state.soh);

        StepOutcome {
            state: BatteryState {
                soc,
                voltage,
                current: positive_zero(current),
                temperature,
                soh,
                internal_resistance: resistance,
                cycle_count: state.cycle_count + cycles,
            },
            deep_discharge,
            violations,
            heat_generation_w: heat_w,
        }
    }
}

/// Collapse -0.0 so exported zeros print identically
#[inline]
pub(crate) fn positive_zero(value: f64) -> f64 {
    if value == 0.0 {
        0.0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tesla() -> BatteryModel {
        BatteryModel::new(BatterySpecs::tesla_model_3(), PhysicsConfig::default()).unwrap()
    }

    #[test]
    fn test_physics_config_bounds() {
        assert!(PhysicsConfig::default().validate().is_ok());
        assert!(PhysicsConfig::air_cooled().check_bounds().is_ok());

        let leaky = PhysicsConfig {
            charging_heat_fraction: 1.0,
            cold_capacity_factor: 0.0,
            ..Default::default()
        };
        let errors = leaky.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("charging_heat_fraction"));
        assert!(fields.contains_key("cold_capacity_factor"));

        let inverted = PhysicsConfig {
            min_temp_c: 50.0,
            max_temp_c: 20.0,
            ..Default::default()
        };
        assert!(inverted.validate().is_ok());
        assert!(inverted.check_bounds().is_err());
        for config in [leaky, inverted] {
            assert!(matches!(
                BatteryModel::new(BatterySpecs::tesla_model_3(), config),
                Err(BatteryError::InvalidSpecs { .. })
            ));
        }
    }

    #[test]
    fn test_ocv_curve_breakpoints() {
        let model = tesla();
        assert!((model.open_circuit_voltage(0.0, 25.0) - 300.0).abs() < 1e-9);
        assert!((model.open_circuit_voltage(10.0, 25.0) - 324.0).abs() < 1e-9);
        assert!((model.open_circuit_voltage(90.0, 25.0) - 396.0).abs() < 1e-9);
        assert!((model.open_circuit_voltage(100.0, 25.0) - 420.0).abs() < 1e-9);
    }

    #[test]
    fn test_ocv_monotonic_and_cold_derated() {
        let model = tesla();
        let mut last = f64::MIN;
        for soc in 0..=100 {
            let v = model.open_circuit_voltage(soc as f64, 25.0);
            assert!(v >= last);
            last = v;
        }
        assert!(model.open_circuit_voltage(50.0, -10.0) < model.open_circuit_voltage(50.0, 25.0));
    }

    #[test]
    fn test_resistance_rises_with_age_and_cold() {
        let model = tesla();
        let base = model.internal_resistance(100.0, 25.0);
        assert!((base - 0.05).abs() < 1e-12);
        assert!(model.internal_resistance(80.0, 25.0) > base);
        assert!((model.internal_resistance(100.0, 0.0) - 0.075).abs() < 1e-12);
    }

    #[test]
    fn test_discharge_lowers_soc_and_voltage() {
        let model = tesla();
        let state = model.initial_state(80.0, 25.0, 100.0).unwrap();
        let out = model.step(&state, -200.0, 25.0, 1.0, &Perturbation::default());

        assert!(out.state.soc < 80.0);
        assert!(out.state.voltage < state.voltage);
        assert!(!out.deep_discharge);
        // 200 A for 1 s out of ~843 kC
        let expected = 80.0 - 200.0 / model.specs().nominal_capacity_coulombs() * 100.0;
        assert!((out.state.soc - expected).abs() < 1e-9);
    }

    #[test]
    fn test_deep_discharge_forces_zero_current() {
        let model = tesla();
        let state = model.initial_state(0.01, 25.0, 100.0).unwrap();
        let out = model.step(&state, -250.0, 25.0, 60.0, &Perturbation::default());

        assert!(out.deep_discharge);
        assert_eq!(out.state.soc, 0.0);
        assert_eq!(out.state.current, 0.0);
        assert!(out.state.current.is_sign_positive());
    }

    #[test]
    fn test_full_pack_clamped() {
        let model = tesla();
        let state = model.initial_state(99.999, 25.0, 100.0).unwrap();
        let out = model.step(&state, 200.0, 25.0, 60.0, &Perturbation::default());
        assert_eq!(out.state.soc, 100.0);
        assert!(out.violations.contains(&BoundaryViolation::SocAboveFull));
    }

    #[test]
    fn test_heating_and_cooling() {
        let model = tesla();
        let state = model.initial_state(60.0, 25.0, 100.0).unwrap();
        let hot = model.step(&state, -250.0, 25.0, 60.0, &Perturbation::default());
        assert!(hot.state.temperature > 25.0);

        let idle = model.initial_state(60.0, 40.0, 100.0).unwrap();
        let cooled = model.step(&idle, 0.0, 25.0, 60.0, &Perturbation::default());
        assert!(cooled.state.temperature < 40.0);
        assert!(cooled.state.temperature > 25.0);
    }

    #[test]
    fn test_cooling_failure_heats_faster() {
        let model = tesla();
        let state = model.initial_state(60.0, 35.0, 100.0).unwrap();
        let normal = model.step(&state, -150.0, 30.0, 10.0, &Perturbation::default());
        let failed = model.step(
            &state,
            -150.0,
            30.0,
            10.0,
            &Perturbation {
                cooling_multiplier: 0.1,
                ..Default::default()
            },
        );
        assert!(failed.state.temperature > normal.state.temperature);
    }

    #[test]
    fn test_long_tick_stays_stable() {
        // One-hour ticks with no load must relax toward ambient without overshoot
        let model = tesla();
        let state = model.initial_state(50.0, 50.0, 100.0).unwrap();
        let out = model.step(&state, 0.0, 20.0, 3600.0, &Perturbation::default());
        assert!(out.state.temperature >= 20.0);
        assert!(out.state.temperature < 50.0);
    }

    #[test]
    fn test_derating_table() {
        assert_eq!(BatteryModel::derate_factor(25.0), 1.0);
        assert!((BatteryModel::derate_factor(55.0) - 0.5).abs() < 1e-12);
        assert_eq!(BatteryModel::derate_factor(80.0), 0.5);
        assert!((BatteryModel::derate_factor(-10.0) - 0.5).abs() < 1e-12);
        assert_eq!(BatteryModel::derate_factor(-30.0), 0.3);
    }

    #[test]
    fn test_limit_current() {
        let model = tesla();
        let state = model.initial_state(50.0, 25.0, 100.0).unwrap();
        assert_eq!(model.limit_current(-400.0, &state, 1.0), -250.0);
        assert_eq!(model.limit_current(-400.0, &state, 0.7), -175.0);
        assert_eq!(model.limit_current(300.0, &state, 0.3), 60.0);
        let zero = model.limit_current(-100.0, &state, 0.0);
        assert_eq!(zero, 0.0);
        assert!(zero.is_sign_positive());
    }

    #[test]
    fn test_soh_step_and_floor() {
        let model = tesla();
        let state = model.initial_state(50.0, 25.0, 71.0).unwrap();
        let out = model.step(
            &state,
            0.0,
            25.0,
            86_400.0,
            &Perturbation {
                calendar_fade_percent_per_s: 1e-4,
                soh_floor: 70.0,
                ..Default::default()
            },
        );
        assert_eq!(out.state.soh, 70.0);

        let stepped = model.step(
            &state,
            0.0,
            25.0,
            1.0,
            &Perturbation {
                soh_step_percent: 2.0,
                ..Default::default()
            },
        );
        assert!((stepped.state.soh - 69.0).abs() < 1e-12);
    }

    #[test]
    fn test_initial_state_validation() {
        let model = tesla();
        assert!(matches!(
            model.initial_state(120.0, 25.0, 100.0),
            Err(BatteryError::SocOutOfBounds(_))
        ));
        assert!(matches!(
            model.initial_state(50.0, 25.0, 0.0),
            Err(BatteryError::SohOutOfBounds(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_step_respects_bounds(
            soc in 0.0f64..=100.0,
            soh in 50.0f64..=100.0,
            temp in -30.0f64..90.0,
            ambient in -30.0f64..45.0,
            current in -400.0f64..400.0,
            dt in 0.1f64..600.0,
            cooling in 0.0f64..=1.0,
        ) {
            let model = tesla();
            let state = model.initial_state(soc, temp, soh).unwrap();
            let out = model.step(&state, current, ambient, dt, &Perturbation {
                cooling_multiplier: cooling,
                ..Default::default()
            });
            let s = out.state;
            prop_assert!((0.0..=100.0).contains(&s.soc));
            prop_assert!(s.soh <= soh && s.soh >= 0.0);
            prop_assert!(s.voltage >= 300.0 && s.voltage <= 420.0);
            prop_assert!(s.temperature >= -40.0 && s.temperature <= 120.0);
            prop_assert!(s.cycle_count >= 0.0);
        }

        #[test]
        fn prop_step_is_pure(
            soc in 0.0f64..=100.0,
            current in -250.0f64..200.0,
        ) {
            let model = tesla();
            let state = model.initial_state(soc, 30.0, 95.0).unwrap();
            let a = model.step(&state, current, 20.0, 1.0, &Perturbation::default());
            let b = model.step(&state, current, 20.0, 1.0, &Perturbation::default());
            prop_assert_eq!(a, b);
        }
    }
}
