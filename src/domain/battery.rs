use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use thiserror::Error;

/// Battery-specific errors
#[derive(Debug, Error, PartialEq)]
pub enum BatteryError {
    #[error("Unknown vehicle id: {0}")]
    UnknownVehicle(String),
    #[error("Invalid battery specs for {vehicle_id}: {reason}")]
    InvalidSpecs { vehicle_id: String, reason: String },
    #[error("State of charge out of bounds: {0}%")]
    SocOutOfBounds(f64),
    #[error("State of health out of bounds: {0}%")]
    SohOutOfBounds(f64),
}

/// Battery chemistry type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum BatteryChemistry {
    Nmc, // Nickel Manganese Cobalt
    Nca, // Nickel Cobalt Aluminum
    Lfp, // Lithium Iron Phosphate
}

/// Static description of a vehicle's traction pack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatterySpecs {
    pub vehicle_id: String,
    pub make: String,
    pub model: String,
    pub chemistry: BatteryChemistry,
    /// Usable capacity when new (kWh)
    pub nominal_capacity_kwh: f64,
    pub nominal_voltage: f64,
    pub max_voltage: f64,
    pub min_voltage: f64,
    /// Largest charging current the pack accepts (A, positive)
    pub max_charge_current: f64,
    /// Largest discharge current the pack delivers (A, negative)
    pub max_discharge_current: f64,
    pub cell_configuration: String,
    /// Lumped thermal mass (kg)
    pub thermal_mass_kg: f64,
    /// Pack resistance at 25°C and full health (Ω)
    pub internal_resistance_ohm: f64,
}

impl BatterySpecs {
    /// Tesla Model 3 long range pack
    pub fn tesla_model_3() -> Self {
        Self {
            vehicle_id: "VEH001".to_string(),
            make: "Tesla".to_string(),
            model: "Model 3".to_string(),
            chemistry: BatteryChemistry::Nca,
            nominal_capacity_kwh: 82.0,
            nominal_voltage: 350.0,
            max_voltage: 420.0,
            min_voltage: 300.0,
            max_charge_current: 200.0,
            max_discharge_current: -250.0, // Peak acceleration
            cell_configuration: "96s46p".to_string(),
            thermal_mass_kg: 400.0,
            internal_resistance_ohm: 0.05,
        }
    }

    /// Nissan Leaf e+ pack
    pub fn nissan_leaf() -> Self {
        Self {
            vehicle_id: "VEH002".to_string(),
            make: "Nissan".to_string(),
            model: "Leaf".to_string(),
            chemistry: BatteryChemistry::Nmc,
            nominal_capacity_kwh: 62.0,
            nominal_voltage: 350.0,
            max_voltage: 403.0,
            min_voltage: 300.0,
            max_charge_current: 100.0, // CHAdeMO limited
            max_discharge_current: -150.0,
            cell_configuration: "96s2p".to_string(),
            thermal_mass_kg: 300.0,
            internal_resistance_ohm: 0.08,
        }
    }

    /// Look up a vehicle from the built-in catalog
    pub fn for_vehicle(vehicle_id: &str) -> Result<Self, BatteryError> {
        match vehicle_id {
            "VEH001" => Ok(Self::tesla_model_3()),
            "VEH002" => Ok(Self::nissan_leaf()),
            other => Err(BatteryError::UnknownVehicle(other.to_string())),
        }
    }

    /// Ids of every vehicle in the catalog
    pub fn catalog_ids() -> &'static [&'static str] {
        &["VEH001", "VEH002"]
    }

    /// Reject specs that would make the physics meaningless
    pub fn validate(&self) -> Result<(), BatteryError> {
        let fail = |reason: &str| BatteryError::InvalidSpecs {
            vehicle_id: self.vehicle_id.clone(),
            reason: reason.to_string(),
        };

        if self.nominal_capacity_kwh <= 0.0 {
            return Err(fail("capacity must be positive"));
        }
        if !(self.min_voltage > 0.0 && self.min_voltage < self.max_voltage) {
            return Err(fail("voltage window must satisfy 0 < min < max"));
        }
        if self.nominal_voltage < self.min_voltage || self.nominal_voltage > self.max_voltage {
            return Err(fail("nominal voltage outside voltage window"));
        }
        if self.max_charge_current <= 0.0 || self.max_discharge_current >= 0.0 {
            return Err(fail("charge limit must be positive and discharge limit negative"));
        }
        if self.thermal_mass_kg <= 0.0 || self.internal_resistance_ohm <= 0.0 {
            return Err(fail("thermal mass and resistance must be positive"));
        }
        Ok(())
    }

    /// Pack charge when new, in coulombs
    pub fn nominal_capacity_coulombs(&self) -> f64 {
        self.nominal_capacity_kwh * 1000.0 * 3600.0 / self.nominal_voltage
    }

    /// Typical consumption used for range estimates and trip planning
    pub fn consumption_wh_per_km(&self) -> f64 {
        if self.make == "Tesla" {
            180.0
        } else {
            150.0
        }
    }
}

/// Snapshot of the pack, superseded once per tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryState {
    /// State of charge (0-100%)
    pub soc: f64,
    /// Terminal voltage (V)
    pub voltage: f64,
    /// Applied current (A, negative = discharge)
    pub current: f64,
    /// Pack temperature (°C)
    pub temperature: f64,
    /// State of health (0-100%)
    pub soh: f64,
    /// Effective resistance used for the last step (Ω)
    pub internal_resistance: f64,
    /// Equivalent full cycles accumulated
    pub cycle_count: f64,
}

impl BatteryState {
    pub fn power_w(&self) -> f64 {
        self.voltage * self.current
    }

    pub fn is_charging(&self) -> bool {
        self.current > 0.0
    }

    /// Energy currently stored, in kWh
    pub fn energy_kwh(&self, specs: &BatterySpecs) -> f64 {
        specs.nominal_capacity_kwh * (self.soh / 100.0) * (self.soc / 100.0)
    }

    /// Remaining range estimate from stored energy and typical consumption
    pub fn estimated_range_km(&self, specs: &BatterySpecs) -> f64 {
        self.energy_kwh(specs) * 1000.0 / specs.consumption_wh_per_km()
    }
}

/// High level activity of the vehicle during a tick
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum VehicleActivity {
    Idle,
    Driving,
    Charging,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_catalog_lookup() {
        let tesla = BatterySpecs::for_vehicle("VEH001").unwrap();
        assert_eq!(tesla.model, "Model 3");
        assert_eq!(tesla.max_discharge_current, -250.0);

        let leaf = BatterySpecs::for_vehicle("VEH002").unwrap();
        assert_eq!(leaf.max_voltage, 403.0);

        assert_eq!(
            BatterySpecs::for_vehicle("VEH999"),
            Err(BatteryError::UnknownVehicle("VEH999".to_string()))
        );
    }

    #[test]
    fn test_catalog_specs_validate() {
        for id in BatterySpecs::catalog_ids() {
            BatterySpecs::for_vehicle(id).unwrap().validate().unwrap();
        }
    }

    #[test]
    fn test_invalid_specs_rejected() {
        let mut specs = BatterySpecs::nissan_leaf();
        specs.max_discharge_current = 150.0;
        assert!(matches!(
            specs.validate(),
            Err(BatteryError::InvalidSpecs { .. })
        ));
    }

    #[test]
    fn test_range_estimate() {
        let specs = BatterySpecs::tesla_model_3();
        let state = BatteryState {
            soc: 50.0,
            voltage: 360.0,
            current: 0.0,
            temperature: 25.0,
            soh: 100.0,
            internal_resistance: 0.05,
            cycle_count: 0.0,
        };
        // 41 kWh at 180 Wh/km
        assert!((state.estimated_range_km(&specs) - 227.777).abs() < 0.01);
    }

    #[test]
    fn test_chemistry_parse() {
        assert_eq!(BatteryChemistry::from_str("nca").unwrap(), BatteryChemistry::Nca);
        assert_eq!(BatteryChemistry::Lfp.to_string(), "lfp");
    }
}
