use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use super::BatterySpecs;

/// Charger classes the simulator knows how to drive
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString, EnumIter,
)]
#[allow(non_camel_case_types)]
pub enum ChargerType {
    AC_L1,
    AC_L2,
    DC_FAST,
    SUPERCHARGER,
}

/// Electrical limits of a charger class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChargerSpec {
    pub max_power_kw: f64,
    /// Grid-to-pack efficiency
    pub efficiency: f64,
    /// Highest voltage the charger (or on-board charger for AC) will hold
    pub max_output_voltage: f64,
}

impl ChargerType {
    pub fn spec(&self) -> ChargerSpec {
        match self {
            ChargerType::AC_L1 => ChargerSpec {
                max_power_kw: 1.4,
                efficiency: 0.85,
                max_output_voltage: 410.0,
            },
            ChargerType::AC_L2 => ChargerSpec {
                max_power_kw: 11.0,
                efficiency: 0.90,
                max_output_voltage: 410.0,
            },
            ChargerType::DC_FAST => ChargerSpec {
                max_power_kw: 50.0,
                efficiency: 0.95,
                max_output_voltage: 500.0,
            },
            ChargerType::SUPERCHARGER => ChargerSpec {
                max_power_kw: 150.0,
                efficiency: 0.97,
                max_output_voltage: 500.0,
            },
        }
    }

    pub fn is_dc(&self) -> bool {
        matches!(self, ChargerType::DC_FAST | ChargerType::SUPERCHARGER)
    }

    /// SoC at which the constant-current phase hands over to constant voltage
    pub fn cv_transition_soc(&self) -> f64 {
        if self.is_dc() {
            80.0
        } else {
            85.0
        }
    }

    /// Rated current for a given pack, never above what the pack accepts
    pub fn rated_current(&self, specs: &BatterySpecs) -> f64 {
        let from_power = self.spec().max_power_kw * 1000.0 / specs.nominal_voltage;
        from_power.min(specs.max_charge_current)
    }

    /// Voltage held during the constant-voltage phase
    pub fn cv_voltage(&self, specs: &BatterySpecs) -> f64 {
        self.spec().max_output_voltage.min(specs.max_voltage)
    }
}

/// Why a charge segment was scheduled
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChargeReason {
    /// Overnight home charging
    Night,
    /// Daytime top-up
    Opportunity,
    /// SoC dropped below the comfort minimum
    Comfort,
    /// SoC dropped below the emergency floor
    Emergency,
    /// Next trip would end below the safety floor
    SafetyFloor,
    /// Too many days without a charge
    Stranding,
    /// Fixed schedule supplied by the caller
    Scripted,
}

impl ChargeReason {
    /// Charges the scheduler inserted to protect the pack rather than by preference
    pub fn is_forced(&self) -> bool {
        matches!(
            self,
            ChargeReason::Emergency | ChargeReason::SafetyFloor | ChargeReason::Stranding
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InterruptReason {
    ThermalShutdown,
    SegmentEnded,
    Cancelled,
}

/// How a charging session ended
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum SessionOutcome {
    Open,
    Complete,
    Interrupted(InterruptReason),
}

/// One plug-in to unplug cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingSession {
    pub vehicle_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub charger_type: ChargerType,
    pub reason: ChargeReason,
    pub start_soc: f64,
    pub end_soc: Option<f64>,
    pub target_soc: f64,
    /// Energy that entered the pack (kWh)
    pub energy_delivered_kwh: f64,
    /// Energy drawn from the grid including charger losses (kWh)
    pub grid_energy_kwh: f64,
    pub peak_current_a: f64,
    pub outcome: SessionOutcome,
    pub interrupted: bool,
}

impl ChargingSession {
    pub fn open(
        vehicle_id: &str,
        start_time: DateTime<Utc>,
        charger_type: ChargerType,
        reason: ChargeReason,
        start_soc: f64,
        target_soc: f64,
    ) -> Self {
        Self {
            vehicle_id: vehicle_id.to_string(),
            start_time,
            end_time: None,
            charger_type,
            reason,
            start_soc,
            end_soc: None,
            target_soc,
            energy_delivered_kwh: 0.0,
            grid_energy_kwh: 0.0,
            peak_current_a: 0.0,
            outcome: SessionOutcome::Open,
            interrupted: false,
        }
    }

    /// Accumulate one tick of applied charging current at the given terminal voltage
    pub fn record_tick(&mut self, current_a: f64, voltage_v: f64, dt_s: f64) {
        if current_a <= 0.0 {
            return;
        }
        let kwh = current_a * voltage_v * dt_s / 3.6e6;
        self.energy_delivered_kwh += kwh;
        self.grid_energy_kwh += kwh / self.charger_type.spec().efficiency;
        self.peak_current_a = self.peak_current_a.max(current_a);
    }

    pub fn close(&mut self, end_time: DateTime<Utc>, end_soc: f64, outcome: SessionOutcome) {
        self.end_time = Some(end_time);
        self.end_soc = Some(end_soc);
        self.interrupted = matches!(outcome, SessionOutcome::Interrupted(_));
        self.outcome = outcome;
    }

    pub fn is_closed(&self) -> bool {
        self.outcome != SessionOutcome::Open
    }

    pub fn duration_s(&self) -> Option<i64> {
        self.end_time.map(|end| (end - self.start_time).num_seconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use std::str::FromStr;

    #[rstest]
    #[case(ChargerType::AC_L1, 4.0, 85.0)]
    #[case(ChargerType::AC_L2, 31.428_571, 85.0)]
    #[case(ChargerType::DC_FAST, 142.857_142, 80.0)]
    #[case(ChargerType::SUPERCHARGER, 200.0, 80.0)]
    fn test_rated_current_and_cv_point(
        #[case] charger: ChargerType,
        #[case] expected_a: f64,
        #[case] cv_soc: f64,
    ) {
        let specs = BatterySpecs::tesla_model_3();
        assert!((charger.rated_current(&specs) - expected_a).abs() < 1e-3);
        assert_eq!(charger.cv_transition_soc(), cv_soc);
    }

    #[test]
    fn test_rated_current_capped_by_pack() {
        let leaf = BatterySpecs::nissan_leaf();
        assert_eq!(ChargerType::SUPERCHARGER.rated_current(&leaf), 100.0);
        assert_eq!(ChargerType::DC_FAST.cv_voltage(&leaf), 403.0);
    }

    #[test]
    fn test_charger_type_names() {
        assert_eq!(ChargerType::DC_FAST.to_string(), "DC_FAST");
        assert_eq!(ChargerType::from_str("AC_L2").unwrap(), ChargerType::AC_L2);
        assert!(ChargerType::from_str("AC_L3").is_err());
    }

    #[test]
    fn test_session_energy_accounting() {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 3, 22, 0, 0).unwrap();
        let mut session = ChargingSession::open(
            "VEH001",
            t0,
            ChargerType::AC_L2,
            ChargeReason::Night,
            40.0,
            85.0,
        );

        for _ in 0..3600 {
            session.record_tick(30.0, 400.0, 1.0);
        }
        // Discharge ticks never count as delivered energy
        session.record_tick(-10.0, 400.0, 1.0);

        assert!((session.energy_delivered_kwh - 12.0).abs() < 1e-9);
        assert!((session.grid_energy_kwh - 12.0 / 0.9).abs() < 1e-9);
        assert_eq!(session.peak_current_a, 30.0);

        session.close(
            t0 + chrono::Duration::hours(1),
            55.0,
            SessionOutcome::Interrupted(InterruptReason::SegmentEnded),
        );
        assert!(session.interrupted);
        assert_eq!(session.duration_s(), Some(3600));
    }

    #[test]
    fn test_forced_reasons() {
        assert!(ChargeReason::SafetyFloor.is_forced());
        assert!(ChargeReason::Stranding.is_forced());
        assert!(!ChargeReason::Night.is_forced());
    }
}
