use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Thermal safety level of the pack
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ThermalStatus {
    Normal,
    Warning,
    Critical,
    Shutdown,
    Recovering,
}

impl ThermalStatus {
    /// Severity rank used to order escalation; Recovering sits with Shutdown
    pub fn rank(&self) -> u8 {
        match self {
            ThermalStatus::Normal => 0,
            ThermalStatus::Warning => 1,
            ThermalStatus::Critical => 2,
            ThermalStatus::Shutdown | ThermalStatus::Recovering => 3,
        }
    }
}

/// A recorded thermal state transition
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyEvent {
    pub timestamp: DateTime<Utc>,
    pub tick: u64,
    pub from: ThermalStatus,
    pub to: ThermalStatus,
    pub temperature_c: f64,
    /// Power limit in force after the transition
    pub power_limit_factor: f64,
}

/// Whether the pack may accept charge at its current thermal level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargePermission {
    Allowed,
    /// Elevated temperature; slow charging only
    Reduced,
    Denied,
}
