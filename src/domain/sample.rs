use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ThermalStatus;

/// The externally emitted record, one per tick
///
/// Field order is the wire schema of the telemetry table and the CSV header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub time: DateTime<Utc>,
    pub vehicle_id: String,
    pub soc_percent: f64,
    /// Reported terminal voltage (V)
    pub voltage: f64,
    /// Reported current (A, negative = discharge)
    pub current: f64,
    /// Reported pack temperature (°C)
    pub temperature: f64,
    /// voltage × current of the reported values (W)
    pub power: f64,
    pub soh_percent: f64,
    pub is_charging: bool,
    pub is_driving: bool,
    /// Vehicle speed (km/h)
    pub speed: f64,
    pub thermal_status: ThermalStatus,
    /// Active anomaly labels, `None` when the tick is clean
    pub anomaly_active: Option<String>,
}

impl TelemetrySample {
    pub fn is_anomalous(&self) -> bool {
        self.anomaly_active.is_some()
    }
}
