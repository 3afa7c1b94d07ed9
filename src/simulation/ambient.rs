use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Ambient air temperature over the day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AmbientProfile {
    /// Fixed temperature (°C)
    Constant { temperature_c: f64 },
    /// Sinusoid peaking mid-afternoon: base + amplitude * sin((h - 6) * π / 12)
    Diurnal { base_c: f64, amplitude_c: f64 },
    /// One value per hour of the day, linearly interpolated between hours
    Hourly { temperatures_c: Vec<f64> },
}

impl Default for AmbientProfile {
    fn default() -> Self {
        AmbientProfile::Diurnal {
            base_c: 20.0,
            amplitude_c: 10.0,
        }
    }
}

impl AmbientProfile {
    /// Ambient temperature at a fractional hour of day
    pub fn at_hour(&self, hour: f64) -> f64 {
        match self {
            AmbientProfile::Constant { temperature_c } => *temperature_c,
            AmbientProfile::Diurnal {
                base_c,
                amplitude_c,
            } => base_c + amplitude_c * ((hour - 6.0) * PI / 12.0).sin(),
            AmbientProfile::Hourly { temperatures_c } => {
                let len = temperatures_c.len();
                if len == 0 {
                    return 20.0;
                }
                let h = hour.rem_euclid(24.0);
                let idx = h.floor() as usize % len;
                let next = (idx + 1) % len;
                let frac = h - h.floor();
                temperatures_c[idx] + (temperatures_c[next] - temperatures_c[idx]) * frac
            }
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            AmbientProfile::Hourly { temperatures_c } if temperatures_c.len() != 24 => Err(
                format!("hourly ambient profile needs 24 values, got {}", temperatures_c.len()),
            ),
            AmbientProfile::Diurnal { amplitude_c, .. } if *amplitude_c < 0.0 => {
                Err("diurnal amplitude must be non-negative".to_string())
            }
            _ => Ok(()),
        }
    }
}
