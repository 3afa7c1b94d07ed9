//! # Thermal Safety Manager
//!
//! BMS-style thermal protection layered over the pack model. Temperature is the
//! only input; the output is a power limit factor applied to every commanded
//! current, plus an append-only log of state transitions.
//!
//! ```text
//!   Normal --≥warn--> Warning --≥crit--> Critical --≥shut--> Shutdown
//!     ^                 |  ^                |                   |
//!     +--<warn-margin---+  +--<crit-margin--+              ≤recovery
//!     |                                                         v
//!     +------------- hold + ramp complete ------------------ Recovering
//! ```
//!
//! Escalation may skip levels within one tick; every intermediate level is
//! still logged so the event history always reads as a monotonic sequence.
//! Step-down happens at most one level per tick and only after the
//! temperature falls below the level's own threshold minus the margin.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use validator::Validate;

use crate::domain::{ChargePermission, SafetyEvent, ThermalStatus};

/// Temperature thresholds and timing, all calibration constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ThermalThresholds {
    /// Enter Warning at or above (°C)
    pub warning_c: f64,
    /// Enter Critical at or above (°C)
    pub critical_c: f64,
    /// Enter Shutdown at or above (°C)
    pub shutdown_c: f64,
    /// Leave Shutdown at or below (°C)
    pub recovery_c: f64,
    /// Step-down requires falling this far below the level's threshold (°C)
    #[validate(range(min = 0.0))]
    pub hysteresis_margin_c: f64,
    /// Time at or below recovery temperature before power returns (s)
    #[validate(range(min = 0.0))]
    pub recovery_hold_s: f64,
    /// Time to ramp the power limit from 0 to 1 after the hold (s)
    #[validate(range(min = 0.0))]
    pub recovery_ramp_s: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub warning_power_limit: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub critical_power_limit: f64,
}

impl Default for ThermalThresholds {
    fn default() -> Self {
        Self {
            warning_c: 50.0,
            critical_c: 55.0,
            shutdown_c: 60.0,
            recovery_c: 45.0,
            hysteresis_margin_c: 2.0,
            recovery_hold_s: 300.0,
            recovery_ramp_s: 120.0,
            warning_power_limit: 0.70,
            critical_power_limit: 0.30,
        }
    }
}

impl ThermalThresholds {
    /// Threshold ordering, on top of the per-field ranges
    pub fn check_ordering(&self) -> Result<(), String> {
        if !(self.recovery_c < self.warning_c
            && self.warning_c < self.critical_c
            && self.critical_c < self.shutdown_c)
        {
            return Err(format!(
                "thresholds must satisfy recovery < warning < critical < shutdown, got {} / {} / {} / {}",
                self.recovery_c, self.warning_c, self.critical_c, self.shutdown_c
            ));
        }
        if self.critical_power_limit > self.warning_power_limit {
            return Err("critical power limit must not exceed warning power limit".to_string());
        }
        Ok(())
    }
}

/// Internal state; Recovering carries its timers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
enum SafetyState {
    Normal,
    Warning,
    Critical,
    Shutdown,
    Recovering { held_s: f64, ramp_s: f64 },
}

impl SafetyState {
    fn status(&self) -> ThermalStatus {
        match self {
            SafetyState::Normal => ThermalStatus::Normal,
            SafetyState::Warning => ThermalStatus::Warning,
            SafetyState::Critical => ThermalStatus::Critical,
            SafetyState::Shutdown => ThermalStatus::Shutdown,
            SafetyState::Recovering { .. } => ThermalStatus::Recovering,
        }
    }
}

/// What the rest of the tick sees from the manager
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThermalAssessment {
    pub status: ThermalStatus,
    pub power_limit_factor: f64,
    pub entered_at: DateTime<Utc>,
    pub charge_permission: ChargePermission,
}

/// Summary for reports and logs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThermalReport {
    pub vehicle_id: String,
    pub status: ThermalStatus,
    pub power_limit_factor: f64,
    pub warning_ticks: u64,
    pub shutdown_count: u64,
    pub total_events: usize,
    pub recent_events: Vec<SafetyEvent>,
    pub thresholds: ThermalThresholds,
}

#[derive(Debug, Clone)]
pub struct ThermalSafetyManager {
    vehicle_id: String,
    thresholds: ThermalThresholds,
    state: SafetyState,
    entered_at: DateTime<Utc>,
    events: Vec<SafetyEvent>,
    warning_ticks: u64,
    shutdown_count: u64,
}

impl ThermalSafetyManager {
    pub fn new(vehicle_id: &str, thresholds: ThermalThresholds, start: DateTime<Utc>) -> Self {
        Self {
            vehicle_id: vehicle_id.to_string(),
            thresholds,
            state: SafetyState::Normal,
            entered_at: start,
            events: Vec::new(),
            warning_ticks: 0,
            shutdown_count: 0,
        }
    }

    pub fn status(&self) -> ThermalStatus {
        self.state.status()
    }

    pub fn thresholds(&self) -> &ThermalThresholds {
        &self.thresholds
    }

    /// Complete transition log, oldest first
    pub fn events(&self) -> &[SafetyEvent] {
        &self.events
    }

    pub fn is_shutdown_active(&self) -> bool {
        self.power_limit_factor() == 0.0
    }

    pub fn power_limit_factor(&self) -> f64 {
        match self.state {
            SafetyState::Normal => 1.0,
            SafetyState::Warning => self.thresholds.warning_power_limit,
            SafetyState::Critical => self.thresholds.critical_power_limit,
            SafetyState::Shutdown => 0.0,
            SafetyState::Recovering { held_s, ramp_s } => {
                if held_s < self.thresholds.recovery_hold_s {
                    0.0
                } else if self.thresholds.recovery_ramp_s <= 0.0 {
                    1.0
                } else {
                    (ramp_s / self.thresholds.recovery_ramp_s).clamp(0.0, 1.0)
                }
            }
        }
    }

    pub fn charge_permission(&self) -> ChargePermission {
        match self.state {
            SafetyState::Normal => ChargePermission::Allowed,
            SafetyState::Warning => ChargePermission::Reduced,
            SafetyState::Critical | SafetyState::Shutdown => ChargePermission::Denied,
            SafetyState::Recovering { .. } => {
                if self.power_limit_factor() > 0.0 {
                    ChargePermission::Reduced
                } else {
                    ChargePermission::Denied
                }
            }
        }
    }

    pub fn assessment(&self) -> ThermalAssessment {
        ThermalAssessment {
            status: self.status(),
            power_limit_factor: self.power_limit_factor(),
            entered_at: self.entered_at,
            charge_permission: self.charge_permission(),
        }
    }

    /// Feed one temperature reading covering `dt_s` seconds
    pub fn evaluate(
        &mut self,
        temperature_c: f64,
        now: DateTime<Utc>,
        tick: u64,
        dt_s: f64,
    ) -> ThermalAssessment {
        let from = self.state;
        let to = self.next_state(from, temperature_c, dt_s);

        if from.status() != to.status() {
            // Escalations from the ordinary levels log each level they pass through
            let from_rank = from.status().rank();
            let to_rank = to.status().rank();
            let mut previous = from;
            if from_rank < to_rank && !matches!(from, SafetyState::Recovering { .. }) {
                for rank in (from_rank + 1)..to_rank {
                    let step = Self::level_for_rank(rank);
                    self.state = step;
                    self.record(previous, step, temperature_c, now, tick);
                    previous = step;
                }
            }
            self.state = to;
            self.record(previous, to, temperature_c, now, tick);
            self.entered_at = now;
        } else {
            self.state = to;
        }

        if self.state == SafetyState::Warning {
            self.warning_ticks += 1;
        }

        self.assessment()
    }

    /// Exhaustive transition function
    fn next_state(&self, state: SafetyState, temp: f64, dt_s: f64) -> SafetyState {
        let t = &self.thresholds;
        let margin = t.hysteresis_margin_c;
        match state {
            SafetyState::Normal => self.escalation_level(temp).unwrap_or(SafetyState::Normal),
            SafetyState::Warning => match self.escalation_level(temp) {
                Some(level) if level.status().rank() > 1 => level,
                _ if temp < t.warning_c - margin => SafetyState::Normal,
                _ => SafetyState::Warning,
            },
            SafetyState::Critical => {
                if temp >= t.shutdown_c {
                    SafetyState::Shutdown
                } else if temp < t.critical_c - margin {
                    SafetyState::Warning
                } else {
                    SafetyState::Critical
                }
            }
            SafetyState::Shutdown => {
                if temp <= t.recovery_c {
                    SafetyState::Recovering {
                        held_s: 0.0,
                        ramp_s: 0.0,
                    }
                } else {
                    SafetyState::Shutdown
                }
            }
            SafetyState::Recovering { held_s, ramp_s } => {
                if temp >= t.shutdown_c {
                    SafetyState::Shutdown
                } else if temp > t.recovery_c {
                    // Breach of the recovery band restarts the hold
                    SafetyState::Recovering {
                        held_s: 0.0,
                        ramp_s: 0.0,
                    }
                } else {
                    let (held_s, ramp_s) = if held_s < t.recovery_hold_s {
                        (held_s + dt_s, ramp_s)
                    } else {
                        (held_s, ramp_s + dt_s)
                    };
                    if held_s >= t.recovery_hold_s && ramp_s >= t.recovery_ramp_s {
                        SafetyState::Normal
                    } else {
                        SafetyState::Recovering { held_s, ramp_s }
                    }
                }
            }
        }
    }

    /// Highest level whose entry threshold is met, if any
    fn escalation_level(&self, temp: f64) -> Option<SafetyState> {
        let t = &self.thresholds;
        if temp >= t.shutdown_c {
            Some(SafetyState::Shutdown)
        } else if temp >= t.critical_c {
            Some(SafetyState::Critical)
        } else if temp >= t.warning_c {
            Some(SafetyState::Warning)
        } else {
            None
        }
    }

    fn level_for_rank(rank: u8) -> SafetyState {
        match rank {
            0 => SafetyState::Normal,
            1 => SafetyState::Warning,
            2 => SafetyState::Critical,
            _ => SafetyState::Shutdown,
        }
    }

    fn record(
        &mut self,
        from: SafetyState,
        to: SafetyState,
        temperature_c: f64,
        now: DateTime<Utc>,
        tick: u64,
    ) {
        let event = SafetyEvent {
            timestamp: now,
            tick,
            from: from.status(),
            to: to.status(),
            temperature_c,
            power_limit_factor: self.power_limit_factor(),
        };
        self.events.push(event);

        let vehicle_id = self.vehicle_id.as_str();
        match event.to {
            ThermalStatus::Shutdown => {
                self.shutdown_count += 1;
                error!(
                    vehicle_id,
                    temperature_c,
                    limit_c = self.thresholds.shutdown_c,
                    from = %event.from,
                    "THERMAL SHUTDOWN: pack over temperature - power cut"
                );
            }
            ThermalStatus::Critical => warn!(
                vehicle_id,
                temperature_c,
                from = %event.from,
                power_limit = event.power_limit_factor,
                "Pack temperature critical - power severely limited"
            ),
            ThermalStatus::Warning => warn!(
                vehicle_id,
                temperature_c,
                from = %event.from,
                power_limit = event.power_limit_factor,
                "Pack temperature elevated - power limited"
            ),
            ThermalStatus::Recovering => info!(
                vehicle_id,
                temperature_c,
                hold_s = self.thresholds.recovery_hold_s,
                "Pack cooled below recovery threshold - holding before power returns"
            ),
            ThermalStatus::Normal => info!(
                vehicle_id,
                temperature_c,
                from = %event.from,
                "Pack temperature normal"
            ),
        }
    }

    pub fn report(&self) -> ThermalReport {
        let recent_start = self.events.len().saturating_sub(10);
        ThermalReport {
            vehicle_id: self.vehicle_id.clone(),
            status: self.status(),
            power_limit_factor: self.power_limit_factor(),
            warning_ticks: self.warning_ticks,
            shutdown_count: self.shutdown_count,
            total_events: self.events.len(),
            recent_events: self.events[recent_start..].to_vec(),
            thresholds: self.thresholds.clone(),
        }
    }
}
