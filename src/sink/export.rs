//! Ground-truth exports: safety events, charging sessions and anomaly windows

use std::io::{Read, Write};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::SinkError;
use crate::domain::{
    ChargeReason, ChargerType, ChargingSession, SafetyEvent, SessionOutcome,
};
use crate::simulation::anomaly::AnomalyEvent;

pub fn write_safety_events_json<W: Write>(
    writer: W,
    events: &[SafetyEvent],
) -> Result<(), SinkError> {
    serde_json::to_writer_pretty(writer, events)?;
    Ok(())
}

pub fn write_safety_events_csv<W: Write>(
    writer: W,
    events: &[SafetyEvent],
) -> Result<(), SinkError> {
    let mut csv = csv::Writer::from_writer(writer);
    for event in events {
        csv.serialize(event)?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_sessions_json<W: Write>(
    writer: W,
    sessions: &[ChargingSession],
) -> Result<(), SinkError> {
    serde_json::to_writer_pretty(writer, sessions)?;
    Ok(())
}

pub fn read_sessions_json<R: Read>(reader: R) -> Result<Vec<ChargingSession>, SinkError> {
    Ok(serde_json::from_reader(reader)?)
}

/// Flat session row for CSV
#[derive(Debug, Serialize)]
struct SessionRow<'a> {
    vehicle_id: &'a str,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    charger_type: ChargerType,
    reason: ChargeReason,
    start_soc: f64,
    end_soc: Option<f64>,
    target_soc: f64,
    energy_delivered_kwh: f64,
    grid_energy_kwh: f64,
    peak_current_a: f64,
    outcome: String,
    interrupted: bool,
}

fn outcome_label(outcome: SessionOutcome) -> String {
    match outcome {
        SessionOutcome::Open => "open".to_string(),
        SessionOutcome::Complete => "complete".to_string(),
        SessionOutcome::Interrupted(reason) => format!("interrupted:{reason}"),
    }
}

pub fn write_sessions_csv<W: Write>(
    writer: W,
    sessions: &[ChargingSession],
) -> Result<(), SinkError> {
    let mut csv = csv::Writer::from_writer(writer);
    for s in sessions {
        csv.serialize(SessionRow {
            vehicle_id: &s.vehicle_id,
            start_time: s.start_time,
            end_time: s.end_time,
            charger_type: s.charger_type,
            reason: s.reason,
            start_soc: s.start_soc,
            end_soc: s.end_soc,
            target_soc: s.target_soc,
            energy_delivered_kwh: s.energy_delivered_kwh,
            grid_energy_kwh: s.grid_energy_kwh,
            peak_current_a: s.peak_current_a,
            outcome: outcome_label(s.outcome),
            interrupted: s.interrupted,
        })?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_anomalies_json<W: Write>(
    writer: W,
    events: &[AnomalyEvent],
) -> Result<(), SinkError> {
    serde_json::to_writer_pretty(writer, events)?;
    Ok(())
}
