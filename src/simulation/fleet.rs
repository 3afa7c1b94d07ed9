//! Parallel runs across vehicles
//!
//! Each run owns its simulation, RNG streams and sink; nothing is shared
//! between them, so they are handed to the blocking pool as-is.

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::orchestrator::{RunReport, Simulation, SimulationConfig, SimulationError, StopReason};
use crate::sink::{BufferedWriter, RetryPolicy, SinkError, TelemetrySink};

/// Result of one fleet member
#[derive(Debug)]
pub struct FleetOutcome<S> {
    pub index: usize,
    pub report: RunReport,
    /// The writer is returned so a failed run can be resumed
    pub writer: BufferedWriter<S>,
    pub simulation: Simulation,
}

impl<S> FleetOutcome<S> {
    pub fn completed(&self) -> bool {
        self.report.stop_reason == StopReason::Completed
    }
}

/// Build every run, then simulate them concurrently on the blocking pool.
/// Configuration and sink errors surface before any tick is simulated.
pub async fn run_fleet<S, F>(
    configs: Vec<SimulationConfig>,
    batch_size: usize,
    retry: RetryPolicy,
    mut sink_factory: F,
    cancel: CancellationToken,
) -> Result<Vec<FleetOutcome<S>>, SimulationError>
where
    S: TelemetrySink + 'static,
    F: FnMut(usize, &SimulationConfig) -> Result<S, SinkError>,
{
    let mut prepared = Vec::with_capacity(configs.len());
    for (index, config) in configs.into_iter().enumerate() {
        let sink = sink_factory(index, &config)?;
        let simulation = Simulation::new(config)?;
        prepared.push((index, simulation, BufferedWriter::new(sink, batch_size, retry.clone())));
    }
    info!(vehicles = prepared.len(), "Starting fleet run");

    let mut tasks = JoinSet::new();
    for (index, mut simulation, mut writer) in prepared {
        let cancel = cancel.clone();
        tasks.spawn_blocking(move || {
            let report = simulation.run(&mut writer, &cancel);
            FleetOutcome {
                index,
                report,
                writer,
                simulation,
            }
        });
    }

    let mut outcomes = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        let outcome = joined.map_err(|e| SimulationError::Task(e.to_string()))?;
        if !outcome.completed() {
            warn!(
                index = outcome.index,
                vehicle_id = %outcome.report.vehicle_id,
                stop_reason = ?outcome.report.stop_reason,
                "Fleet member stopped early"
            );
        }
        outcomes.push(outcome);
    }
    outcomes.sort_by_key(|o| o.index);
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UserProfile;
    use crate::sink::MemorySink;

    #[tokio::test]
    async fn test_fleet_runs_are_ordered_by_index() {
        let configs = vec![
            SimulationConfig::new("VEH001", UserProfile::CommonDriver).with_days(1),
            SimulationConfig::new("VEH002", UserProfile::EcoConscious).with_days(1),
        ];
        let outcomes = run_fleet(
            configs,
            5_000,
            RetryPolicy::immediate(1),
            |_, _| Ok(MemorySink::new()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].report.vehicle_id, "VEH001");
        assert_eq!(outcomes[1].report.vehicle_id, "VEH002");
        assert!(outcomes.iter().all(FleetOutcome::completed));
        assert_eq!(outcomes[1].writer.sink().samples().len(), 86_400);
    }

    #[tokio::test]
    async fn test_bad_member_fails_before_any_tick() {
        let configs = vec![
            SimulationConfig::new("VEH001", UserProfile::CommonDriver),
            SimulationConfig::new("VEH777", UserProfile::CommonDriver),
        ];
        let result = run_fleet(
            configs,
            100,
            RetryPolicy::immediate(1),
            |_, _| Ok(MemorySink::new()),
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(SimulationError::Config(_))));
    }
}
