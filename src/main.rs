use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ev_battery_sim::config::{Config, Overrides};
use ev_battery_sim::simulation::{run_fleet, FleetOutcome, StopReason};
use ev_battery_sim::sink::export;
use ev_battery_sim::sink::CsvSink;
use ev_battery_sim::telemetry;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Parser, Debug)]
#[command(
    name = "ev-battery-sim",
    about = "EV battery telemetry simulator"
)]
struct Cli {
    /// TOML configuration file; EVSIM__* environment variables override it
    #[arg(long, env = "EVSIM_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Simulated days
    #[arg(long)]
    days: Option<u64>,

    /// Fleet seed
    #[arg(long)]
    seed: Option<u64>,

    /// Simulate a single vehicle from the catalog (VEH001, VEH002)
    #[arg(long)]
    vehicle: Option<String>,

    /// User profile for every run, e.g. COMMON_DRIVER
    #[arg(long)]
    profile: Option<String>,

    /// Output directory for telemetry and ground truth
    #[arg(long)]
    output: Option<PathBuf>,

    /// Disable fault injection and sensor noise
    #[arg(long)]
    no_anomalies: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Default)]
enum Command {
    /// Run the configured fleet
    #[default]
    Run,
    /// Load and validate the configuration, then exit
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let cli = Cli::parse();
    let overrides = Overrides {
        days: cli.days,
        seed: cli.seed,
        vehicle: cli.vehicle.clone(),
        profile: cli.profile.clone(),
        output_dir: cli.output.clone(),
        no_anomalies: cli.no_anomalies,
    };
    let config = Config::load(&cli.config)
        .and_then(|c| c.apply_overrides(&overrides))
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command.unwrap_or_default() {
        Command::Validate => {
            let runs = config
                .build_runs()
                .context("building simulations from configuration")?;
            info!(
                path = %cli.config.display(),
                vehicles = runs.len(),
                ticks = config.simulation.duration_ticks(),
                "configuration valid"
            );
            Ok(())
        }
        Command::Run => run(config).await,
    }
}

async fn run(config: Config) -> Result<()> {
    let output_dir = config.sink.output_dir.clone();
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;

    let cancel = CancellationToken::new();
    telemetry::cancel_on_shutdown(cancel.clone());

    info!(
        vehicles = config.fleet.len(),
        days = config.simulation.days,
        seed = config.simulation.seed,
        output = %output_dir.display(),
        "starting EV battery simulation"
    );

    let dir = output_dir.clone();
    let outcomes = run_fleet(
        config.simulation_configs(),
        config.sink.batch_size,
        config.sink.retry.clone(),
        move |index, sim| CsvSink::create(dir.join(format!("{index:02}_{}.csv", sim.vehicle_id))),
        cancel,
    )
    .await?;

    let mut failed = 0;
    for outcome in &outcomes {
        let report = &outcome.report;
        info!(
            vehicle_id = %report.vehicle_id,
            ticks = report.ticks_run,
            sessions = report.sessions.len(),
            safety_events = report.safety_events.len(),
            anomalies = report.anomaly_events.len(),
            boundary_violations = report.boundary_violations,
            final_soc = report.final_state.soc,
            final_soh = report.final_state.soh,
            stop_reason = ?report.stop_reason,
            "run finished"
        );
        if config.sink.export_ground_truth {
            write_ground_truth(&output_dir, outcome)?;
        }
        if let StopReason::SinkFailed { error } = &report.stop_reason {
            warn!(vehicle_id = %report.vehicle_id, %error, "telemetry incomplete");
            failed += 1;
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} run(s) could not persist their telemetry");
    }
    info!("simulation complete");
    Ok(())
}

fn write_ground_truth<S>(dir: &Path, outcome: &FleetOutcome<S>) -> Result<()> {
    let report = &outcome.report;
    let stem = format!("{:02}_{}", outcome.index, report.vehicle_id);

    let create = |suffix: &str| -> Result<BufWriter<File>> {
        Ok(BufWriter::new(File::create(dir.join(format!("{stem}_{suffix}")))?))
    };

    export::write_safety_events_json(create("safety_events.json")?, &report.safety_events)?;
    export::write_sessions_json(create("sessions.json")?, &report.sessions)?;
    export::write_anomalies_json(create("anomalies.json")?, &report.anomaly_events)?;
    export::write_sessions_csv(create("sessions.csv")?, &report.sessions)?;
    export::write_safety_events_csv(create("safety_events.csv")?, &report.safety_events)?;
    Ok(())
}
