mod bench;
mod cell;
mod clock;
mod export;
mod session;
mod settings;
mod stop;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cycler_core::procedures::Procedure;
use cycler_core::run::Run;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cell::CellParameters;
use session::BenchOptions;

/// Runs a cycling procedure against a simulated supply, load and cell.
#[derive(Debug, Parser)]
#[command(name = "cycler-emulator", version)]
struct Cli {
    /// full-cycle, charge, discharge, cc-charge, cc-discharge, cccv-cycle or
    /// cccv-discharge.
    #[arg(long, default_value = "full-cycle", value_parser = Procedure::from_tag)]
    procedure: Procedure,

    /// JSON run configuration; missing fields keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: settings::Overrides,

    /// Write the samples as CSV.
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Write samples, phases and cycle totals as JSON.
    #[arg(long)]
    json: Option<PathBuf>,

    #[arg(long, default_value_t = 0.5)]
    initial_soc: f64,

    #[arg(long, default_value_t = 1.5)]
    capacity_ah: f64,

    #[arg(long, default_value_t = 0.05)]
    resistance_ohm: f64,

    /// Round trip of each instrument query, in milliseconds.
    #[arg(long, default_value_t = 50)]
    latency_ms: u64,

    /// Pace the run on the wall clock; type `q` and Enter to stop it.
    #[arg(long)]
    realtime: bool,

    /// Stop a virtual-time run after this many simulated seconds.
    #[arg(long, conflicts_with = "realtime")]
    stop_after: Option<f64>,

    /// Make the nth instrument query time out.
    #[arg(long)]
    timeout_on_query: Option<usize>,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut config = settings::load(cli.config.as_deref())?;
    cli.overrides.apply(&mut config);

    let options = BenchOptions {
        cell: CellParameters {
            capacity_ah: cli.capacity_ah,
            resistance_ohm: cli.resistance_ohm,
            initial_soc: cli.initial_soc,
        },
        latency: Duration::from_millis(cli.latency_ms),
        timeout_on_query: cli.timeout_on_query,
    };

    let outcome = if cli.realtime {
        stop::listen_for_stop_key('q').context("starting keyboard listener")?;
        info!("running on the wall clock; type q and Enter to stop");
        session::run_realtime(cli.procedure, config, &options, &stop::STOP)
    } else {
        let stop_after = cli
            .stop_after
            .map(Duration::try_from_secs_f64)
            .transpose()
            .context("--stop-after must be a non-negative number of seconds")?;
        session::run_virtual(cli.procedure, config, &options, stop_after)
    };

    info!(
        soc = outcome.bench.soc,
        volts = outcome.bench.point.terminal_voltage,
        supply_output = outcome.bench.supply_output,
        load_input = outcome.bench.load_input,
        "bench released"
    );

    let run = outcome.run();
    if let Some(path) = &cli.output {
        export::write_csv_file(run, path)
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), samples = run.len(), "csv written");
    }
    if let Some(path) = &cli.json {
        export::write_json_file(run, path)
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "json written");
    }
    report(run);

    Ok(match &outcome.result {
        Ok(_) => ExitCode::SUCCESS,
        Err(interrupted) if interrupted.is_failure() => {
            error!(error = %interrupted, "run failed");
            ExitCode::FAILURE
        }
        Err(interrupted) => {
            warn!(error = %interrupted, "run stopped early");
            ExitCode::SUCCESS
        }
    })
}

fn report(run: &Run) {
    for summary in run.cycle_summaries() {
        match summary.coulombic_efficiency() {
            Some(efficiency) => info!(
                cycle = summary.cycle,
                charge_ah = summary.charge_ah,
                discharge_ah = summary.discharge_ah,
                efficiency,
                "cycle summary"
            ),
            None => info!(
                cycle = summary.cycle,
                charge_ah = summary.charge_ah,
                discharge_ah = summary.discharge_ah,
                "cycle summary"
            ),
        }
    }
}
