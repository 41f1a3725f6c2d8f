//! Records every procedure against the default simulated bench, plus one
//! stopped and one faulted run, as CSV and JSON under the given directory.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use cycler_core::cycler::CycleConfig;
use cycler_core::procedures::Procedure;

#[allow(dead_code)]
#[path = "../bench.rs"]
mod bench;
#[allow(dead_code)]
#[path = "../cell.rs"]
mod cell;
#[allow(dead_code)]
#[path = "../clock.rs"]
mod clock;
#[allow(dead_code)]
#[path = "../export.rs"]
mod export;
#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use session::{BenchOptions, Outcome};

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let dir = env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from("runs"), PathBuf::from);
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

    let options = BenchOptions::default();
    for procedure in Procedure::ALL {
        let outcome = session::run_virtual(procedure, CycleConfig::default(), &options, None);
        record(&dir, procedure.tag(), &outcome)?;
    }

    let two_cycles = CycleConfig {
        cycle_count: 2,
        ..CycleConfig::default()
    };
    let outcome = session::run_virtual(Procedure::FullCycle, two_cycles, &options, None);
    record(&dir, "two-cycles", &outcome)?;

    let outcome = session::run_virtual(
        Procedure::FullCycle,
        CycleConfig::default(),
        &options,
        Some(Duration::from_secs(600)),
    );
    record(&dir, "stopped", &outcome)?;

    let flaky = BenchOptions {
        timeout_on_query: Some(40),
        ..options
    };
    let outcome = session::run_virtual(Procedure::FullCycle, CycleConfig::default(), &flaky, None);
    record(&dir, "timeout", &outcome)
}

fn record(dir: &Path, name: &str, outcome: &Outcome) -> Result<()> {
    let run = outcome.run();
    let csv = dir.join(format!("{name}.csv"));
    export::write_csv_file(run, &csv).with_context(|| format!("writing {}", csv.display()))?;
    let json = dir.join(format!("{name}.json"));
    export::write_json_file(run, &json).with_context(|| format!("writing {}", json.display()))?;

    match &outcome.result {
        Ok(_) => println!("{name}: {} samples", run.len()),
        Err(interrupted) => println!("{name}: {interrupted}"),
    }
    Ok(())
}
