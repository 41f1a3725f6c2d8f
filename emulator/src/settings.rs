//! Run configuration: an optional JSON file, then command-line overrides.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use cycler_core::capacity::CapacityCarry;
use cycler_core::cycler::CycleConfig;

/// Loads a [`CycleConfig`] from `path`, or the bench defaults when there is none.
///
/// Fields missing from the file keep their default values.
pub fn load(path: Option<&Path>) -> Result<CycleConfig> {
    let Some(path) = path else {
        return Ok(CycleConfig::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
}

/// Per-field overrides of the loaded configuration.
#[derive(Debug, Default, Args)]
pub struct Overrides {
    /// Number of charge/discharge cycles.
    #[arg(long)]
    pub cycles: Option<u32>,
    /// Seconds between samples.
    #[arg(long)]
    pub sample_period: Option<f64>,
    #[arg(long)]
    pub wait_initial: Option<f64>,
    #[arg(long)]
    pub wait_between: Option<f64>,
    #[arg(long)]
    pub wait_end: Option<f64>,
    #[arg(long)]
    pub upper_voltage: Option<f64>,
    /// Source voltage setpoint during CC charge.
    #[arg(long)]
    pub charge_voltage_limit: Option<f64>,
    #[arg(long)]
    pub charge_current: Option<f64>,
    #[arg(long)]
    pub cutoff_current: Option<f64>,
    #[arg(long)]
    pub lower_voltage: Option<f64>,
    #[arg(long)]
    pub discharge_current: Option<f64>,
    /// `reset` (per cycle) or `continue` (across cycles).
    #[arg(long, value_parser = parse_carry)]
    pub capacity_carry: Option<CapacityCarry>,
    /// Skip the source power and mode queries during charge phases.
    #[arg(long)]
    pub no_source_status: bool,
}

impl Overrides {
    pub fn apply(&self, config: &mut CycleConfig) {
        fn set<T: Copy>(slot: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *slot = value;
            }
        }

        set(&mut config.cycle_count, self.cycles);
        set(&mut config.sample_period_s, self.sample_period);
        set(&mut config.wait_initial_s, self.wait_initial);
        set(&mut config.wait_between_s, self.wait_between);
        set(&mut config.upper_voltage, self.upper_voltage);
        set(&mut config.charge_current, self.charge_current);
        set(&mut config.cutoff_current, self.cutoff_current);
        set(&mut config.lower_voltage, self.lower_voltage);
        set(&mut config.discharge_current, self.discharge_current);
        set(&mut config.capacity_carry, self.capacity_carry);
        if self.wait_end.is_some() {
            config.wait_end_s = self.wait_end;
        }
        if self.charge_voltage_limit.is_some() {
            config.charge_voltage_limit = self.charge_voltage_limit;
        }
        if self.no_source_status {
            config.record_source_status = false;
        }
    }
}

fn parse_carry(value: &str) -> Result<CapacityCarry, String> {
    match value {
        "reset" | "reset-each-cycle" => Ok(CapacityCarry::ResetEachCycle),
        "continue" => Ok(CapacityCarry::Continue),
        other => Err(format!("unknown capacity carry `{other}`; expected `reset` or `continue`")),
    }
}
