//! One emulated bench session: a simulated cell, its supply and load, and a
//! Cycler driving them through a procedure.

use std::time::Duration;

use cycler_core::cycler::{CadenceClock, CycleConfig, Cycler, Interrupted};
use cycler_core::procedures::Procedure;
use cycler_core::run::Run;
use cycler_core::scpi::{RIGOL_DL3000, SIGLENT_SPD, ScpiInstrument};
use embassy_futures::block_on;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use tracing::debug;

use crate::bench::{BenchSnapshot, SimulatedBench, TimeSource, VirtualTime, WallTime};
use crate::cell::{CellParameters, SimulatedCell};
use crate::clock::{RealtimeClock, VirtualClock};

/// How the simulated bench is built.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BenchOptions {
    pub cell: CellParameters,
    /// Round trip of every instrument query.
    pub latency: Duration,
    /// Makes the `n`th query of the session time out once.
    pub timeout_on_query: Option<usize>,
}

impl Default for BenchOptions {
    fn default() -> Self {
        Self {
            cell: CellParameters::default(),
            latency: Duration::from_millis(50),
            timeout_on_query: None,
        }
    }
}

/// What a session produced, plus the bench state after the instruments were released.
#[derive(Debug)]
pub struct Outcome {
    pub result: Result<Run, Interrupted>,
    pub bench: BenchSnapshot,
}

impl Outcome {
    /// The Run, complete or partial.
    pub fn run(&self) -> &Run {
        match &self.result {
            Ok(run) => run,
            Err(interrupted) => &interrupted.run,
        }
    }
}

/// Runs `procedure` in virtual time, optionally stopping once `stop_after` is reached.
pub fn run_virtual(
    procedure: Procedure,
    config: CycleConfig,
    options: &BenchOptions,
    stop_after: Option<Duration>,
) -> Outcome {
    let time = VirtualTime::new();
    let mut clock = VirtualClock::new(time.clone());
    if let Some(at) = stop_after {
        clock = clock.stopping_at(at);
    }
    drive(procedure, config, options, time, &mut clock)
}

/// Runs `procedure` paced by the host clock until it ends or `stop` is signalled.
pub fn run_realtime(
    procedure: Procedure,
    config: CycleConfig,
    options: &BenchOptions,
    stop: &'static Signal<CriticalSectionRawMutex, ()>,
) -> Outcome {
    let mut clock = RealtimeClock::new(stop);
    drive(procedure, config, options, WallTime::new(), &mut clock)
}

fn drive<T, C>(
    procedure: Procedure,
    config: CycleConfig,
    options: &BenchOptions,
    time: T,
    clock: &mut C,
) -> Outcome
where
    T: TimeSource + Clone,
    C: CadenceClock,
{
    let bench = SimulatedBench::new(SimulatedCell::new(options.cell), time, options.latency);
    if let Some(n) = options.timeout_on_query {
        bench.time_out_on_query(n);
    }

    let source = ScpiInstrument::new(bench.supply_port(), &SIGLENT_SPD);
    let load = ScpiInstrument::new(bench.load_port(), &RIGOL_DL3000);
    let mut cycler = Cycler::new(source, load, config);
    let result = block_on(cycler.run(procedure, clock));

    let snapshot = bench.snapshot();
    debug!(soc = snapshot.soc, "bench after run");
    Outcome {
        result,
        bench: snapshot,
    }
}

#[cfg(test)]
mod tests {
    use cycler_core::cycler::{CycleError, Quantity, ReadFault};
    use cycler_core::instruments::{InstrumentError, InstrumentRole};
    use cycler_core::phases::{Phase, PhaseExit};

    use super::*;

    fn phases_of(run: &Run) -> Vec<(Phase, Option<PhaseExit>)> {
        run.phases()
            .iter()
            .map(|record| (record.phase, record.exit))
            .collect()
    }

    #[test]
    fn full_cycle_charges_and_drains_the_cell() {
        let outcome = run_virtual(
            Procedure::FullCycle,
            CycleConfig::default(),
            &BenchOptions::default(),
            None,
        );
        let run = outcome.result.as_ref().expect("run completes");

        assert_eq!(
            phases_of(run),
            [
                (Phase::WaitInitial, Some(PhaseExit::WaitElapsed)),
                (Phase::ConstantCurrentCharge, Some(PhaseExit::UpperVoltageReached)),
                (Phase::ConstantVoltageCharge, Some(PhaseExit::CurrentTapered)),
                (Phase::WaitBetween, Some(PhaseExit::WaitElapsed)),
                (Phase::ConstantCurrentDischarge, Some(PhaseExit::LowerVoltageReached)),
                (Phase::WaitEnd, Some(PhaseExit::WaitElapsed)),
            ]
        );

        let summary = run.cycle_summaries()[0];
        assert!((0.70..0.85).contains(&summary.charge_ah), "{summary:?}");
        assert!((1.45..1.60).contains(&summary.discharge_ah), "{summary:?}");

        assert!(!outcome.bench.supply_output);
        assert!(!outcome.bench.load_input);
        assert!(outcome.bench.soc < 0.01);
    }

    #[test]
    fn charge_samples_carry_source_status() {
        let outcome = run_virtual(
            Procedure::Charge,
            CycleConfig::default(),
            &BenchOptions::default(),
            None,
        );
        let run = outcome.result.as_ref().expect("run completes");
        for sample in run.samples() {
            assert_eq!(sample.phase.is_charge(), sample.source_mode.is_some());
            assert_eq!(sample.phase.is_charge(), sample.power_w.is_some());
        }
        let last_cv = run
            .samples()
            .iter()
            .rev()
            .find(|sample| sample.phase == Phase::ConstantVoltageCharge)
            .expect("cv samples");
        assert!(last_cv.current < 0.075);
    }

    #[test]
    fn second_cycle_charges_against_a_limit_at_upper_voltage() {
        let config = CycleConfig {
            cycle_count: 2,
            charge_voltage_limit: Some(3.65),
            ..CycleConfig::default()
        };
        let outcome = run_virtual(Procedure::FullCycle, config, &BenchOptions::default(), None);
        let run = outcome.result.as_ref().expect("run completes");

        let cc_exits: Vec<Option<PhaseExit>> = run
            .phases()
            .iter()
            .filter(|record| record.phase == Phase::ConstantCurrentCharge)
            .map(|record| record.exit)
            .collect();
        assert_eq!(cc_exits.len(), 2);
        assert!(cc_exits.iter().all(|exit| matches!(
            exit,
            Some(PhaseExit::UpperVoltageReached | PhaseExit::SourceRegulatingVoltage)
        )));
        let second = run.cycle_summaries()[1];
        assert!(second.charge_ah > 1.2, "{second:?}");
    }

    #[test]
    fn cccv_discharge_drains_past_the_cc_endpoint() {
        let outcome = run_virtual(
            Procedure::CcCvDischarge,
            CycleConfig::default(),
            &BenchOptions::default(),
            None,
        );
        let run = outcome.result.as_ref().expect("run completes");

        assert_eq!(
            phases_of(run),
            [
                (Phase::WaitInitial, Some(PhaseExit::WaitElapsed)),
                (Phase::WaitBetween, Some(PhaseExit::WaitElapsed)),
                (Phase::ConstantCurrentDischarge, Some(PhaseExit::LowerVoltageReached)),
                (Phase::ConstantVoltageDischarge, Some(PhaseExit::CurrentTapered)),
                (Phase::WaitEnd, Some(PhaseExit::WaitElapsed)),
            ]
        );
        let cc_end = run
            .samples()
            .iter()
            .rev()
            .find(|sample| sample.phase == Phase::ConstantCurrentDischarge)
            .expect("cc samples");
        let cv_end = run
            .samples()
            .iter()
            .rev()
            .find(|sample| sample.phase == Phase::ConstantVoltageDischarge)
            .expect("cv samples");
        assert!(cv_end.discharge_ah > cc_end.discharge_ah);
        assert!(cv_end.current < 0.075);
        assert!(!outcome.bench.load_input);
    }

    #[test]
    fn stop_keeps_partial_run_and_releases_bench() {
        let outcome = run_virtual(
            Procedure::FullCycle,
            CycleConfig::default(),
            &BenchOptions::default(),
            Some(Duration::from_secs(100)),
        );
        let interrupted = outcome.result.as_ref().expect_err("stopped");

        assert!(!interrupted.is_failure());
        assert!(matches!(
            interrupted.error,
            CycleError::Cancelled {
                cycle: 1,
                phase: Phase::ConstantCurrentCharge
            }
        ));
        assert!(!interrupted.run.is_empty());
        assert!(!outcome.bench.supply_output);
    }

    #[test]
    fn query_timeout_aborts_with_partial_run() {
        let options = BenchOptions {
            timeout_on_query: Some(6),
            ..BenchOptions::default()
        };
        let outcome = run_virtual(Procedure::FullCycle, CycleConfig::default(), &options, None);
        let interrupted = outcome.result.as_ref().expect_err("aborted");

        assert!(interrupted.is_failure());
        assert_eq!(
            interrupted.error,
            CycleError::InstrumentRead {
                cycle: 1,
                phase: Phase::ConstantCurrentCharge,
                instrument: InstrumentRole::Source,
                quantity: Quantity::Voltage,
                fault: ReadFault::Driver(InstrumentError::Timeout),
            }
        );
        assert_eq!(outcome.run().len(), 2);
        assert!(!outcome.bench.supply_output);
    }
}
