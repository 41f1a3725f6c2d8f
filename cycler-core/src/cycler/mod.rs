//! The Cycler: a finite state machine over the phases of a procedure.
//!
//! A run validates its configuration, opens both instruments, then walks the
//! procedure's phase plan cycle by cycle. Each phase issues its entry
//! commands and polls at a fixed cadence until its exit condition holds:
//! voltage first, then current (zero while resting), then the source status
//! where a charge phase needs it, then the phase-local elapsed time, then
//! coulomb counting, then the sample is recorded. The
//! cadence sleep is the only suspension point and the only place a stop
//! request is observed.
//!
//! The first fatal error ends the run. Samples gathered so far are returned
//! next to it in [`Interrupted`], and the instrument session is released
//! before the error reaches the caller.

use core::time::Duration;

use tracing::{debug, info, warn};

use crate::capacity::CapacityAccumulator;
use crate::instruments::{
    ChargeSourceDriver, InstrumentError, InstrumentRole, LoadSinkDriver, RegulationMode,
};
use crate::phases::{Phase, PhaseCommands, Reading, exit_commands};
use crate::procedures::Procedure;
use crate::run::{PhaseSample, Run, RunRecorder};

pub mod cadence;
pub mod config;
pub mod error;
mod session;

pub use cadence::{CadenceClock, CadenceInstant, Wake};
pub use config::{
    CHARGE_VOLTAGE_MARGIN, ConfigError, CycleConfig, CycleSchedule, MeasurementLimits,
};
pub use error::{CycleError, Interrupted, Quantity, ReadFault, WriteOperation};

use session::InstrumentSession;

/// Drives one charging source and one load through cycling procedures.
#[derive(Debug)]
pub struct Cycler<S, L> {
    source: S,
    load: L,
    config: CycleConfig,
}

impl<S, L> Cycler<S, L>
where
    S: ChargeSourceDriver,
    L: LoadSinkDriver,
{
    #[must_use]
    pub const fn new(source: S, load: L, config: CycleConfig) -> Self {
        Self {
            source,
            load,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &CycleConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: CycleConfig) {
        self.config = config;
    }

    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    #[must_use]
    pub fn load(&self) -> &L {
        &self.load
    }

    #[must_use]
    pub fn into_parts(self) -> (S, L) {
        (self.source, self.load)
    }

    /// Runs the full charge/discharge cycle `cycle_count` times.
    pub async fn run_cycle<C: CadenceClock>(&mut self, clock: &mut C) -> Result<Run, Interrupted> {
        self.run(Procedure::FullCycle, clock).await
    }

    /// Runs `procedure` and returns the complete Run, or the error and the
    /// partial Run collected before it.
    pub async fn run<C: CadenceClock>(
        &mut self,
        procedure: Procedure,
        clock: &mut C,
    ) -> Result<Run, Interrupted> {
        let mut recorder = RunRecorder::new();
        let schedule = match self.config.validate() {
            Ok(schedule) => schedule,
            Err(err) => {
                tracing::error!(error = %err, "configuration rejected");
                return Err(Interrupted::new(err.into(), recorder.finish()));
            }
        };

        info!(
            procedure = %procedure,
            cycles = schedule.cycle_count,
            period_s = schedule.sample_period.as_secs_f64(),
            "run started"
        );

        let outcome = {
            let mut session = InstrumentSession::new(&mut self.source, &mut self.load);
            let mut execution = Execution {
                session: &mut session,
                recorder: &mut recorder,
                accumulator: CapacityAccumulator::new(),
                clock,
                schedule,
                cycle: 1,
            };
            let outcome = execution.run(procedure).await;
            session.release();
            outcome
        };

        let run = recorder.finish();
        match outcome {
            Ok(()) => {
                info!(samples = run.len(), "run complete");
                Ok(run)
            }
            Err(err) if err.is_failure() => {
                tracing::error!(error = %err, samples = run.len(), "run aborted");
                Err(Interrupted::new(err, run))
            }
            Err(err) => {
                warn!(error = %err, samples = run.len(), "run stopped");
                Err(Interrupted::new(err, run))
            }
        }
    }
}

/// Measurements of one poll. `power_w` and `source_mode` are the recorded
/// status columns; the reading may carry a mode that is not recorded.
#[derive(Copy, Clone, Debug, PartialEq)]
struct Poll {
    reading: Reading,
    power_w: Option<f64>,
    source_mode: Option<RegulationMode>,
}

/// Mutable state of a run in progress.
struct Execution<'s, 'a, S, L, C>
where
    S: ChargeSourceDriver,
    L: LoadSinkDriver,
    C: CadenceClock,
{
    session: &'s mut InstrumentSession<'a, S, L>,
    recorder: &'s mut RunRecorder,
    accumulator: CapacityAccumulator,
    clock: &'s mut C,
    schedule: CycleSchedule,
    cycle: u32,
}

impl<S, L, C> Execution<'_, '_, S, L, C>
where
    S: ChargeSourceDriver,
    L: LoadSinkDriver,
    C: CadenceClock,
{
    async fn run(&mut self, procedure: Procedure) -> Result<(), CycleError> {
        let plan = procedure.plan();
        let targets = self.schedule.targets;
        let first_phase = plan
            .phases_for(1, &targets)
            .first()
            .copied()
            .unwrap_or(Phase::WaitInitial);
        self.session.open(1, first_phase)?;

        for cycle in 1..=self.schedule.cycle_count {
            self.cycle = cycle;
            self.recorder.begin_cycle(cycle);
            let cycle_start = self.clock.now();
            info!(cycle, "cycle started");

            let phases = plan.phases_for(cycle, &targets);
            for (index, phase) in phases.iter().copied().enumerate() {
                let next = phases.get(index + 1).copied();
                self.run_phase(phase, next, cycle_start).await?;
            }

            info!(
                cycle,
                charge_ah = self.accumulator.charge_ah(),
                discharge_ah = self.accumulator.discharge_ah(),
                "cycle finished"
            );
        }
        Ok(())
    }

    /// Runs one phase. Its clock starts before the entry commands, so
    /// command time is part of the phase and of the cycle timeline.
    async fn run_phase(
        &mut self,
        phase: Phase,
        next: Option<Phase>,
        cycle_start: C::Instant,
    ) -> Result<(), CycleError> {
        let targets = self.schedule.targets;
        let entered_at = self.clock.now();
        let offset = entered_at.saturating_duration_since(cycle_start);
        self.accumulator
            .begin_phase(phase, self.cycle, self.schedule.capacity_carry);
        self.recorder.begin_phase(phase, offset);
        info!(
            cycle = self.cycle,
            phase = %phase,
            offset_s = offset.as_secs_f64(),
            "phase started"
        );
        self.apply(phase, &targets.entry_commands(phase))?;

        let mut previous = Duration::ZERO;
        let exit = loop {
            let deadline = self.clock.now() + self.schedule.sample_period;
            let poll = self.poll(phase)?;
            let elapsed = self.clock.now().saturating_duration_since(entered_at);
            let delta = self
                .accumulator
                .accumulate(phase, previous, elapsed, poll.reading.current);
            previous = elapsed;

            if let Some(sample) = self.recorder.record(PhaseSample {
                phase_elapsed: elapsed,
                voltage: poll.reading.voltage,
                current: poll.reading.current,
                charge_ah: self.accumulator.charge_ah(),
                discharge_ah: self.accumulator.discharge_ah(),
                capacity_delta_ah: delta,
                power_w: poll.power_w,
                source_mode: poll.source_mode,
            }) {
                debug!(
                    cycle = sample.cycle,
                    phase = %sample.phase,
                    t = sample.elapsed_s,
                    voltage = sample.voltage,
                    current = sample.current,
                    "sample"
                );
            }

            if let Some(exit) = targets.exit_condition(phase, elapsed, poll.reading) {
                break exit;
            }
            if self.clock.sleep_until(deadline).await == Wake::Stopped {
                return Err(CycleError::Cancelled {
                    cycle: self.cycle,
                    phase,
                });
            }
        };

        let duration = self.clock.now().saturating_duration_since(entered_at);
        self.recorder.end_phase(duration, exit);
        info!(
            cycle = self.cycle,
            phase = %phase,
            exit = %exit,
            duration_s = duration.as_secs_f64(),
            "phase finished"
        );
        self.apply(phase, &exit_commands(phase, next))
    }

    fn apply(&mut self, phase: Phase, commands: &PhaseCommands) -> Result<(), CycleError> {
        for command in commands.iter().copied() {
            self.session
                .apply(command)
                .map_err(|source| CycleError::InstrumentWrite {
                    cycle: self.cycle,
                    phase,
                    instrument: command.instrument(),
                    operation: WriteOperation::Command(command),
                    source,
                })?;
        }
        Ok(())
    }

    fn poll(&mut self, phase: Phase) -> Result<Poll, CycleError> {
        let limits = self.schedule.limits;

        let instrument = phase.voltage_instrument();
        let voltage = match instrument {
            InstrumentRole::Source => self.session.source.measure_voltage(),
            InstrumentRole::Load => self.session.load.measure_voltage(),
        };
        let voltage = self.checked(phase, instrument, Quantity::Voltage, voltage, |v| {
            limits.voltage_is_plausible(v)
        })?;

        let current = match phase.current_instrument() {
            None => 0.0,
            Some(instrument) => {
                let current = match instrument {
                    InstrumentRole::Source => self.session.source.measure_current(),
                    InstrumentRole::Load => self.session.load.measure_current(),
                };
                self.checked(phase, instrument, Quantity::Current, current, |a| {
                    limits.current_is_plausible(a)
                })?
            }
        };

        let record_status = phase.is_charge() && self.schedule.record_source_status;
        let power_w = if record_status {
            let power = self.session.source.measure_power();
            Some(self.checked(phase, InstrumentRole::Source, Quantity::Power, power, |w| {
                limits.power_is_plausible(w)
            })?)
        } else {
            None
        };

        // CC charge also ends when the source starts regulating voltage. A
        // source without a status query falls back to the voltage threshold.
        let mode = if record_status || phase == Phase::ConstantCurrentCharge {
            match self.session.source.read_operating_mode() {
                Ok(mode) => Some(mode),
                Err(InstrumentError::Unsupported) if !record_status => None,
                Err(fault) => {
                    return Err(self.read_error(
                        phase,
                        InstrumentRole::Source,
                        Quantity::OperatingMode,
                        ReadFault::Driver(fault),
                    ));
                }
            }
        } else {
            None
        };

        Ok(Poll {
            reading: Reading {
                voltage,
                current,
                source_mode: mode,
            },
            power_w,
            source_mode: mode.filter(|_| record_status),
        })
    }

    fn checked(
        &self,
        phase: Phase,
        instrument: InstrumentRole,
        quantity: Quantity,
        value: Result<f64, InstrumentError>,
        plausible: impl FnOnce(f64) -> bool,
    ) -> Result<f64, CycleError> {
        match value {
            Ok(value) if plausible(value) => Ok(value),
            Ok(value) => Err(self.read_error(
                phase,
                instrument,
                quantity,
                ReadFault::Implausible(value),
            )),
            Err(fault) => Err(self.read_error(phase, instrument, quantity, ReadFault::Driver(fault))),
        }
    }

    fn read_error(
        &self,
        phase: Phase,
        instrument: InstrumentRole,
        quantity: Quantity,
        fault: ReadFault,
    ) -> CycleError {
        CycleError::InstrumentRead {
            cycle: self.cycle,
            phase,
            instrument,
            quantity,
            fault,
        }
    }
}
