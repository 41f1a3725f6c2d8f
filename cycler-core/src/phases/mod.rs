//! Phase catalog, transition predicates, and the instrument commands issued
//! when a phase starts or ends.

use core::fmt;
use core::time::Duration;

use heapless::Vec;

use crate::capacity::CapacityKind;
use crate::instruments::{InstrumentRole, RegulationMode};

/// Most commands any single phase boundary issues.
pub const MAX_PHASE_COMMANDS: usize = 3;

/// One contiguous segment of a cycle with a single control mode.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Phase {
    WaitInitial,
    ConstantCurrentCharge,
    ConstantVoltageCharge,
    WaitBetween,
    ConstantCurrentDischarge,
    /// Holds the cell at the lower voltage until the current tapers.
    /// Only the CC-CV procedures visit it.
    ConstantVoltageDischarge,
    WaitEnd,
}

impl Phase {
    /// Every phase in cycle order.
    pub const ALL: [Phase; 7] = [
        Phase::WaitInitial,
        Phase::ConstantCurrentCharge,
        Phase::ConstantVoltageCharge,
        Phase::WaitBetween,
        Phase::ConstantCurrentDischarge,
        Phase::ConstantVoltageDischarge,
        Phase::WaitEnd,
    ];

    /// Stable label used in logs and exported runs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Phase::WaitInitial => "wait_initial",
            Phase::ConstantCurrentCharge => "constant_current_charge",
            Phase::ConstantVoltageCharge => "constant_voltage_charge",
            Phase::WaitBetween => "wait_between",
            Phase::ConstantCurrentDischarge => "constant_current_discharge",
            Phase::ConstantVoltageDischarge => "constant_voltage_discharge",
            Phase::WaitEnd => "wait_end",
        }
    }

    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|phase| phase.label() == label)
    }

    #[must_use]
    pub const fn is_wait(self) -> bool {
        matches!(self, Phase::WaitInitial | Phase::WaitBetween | Phase::WaitEnd)
    }

    #[must_use]
    pub const fn is_charge(self) -> bool {
        matches!(
            self,
            Phase::ConstantCurrentCharge | Phase::ConstantVoltageCharge
        )
    }

    #[must_use]
    pub const fn is_discharge(self) -> bool {
        matches!(
            self,
            Phase::ConstantCurrentDischarge | Phase::ConstantVoltageDischarge
        )
    }

    /// Running total this phase feeds, if any.
    #[must_use]
    pub const fn capacity_kind(self) -> Option<CapacityKind> {
        match self {
            Phase::ConstantCurrentCharge | Phase::ConstantVoltageCharge => {
                Some(CapacityKind::Charge)
            }
            Phase::ConstantCurrentDischarge | Phase::ConstantVoltageDischarge => {
                Some(CapacityKind::Discharge)
            }
            Phase::WaitInitial | Phase::WaitBetween | Phase::WaitEnd => None,
        }
    }

    /// Instrument whose voltage reading represents the cell in this phase.
    ///
    /// The load's sense terminals stay on the cell while its input is off, so
    /// wait phases read there.
    #[must_use]
    pub const fn voltage_instrument(self) -> InstrumentRole {
        if self.is_charge() {
            InstrumentRole::Source
        } else {
            InstrumentRole::Load
        }
    }

    /// Instrument carrying cell current, or `None` when nothing is connected.
    #[must_use]
    pub const fn current_instrument(self) -> Option<InstrumentRole> {
        match self {
            Phase::ConstantCurrentCharge | Phase::ConstantVoltageCharge => {
                Some(InstrumentRole::Source)
            }
            Phase::ConstantCurrentDischarge | Phase::ConstantVoltageDischarge => {
                Some(InstrumentRole::Load)
            }
            Phase::WaitInitial | Phase::WaitBetween | Phase::WaitEnd => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why a phase stopped polling.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PhaseExit {
    WaitElapsed,
    UpperVoltageReached,
    /// The source reported CV regulation before the cell read the upper voltage.
    SourceRegulatingVoltage,
    CurrentTapered,
    LowerVoltageReached,
}

impl fmt::Display for PhaseExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseExit::WaitElapsed => f.write_str("wait elapsed"),
            PhaseExit::UpperVoltageReached => f.write_str("upper voltage reached"),
            PhaseExit::SourceRegulatingVoltage => f.write_str("source in constant voltage"),
            PhaseExit::CurrentTapered => f.write_str("current below cutoff"),
            PhaseExit::LowerVoltageReached => f.write_str("lower voltage reached"),
        }
    }
}

/// Measurements a predicate looks at. Current is zero in wait phases.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Reading {
    pub voltage: f64,
    pub current: f64,
    /// Regulation the source reported, when it was asked.
    pub source_mode: Option<RegulationMode>,
}

impl Reading {
    #[must_use]
    pub const fn new(voltage: f64, current: f64) -> Self {
        Self {
            voltage,
            current,
            source_mode: None,
        }
    }
}

/// Command issued to an instrument at a phase boundary.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PhaseCommand {
    SourceMode(RegulationMode, f64),
    SourceOutput(bool),
    LoadMode(RegulationMode, f64),
    LoadInput(bool),
}

impl PhaseCommand {
    #[must_use]
    pub const fn instrument(self) -> InstrumentRole {
        match self {
            PhaseCommand::SourceMode(..) | PhaseCommand::SourceOutput(_) => {
                InstrumentRole::Source
            }
            PhaseCommand::LoadMode(..) | PhaseCommand::LoadInput(_) => InstrumentRole::Load,
        }
    }
}

impl fmt::Display for PhaseCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseCommand::SourceMode(mode, level) => write!(f, "source {mode} {level}"),
            PhaseCommand::SourceOutput(true) => f.write_str("source output on"),
            PhaseCommand::SourceOutput(false) => f.write_str("source output off"),
            PhaseCommand::LoadMode(mode, level) => write!(f, "load {mode} {level}"),
            PhaseCommand::LoadInput(true) => f.write_str("load input on"),
            PhaseCommand::LoadInput(false) => f.write_str("load input off"),
        }
    }
}

pub type PhaseCommands = Vec<PhaseCommand, MAX_PHASE_COMMANDS>;

/// Thresholds, wait durations and setpoints the phase table is evaluated with.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PhaseTargets {
    pub wait_initial: Duration,
    pub wait_between: Duration,
    pub wait_end: Duration,
    pub upper_voltage: f64,
    /// Voltage setpoint programmed with the charge current, so the source
    /// never regulates at a level left over from an earlier phase.
    pub charge_voltage_limit: f64,
    pub charge_current: f64,
    pub cutoff_current: f64,
    pub lower_voltage: f64,
    pub discharge_current: f64,
}

impl PhaseTargets {
    /// Configured duration of a wait phase; zero for measurement-driven phases.
    #[must_use]
    pub const fn wait_duration(&self, phase: Phase) -> Duration {
        match phase {
            Phase::WaitInitial => self.wait_initial,
            Phase::WaitBetween => self.wait_between,
            Phase::WaitEnd => self.wait_end,
            _ => Duration::ZERO,
        }
    }

    /// Evaluates the exit condition after a poll. `None` means keep polling.
    #[must_use]
    pub fn exit_condition(
        &self,
        phase: Phase,
        elapsed: Duration,
        reading: Reading,
    ) -> Option<PhaseExit> {
        let exit = match phase {
            Phase::WaitInitial | Phase::WaitBetween | Phase::WaitEnd => {
                elapsed >= self.wait_duration(phase)
            }
            Phase::ConstantCurrentCharge => {
                if reading.voltage >= self.upper_voltage {
                    return Some(PhaseExit::UpperVoltageReached);
                }
                reading.source_mode == Some(RegulationMode::ConstantVoltage)
            }
            Phase::ConstantVoltageCharge | Phase::ConstantVoltageDischarge => {
                reading.current < self.cutoff_current
            }
            Phase::ConstantCurrentDischarge => reading.voltage < self.lower_voltage,
        };
        exit.then_some(match phase {
            Phase::WaitInitial | Phase::WaitBetween | Phase::WaitEnd => PhaseExit::WaitElapsed,
            Phase::ConstantCurrentCharge => PhaseExit::SourceRegulatingVoltage,
            Phase::ConstantVoltageCharge | Phase::ConstantVoltageDischarge => {
                PhaseExit::CurrentTapered
            }
            Phase::ConstantCurrentDischarge => PhaseExit::LowerVoltageReached,
        })
    }

    /// Commands issued before the first poll of `phase`.
    #[must_use]
    pub fn entry_commands(&self, phase: Phase) -> PhaseCommands {
        let commands: &[PhaseCommand] = match phase {
            Phase::WaitInitial | Phase::WaitBetween => &[],
            Phase::ConstantCurrentCharge => &[
                PhaseCommand::SourceMode(
                    RegulationMode::ConstantVoltage,
                    self.charge_voltage_limit,
                ),
                PhaseCommand::SourceMode(RegulationMode::ConstantCurrent, self.charge_current),
                PhaseCommand::SourceOutput(true),
            ],
            Phase::ConstantVoltageCharge => &[PhaseCommand::SourceMode(
                RegulationMode::ConstantVoltage,
                self.upper_voltage,
            )],
            Phase::ConstantCurrentDischarge => &[
                PhaseCommand::LoadMode(RegulationMode::ConstantCurrent, self.discharge_current),
                PhaseCommand::LoadInput(true),
            ],
            Phase::ConstantVoltageDischarge => &[
                PhaseCommand::LoadMode(RegulationMode::ConstantVoltage, self.lower_voltage),
                PhaseCommand::LoadInput(true),
            ],
            Phase::WaitEnd => &[
                PhaseCommand::SourceOutput(false),
                PhaseCommand::LoadInput(false),
            ],
        };
        commands.iter().copied().collect()
    }
}

/// Commands issued after the last poll of `phase`, given the phase that follows.
///
/// A charge phase not followed by another charge phase switches the source
/// off. Discharge phases do the same with the load.
#[must_use]
pub fn exit_commands(phase: Phase, next: Option<Phase>) -> PhaseCommands {
    let mut commands = PhaseCommands::new();
    let command = if phase.is_charge() && !next.is_some_and(Phase::is_charge) {
        Some(PhaseCommand::SourceOutput(false))
    } else if phase.is_discharge() && !next.is_some_and(Phase::is_discharge) {
        Some(PhaseCommand::LoadInput(false))
    } else {
        None
    };
    if let Some(command) = command {
        // A single push cannot overflow.
        let _ = commands.push(command);
    }
    commands
}
