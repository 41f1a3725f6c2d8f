//! Failure taxonomy of a run.

use core::fmt;

use thiserror::Error;

use crate::cycler::config::ConfigError;
use crate::instruments::{InstrumentError, InstrumentRole};
use crate::phases::{Phase, PhaseCommand};
use crate::run::Run;

/// Quantity a failed read was after.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Quantity {
    Voltage,
    Current,
    Power,
    OperatingMode,
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantity::Voltage => f.write_str("voltage"),
            Quantity::Current => f.write_str("current"),
            Quantity::Power => f.write_str("power"),
            Quantity::OperatingMode => f.write_str("operating mode"),
        }
    }
}

/// Why a read was unusable.
#[derive(Copy, Clone, Debug, PartialEq, Error)]
pub enum ReadFault {
    #[error(transparent)]
    Driver(#[from] InstrumentError),
    #[error("implausible value {0}")]
    Implausible(f64),
}

/// Write-side operation that failed.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum WriteOperation {
    Open,
    Command(PhaseCommand),
}

impl fmt::Display for WriteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOperation::Open => f.write_str("open"),
            WriteOperation::Command(command) => fmt::Display::fmt(command, f),
        }
    }
}

/// First fatal condition of a run, tagged with where it happened.
#[derive(Copy, Clone, Debug, PartialEq, Error)]
pub enum CycleError {
    #[error("cycle {cycle} {phase}: {instrument} {quantity} read failed: {fault}")]
    InstrumentRead {
        cycle: u32,
        phase: Phase,
        instrument: InstrumentRole,
        quantity: Quantity,
        fault: ReadFault,
    },
    #[error("cycle {cycle} {phase}: {instrument} `{operation}` failed: {source}")]
    InstrumentWrite {
        cycle: u32,
        phase: Phase,
        instrument: InstrumentRole,
        operation: WriteOperation,
        source: InstrumentError,
    },
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigError),
    #[error("stopped during cycle {cycle} {phase}")]
    Cancelled { cycle: u32, phase: Phase },
}

impl CycleError {
    /// Cancellation is a requested outcome, everything else is a failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        !matches!(self, CycleError::Cancelled { .. })
    }

    /// Phase the error was raised in; `None` for configuration errors.
    #[must_use]
    pub const fn phase(&self) -> Option<Phase> {
        match self {
            CycleError::InstrumentRead { phase, .. }
            | CycleError::InstrumentWrite { phase, .. }
            | CycleError::Cancelled { phase, .. } => Some(*phase),
            CycleError::Configuration(_) => None,
        }
    }

    /// Cycle the error was raised in; `None` for configuration errors.
    #[must_use]
    pub const fn cycle(&self) -> Option<u32> {
        match self {
            CycleError::InstrumentRead { cycle, .. }
            | CycleError::InstrumentWrite { cycle, .. }
            | CycleError::Cancelled { cycle, .. } => Some(*cycle),
            CycleError::Configuration(_) => None,
        }
    }
}

/// A run that ended early, with every sample collected before it stopped.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("{error} ({} samples kept)", .run.len())]
pub struct Interrupted {
    pub error: CycleError,
    pub run: Run,
}

impl Interrupted {
    #[must_use]
    pub const fn new(error: CycleError, run: Run) -> Self {
        Self { error, run }
    }

    #[must_use]
    pub const fn is_failure(&self) -> bool {
        self.error.is_failure()
    }

    #[must_use]
    pub fn into_run(self) -> Run {
        self.run
    }
}
