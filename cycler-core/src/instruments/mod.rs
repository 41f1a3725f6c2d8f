//! Capability interfaces for the two instruments a cycle drives.
//!
//! The Cycler only ever talks to a [`ChargeSourceDriver`] (programmable
//! supply) and a [`LoadSinkDriver`] (electronic load). Transport, retries and
//! vendor command sets live behind these traits; see [`crate::scpi`] for the
//! bundled SCPI implementation.

use core::fmt;

use thiserror::Error;

/// Regulation mode an instrument holds while its output or input is enabled.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RegulationMode {
    ConstantCurrent,
    ConstantVoltage,
}

impl RegulationMode {
    /// Short bench label (`CC` / `CV`).
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            RegulationMode::ConstantCurrent => "CC",
            RegulationMode::ConstantVoltage => "CV",
        }
    }
}

impl fmt::Display for RegulationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which of the two instruments an operation addressed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InstrumentRole {
    Source,
    Load,
}

impl fmt::Display for InstrumentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentRole::Source => f.write_str("source"),
            InstrumentRole::Load => f.write_str("load"),
        }
    }
}

/// Failure reported by a driver call.
///
/// Drivers own any retry policy; once one of these reaches the Cycler the run
/// is aborted.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum InstrumentError {
    /// The bus or session to the instrument is gone.
    #[error("instrument disconnected")]
    Disconnected,
    /// No reply arrived within the driver's deadline.
    #[error("instrument timed out")]
    Timeout,
    /// The instrument refused or flagged the command.
    #[error("command rejected by instrument")]
    Rejected,
    /// The reply could not be interpreted.
    #[error("malformed instrument reply")]
    Malformed,
    /// The driver has no way to perform the request.
    #[error("operation not supported by instrument")]
    Unsupported,
}

/// Programmable supply used for the charge phases.
pub trait ChargeSourceDriver {
    /// Acquires the instrument session. Called once per run before any other call.
    fn open(&mut self) -> Result<(), InstrumentError> {
        Ok(())
    }

    /// Programs the regulation setpoint for `mode` (amps for CC, volts for CV).
    fn set_mode(&mut self, mode: RegulationMode, level: f64) -> Result<(), InstrumentError>;

    fn set_output(&mut self, enabled: bool) -> Result<(), InstrumentError>;

    fn measure_voltage(&mut self) -> Result<f64, InstrumentError>;

    fn measure_current(&mut self) -> Result<f64, InstrumentError>;

    fn measure_power(&mut self) -> Result<f64, InstrumentError>;

    /// Reports whether the supply is currently regulating current or voltage.
    fn read_operating_mode(&mut self) -> Result<RegulationMode, InstrumentError>;

    /// Releases the session. Must tolerate repeated calls.
    fn close(&mut self) {}
}

/// Electronic load used for the discharge phase and for resting voltage reads.
pub trait LoadSinkDriver {
    /// Acquires the instrument session. Called once per run before any other call.
    fn open(&mut self) -> Result<(), InstrumentError> {
        Ok(())
    }

    /// Programs the sink setpoint for `mode` (amps for CC, volts for CV).
    fn set_mode(&mut self, mode: RegulationMode, level: f64) -> Result<(), InstrumentError>;

    fn set_input(&mut self, enabled: bool) -> Result<(), InstrumentError>;

    fn measure_voltage(&mut self) -> Result<f64, InstrumentError>;

    fn measure_current(&mut self) -> Result<f64, InstrumentError>;

    /// Releases the session. Must tolerate repeated calls.
    fn close(&mut self) {}
}

impl<T: ChargeSourceDriver + ?Sized> ChargeSourceDriver for &mut T {
    fn open(&mut self) -> Result<(), InstrumentError> {
        (**self).open()
    }

    fn set_mode(&mut self, mode: RegulationMode, level: f64) -> Result<(), InstrumentError> {
        (**self).set_mode(mode, level)
    }

    fn set_output(&mut self, enabled: bool) -> Result<(), InstrumentError> {
        (**self).set_output(enabled)
    }

    fn measure_voltage(&mut self) -> Result<f64, InstrumentError> {
        (**self).measure_voltage()
    }

    fn measure_current(&mut self) -> Result<f64, InstrumentError> {
        (**self).measure_current()
    }

    fn measure_power(&mut self) -> Result<f64, InstrumentError> {
        (**self).measure_power()
    }

    fn read_operating_mode(&mut self) -> Result<RegulationMode, InstrumentError> {
        (**self).read_operating_mode()
    }

    fn close(&mut self) {
        (**self).close();
    }
}

impl<T: LoadSinkDriver + ?Sized> LoadSinkDriver for &mut T {
    fn open(&mut self) -> Result<(), InstrumentError> {
        (**self).open()
    }

    fn set_mode(&mut self, mode: RegulationMode, level: f64) -> Result<(), InstrumentError> {
        (**self).set_mode(mode, level)
    }

    fn set_input(&mut self, enabled: bool) -> Result<(), InstrumentError> {
        (**self).set_input(enabled)
    }

    fn measure_voltage(&mut self) -> Result<f64, InstrumentError> {
        (**self).measure_voltage()
    }

    fn measure_current(&mut self) -> Result<f64, InstrumentError> {
        (**self).measure_current()
    }

    fn close(&mut self) {
        (**self).close();
    }
}
