//! SCPI implementation of the instrument capability traits.
//!
//! One [`ScpiInstrument`] type serves both the supply and the load; the
//! vendor differences live entirely in its [`Dialect`] table. The byte
//! transport is abstracted by [`ScpiTransport`] so the same driver runs over
//! VISA, a serial port, or the emulator's simulated bench.

use core::fmt::Write;

use heapless::String;

use crate::instruments::{ChargeSourceDriver, InstrumentError, LoadSinkDriver, RegulationMode};

pub mod dialect;
pub mod reply;

pub use dialect::{ALL_DIALECTS, Dialect, RIGOL_DL3000, SIGLENT_SPD, StatusWord, dialect_by_family};

/// Longest command line the driver composes.
pub const MAX_COMMAND_LEN: usize = 64;
/// Longest reply line a transport may hand back.
pub const MAX_RESPONSE_LEN: usize = 64;

pub type Command = String<MAX_COMMAND_LEN>;
pub type Response = String<MAX_RESPONSE_LEN>;

/// Line-oriented command/response link to one instrument.
pub trait ScpiTransport {
    fn open(&mut self) -> Result<(), InstrumentError> {
        Ok(())
    }

    /// Sends one command line that produces no reply.
    fn write_line(&mut self, command: &str) -> Result<(), InstrumentError>;

    /// Sends a query and stores the reply line in `response`.
    fn query(&mut self, command: &str, response: &mut Response) -> Result<(), InstrumentError>;

    fn close(&mut self) {}
}

/// Parameterized SCPI driver.
#[derive(Debug)]
pub struct ScpiInstrument<T> {
    transport: T,
    dialect: &'static Dialect,
    open: bool,
}

impl<T: ScpiTransport> ScpiInstrument<T> {
    #[must_use]
    pub const fn new(transport: T, dialect: &'static Dialect) -> Self {
        Self {
            transport,
            dialect,
            open: false,
        }
    }

    #[must_use]
    pub const fn dialect(&self) -> &'static Dialect {
        self.dialect
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.open
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[must_use]
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    #[must_use]
    pub fn into_transport(self) -> T {
        self.transport
    }

    fn connect(&mut self) -> Result<(), InstrumentError> {
        if !self.open {
            self.transport.open()?;
            self.open = true;
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.open {
            self.transport.close();
            self.open = false;
        }
    }

    fn send(&mut self, command: &str) -> Result<(), InstrumentError> {
        self.transport.write_line(command)?;
        let Some(error_queue) = self.dialect.error_queue else {
            return Ok(());
        };
        let mut response = Response::new();
        self.transport.query(error_queue, &mut response)?;
        match reply::parse_error_code(&response)? {
            0 => Ok(()),
            _ => Err(InstrumentError::Rejected),
        }
    }

    fn send_level(&mut self, template: &str, level: f64) -> Result<(), InstrumentError> {
        let mut command = Command::new();
        write!(command, "{template} {level}").map_err(|_| InstrumentError::Malformed)?;
        self.send(&command)
    }

    fn query_reading(&mut self, query: &str) -> Result<f64, InstrumentError> {
        let mut response = Response::new();
        self.transport.query(query, &mut response)?;
        reply::parse_reading(&response)
    }

    fn program(&mut self, mode: RegulationMode, level: f64) -> Result<(), InstrumentError> {
        let (function, template) = match mode {
            RegulationMode::ConstantCurrent => {
                (self.dialect.current_function, self.dialect.current_level)
            }
            RegulationMode::ConstantVoltage => {
                (self.dialect.voltage_function, self.dialect.voltage_level)
            }
        };
        if let Some(function) = function {
            self.send(function)?;
        }
        self.send_level(template, level)
    }

    fn switch(&mut self, enabled: bool) -> Result<(), InstrumentError> {
        let command = if enabled {
            self.dialect.enable
        } else {
            self.dialect.disable
        };
        self.send(command)
    }

    fn operating_mode(&mut self) -> Result<RegulationMode, InstrumentError> {
        let status = self.dialect.status.ok_or(InstrumentError::Unsupported)?;
        let mut response = Response::new();
        self.transport.query(status.query, &mut response)?;
        let word = reply::parse_status_word(&response)?;
        if word & status.constant_current_mask == 0 {
            Ok(RegulationMode::ConstantVoltage)
        } else {
            Ok(RegulationMode::ConstantCurrent)
        }
    }
}

impl<T: ScpiTransport> ChargeSourceDriver for ScpiInstrument<T> {
    fn open(&mut self) -> Result<(), InstrumentError> {
        self.connect()
    }

    fn set_mode(&mut self, mode: RegulationMode, level: f64) -> Result<(), InstrumentError> {
        self.program(mode, level)
    }

    fn set_output(&mut self, enabled: bool) -> Result<(), InstrumentError> {
        self.switch(enabled)
    }

    fn measure_voltage(&mut self) -> Result<f64, InstrumentError> {
        self.query_reading(self.dialect.measure_voltage)
    }

    fn measure_current(&mut self) -> Result<f64, InstrumentError> {
        self.query_reading(self.dialect.measure_current)
    }

    fn measure_power(&mut self) -> Result<f64, InstrumentError> {
        let query = self.dialect.measure_power.ok_or(InstrumentError::Unsupported)?;
        self.query_reading(query)
    }

    fn read_operating_mode(&mut self) -> Result<RegulationMode, InstrumentError> {
        self.operating_mode()
    }

    fn close(&mut self) {
        self.disconnect();
    }
}

impl<T: ScpiTransport> LoadSinkDriver for ScpiInstrument<T> {
    fn open(&mut self) -> Result<(), InstrumentError> {
        self.connect()
    }

    fn set_mode(&mut self, mode: RegulationMode, level: f64) -> Result<(), InstrumentError> {
        self.program(mode, level)
    }

    fn set_input(&mut self, enabled: bool) -> Result<(), InstrumentError> {
        self.switch(enabled)
    }

    fn measure_voltage(&mut self) -> Result<f64, InstrumentError> {
        self.query_reading(self.dialect.measure_voltage)
    }

    fn measure_current(&mut self) -> Result<f64, InstrumentError> {
        self.query_reading(self.dialect.measure_current)
    }

    fn close(&mut self) {
        self.disconnect();
    }
}
