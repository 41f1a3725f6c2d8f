//! Simulated SCPI bench: a programmable supply and an electronic load wired
//! to one [`SimulatedCell`].
//!
//! Each [`BenchPort`] speaks the command set of its instrument family and
//! implements [`ScpiTransport`], so the production driver runs against it
//! unchanged. Every query costs one round-trip latency, and the cell is
//! integrated up to the current time before any command or query is served.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use cycler_core::instruments::{InstrumentError, RegulationMode};
use cycler_core::scpi::{Response, ScpiTransport, reply};
use tracing::{debug, trace, warn};

use crate::cell::SimulatedCell;

/// Longest step the cell model is integrated over in one go.
const INTEGRATION_STEP: Duration = Duration::from_secs(1);

const SUPPLY_MAX_VOLTAGE: f64 = 32.0;
const SUPPLY_MAX_CURRENT: f64 = 3.2;
const LOAD_MAX_VOLTAGE: f64 = 150.0;
const LOAD_MAX_CURRENT: f64 = 40.0;

/// Status word bits reported by the supply.
const STATUS_CONSTANT_CURRENT: u32 = 0x0001;
const STATUS_OUTPUT_ON: u32 = 0x0010;

/// Where the bench reads the time from.
pub trait TimeSource {
    /// Time since the bench was powered on.
    fn elapsed(&self) -> Duration;

    /// Accounts for one instrument round trip.
    fn spend(&self, latency: Duration);
}

/// Shared virtual time that only moves when somebody advances it.
#[derive(Clone, Debug, Default)]
pub struct VirtualTime(Rc<Cell<Duration>>);

impl VirtualTime {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves time forward to `at`; earlier instants are ignored.
    pub fn advance_to(&self, at: Duration) {
        if at > self.0.get() {
            self.0.set(at);
        }
    }
}

impl TimeSource for VirtualTime {
    fn elapsed(&self) -> Duration {
        self.0.get()
    }

    fn spend(&self, latency: Duration) {
        self.0.set(self.0.get() + latency);
    }
}

/// Host wall-clock time; round trips block the calling thread.
#[derive(Copy, Clone, Debug)]
pub struct WallTime {
    origin: Instant,
}

impl WallTime {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for WallTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallTime {
    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    fn spend(&self, latency: Duration) {
        thread::sleep(latency);
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Port {
    Supply,
    Load,
}

/// Entries of an instrument's error queue.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum ScpiFault {
    UndefinedHeader,
    DataOutOfRange,
    IllegalParameter,
}

impl ScpiFault {
    const fn code(self) -> i32 {
        match self {
            Self::UndefinedHeader => -113,
            Self::DataOutOfRange => -222,
            Self::IllegalParameter => -224,
        }
    }

    const fn message(self) -> &'static str {
        match self {
            Self::UndefinedHeader => "Undefined header",
            Self::DataOutOfRange => "Data out of range",
            Self::IllegalParameter => "Illegal parameter value",
        }
    }
}

/// Electrical state of the bench at one instant.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct OperatingPoint {
    pub terminal_voltage: f64,
    pub supply_current: f64,
    pub load_current: f64,
    pub supply_mode: RegulationMode,
}

/// What a caller can inspect about the bench between runs.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BenchSnapshot {
    pub soc: f64,
    pub supply_output: bool,
    pub load_input: bool,
    pub point: OperatingPoint,
}

#[derive(Debug)]
struct SupplyState {
    voltage_setpoint: f64,
    current_setpoint: f64,
    output: bool,
}

#[derive(Debug)]
struct LoadState {
    function: RegulationMode,
    current_level: f64,
    voltage_level: f64,
    input: bool,
}

#[derive(Debug)]
struct BenchState {
    cell: SimulatedCell,
    supply: SupplyState,
    load: LoadState,
    settled_at: Duration,
    queries: usize,
    timeout_on_query: Option<usize>,
    supply_errors: VecDeque<ScpiFault>,
    load_errors: VecDeque<ScpiFault>,
}

impl BenchState {
    fn operating_point(&self) -> OperatingPoint {
        let ocv = self.cell.open_circuit_voltage();
        let resistance = self.cell.resistance_ohm();

        let (supply_current, supply_mode) = if self.supply.output {
            let compliance = ocv + self.supply.current_setpoint * resistance;
            if compliance <= self.supply.voltage_setpoint {
                (self.supply.current_setpoint, RegulationMode::ConstantCurrent)
            } else {
                let amps = (self.supply.voltage_setpoint - ocv) / resistance;
                (
                    amps.clamp(0.0, self.supply.current_setpoint),
                    RegulationMode::ConstantVoltage,
                )
            }
        } else {
            (0.0, RegulationMode::ConstantVoltage)
        };

        let load_current = if self.load.input {
            match self.load.function {
                RegulationMode::ConstantCurrent => self.load.current_level,
                RegulationMode::ConstantVoltage => {
                    ((ocv - self.load.voltage_level) / resistance).max(0.0)
                }
            }
        } else {
            0.0
        };

        OperatingPoint {
            terminal_voltage: self.cell.terminal_voltage(supply_current - load_current),
            supply_current,
            load_current,
            supply_mode,
        }
    }

    /// Integrates the cell from the last settled instant up to `now`.
    fn settle(&mut self, now: Duration) {
        let mut remaining = now.saturating_sub(self.settled_at);
        while !remaining.is_zero() {
            let step = remaining.min(INTEGRATION_STEP);
            let point = self.operating_point();
            self.cell
                .pass_charge(point.supply_current - point.load_current, step);
            remaining -= step;
        }
        self.settled_at = self.settled_at.max(now);
    }

    fn errors_mut(&mut self, port: Port) -> &mut VecDeque<ScpiFault> {
        match port {
            Port::Supply => &mut self.supply_errors,
            Port::Load => &mut self.load_errors,
        }
    }

    fn execute(&mut self, port: Port, line: &str) {
        let line = line.trim();
        let (header, argument) = match line.split_once(' ') {
            Some((header, argument)) => (header, Some(argument.trim())),
            None => (line, None),
        };
        let outcome = match port {
            Port::Supply => self.supply_command(header, argument),
            Port::Load => self.load_command(header, argument),
        };
        if let Err(fault) = outcome {
            warn!(?port, command = line, code = fault.code(), "command refused");
            self.errors_mut(port).push_back(fault);
        }
    }

    fn supply_command(&mut self, header: &str, argument: Option<&str>) -> Result<(), ScpiFault> {
        if header.eq_ignore_ascii_case("CURRent") {
            self.supply.current_setpoint = level(argument, SUPPLY_MAX_CURRENT)?;
        } else if header.eq_ignore_ascii_case("VOLTage") {
            self.supply.voltage_setpoint = level(argument, SUPPLY_MAX_VOLTAGE)?;
        } else if header.eq_ignore_ascii_case("OUTPut") {
            self.supply.output = match argument {
                Some(state) if state.eq_ignore_ascii_case("CH1,ON") => true,
                Some(state) if state.eq_ignore_ascii_case("CH1,OFF") => false,
                _ => return Err(ScpiFault::IllegalParameter),
            };
        } else {
            return Err(ScpiFault::UndefinedHeader);
        }
        Ok(())
    }

    fn load_command(&mut self, header: &str, argument: Option<&str>) -> Result<(), ScpiFault> {
        if header.eq_ignore_ascii_case(":SOURce:FUNCtion") {
            self.load.function = match argument {
                Some(function) if function.eq_ignore_ascii_case("CURRent") => {
                    RegulationMode::ConstantCurrent
                }
                Some(function) if function.eq_ignore_ascii_case("VOLTage") => {
                    RegulationMode::ConstantVoltage
                }
                _ => return Err(ScpiFault::IllegalParameter),
            };
        } else if header.eq_ignore_ascii_case(":SOURce:CURRent:LEVel:IMMediate") {
            self.load.current_level = level(argument, LOAD_MAX_CURRENT)?;
        } else if header.eq_ignore_ascii_case(":SOURce:VOLTage:LEVel:IMMediate") {
            self.load.voltage_level = level(argument, LOAD_MAX_VOLTAGE)?;
        } else if header.eq_ignore_ascii_case(":SOURce:INPut:STATe") {
            self.load.input = match argument {
                Some("1" | "ON" | "on") => true,
                Some("0" | "OFF" | "off") => false,
                _ => return Err(ScpiFault::IllegalParameter),
            };
        } else {
            return Err(ScpiFault::UndefinedHeader);
        }
        Ok(())
    }

    fn answer(&mut self, port: Port, query: &str, reply: &mut String) -> Result<(), InstrumentError> {
        let query = query.trim();
        let point = self.operating_point();
        let formatted = match (port, query) {
            (Port::Supply, "MEASure:VOLTage?") | (Port::Load, ":MEASure:VOLTage?") => {
                write!(reply, "{:.4}", point.terminal_voltage)
            }
            (Port::Supply, "MEASure:CURRent?") => write!(reply, "{:.4}", point.supply_current),
            (Port::Load, ":MEASure:CURRent?") => write!(reply, "{:.4}", point.load_current),
            (Port::Supply, "MEASure:POWEr?") => write!(
                reply,
                "{:.4}",
                point.terminal_voltage * point.supply_current
            ),
            (Port::Supply, "SYSTem:STATus?") => {
                let mut word = 0;
                if self.supply.output {
                    word |= STATUS_OUTPUT_ON;
                }
                if point.supply_mode == RegulationMode::ConstantCurrent && self.supply.output {
                    word |= STATUS_CONSTANT_CURRENT;
                }
                write!(reply, "0x{word:04X}")
            }
            (Port::Supply, "SYSTem:ERRor?") | (Port::Load, ":SYSTem:ERRor?") => {
                match self.errors_mut(port).pop_front() {
                    Some(fault) => write!(reply, "{},\"{}\"", fault.code(), fault.message()),
                    None => write!(reply, "0,\"No error\""),
                }
            }
            _ => {
                // An instrument stays silent on a query it does not know.
                self.errors_mut(port).push_back(ScpiFault::UndefinedHeader);
                return Err(InstrumentError::Timeout);
            }
        };
        formatted.map_err(|_| InstrumentError::Malformed)
    }
}

fn level(argument: Option<&str>, max: f64) -> Result<f64, ScpiFault> {
    let value = argument
        .and_then(|argument| reply::parse_reading(argument).ok())
        .ok_or(ScpiFault::IllegalParameter)?;
    if (0.0..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ScpiFault::DataOutOfRange)
    }
}

/// A supply and a load sharing one simulated cell.
#[derive(Debug)]
pub struct SimulatedBench<T> {
    state: Rc<RefCell<BenchState>>,
    time: T,
    latency: Duration,
}

impl<T: TimeSource + Clone> SimulatedBench<T> {
    pub fn new(cell: SimulatedCell, time: T, latency: Duration) -> Self {
        let settled_at = time.elapsed();
        let state = BenchState {
            cell,
            supply: SupplyState {
                voltage_setpoint: 0.0,
                current_setpoint: 0.0,
                output: false,
            },
            load: LoadState {
                function: RegulationMode::ConstantCurrent,
                current_level: 0.0,
                voltage_level: 0.0,
                input: false,
            },
            settled_at,
            queries: 0,
            timeout_on_query: None,
            supply_errors: VecDeque::new(),
            load_errors: VecDeque::new(),
        };
        Self {
            state: Rc::new(RefCell::new(state)),
            time,
            latency,
        }
    }

    /// Makes the `n`th query across both ports (1-indexed) time out once.
    pub fn time_out_on_query(&self, n: usize) {
        self.state.borrow_mut().timeout_on_query = Some(n);
    }

    pub fn supply_port(&self) -> BenchPort<T> {
        self.port(Port::Supply)
    }

    pub fn load_port(&self) -> BenchPort<T> {
        self.port(Port::Load)
    }

    pub fn snapshot(&self) -> BenchSnapshot {
        let mut state = self.state.borrow_mut();
        state.settle(self.time.elapsed());
        BenchSnapshot {
            soc: state.cell.soc(),
            supply_output: state.supply.output,
            load_input: state.load.input,
            point: state.operating_point(),
        }
    }

    fn port(&self, port: Port) -> BenchPort<T> {
        BenchPort {
            state: Rc::clone(&self.state),
            time: self.time.clone(),
            latency: self.latency,
            port,
            open: false,
        }
    }
}

/// One instrument's end of the bench.
#[derive(Debug)]
pub struct BenchPort<T> {
    state: Rc<RefCell<BenchState>>,
    time: T,
    latency: Duration,
    port: Port,
    open: bool,
}

impl<T: TimeSource> BenchPort<T> {
    fn ensure_open(&self) -> Result<(), InstrumentError> {
        if self.open {
            Ok(())
        } else {
            Err(InstrumentError::Disconnected)
        }
    }
}

impl<T: TimeSource> ScpiTransport for BenchPort<T> {
    fn open(&mut self) -> Result<(), InstrumentError> {
        debug!(port = ?self.port, "port opened");
        self.open = true;
        Ok(())
    }

    fn write_line(&mut self, command: &str) -> Result<(), InstrumentError> {
        self.ensure_open()?;
        trace!(port = ?self.port, command, "write");
        let mut state = self.state.borrow_mut();
        state.settle(self.time.elapsed());
        state.execute(self.port, command);
        Ok(())
    }

    fn query(&mut self, command: &str, response: &mut Response) -> Result<(), InstrumentError> {
        self.ensure_open()?;
        self.time.spend(self.latency);

        let mut state = self.state.borrow_mut();
        state.queries += 1;
        if state.timeout_on_query == Some(state.queries) {
            warn!(port = ?self.port, command, "simulated query timeout");
            return Err(InstrumentError::Timeout);
        }
        state.settle(self.time.elapsed());

        let mut reply = String::new();
        state.answer(self.port, command, &mut reply)?;
        trace!(port = ?self.port, command, reply = reply.as_str(), "query");

        response.clear();
        response
            .push_str(&reply)
            .map_err(|_| InstrumentError::Malformed)
    }

    fn close(&mut self) {
        debug!(port = ?self.port, "port closed");
        self.open = false;
    }
}
