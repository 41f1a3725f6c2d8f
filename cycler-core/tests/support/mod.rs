#![allow(dead_code)]

use core::future::{Future, poll_fn};
use core::ops::Add;
use core::task::Poll;
use core::time::Duration;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use cycler_core::cycler::{CadenceClock, CadenceInstant, CycleConfig, Wake};
use cycler_core::instruments::{
    ChargeSourceDriver, InstrumentError, LoadSinkDriver, RegulationMode,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MockInstant(pub Duration);

impl Add<Duration> for MockInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        MockInstant(self.0 + rhs)
    }
}

impl CadenceInstant for MockInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

pub type SharedTime = Rc<Cell<Duration>>;

/// Clock that jumps straight to each deadline.
pub struct ManualClock {
    pub time: SharedTime,
    /// Requested sleep lengths, after clamping at zero.
    pub slept: Vec<Duration>,
    stop_on_sleep: Option<usize>,
    hang_on_sleep: Option<usize>,
}

impl ManualClock {
    pub fn new(time: SharedTime) -> Self {
        Self {
            time,
            slept: Vec::new(),
            stop_on_sleep: None,
            hang_on_sleep: None,
        }
    }

    /// Reports a stop on the `n`th sleep (1-indexed).
    pub fn stopping_on_sleep(mut self, n: usize) -> Self {
        self.stop_on_sleep = Some(n);
        self
    }

    /// Never wakes from the `n`th sleep (1-indexed).
    pub fn hanging_on_sleep(mut self, n: usize) -> Self {
        self.hang_on_sleep = Some(n);
        self
    }
}

impl CadenceClock for ManualClock {
    type Instant = MockInstant;

    fn now(&self) -> MockInstant {
        MockInstant(self.time.get())
    }

    fn sleep_until(&mut self, deadline: MockInstant) -> impl Future<Output = Wake> {
        let now = self.time.get();
        self.slept.push(deadline.0.saturating_sub(now));
        let hang = self.hang_on_sleep == Some(self.slept.len());
        let wake = if self.stop_on_sleep == Some(self.slept.len()) {
            Wake::Stopped
        } else {
            self.time.set(now.max(deadline.0));
            Wake::Elapsed
        };
        poll_fn(move |_| if hang { Poll::Pending } else { Poll::Ready(wake) })
    }
}

/// Instrument-side happenings, in the order they occurred.
#[derive(Clone, Debug, PartialEq)]
pub enum BenchEvent {
    SourceOpen,
    SourceMode(RegulationMode, f64),
    SourceOutput(bool),
    SourceClose,
    LoadOpen,
    LoadMode(RegulationMode, f64),
    LoadInput(bool),
    LoadClose,
}

/// Deterministic cell: voltage ramps while the source charges in CC,
/// current halves every read while an instrument regulates voltage, voltage
/// sags while the load draws a constant current.
#[derive(Debug)]
pub struct ToyCell {
    pub voltage: f64,
    pub charge_step_v: f64,
    pub discharge_step_v: f64,
    /// Source voltage setpoint; the source regulates CV once the cell reaches it.
    pub source_voltage_setpoint: f64,
    pub source_current_setpoint: f64,
    /// How far below its setpoint the source reads while it regulates voltage.
    pub regulation_error_v: f64,
    pub taper_current: f64,
    pub output: bool,
    pub load_mode: Option<(RegulationMode, f64)>,
    pub load_taper_current: f64,
    pub input: bool,
    pub voltage_reads: usize,
    /// Shared time at every successful voltage read.
    pub read_times: Vec<Duration>,
    pub fail_voltage_read: Option<usize>,
    pub reject_source_output: bool,
    pub override_voltage: Option<f64>,
    pub events: Vec<BenchEvent>,
}

impl ToyCell {
    pub fn new(voltage: f64) -> Self {
        Self {
            voltage,
            charge_step_v: 0.01,
            discharge_step_v: 0.05,
            source_voltage_setpoint: 0.0,
            source_current_setpoint: 0.0,
            regulation_error_v: 0.0,
            taper_current: 0.0,
            output: false,
            load_mode: None,
            load_taper_current: 0.0,
            input: false,
            voltage_reads: 0,
            read_times: Vec::new(),
            fail_voltage_read: None,
            reject_source_output: false,
            override_voltage: None,
            events: Vec::new(),
        }
    }

    fn source_regulates_voltage(&self) -> bool {
        self.output && self.voltage >= self.source_voltage_setpoint
    }

    fn read_voltage(&mut self, now: Duration) -> Result<f64, InstrumentError> {
        self.voltage_reads += 1;
        if self.fail_voltage_read == Some(self.voltage_reads) {
            return Err(InstrumentError::Disconnected);
        }
        self.read_times.push(now);
        if let Some(voltage) = self.override_voltage {
            return Ok(voltage);
        }
        Ok(self.voltage)
    }
}

pub type SharedCell = Rc<RefCell<ToyCell>>;

pub struct MockSource {
    pub cell: SharedCell,
    pub time: SharedTime,
    pub latency: Duration,
    pub write_latency: Duration,
}

pub struct MockLoad {
    pub cell: SharedCell,
    pub time: SharedTime,
    pub latency: Duration,
    pub write_latency: Duration,
}

fn spend(time: &SharedTime, latency: Duration) {
    time.set(time.get() + latency);
}

impl ChargeSourceDriver for MockSource {
    fn open(&mut self) -> Result<(), InstrumentError> {
        self.cell.borrow_mut().events.push(BenchEvent::SourceOpen);
        Ok(())
    }

    fn set_mode(&mut self, mode: RegulationMode, level: f64) -> Result<(), InstrumentError> {
        spend(&self.time, self.write_latency);
        let mut cell = self.cell.borrow_mut();
        cell.events.push(BenchEvent::SourceMode(mode, level));
        match mode {
            RegulationMode::ConstantCurrent => cell.source_current_setpoint = level,
            RegulationMode::ConstantVoltage => {
                cell.source_voltage_setpoint = level;
                if cell.output {
                    cell.voltage = cell.voltage.min(level);
                }
            }
        }
        Ok(())
    }

    fn set_output(&mut self, enabled: bool) -> Result<(), InstrumentError> {
        spend(&self.time, self.write_latency);
        let mut cell = self.cell.borrow_mut();
        cell.events.push(BenchEvent::SourceOutput(enabled));
        if cell.reject_source_output && enabled {
            return Err(InstrumentError::Rejected);
        }
        cell.output = enabled;
        Ok(())
    }

    fn measure_voltage(&mut self) -> Result<f64, InstrumentError> {
        spend(&self.time, self.latency);
        let mut cell = self.cell.borrow_mut();
        let voltage = cell.read_voltage(self.time.get())?;
        if cell.source_regulates_voltage() {
            return Ok(cell
                .override_voltage
                .unwrap_or(cell.source_voltage_setpoint - cell.regulation_error_v));
        }
        if cell.output {
            cell.voltage = (cell.voltage + cell.charge_step_v).min(cell.source_voltage_setpoint);
        }
        Ok(voltage)
    }

    fn measure_current(&mut self) -> Result<f64, InstrumentError> {
        spend(&self.time, self.latency);
        let mut cell = self.cell.borrow_mut();
        if !cell.output {
            return Ok(0.0);
        }
        if cell.source_regulates_voltage() {
            cell.taper_current /= 2.0;
        } else {
            cell.taper_current = cell.source_current_setpoint;
        }
        Ok(cell.taper_current)
    }

    fn measure_power(&mut self) -> Result<f64, InstrumentError> {
        let cell = self.cell.borrow();
        let amps = if cell.output { cell.taper_current } else { 0.0 };
        Ok(cell.voltage * amps)
    }

    fn read_operating_mode(&mut self) -> Result<RegulationMode, InstrumentError> {
        if self.cell.borrow().source_regulates_voltage() {
            Ok(RegulationMode::ConstantVoltage)
        } else {
            Ok(RegulationMode::ConstantCurrent)
        }
    }

    fn close(&mut self) {
        self.cell.borrow_mut().events.push(BenchEvent::SourceClose);
    }
}

impl LoadSinkDriver for MockLoad {
    fn open(&mut self) -> Result<(), InstrumentError> {
        self.cell.borrow_mut().events.push(BenchEvent::LoadOpen);
        Ok(())
    }

    fn set_mode(&mut self, mode: RegulationMode, level: f64) -> Result<(), InstrumentError> {
        spend(&self.time, self.write_latency);
        let mut cell = self.cell.borrow_mut();
        cell.events.push(BenchEvent::LoadMode(mode, level));
        cell.load_mode = Some((mode, level));
        Ok(())
    }

    fn set_input(&mut self, enabled: bool) -> Result<(), InstrumentError> {
        spend(&self.time, self.write_latency);
        let mut cell = self.cell.borrow_mut();
        cell.events.push(BenchEvent::LoadInput(enabled));
        cell.input = enabled;
        Ok(())
    }

    fn measure_voltage(&mut self) -> Result<f64, InstrumentError> {
        spend(&self.time, self.latency);
        let mut cell = self.cell.borrow_mut();
        match (cell.input, cell.load_mode) {
            (true, Some((RegulationMode::ConstantVoltage, level))) => cell.voltage = level,
            (true, Some((RegulationMode::ConstantCurrent, _))) => {
                let voltage = cell.read_voltage(self.time.get())?;
                cell.voltage -= cell.discharge_step_v;
                return Ok(voltage);
            }
            _ => {}
        }
        cell.read_voltage(self.time.get())
    }

    fn measure_current(&mut self) -> Result<f64, InstrumentError> {
        spend(&self.time, self.latency);
        let mut cell = self.cell.borrow_mut();
        match (cell.input, cell.load_mode) {
            (true, Some((RegulationMode::ConstantCurrent, amps))) => {
                cell.load_taper_current = amps;
                Ok(amps)
            }
            (true, Some((RegulationMode::ConstantVoltage, _))) => {
                cell.load_taper_current /= 2.0;
                Ok(cell.load_taper_current)
            }
            _ => Ok(0.0),
        }
    }

    fn close(&mut self) {
        self.cell.borrow_mut().events.push(BenchEvent::LoadClose);
    }
}

/// A source, load and clock sharing one toy cell and one timeline.
pub struct Bench {
    pub cell: SharedCell,
    pub time: SharedTime,
}

impl Bench {
    pub fn new(initial_voltage: f64) -> Self {
        Self {
            cell: Rc::new(RefCell::new(ToyCell::new(initial_voltage))),
            time: Rc::new(Cell::new(Duration::ZERO)),
        }
    }

    /// Drivers whose reads cost `latency` and whose writes are free.
    pub fn drivers(&self, latency: Duration) -> (MockSource, MockLoad) {
        self.slow_drivers(latency, Duration::ZERO)
    }

    /// Drivers whose reads cost `latency` and every setting costs `write_latency`.
    pub fn slow_drivers(&self, latency: Duration, write_latency: Duration) -> (MockSource, MockLoad) {
        (
            MockSource {
                cell: Rc::clone(&self.cell),
                time: Rc::clone(&self.time),
                latency,
                write_latency,
            },
            MockLoad {
                cell: Rc::clone(&self.cell),
                time: Rc::clone(&self.time),
                latency,
                write_latency,
            },
        )
    }

    pub fn clock(&self) -> ManualClock {
        ManualClock::new(Rc::clone(&self.time))
    }

    pub fn events(&self) -> Vec<BenchEvent> {
        self.cell.borrow().events.clone()
    }

    pub fn read_times(&self) -> Vec<Duration> {
        self.cell.borrow().read_times.clone()
    }
}

/// Small, fast configuration against the toy cell.
pub fn quick_config() -> CycleConfig {
    CycleConfig {
        wait_initial_s: 2.0,
        wait_between_s: 2.0,
        wait_end_s: Some(3.0),
        upper_voltage: 3.65,
        charge_current: 1.5,
        cutoff_current: 0.075,
        lower_voltage: 3.0,
        discharge_current: 2.0,
        sample_period_s: 1.0,
        cycle_count: 1,
        ..CycleConfig::default()
    }
}
