//! Equivalent-circuit model of the cell on the bench.
//!
//! An open-circuit voltage curve over state of charge in series with a fixed
//! internal resistance. The curve is shaped after a lithium iron phosphate
//! cell: steep knees at both ends and a long flat plateau in between.

use std::time::Duration;

/// State of charge to open-circuit voltage, sorted by state of charge.
const OCV_CURVE: [(f64, f64); 9] = [
    (0.00, 2.00),
    (0.03, 2.80),
    (0.08, 3.10),
    (0.20, 3.22),
    (0.50, 3.28),
    (0.85, 3.32),
    (0.97, 3.40),
    (1.00, 3.55),
    (1.05, 3.80),
];

/// Physical parameters of a simulated cell.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CellParameters {
    pub capacity_ah: f64,
    pub resistance_ohm: f64,
    pub initial_soc: f64,
}

impl Default for CellParameters {
    fn default() -> Self {
        Self {
            capacity_ah: 1.5,
            resistance_ohm: 0.05,
            initial_soc: 0.5,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SimulatedCell {
    parameters: CellParameters,
    soc: f64,
}

impl SimulatedCell {
    pub fn new(parameters: CellParameters) -> Self {
        Self {
            parameters,
            soc: clamp_soc(parameters.initial_soc),
        }
    }

    pub fn soc(&self) -> f64 {
        self.soc
    }

    pub fn resistance_ohm(&self) -> f64 {
        self.parameters.resistance_ohm
    }

    pub fn open_circuit_voltage(&self) -> f64 {
        interpolate(self.soc)
    }

    /// Terminal voltage while `amps` flow into the cell (negative: out of it).
    pub fn terminal_voltage(&self, amps: f64) -> f64 {
        (self.open_circuit_voltage() + amps * self.parameters.resistance_ohm).max(0.0)
    }

    /// Integrates a constant net current over `interval`.
    pub fn pass_charge(&mut self, amps: f64, interval: Duration) {
        let hours = interval.as_secs_f64() / 3600.0;
        self.soc = clamp_soc(self.soc + amps * hours / self.parameters.capacity_ah);
    }
}

fn clamp_soc(soc: f64) -> f64 {
    soc.clamp(-0.02, 1.08)
}

fn interpolate(soc: f64) -> f64 {
    let (first, last) = (OCV_CURVE[0], OCV_CURVE[OCV_CURVE.len() - 1]);
    if soc <= first.0 {
        let slope = (OCV_CURVE[1].1 - first.1) / (OCV_CURVE[1].0 - first.0);
        return (first.1 + (soc - first.0) * slope).max(0.0);
    }
    for pair in OCV_CURVE.windows(2) {
        let ((x0, y0), (x1, y1)) = (pair[0], pair[1]);
        if soc <= x1 {
            return y0 + (soc - x0) * (y1 - y0) / (x1 - x0);
        }
    }
    let before = OCV_CURVE[OCV_CURVE.len() - 2];
    last.1 + (soc - last.0) * (last.1 - before.1) / (last.0 - before.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(initial_soc: f64) -> SimulatedCell {
        SimulatedCell::new(CellParameters {
            initial_soc,
            ..CellParameters::default()
        })
    }

    #[test]
    fn curve_points_are_reproduced() {
        for (soc, volts) in OCV_CURVE {
            assert!((interpolate(soc) - volts).abs() < 1e-9, "soc {soc}");
        }
    }

    #[test]
    fn voltage_rises_with_state_of_charge() {
        let mut previous = interpolate(-0.02);
        for step in 1..=110 {
            let volts = interpolate(-0.02 + f64::from(step) * 0.01);
            assert!(volts >= previous);
            previous = volts;
        }
    }

    #[test]
    fn one_amp_hour_moves_two_thirds_of_capacity() {
        let mut cell = cell(0.1);
        cell.pass_charge(1.0, Duration::from_secs(3600));
        assert!((cell.soc() - (0.1 + 1.0 / 1.5)).abs() < 1e-9);
    }

    #[test]
    fn terminal_voltage_includes_resistive_drop() {
        let cell = cell(0.5);
        assert!((cell.terminal_voltage(2.0) - 3.38).abs() < 1e-9);
        assert!((cell.terminal_voltage(-2.0) - 3.18).abs() < 1e-9);
    }

    #[test]
    fn state_of_charge_is_bounded() {
        let mut cell = cell(0.0);
        cell.pass_charge(-10.0, Duration::from_secs(3600));
        assert!((cell.soc() + 0.02).abs() < 1e-12);
        assert!(cell.open_circuit_voltage() >= 0.0);
    }
}
