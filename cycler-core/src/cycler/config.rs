//! Run configuration and its validation.

use core::time::Duration;

use thiserror::Error;

use crate::capacity::CapacityCarry;
use crate::phases::PhaseTargets;

/// Headroom above `upper_voltage` for the default charge voltage limit.
pub const CHARGE_VOLTAGE_MARGIN: f64 = 0.05;

/// Readings outside these bounds abort the run as implausible.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MeasurementLimits {
    pub max_voltage: f64,
    pub max_current: f64,
}

impl MeasurementLimits {
    pub const DEFAULT: Self = Self {
        max_voltage: 60.0,
        max_current: 30.0,
    };

    #[must_use]
    pub fn voltage_is_plausible(&self, volts: f64) -> bool {
        volts.is_finite() && (0.0..=self.max_voltage).contains(&volts)
    }

    #[must_use]
    pub fn current_is_plausible(&self, amps: f64) -> bool {
        amps.is_finite() && (0.0..=self.max_current).contains(&amps)
    }

    #[must_use]
    pub fn power_is_plausible(&self, watts: f64) -> bool {
        watts.is_finite() && (0.0..=self.max_voltage * self.max_current).contains(&watts)
    }
}

impl Default for MeasurementLimits {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Parameters of a cycling run. Durations are in seconds, levels in volts and amps.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CycleConfig {
    /// Rest before the first cycle.
    pub wait_initial_s: f64,
    /// Rest between charge and discharge. Zero skips the phase.
    pub wait_between_s: f64,
    /// Rest closing each cycle; falls back to `wait_between_s`.
    pub wait_end_s: Option<f64>,
    pub upper_voltage: f64,
    /// Source voltage setpoint during CC charge; `upper_voltage` plus
    /// [`CHARGE_VOLTAGE_MARGIN`] when unset.
    pub charge_voltage_limit: Option<f64>,
    pub charge_current: f64,
    pub cutoff_current: f64,
    pub lower_voltage: f64,
    pub discharge_current: f64,
    pub sample_period_s: f64,
    pub cycle_count: u32,
    pub capacity_carry: CapacityCarry,
    /// Also poll source power and regulation mode during charge phases.
    pub record_source_status: bool,
    pub limits: MeasurementLimits,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            wait_initial_s: 5.0,
            wait_between_s: 5.0,
            wait_end_s: None,
            upper_voltage: 3.65,
            charge_voltage_limit: None,
            charge_current: 1.5,
            cutoff_current: 0.075,
            lower_voltage: 2.0,
            discharge_current: 2.0,
            sample_period_s: 10.0,
            cycle_count: 1,
            capacity_carry: CapacityCarry::ResetEachCycle,
            record_source_status: true,
            limits: MeasurementLimits::DEFAULT,
        }
    }
}

/// Validated, typed form of a [`CycleConfig`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CycleSchedule {
    pub targets: PhaseTargets,
    pub sample_period: Duration,
    pub cycle_count: u32,
    pub capacity_carry: CapacityCarry,
    pub record_source_status: bool,
    pub limits: MeasurementLimits,
}

/// Rejected configuration. Raised before any instrument I/O.
#[derive(Copy, Clone, Debug, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be a finite number")]
    NotFinite { field: &'static str },
    #[error("{field} must be greater than zero (got {value})")]
    NotPositive { field: &'static str, value: f64 },
    #[error("{field} must not be negative (got {value})")]
    Negative { field: &'static str, value: f64 },
    #[error("{field} is too large to schedule (got {value})")]
    OutOfRange { field: &'static str, value: f64 },
    #[error("lower voltage {lower} V must be below upper voltage {upper} V")]
    VoltageWindow { lower: f64, upper: f64 },
    #[error("charge voltage limit {limit} V must not be below upper voltage {upper} V")]
    ChargeLimitBelowUpper { limit: f64, upper: f64 },
    #[error("cutoff current {cutoff} A must be below charge current {charge} A")]
    CutoffAboveCharge { cutoff: f64, charge: f64 },
    #[error("{field} {value} exceeds the measurement limit {limit}")]
    ExceedsLimit {
        field: &'static str,
        value: f64,
        limit: f64,
    },
    #[error("cycle count must be at least one")]
    NoCycles,
}

impl CycleConfig {
    /// Duration of the closing rest, in seconds.
    #[must_use]
    pub fn wait_end_s(&self) -> f64 {
        self.wait_end_s.unwrap_or(self.wait_between_s)
    }

    /// Source voltage setpoint programmed on entry to CC charge.
    #[must_use]
    pub fn charge_voltage_limit(&self) -> f64 {
        self.charge_voltage_limit
            .unwrap_or(self.upper_voltage + CHARGE_VOLTAGE_MARGIN)
    }

    /// Checks every field and converts the configuration into a schedule.
    pub fn validate(&self) -> Result<CycleSchedule, ConfigError> {
        let upper_voltage = positive("upper_voltage", self.upper_voltage)?;
        let lower_voltage = positive("lower_voltage", self.lower_voltage)?;
        let charge_current = positive("charge_current", self.charge_current)?;
        let cutoff_current = positive("cutoff_current", self.cutoff_current)?;
        let discharge_current = positive("discharge_current", self.discharge_current)?;
        let max_voltage = positive("limits.max_voltage", self.limits.max_voltage)?;
        let max_current = positive("limits.max_current", self.limits.max_current)?;

        if lower_voltage >= upper_voltage {
            return Err(ConfigError::VoltageWindow {
                lower: lower_voltage,
                upper: upper_voltage,
            });
        }
        let charge_voltage_limit = positive("charge_voltage_limit", self.charge_voltage_limit())?;
        if charge_voltage_limit < upper_voltage {
            return Err(ConfigError::ChargeLimitBelowUpper {
                limit: charge_voltage_limit,
                upper: upper_voltage,
            });
        }
        if cutoff_current >= charge_current {
            return Err(ConfigError::CutoffAboveCharge {
                cutoff: cutoff_current,
                charge: charge_current,
            });
        }
        within_limit("upper_voltage", upper_voltage, max_voltage)?;
        within_limit("charge_voltage_limit", charge_voltage_limit, max_voltage)?;
        within_limit("charge_current", charge_current, max_current)?;
        within_limit("discharge_current", discharge_current, max_current)?;
        if self.cycle_count == 0 {
            return Err(ConfigError::NoCycles);
        }

        let sample_period = positive("sample_period_s", self.sample_period_s)
            .and_then(|seconds| seconds_to_duration("sample_period_s", seconds))?;

        Ok(CycleSchedule {
            targets: PhaseTargets {
                wait_initial: wait("wait_initial_s", self.wait_initial_s)?,
                wait_between: wait("wait_between_s", self.wait_between_s)?,
                wait_end: wait("wait_end_s", self.wait_end_s())?,
                upper_voltage,
                charge_voltage_limit,
                charge_current,
                cutoff_current,
                lower_voltage,
                discharge_current,
            },
            sample_period,
            cycle_count: self.cycle_count,
            capacity_carry: self.capacity_carry,
            record_source_status: self.record_source_status,
            limits: self.limits,
        })
    }
}

fn positive(field: &'static str, value: f64) -> Result<f64, ConfigError> {
    if !value.is_finite() {
        Err(ConfigError::NotFinite { field })
    } else if value <= 0.0 {
        Err(ConfigError::NotPositive { field, value })
    } else {
        Ok(value)
    }
}

fn within_limit(field: &'static str, value: f64, limit: f64) -> Result<(), ConfigError> {
    if value > limit {
        Err(ConfigError::ExceedsLimit {
            field,
            value,
            limit,
        })
    } else {
        Ok(())
    }
}

fn wait(field: &'static str, seconds: f64) -> Result<Duration, ConfigError> {
    if !seconds.is_finite() {
        return Err(ConfigError::NotFinite { field });
    }
    if seconds < 0.0 {
        return Err(ConfigError::Negative {
            field,
            value: seconds,
        });
    }
    seconds_to_duration(field, seconds)
}

fn seconds_to_duration(field: &'static str, seconds: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(seconds).map_err(|_| ConfigError::OutOfRange {
        field,
        value: seconds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bench_defaults_validate() {
        let schedule = CycleConfig::default()
            .validate()
            .expect("defaults are consistent");

        assert_eq!(schedule.sample_period, Duration::from_secs(10));
        assert_eq!(schedule.targets.wait_end, Duration::from_secs(5));
        assert_eq!(schedule.targets.upper_voltage, 3.65);
        assert_eq!(schedule.cycle_count, 1);
    }

    #[test]
    fn inverted_voltage_window_is_rejected() {
        let config = CycleConfig {
            lower_voltage: 3.7,
            ..CycleConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::VoltageWindow {
                lower: 3.7,
                upper: 3.65
            })
        );
    }

    #[test]
    fn charge_voltage_limit_defaults_above_upper_voltage() {
        let schedule = CycleConfig::default().validate().expect("valid");
        assert!((schedule.targets.charge_voltage_limit - 3.70).abs() < 1e-9);

        let exact = CycleConfig {
            charge_voltage_limit: Some(3.65),
            ..CycleConfig::default()
        };
        assert_eq!(
            exact.validate().map(|s| s.targets.charge_voltage_limit),
            Ok(3.65)
        );

        let below = CycleConfig {
            charge_voltage_limit: Some(3.6),
            ..CycleConfig::default()
        };
        assert_eq!(
            below.validate(),
            Err(ConfigError::ChargeLimitBelowUpper {
                limit: 3.6,
                upper: 3.65
            })
        );
    }

    #[test]
    fn cutoff_must_sit_below_charge_current() {
        let config = CycleConfig {
            cutoff_current: 1.5,
            ..CycleConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::CutoffAboveCharge {
                cutoff: 1.5,
                charge: 1.5
            })
        );
    }

    #[test]
    fn non_finite_and_negative_values_are_rejected() {
        let nan_period = CycleConfig {
            sample_period_s: f64::NAN,
            ..CycleConfig::default()
        };
        assert_eq!(
            nan_period.validate(),
            Err(ConfigError::NotFinite {
                field: "sample_period_s"
            })
        );

        let negative_wait = CycleConfig {
            wait_initial_s: -1.0,
            ..CycleConfig::default()
        };
        assert_eq!(
            negative_wait.validate(),
            Err(ConfigError::Negative {
                field: "wait_initial_s",
                value: -1.0
            })
        );

        let zero_current = CycleConfig {
            discharge_current: 0.0,
            ..CycleConfig::default()
        };
        assert_eq!(
            zero_current.validate(),
            Err(ConfigError::NotPositive {
                field: "discharge_current",
                value: 0.0
            })
        );
    }

    #[test]
    fn zero_cycles_and_limits_are_enforced() {
        let no_cycles = CycleConfig {
            cycle_count: 0,
            ..CycleConfig::default()
        };
        assert_eq!(no_cycles.validate(), Err(ConfigError::NoCycles));

        let over_limit = CycleConfig {
            discharge_current: 40.0,
            ..CycleConfig::default()
        };
        assert_eq!(
            over_limit.validate(),
            Err(ConfigError::ExceedsLimit {
                field: "discharge_current",
                value: 40.0,
                limit: 30.0
            })
        );
    }

    #[test]
    fn explicit_wait_end_overrides_between() {
        let config = CycleConfig {
            wait_between_s: 0.0,
            wait_end_s: Some(30.0),
            ..CycleConfig::default()
        };
        let schedule = config.validate().expect("valid");
        assert!(schedule.targets.wait_between.is_zero());
        assert_eq!(schedule.targets.wait_end, Duration::from_secs(30));
    }

    #[test]
    fn plausibility_bounds_reject_negative_and_nan() {
        let limits = MeasurementLimits::DEFAULT;
        assert!(limits.voltage_is_plausible(3.3));
        assert!(!limits.voltage_is_plausible(-0.1));
        assert!(!limits.voltage_is_plausible(f64::NAN));
        assert!(!limits.current_is_plausible(31.0));
        assert!(limits.current_is_plausible(0.0));
    }
}
