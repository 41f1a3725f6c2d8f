//! Coulomb counting across the phases of a cycle.
//!
//! Two running totals are kept: `charge_ah` grows during the charge phases
//! and `discharge_ah` during constant-current discharge. Whichever total the
//! active phase does not own is held at its last value.
//!
//! The first sample of a phase is anchored at phase entry: its delta covers
//! the time from entry to that sample.

use core::time::Duration;

use crate::phases::Phase;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Which running total a phase feeds.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CapacityKind {
    Charge,
    Discharge,
}

/// How totals behave when a new cycle starts.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CapacityCarry {
    /// Each cycle's constant-current phases restart their total at zero.
    #[default]
    ResetEachCycle,
    /// Totals only start at zero for the first cycle and keep growing after.
    Continue,
}

/// Ampere-hours moved at `amps` between two phase-relative instants.
///
/// Returns zero when time did not advance or the current is not positive.
#[must_use]
pub fn ampere_hours(previous: Duration, current: Duration, amps: f64) -> f64 {
    let seconds = current.saturating_sub(previous).as_secs_f64();
    let delta = amps * seconds / SECONDS_PER_HOUR;
    if delta > 0.0 { delta } else { 0.0 }
}

/// Charge and discharge totals owned by one Cycler invocation.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct CapacityAccumulator {
    charge_ah: f64,
    discharge_ah: f64,
}

impl CapacityAccumulator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            charge_ah: 0.0,
            discharge_ah: 0.0,
        }
    }

    #[must_use]
    pub const fn charge_ah(&self) -> f64 {
        self.charge_ah
    }

    #[must_use]
    pub const fn discharge_ah(&self) -> f64 {
        self.discharge_ah
    }

    /// Applies the reset rules for entering `phase` during `cycle` (1-indexed).
    ///
    /// Only constant-current phases reset, and only their own total.
    pub fn begin_phase(&mut self, phase: Phase, cycle: u32, carry: CapacityCarry) {
        let restart = match carry {
            CapacityCarry::ResetEachCycle => true,
            CapacityCarry::Continue => cycle <= 1,
        };
        if !restart {
            return;
        }
        match phase {
            Phase::ConstantCurrentCharge => self.charge_ah = 0.0,
            Phase::ConstantCurrentDischarge => self.discharge_ah = 0.0,
            _ => {}
        }
    }

    /// Adds the delta between `previous` and `current` to the total `phase`
    /// owns and returns it. Wait phases contribute nothing.
    pub fn accumulate(
        &mut self,
        phase: Phase,
        previous: Duration,
        current: Duration,
        amps: f64,
    ) -> f64 {
        let Some(kind) = phase.capacity_kind() else {
            return 0.0;
        };
        let delta = ampere_hours(previous, current, amps);
        match kind {
            CapacityKind::Charge => self.charge_ah += delta,
            CapacityKind::Discharge => self.discharge_ah += delta,
        }
        delta
    }
}
