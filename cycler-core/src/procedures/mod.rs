//! Phase plans for the procedures the Cycler can run.
//!
//! A plan is a short prologue that runs once before the first cycle followed
//! by the body that repeats for every cycle. The full charge/discharge cycle
//! is the primary procedure; the others cover charge-only, discharge-only,
//! single-step constant-current runs, and CC-CV discharge variants that hold
//! the cell at the lower voltage after the CC discharge.

use core::fmt;

use heapless::Vec;

use crate::phases::{Phase, PhaseTargets};

/// Upper bound on phases visited in a single cycle, prologue included.
pub const MAX_CYCLE_PHASES: usize = 7;

/// Selectable cycling procedures.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Procedure {
    /// CC/CV charge followed by CC discharge.
    #[default]
    FullCycle,
    /// CC/CV charge only.
    Charge,
    /// CC discharge only.
    Discharge,
    /// A single constant-current charge step.
    ConstantCurrentCharge,
    /// A single constant-current discharge step.
    ConstantCurrentDischarge,
    /// CC/CV charge followed by CC/CV discharge.
    CcCvCycle,
    /// CC/CV discharge only.
    CcCvDischarge,
}

impl Procedure {
    pub const ALL: [Procedure; 7] = [
        Procedure::FullCycle,
        Procedure::Charge,
        Procedure::Discharge,
        Procedure::ConstantCurrentCharge,
        Procedure::ConstantCurrentDischarge,
        Procedure::CcCvCycle,
        Procedure::CcCvDischarge,
    ];

    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Procedure::FullCycle => "full-cycle",
            Procedure::Charge => "charge",
            Procedure::Discharge => "discharge",
            Procedure::ConstantCurrentCharge => "cc-charge",
            Procedure::ConstantCurrentDischarge => "cc-discharge",
            Procedure::CcCvCycle => "cccv-cycle",
            Procedure::CcCvDischarge => "cccv-discharge",
        }
    }

    /// Parses a procedure tag, ignoring ASCII case.
    pub fn from_tag(tag: &str) -> Result<Self, UnknownProcedure> {
        Self::ALL
            .into_iter()
            .find(|procedure| procedure.tag().eq_ignore_ascii_case(tag))
            .ok_or(UnknownProcedure)
    }

    #[must_use]
    pub const fn plan(self) -> &'static PhasePlan {
        match self {
            Procedure::FullCycle => &FULL_CYCLE_PLAN,
            Procedure::Charge => &CHARGE_PLAN,
            Procedure::Discharge => &DISCHARGE_PLAN,
            Procedure::ConstantCurrentCharge => &CC_CHARGE_PLAN,
            Procedure::ConstantCurrentDischarge => &CC_DISCHARGE_PLAN,
            Procedure::CcCvCycle => &CCCV_CYCLE_PLAN,
            Procedure::CcCvDischarge => &CCCV_DISCHARGE_PLAN,
        }
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Returned by [`Procedure::from_tag`] for unrecognized tags.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error(
    "unknown procedure (expected full-cycle, charge, discharge, cc-charge, cc-discharge, \
     cccv-cycle or cccv-discharge)"
)]
pub struct UnknownProcedure;

/// Ordered phases for one procedure.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PhasePlan {
    pub procedure: Procedure,
    prologue: &'static [Phase],
    body: &'static [Phase],
}

impl PhasePlan {
    #[must_use]
    pub const fn new(
        procedure: Procedure,
        prologue: &'static [Phase],
        body: &'static [Phase],
    ) -> Self {
        Self {
            procedure,
            prologue,
            body,
        }
    }

    #[must_use]
    pub const fn prologue(&self) -> &'static [Phase] {
        self.prologue
    }

    #[must_use]
    pub const fn body(&self) -> &'static [Phase] {
        self.body
    }

    /// Phases visited during `cycle` (1-indexed). The prologue only joins the
    /// first cycle, and a zero-length `wait_between` is dropped.
    #[must_use]
    pub fn phases_for(&self, cycle: u32, targets: &PhaseTargets) -> Vec<Phase, MAX_CYCLE_PHASES> {
        let prologue: &[Phase] = if cycle == 1 { self.prologue } else { &[] };
        prologue
            .iter()
            .chain(self.body)
            .copied()
            .filter(|phase| *phase != Phase::WaitBetween || !targets.wait_between.is_zero())
            .collect()
    }
}

pub const FULL_CYCLE_PLAN: PhasePlan = PhasePlan::new(
    Procedure::FullCycle,
    &[Phase::WaitInitial],
    &[
        Phase::ConstantCurrentCharge,
        Phase::ConstantVoltageCharge,
        Phase::WaitBetween,
        Phase::ConstantCurrentDischarge,
        Phase::WaitEnd,
    ],
);

pub const CHARGE_PLAN: PhasePlan = PhasePlan::new(
    Procedure::Charge,
    &[Phase::WaitInitial],
    &[
        Phase::ConstantCurrentCharge,
        Phase::ConstantVoltageCharge,
        Phase::WaitEnd,
    ],
);

pub const DISCHARGE_PLAN: PhasePlan = PhasePlan::new(
    Procedure::Discharge,
    &[Phase::WaitInitial],
    &[
        Phase::WaitBetween,
        Phase::ConstantCurrentDischarge,
        Phase::WaitEnd,
    ],
);

pub const CC_CHARGE_PLAN: PhasePlan = PhasePlan::new(
    Procedure::ConstantCurrentCharge,
    &[],
    &[Phase::ConstantCurrentCharge],
);

pub const CC_DISCHARGE_PLAN: PhasePlan = PhasePlan::new(
    Procedure::ConstantCurrentDischarge,
    &[],
    &[Phase::ConstantCurrentDischarge],
);

pub const CCCV_CYCLE_PLAN: PhasePlan = PhasePlan::new(
    Procedure::CcCvCycle,
    &[Phase::WaitInitial],
    &[
        Phase::ConstantCurrentCharge,
        Phase::ConstantVoltageCharge,
        Phase::WaitBetween,
        Phase::ConstantCurrentDischarge,
        Phase::ConstantVoltageDischarge,
        Phase::WaitEnd,
    ],
);

pub const CCCV_DISCHARGE_PLAN: PhasePlan = PhasePlan::new(
    Procedure::CcCvDischarge,
    &[Phase::WaitInitial],
    &[
        Phase::WaitBetween,
        Phase::ConstantCurrentDischarge,
        Phase::ConstantVoltageDischarge,
        Phase::WaitEnd,
    ],
);
