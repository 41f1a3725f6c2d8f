//! Samples, per-phase records and the assembly of a multi-phase [`Run`].
//!
//! Each phase measures time from its own entry instant. [`RunRecorder`]
//! shifts those phase-local times by the phase's measured offset from the
//! start of its cycle, so every sample in a Run carries the real time since
//! the cycle began. Offsets are clamped to the end of the previous phase, so
//! timestamps never decrease within a cycle.

use alloc::vec::Vec;
use core::time::Duration;

use crate::capacity::CapacityKind;
use crate::instruments::RegulationMode;
use crate::phases::{Phase, PhaseExit};

/// One measurement point of a Run.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sample {
    /// Owning cycle, 1-indexed.
    pub cycle: u32,
    pub phase: Phase,
    /// Seconds since the cycle started.
    pub elapsed_s: f64,
    /// Seconds since the phase started.
    pub phase_elapsed_s: f64,
    pub voltage: f64,
    pub current: f64,
    pub charge_ah: f64,
    pub discharge_ah: f64,
    /// Source output power, when charge-phase status recording is enabled.
    pub power_w: Option<f64>,
    /// Source regulation mode, when charge-phase status recording is enabled.
    pub source_mode: Option<RegulationMode>,
}

/// Phase-local measurement handed to [`RunRecorder::record`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PhaseSample {
    pub phase_elapsed: Duration,
    pub voltage: f64,
    pub current: f64,
    pub charge_ah: f64,
    pub discharge_ah: f64,
    /// Capacity moved since the previous sample of this phase.
    pub capacity_delta_ah: f64,
    pub power_w: Option<f64>,
    pub source_mode: Option<RegulationMode>,
}

/// Bookkeeping for one visited phase.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhaseRecord {
    pub cycle: u32,
    pub phase: Phase,
    /// Cycle-relative start of the phase, in seconds.
    pub offset_s: f64,
    /// Measured phase length in seconds; for an unfinished phase, the time of its last sample.
    pub duration_s: f64,
    /// Index of the phase's first sample in [`Run::samples`].
    pub first_sample: usize,
    pub sample_count: usize,
    /// Capacity the phase moved into its own total.
    pub capacity_ah: f64,
    /// `None` when the run stopped while the phase was active.
    pub exit: Option<PhaseExit>,
}

impl PhaseRecord {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.exit.is_some()
    }
}

/// Capacity moved during one cycle.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CycleSummary {
    pub cycle: u32,
    pub charge_ah: f64,
    pub discharge_ah: f64,
    pub duration_s: f64,
}

impl CycleSummary {
    /// Discharge over charge capacity, if anything was charged.
    #[must_use]
    pub fn coulombic_efficiency(&self) -> Option<f64> {
        (self.charge_ah > 0.0).then(|| self.discharge_ah / self.charge_ah)
    }
}

/// Ordered samples of one Cycler invocation, possibly partial.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Run {
    samples: Vec<Sample>,
    phases: Vec<PhaseRecord>,
}

impl Run {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            samples: Vec::new(),
            phases: Vec::new(),
        }
    }

    #[must_use]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    #[must_use]
    pub fn phases(&self) -> &[PhaseRecord] {
        &self.phases
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    /// Highest cycle number that produced a sample.
    #[must_use]
    pub fn cycles(&self) -> u32 {
        self.samples.last().map_or(0, |sample| sample.cycle)
    }

    /// Samples recorded during one phase visit.
    #[must_use]
    pub fn phase_samples(&self, record: &PhaseRecord) -> &[Sample] {
        let end = (record.first_sample + record.sample_count).min(self.samples.len());
        let start = record.first_sample.min(end);
        &self.samples[start..end]
    }

    /// Charge and discharge capacity per cycle, in cycle order.
    #[must_use]
    pub fn cycle_summaries(&self) -> Vec<CycleSummary> {
        let mut summaries: Vec<CycleSummary> = Vec::new();
        for record in &self.phases {
            if summaries
                .last()
                .is_none_or(|summary| summary.cycle != record.cycle)
            {
                summaries.push(CycleSummary {
                    cycle: record.cycle,
                    charge_ah: 0.0,
                    discharge_ah: 0.0,
                    duration_s: 0.0,
                });
            }
            let Some(summary) = summaries.last_mut() else {
                continue;
            };
            match record.phase.capacity_kind() {
                Some(CapacityKind::Charge) => summary.charge_ah += record.capacity_ah,
                Some(CapacityKind::Discharge) => summary.discharge_ah += record.capacity_ah,
                None => {}
            }
            summary.duration_s = record.offset_s + record.duration_s;
        }
        summaries
    }

    #[must_use]
    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }
}

/// Builds a [`Run`] from phase-local samples.
#[derive(Debug, Default)]
pub struct RunRecorder {
    run: Run,
    cycle: u32,
    /// End of the last closed phase of the current cycle.
    cycle_floor: Duration,
    active: Option<ActivePhase>,
}

#[derive(Copy, Clone, Debug)]
struct ActivePhase {
    record: usize,
    offset: Duration,
    last_elapsed: Duration,
}

impl RunRecorder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            run: Run::new(),
            cycle: 0,
            cycle_floor: Duration::ZERO,
            active: None,
        }
    }

    #[must_use]
    pub const fn cycle(&self) -> u32 {
        self.cycle
    }

    /// Starts cycle `cycle`; timestamps restart at zero.
    pub fn begin_cycle(&mut self, cycle: u32) {
        self.close_active(None, None);
        self.cycle = cycle;
        self.cycle_floor = Duration::ZERO;
    }

    /// Opens a record for `phase` entered `offset` after the cycle started.
    ///
    /// An offset before the end of the previous phase is moved up to it.
    pub fn begin_phase(&mut self, phase: Phase, offset: Duration) {
        self.close_active(None, None);
        let offset = offset.max(self.cycle_floor);
        self.run.phases.push(PhaseRecord {
            cycle: self.cycle,
            phase,
            offset_s: offset.as_secs_f64(),
            duration_s: 0.0,
            first_sample: self.run.samples.len(),
            sample_count: 0,
            capacity_ah: 0.0,
            exit: None,
        });
        self.active = Some(ActivePhase {
            record: self.run.phases.len() - 1,
            offset,
            last_elapsed: Duration::ZERO,
        });
    }

    /// Appends a sample to the active phase and returns its stitched form.
    ///
    /// Samples recorded outside a phase are dropped.
    pub fn record(&mut self, sample: PhaseSample) -> Option<&Sample> {
        let active = self.active.as_mut()?;
        let record = self.run.phases.get_mut(active.record)?;
        let phase_elapsed = sample.phase_elapsed.max(active.last_elapsed);
        active.last_elapsed = phase_elapsed;
        record.sample_count += 1;
        record.capacity_ah += sample.capacity_delta_ah;
        self.run.samples.push(Sample {
            cycle: record.cycle,
            phase: record.phase,
            elapsed_s: (active.offset + phase_elapsed).as_secs_f64(),
            phase_elapsed_s: phase_elapsed.as_secs_f64(),
            voltage: sample.voltage,
            current: sample.current,
            charge_ah: sample.charge_ah,
            discharge_ah: sample.discharge_ah,
            power_w: sample.power_w,
            source_mode: sample.source_mode,
        });
        self.run.samples.last()
    }

    /// Closes the active phase after `duration`.
    ///
    /// The duration is never allowed to end before the phase's last sample.
    pub fn end_phase(&mut self, duration: Duration, exit: PhaseExit) {
        self.close_active(Some(duration), Some(exit));
    }

    /// Returns the assembled Run. An unfinished phase keeps `exit == None`.
    #[must_use]
    pub fn finish(mut self) -> Run {
        self.close_active(None, None);
        self.run
    }

    #[must_use]
    pub fn run(&self) -> &Run {
        &self.run
    }

    fn close_active(&mut self, duration: Option<Duration>, exit: Option<PhaseExit>) {
        let Some(active) = self.active.take() else {
            return;
        };
        let length = duration.map_or(active.last_elapsed, |d| d.max(active.last_elapsed));
        if let Some(record) = self.run.phases.get_mut(active.record) {
            record.duration_s = length.as_secs_f64();
            record.exit = exit;
        }
        self.cycle_floor = active.offset + length;
    }
}
