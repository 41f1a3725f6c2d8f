//! Scoped ownership of the two instruments for the length of one run.

use tracing::warn;

use crate::cycler::error::{CycleError, WriteOperation};
use crate::instruments::{ChargeSourceDriver, InstrumentError, InstrumentRole, LoadSinkDriver};
use crate::phases::{Phase, PhaseCommand};

/// Opened instruments. Dropping the session switches both outputs off and
/// closes them, so every exit path of a run leaves the bench safe.
///
/// Output states are tracked from the commands that succeeded. An output is
/// only skipped on release when it is known to be off already; after a
/// failed switch its state is unknown and it is disabled again.
pub(crate) struct InstrumentSession<'a, S, L>
where
    S: ChargeSourceDriver,
    L: LoadSinkDriver,
{
    pub(crate) source: &'a mut S,
    pub(crate) load: &'a mut L,
    source_open: bool,
    load_open: bool,
    source_output: Option<bool>,
    load_input: Option<bool>,
}

impl<'a, S, L> InstrumentSession<'a, S, L>
where
    S: ChargeSourceDriver,
    L: LoadSinkDriver,
{
    pub(crate) fn new(source: &'a mut S, load: &'a mut L) -> Self {
        Self {
            source,
            load,
            source_open: false,
            load_open: false,
            source_output: None,
            load_input: None,
        }
    }

    /// Opens the source, then the load.
    pub(crate) fn open(&mut self, cycle: u32, phase: Phase) -> Result<(), CycleError> {
        let open_failed = |instrument, source| CycleError::InstrumentWrite {
            cycle,
            phase,
            instrument,
            operation: WriteOperation::Open,
            source,
        };
        self.source
            .open()
            .map_err(|err| open_failed(InstrumentRole::Source, err))?;
        self.source_open = true;
        self.load
            .open()
            .map_err(|err| open_failed(InstrumentRole::Load, err))?;
        self.load_open = true;
        Ok(())
    }

    pub(crate) fn apply(&mut self, command: PhaseCommand) -> Result<(), InstrumentError> {
        match command {
            PhaseCommand::SourceMode(mode, level) => self.source.set_mode(mode, level),
            PhaseCommand::SourceOutput(enabled) => {
                let result = self.source.set_output(enabled);
                self.source_output = result.is_ok().then_some(enabled);
                result
            }
            PhaseCommand::LoadMode(mode, level) => self.load.set_mode(mode, level),
            PhaseCommand::LoadInput(enabled) => {
                let result = self.load.set_input(enabled);
                self.load_input = result.is_ok().then_some(enabled);
                result
            }
        }
    }

    /// Disables and closes whatever was opened. Safe to call repeatedly.
    pub(crate) fn release(&mut self) {
        if self.source_open {
            if self.source_output != Some(false)
                && let Err(err) = self.source.set_output(false)
            {
                warn!(error = %err, "failed to disable source output during release");
            }
            self.source_output = None;
            self.source.close();
            self.source_open = false;
        }
        if self.load_open {
            if self.load_input != Some(false)
                && let Err(err) = self.load.set_input(false)
            {
                warn!(error = %err, "failed to disable load input during release");
            }
            self.load_input = None;
            self.load.close();
            self.load_open = false;
        }
    }
}

impl<S, L> Drop for InstrumentSession<'_, S, L>
where
    S: ChargeSourceDriver,
    L: LoadSinkDriver,
{
    fn drop(&mut self) {
        self.release();
    }
}
