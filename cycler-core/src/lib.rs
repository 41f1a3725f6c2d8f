#![no_std]

extern crate alloc;

// Charge/discharge cycling engine for a single battery cell.
//
// The crate drives one charging source and one load sink through capability
// traits and never touches the standard library, so the same state machine
// runs under the host emulator, integration tests, or an embedded executor.

pub mod capacity;
pub mod cycler;
pub mod instruments;
pub mod phases;
pub mod procedures;
pub mod run;
pub mod scpi;
