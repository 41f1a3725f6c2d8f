//! Command tables for the instrument families the bench has been run with.

/// Status register query and the bit that flags constant-current regulation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StatusWord {
    pub query: &'static str,
    pub constant_current_mask: u32,
}

/// Command templates for one instrument family.
///
/// Level commands are sent as `<template> <value>`. Optional entries that are
/// `None` make the matching driver call fail with
/// [`InstrumentError::Unsupported`](crate::instruments::InstrumentError::Unsupported).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Dialect {
    pub family: &'static str,
    /// Sent before a current setpoint to switch the regulation function.
    pub current_function: Option<&'static str>,
    pub current_level: &'static str,
    /// Sent before a voltage setpoint to switch the regulation function.
    pub voltage_function: Option<&'static str>,
    pub voltage_level: &'static str,
    pub enable: &'static str,
    pub disable: &'static str,
    pub measure_voltage: &'static str,
    pub measure_current: &'static str,
    pub measure_power: Option<&'static str>,
    pub status: Option<StatusWord>,
    /// Queried after every write; a non-zero code means the write was refused.
    pub error_queue: Option<&'static str>,
}

/// Siglent SPD-series programmable supply, channel 1.
pub const SIGLENT_SPD: Dialect = Dialect {
    family: "siglent-spd",
    current_function: None,
    current_level: "CURRent",
    voltage_function: None,
    voltage_level: "VOLTage",
    enable: "OUTPut CH1,ON",
    disable: "OUTPut CH1,OFF",
    measure_voltage: "MEASure:VOLTage?",
    measure_current: "MEASure:CURRent?",
    measure_power: Some("MEASure:POWEr?"),
    status: Some(StatusWord {
        query: "SYSTem:STATus?",
        constant_current_mask: 0x0001,
    }),
    error_queue: Some("SYSTem:ERRor?"),
};

/// Rigol DL3000-series electronic load.
pub const RIGOL_DL3000: Dialect = Dialect {
    family: "rigol-dl3000",
    current_function: Some(":SOURce:FUNCtion CURRent"),
    current_level: ":SOURce:CURRent:LEVel:IMMediate",
    voltage_function: Some(":SOURce:FUNCtion VOLTage"),
    voltage_level: ":SOURce:VOLTage:LEVel:IMMediate",
    enable: ":SOURce:INPut:STATe 1",
    disable: ":SOURce:INPut:STATe 0",
    measure_voltage: ":MEASure:VOLTage?",
    measure_current: ":MEASure:CURRent?",
    measure_power: None,
    status: None,
    error_queue: Some(":SYSTem:ERRor?"),
};

/// Every bundled dialect, for lookups by family name.
pub const ALL_DIALECTS: [&Dialect; 2] = [&SIGLENT_SPD, &RIGOL_DL3000];

/// Finds a bundled dialect by its family name (case-insensitive).
#[must_use]
pub fn dialect_by_family(family: &str) -> Option<&'static Dialect> {
    ALL_DIALECTS
        .into_iter()
        .find(|dialect| dialect.family.eq_ignore_ascii_case(family))
}
