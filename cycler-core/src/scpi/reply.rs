//! `winnow` parsers for the replies bench instruments send back.
//!
//! Replies are short ASCII lines: a numeric reading (`3.6512`,
//! `+1.500000E+00`), a hexadecimal status word (`0x0011`, `11`), or an
//! error-queue entry (`-113,"Undefined header"`). Every parser consumes the
//! whole reply; leftovers are reported as [`InstrumentError::Malformed`].

use winnow::ModalResult;
use winnow::ascii::{dec_int, float, hex_uint, multispace0};
use winnow::combinator::{alt, delimited, opt, preceded, terminated};
use winnow::prelude::*;
use winnow::token::rest;

use crate::instruments::InstrumentError;

/// Parser result; the position of a bad reply is never useful to the Cycler.
type Scan<T> = ModalResult<T>;

fn reading(input: &mut &str) -> Scan<f64> {
    delimited(multispace0, float, multispace0).parse_next(input)
}

fn status_word(input: &mut &str) -> Scan<u32> {
    delimited(
        multispace0,
        preceded(opt(alt(("0x", "0X"))), hex_uint),
        multispace0,
    )
    .parse_next(input)
}

fn error_code(input: &mut &str) -> Scan<i32> {
    preceded(multispace0, terminated(dec_int, opt((',', rest)))).parse_next(input)
}

fn complete<T>(reply: &str, parser: fn(&mut &str) -> Scan<T>) -> Result<T, InstrumentError> {
    let mut input = reply;
    match parser(&mut input) {
        Ok(value) if input.is_empty() => Ok(value),
        Ok(_) | Err(_) => Err(InstrumentError::Malformed),
    }
}

/// Parses a numeric measurement reply into a float.
///
/// Non-finite spellings such as `nan` parse successfully; range checks belong
/// to the caller.
pub fn parse_reading(reply: &str) -> Result<f64, InstrumentError> {
    complete(reply, reading)
}

/// Parses a hexadecimal status register reply.
pub fn parse_status_word(reply: &str) -> Result<u32, InstrumentError> {
    complete(reply, status_word)
}

/// Parses the leading code of an error-queue reply. Zero means "no error".
pub fn parse_error_code(reply: &str) -> Result<i32, InstrumentError> {
    complete(reply, error_code)
}
