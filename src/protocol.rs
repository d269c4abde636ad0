//! Device line protocol.
//!
//! The thermocouple front-end speaks newline-terminated ASCII. After power-up
//! it prints a single readiness sentinel (`READY`), then one line per reading
//! cycle carrying `2 * sensor_count` comma-separated decimal values:
//!
//! ```text
//! READY
//! 23.50,21.25,24.00,21.50,nan,nan,...
//! ```
//!
//! Value `2i` is the hot junction of sensor `i`, value `2i + 1` its cold
//! junction. `nan` marks a faulted or disconnected probe and is preserved as
//! `f64::NAN`.
//!
//! Parsing is pure. A line either yields a full record or a [`Rejection`];
//! there is never a partial record.

use std::fmt;

/// Field separator on the wire.
pub const SEPARATOR: char = ',';

/// Readiness sentinel sent by the firmware once every sensor is initialised.
pub const DEFAULT_READY_SENTINEL: &str = "READY";

/// Why a line was not turned into a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Nothing left after trimming.
    Empty,
    /// No `,` in the line (banners, echoes, a repeated sentinel).
    MissingSeparator,
    /// The field at this zero-based index is not a float.
    InvalidToken { index: usize },
    /// Wrong number of fields for the configured sensor count.
    Arity { expected: usize, found: usize },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Empty => write!(f, "empty line"),
            Rejection::MissingSeparator => write!(f, "no field separator"),
            Rejection::InvalidToken { index } => write!(f, "field {index} is not a number"),
            Rejection::Arity { expected, found } => {
                write!(f, "expected {expected} fields, found {found}")
            }
        }
    }
}

/// Number of values in one record for `sensor_count` sensors.
pub fn record_arity(sensor_count: usize) -> usize {
    sensor_count * 2
}

/// Parse one line into `2 * sensor_count` values.
///
/// # Example
///
/// ```
/// use thermo_daq::protocol::parse_line;
///
/// let values = parse_line("10.0,20.0,nan,40.0", 2).unwrap();
/// assert_eq!(values[0], 10.0);
/// assert!(values[2].is_nan());
/// assert!(parse_line("10.0,20.0", 2).is_err());
/// ```
pub fn parse_line(line: &str, sensor_count: usize) -> Result<Vec<f64>, Rejection> {
    let mut values = Vec::with_capacity(record_arity(sensor_count));
    parse_line_into(line, sensor_count, &mut values)?;
    Ok(values)
}

/// Parse one line into a caller-owned buffer.
///
/// The buffer is cleared first. On rejection it is left empty so a caller
/// reusing it across lines can never pick up a half-parsed record.
pub fn parse_line_into(
    line: &str,
    sensor_count: usize,
    values: &mut Vec<f64>,
) -> Result<(), Rejection> {
    values.clear();

    let line = line.trim();
    if line.is_empty() {
        return Err(Rejection::Empty);
    }
    if !line.contains(SEPARATOR) {
        return Err(Rejection::MissingSeparator);
    }

    let expected = record_arity(sensor_count);
    let found = line.split(SEPARATOR).count();
    if found != expected {
        return Err(Rejection::Arity { expected, found });
    }

    for (index, token) in line.split(SEPARATOR).enumerate() {
        match parse_value(token) {
            Some(value) => values.push(value),
            None => {
                values.clear();
                return Err(Rejection::InvalidToken { index });
            }
        }
    }

    Ok(())
}

/// Parse a single field. `nan` in any case is the fault sentinel.
fn parse_value(token: &str) -> Option<f64> {
    let token = token.trim();
    if token.eq_ignore_ascii_case("nan") {
        return Some(f64::NAN);
    }
    token.parse::<f64>().ok()
}

/// Whether `line` is the readiness sentinel.
pub fn is_ready_line(line: &str, sentinel: &str) -> bool {
    line.trim() == sentinel
}
