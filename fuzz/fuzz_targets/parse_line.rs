//! Fuzz target for the device line parser.
//!
//! Tests:
//! - Arbitrary bytes never panic the parser
//! - Accepted lines always carry exactly 2 * sensor_count values
//! - A rejected line leaves no partial values behind

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use thermo_daq::protocol::{parse_line_into, record_arity};

#[derive(Debug, Arbitrary)]
struct ParseInput {
    sensor_count: u8,
    line: String,
}

fuzz_target!(|input: ParseInput| {
    let sensors = usize::from(input.sensor_count % 33);
    let mut values = vec![1.0; 4];

    match parse_line_into(&input.line, sensors, &mut values) {
        Ok(()) => assert_eq!(values.len(), record_arity(sensors)),
        Err(_) => assert!(values.is_empty(), "rejected line left values behind"),
    }
});
