//! Fuzz target for ChannelStore append and trim.
//!
//! Tests:
//! - Arbitrary timestamps (including NaN and backwards jumps) never panic
//! - Length never exceeds capacity
//! - After a trim the retained span fits the window

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use thermo_daq::store::ChannelStore;

#[derive(Debug, Arbitrary)]
enum Op {
    Append { elapsed: f64, value: f64 },
    Trim { window: f64 },
}

#[derive(Debug, Arbitrary)]
struct StoreInput {
    capacity: u8,
    ops: Vec<Op>,
}

fuzz_target!(|input: StoreInput| {
    let capacity = usize::from(input.capacity).max(1);
    let mut store = ChannelStore::new(2, capacity);

    for op in input.ops.iter().take(512) {
        match *op {
            Op::Append { elapsed, value } => {
                let _ = store.append(elapsed, &[value; 4]);
            }
            Op::Trim { window } => {
                store.trim(window);
                if window.is_finite() && window >= 0.0 {
                    assert!(store.time_span() <= window, "span exceeds window after trim");
                }
            }
        }
        assert!(store.len() <= capacity, "store grew past capacity");
    }
});
