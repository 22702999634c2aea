//! Fuzz target: `synthesize`
//!
//! Arbitrary template text, address and input byte; synthesis must never
//! panic, and a template that validates must expand for every input.
//!
//! cargo fuzz run fuzz_template

#![no_main]

use ispbridge::programmer::command::{synthesize, validate_template};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 5 {
        return;
    }
    let address = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let input = data[4];
    let Ok(template) = core::str::from_utf8(&data[5..]) else {
        return;
    };

    let result = synthesize(template, address, input);
    if validate_template(template).is_ok() {
        assert!(result.is_ok(), "validated template failed to expand");
    }
});
