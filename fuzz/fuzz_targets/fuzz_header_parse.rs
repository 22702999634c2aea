//! Fuzz target: `parse_header`
//!
//! Any 5 bytes must either decode to a header that re-serializes to the
//! same type, size and known flag bits, or be rejected without panicking.
//!
//! cargo fuzz run fuzz_header_parse

#![no_main]

use ispbridge::protocol::{HEADER_SIZE, MAX_DATA_LENGTH, parse_header, serialize_header};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some(raw) = data.get(..HEADER_SIZE) else {
        return;
    };
    let raw: [u8; HEADER_SIZE] = raw.try_into().unwrap();

    if let Ok(header) = parse_header(&raw) {
        assert!(header.data_size() <= MAX_DATA_LENGTH);
        let out = serialize_header(&header);
        assert_eq!(out[0], raw[0]);
        assert_eq!(out[1], raw[1] & 0x07, "only known flag bits survive");
        assert_eq!(out[2..], raw[2..]);
    }
});
