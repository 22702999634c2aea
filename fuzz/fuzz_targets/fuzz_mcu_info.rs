//! Fuzz target: `AvrMcuInfo::parse`
//!
//! Arbitrary Load-MCU-Info payloads must never panic. Accepted payloads
//! must re-encode to something that parses to the same description.
//!
//! cargo fuzz run fuzz_mcu_info

#![no_main]

use ispbridge::programmer::AvrMcuInfo;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(info) = AvrMcuInfo::parse(data) {
        let again = AvrMcuInfo::parse(&info.encode()).expect("re-encoded info must parse");
        assert_eq!(again, info);
        let _ = info.flash_read_lo.expand(u32::MAX, 0xFF);
    }
});
