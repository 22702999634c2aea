//! Millisecond delay providers for the ISP sequences.
//!
//! On ESP-IDF the firmware hands `esp_idf_hal::delay::FreeRtos` to the
//! programmer. Host builds use [`StdDelay`], and simulations that do not
//! care about wall-clock timing use [`NoDelay`].

use core::time::Duration;

use embedded_hal::delay::DelayNs;

/// Blocks the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(u64::from(ns)));
    }

    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

/// Returns immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}
