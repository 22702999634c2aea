//! ISP bridge firmware library.
//!
//! Everything except peripheral bring-up lives here so it can be exercised
//! by host tests. ESP-IDF-specific code is gated on `target_os = "espidf"`
//! or the `espidf` feature inside each module.

#![deny(unused_must_use)]

pub mod adapters;
pub mod config;
pub mod drivers;
pub mod error;
#[cfg(all(target_os = "espidf", feature = "espidf"))]
mod esp_link_shims;
pub mod net;
pub mod pool;
pub mod ports;
pub mod programmer;
pub mod protocol;

pub use error::{Error, Result};
