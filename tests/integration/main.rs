//! Integration test driver for `tests/integration/` submodules.
//!
//! Each `mod` below maps to a file that exercises a subsystem against
//! in-memory links and recording collaborators. Everything runs on the
//! host with the simulated AVR target; no hardware is required.

#![cfg(not(target_os = "espidf"))]

mod dispatcher_tests;
mod engine_tests;
mod mock_link;
mod mocks;
