//! Peripheral drivers and task helpers.

pub mod delay;
pub mod reset_line;
#[cfg(not(target_os = "espidf"))]
pub mod sim_target;
pub mod task_pin;
