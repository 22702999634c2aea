//! AVR in-system programmer: command templates, request payloads, the ISP
//! sequencer and the engine task that serves programmer-group packets.

pub mod command;
pub mod engine;
pub mod isp;
pub mod mcu_info;
pub mod request;

pub use command::{AVR_CMD_SIZE, AvrCommand, EchoCheck};
pub use engine::{EngineState, EngineStep, ProgrammerEngine, ProgrammerHandle};
pub use isp::IspProgrammer;
pub use mcu_info::{AvrMcuInfo, Template};
pub use request::{MemoryType, ProgramMemoryRequest, ReadMemoryRequest};
