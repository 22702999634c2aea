//! Adapters: concrete implementations of the transport and port traits.
//!
//! | Adapter       | Implements            | Connects to                 |
//! |---------------|-----------------------|-----------------------------|
//! | `tcp`         | Transport, Listener   | std / lwIP TCP sockets      |
//! | `uart_bridge` | UartPort              | log sink (bridge stand-in)  |
//! | `system`      | SystemPort            | chip restart                |
//!
//! The reset line adapter lives in [`crate::drivers::reset_line`] next to
//! the other GPIO code.

pub mod system;
pub mod tcp;
pub mod uart_bridge;

pub use system::SystemReset;
pub use tcp::{TcpLink, TcpPortListener};
pub use uart_bridge::LogUartBridge;
