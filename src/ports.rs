//! Port traits: the boundary between the packet core and the collaborators
//! it drives but does not own.
//!
//! ```text
//!   Dispatcher / Engine ──▶ Port trait ──▶ Adapter (GPIO, UART bridge, chip reset)
//! ```
//!
//! The dispatcher and engine hold these as boxed trait objects or generics,
//! so the core never touches peripherals directly and every collaborator can
//! be replaced by a recording mock in tests.

use crate::error::Error;
use crate::net::queue::QueueBinding;

// ───────────────────────────────────────────────────────────────
// Target reset line
// ───────────────────────────────────────────────────────────────

/// Drives the target MCU's reset pin.
pub trait TargetReset: Send {
    /// `true` holds the target in reset, `false` lets it run.
    fn set_reset(&mut self, asserted: bool) -> Result<(), Error>;
}

// ───────────────────────────────────────────────────────────────
// UART bridge
// ───────────────────────────────────────────────────────────────

/// Raw UART bridging, fed from a connection's queues.
pub trait UartPort: Send {
    /// Begin shuttling between the target UART and `binding`.
    fn start(&mut self, binding: QueueBinding) -> Result<(), Error>;

    /// Stop bridging and drop the binding.
    fn stop(&mut self);

    /// Move pending traffic; called once per dispatcher iteration. Returns
    /// the number of packets handled.
    fn service(&mut self) -> usize {
        0
    }
}

// ───────────────────────────────────────────────────────────────
// System control
// ───────────────────────────────────────────────────────────────

/// Last-resort recovery hook.
pub trait SystemPort: Send {
    /// Restart the whole device. Host adapters may return instead.
    fn restart(&mut self);
}
