//! Transport abstraction: one client byte stream and the listener that
//! produces them.
//!
//! Concrete implementations:
//! - TCP socket over Wi-Fi ([`crate::adapters::tcp`])
//! - in-memory links for host tests
//!
//! The dispatcher and acceptor are generic over these traits, so the
//! packet core never names a socket type.

use crate::error::LinkError;

/// Non-blocking byte stream to one client.
pub trait Transport: Send {
    /// Read up to `buf.len()` bytes.
    ///
    /// Returns `Err(WouldBlock)` when nothing is pending and `Err(Closed)`
    /// once the peer has gone; never `Ok(0)` for a non-empty buffer.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError>;

    /// Write some prefix of `data`, returning its length.
    fn write(&mut self, data: &[u8]) -> Result<usize, LinkError>;

    fn flush(&mut self) -> Result<(), LinkError>;

    /// Whether a read would make progress (data pending or peer closed).
    fn readable(&mut self) -> Result<bool, LinkError>;

    /// Switch to non-blocking mode. Called once after accept.
    fn set_nonblocking(&mut self) -> Result<(), LinkError>;

    /// Close both directions. Errors are ignored.
    fn shutdown(&mut self);
}

/// Source of new client links.
pub trait Listener {
    type Link: Transport;

    /// Accept one pending connection without blocking.
    fn try_accept(&mut self) -> Result<Option<Self::Link>, LinkError>;
}
