//! System configuration parameters
//!
//! Runtime tunables for the programmer firmware plus the compile-time
//! capacities that size every pool and queue. Runtime values can be
//! exchanged with host tooling as JSON or persisted as a postcard blob by
//! the wired configurator.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

// ---------------------------------------------------------------------------
// Compile-time capacities
// ---------------------------------------------------------------------------

/// Maximum number of simultaneously live TCP connections.
pub const MAX_CONNECTIONS: usize = 3;

/// Depth of every per-connection inbound and outbound queue.
pub const QUEUE_DEPTH: usize = 5;

/// Number of packets that can be in flight at once.
pub const PACKET_POOL_SIZE: usize = 16;

/// Depth of the acceptor → dispatcher connection-arrival queue.
pub const ARRIVAL_DEPTH: usize = MAX_CONNECTIONS;

// ---------------------------------------------------------------------------
// Task layout (core, priority, stack)
// ---------------------------------------------------------------------------

pub const ACCEPT_TASK_NAME: &str = "isp-accept\0";
pub const ACCEPT_TASK_PRIORITY: u8 = 4;
pub const ACCEPT_TASK_STACK_KB: usize = 8;

pub const DISPATCH_TASK_NAME: &str = "isp-dispatch\0";
pub const DISPATCH_TASK_PRIORITY: u8 = 5;
pub const DISPATCH_TASK_STACK_KB: usize = 16;

pub const PROGRAMMER_TASK_NAME: &str = "isp-prog\0";
pub const PROGRAMMER_TASK_PRIORITY: u8 = 5;
pub const PROGRAMMER_TASK_STACK_KB: usize = 16;

/// Core runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgrammerConfig {
    // --- Network ---
    /// TCP port the programmer listens on
    pub tcp_port: u16,
    /// Upper bound on one dispatcher readiness wait (milliseconds)
    pub select_timeout_ms: u32,
    /// Time allowed to finish a frame once its first byte arrived (milliseconds)
    pub recv_timeout_ms: u32,
    /// Time allowed to flush one outbound packet (milliseconds)
    pub send_timeout_ms: u32,
    /// Acceptor poll interval (milliseconds)
    pub accept_poll_ms: u32,
    /// Acceptor back-off when every connection slot is taken (milliseconds)
    pub accept_backoff_ms: u32,

    // --- Queues ---
    /// Bounded wait for a push into a full queue (milliseconds)
    pub queue_write_wait_ms: u32,
    /// Engine wait for the next inbound packet before re-checking pause (milliseconds)
    pub engine_poll_ms: u32,

    // --- ISP ---
    /// SPI clock towards the target (Hz)
    pub spi_frequency_hz: u32,
    /// Program-enable attempts before reporting failure
    pub enter_pgm_attempts: u8,
    /// Pause between program-enable attempts (milliseconds)
    pub pgm_retry_delay_ms: u32,
}

impl Default for ProgrammerConfig {
    fn default() -> Self {
        Self {
            // Network
            tcp_port: 1000,
            select_timeout_ms: 10,
            recv_timeout_ms: 200,
            send_timeout_ms: 1000,
            accept_poll_ms: 50,
            accept_backoff_ms: 250,

            // Queues
            queue_write_wait_ms: 5,
            engine_poll_ms: 20,

            // ISP
            spi_frequency_hz: 100_000,
            enter_pgm_attempts: 5,
            pgm_retry_delay_ms: 20,
        }
    }
}

impl ProgrammerConfig {
    /// Reject values that would stall or disable a subsystem.
    pub fn validate(&self) -> Result<(), Error> {
        if self.tcp_port == 0 {
            return Err(Error::Config("tcp_port must be non-zero"));
        }
        if self.select_timeout_ms == 0 || self.recv_timeout_ms == 0 || self.send_timeout_ms == 0 {
            return Err(Error::Config("socket timeouts must be non-zero"));
        }
        if self.accept_poll_ms == 0 || self.accept_backoff_ms == 0 {
            return Err(Error::Config("acceptor intervals must be non-zero"));
        }
        if self.queue_write_wait_ms == 0 || self.engine_poll_ms == 0 {
            return Err(Error::Config("queue waits must be non-zero"));
        }
        if self.spi_frequency_hz == 0 {
            return Err(Error::Config("spi_frequency_hz must be non-zero"));
        }
        if self.enter_pgm_attempts == 0 {
            return Err(Error::Config("enter_pgm_attempts must be at least 1"));
        }
        Ok(())
    }

    /// Parse and validate a JSON document from host tooling.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: Self =
            serde_json::from_str(json).map_err(|_| Error::Config("malformed JSON config"))?;
        config.validate()?;
        Ok(config)
    }

    /// Encode into a compact blob for persistent storage.
    pub fn to_blob(&self) -> Result<Vec<u8>, Error> {
        postcard::to_allocvec(self).map_err(|_| Error::Config("config encode failed"))
    }

    /// Decode and validate a persisted blob.
    pub fn from_blob(blob: &[u8]) -> Result<Self, Error> {
        let config: Self =
            postcard::from_bytes(blob).map_err(|_| Error::Config("corrupted config blob"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn select_timeout(&self) -> Duration {
        ms(self.select_timeout_ms)
    }

    pub fn recv_timeout(&self) -> Duration {
        ms(self.recv_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        ms(self.send_timeout_ms)
    }

    pub fn accept_poll(&self) -> Duration {
        ms(self.accept_poll_ms)
    }

    pub fn accept_backoff(&self) -> Duration {
        ms(self.accept_backoff_ms)
    }

    pub fn queue_write_wait(&self) -> Duration {
        ms(self.queue_write_wait_ms)
    }

    pub fn engine_poll(&self) -> Duration {
        ms(self.engine_poll_ms)
    }
}

const fn ms(v: u32) -> Duration {
    Duration::from_millis(v as u64)
}
