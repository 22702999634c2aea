//! Bounded per-connection packet queues.
//!
//! Each connection owns an inbound queue (dispatcher → subsystem) and an
//! outbound queue (subsystem → dispatcher). Both are `embassy-sync`
//! channels of pooled packets, so a packet dropped anywhere along the way
//! returns to its pool.
//!
//! ```text
//! ┌────────────┐  inbound   ┌─────────────┐
//! │ Dispatcher │──────────▶│  Engine /    │
//! │            │◀──────────│  UART bridge │
//! └────────────┘  outbound  └─────────────┘
//! ```

use core::task::{Context, Poll};
use core::time::Duration;
use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use futures_lite::future;

use crate::config::QUEUE_DEPTH;
use crate::error::QueueError;
use crate::protocol::PooledPacket;

pub struct PacketQueue {
    chan: Channel<CriticalSectionRawMutex, PooledPacket, QUEUE_DEPTH>,
}

impl PacketQueue {
    pub const fn new() -> Self {
        Self {
            chan: Channel::new(),
        }
    }

    /// Enqueue without waiting. A rejected packet returns to its pool.
    pub fn try_push(&self, packet: PooledPacket) -> Result<(), QueueError> {
        self.chan.try_send(packet).map_err(|_| QueueError::Full)
    }

    /// Enqueue, waiting at most `timeout` for room. Blocks the calling thread.
    pub fn push_timeout(&self, packet: PooledPacket, timeout: Duration) -> Result<(), QueueError> {
        future::block_on(self.push_within(packet, timeout))
    }

    /// Async form of [`push_timeout`](Self::push_timeout) for executor tasks.
    pub async fn push_within(
        &self,
        packet: PooledPacket,
        timeout: Duration,
    ) -> Result<(), QueueError> {
        let packet = match self.chan.try_send(packet) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(p)) => p,
        };
        if timeout.is_zero() {
            return Err(QueueError::Full);
        }
        let sent = future::or(
            async {
                self.chan.send(packet).await;
                true
            },
            async {
                async_io_mini::Timer::after(timeout).await;
                false
            },
        )
        .await;
        if sent { Ok(()) } else { Err(QueueError::Full) }
    }

    pub fn try_pop(&self) -> Option<PooledPacket> {
        self.chan.try_receive().ok()
    }

    /// Dequeue, waiting at most `timeout` for a packet.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<PooledPacket> {
        if let Some(p) = self.try_pop() {
            return Some(p);
        }
        if timeout.is_zero() {
            return None;
        }
        future::block_on(future::or(async { Some(self.chan.receive().await) }, async {
            async_io_mini::Timer::after(timeout).await;
            None
        }))
    }

    /// Ready once the queue holds a packet. Registers `cx` for a wake on
    /// the next push otherwise. Only one task may wait on a queue.
    pub fn poll_filled(&self, cx: &mut Context<'_>) -> Poll<()> {
        self.chan.poll_ready_to_receive(cx)
    }

    /// Drop every queued packet, returning them to the pool.
    pub fn drain(&self) -> usize {
        let mut n = 0;
        while self.chan.try_receive().is_ok() {
            n += 1;
        }
        n
    }

    pub fn len(&self) -> usize {
        self.chan.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chan.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.chan.is_full()
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// The queue pair a subsystem is attached to.
#[derive(Clone)]
pub struct QueueBinding {
    /// Packets from the client for the subsystem.
    pub inbound: Arc<PacketQueue>,
    /// Packets from the subsystem for the client.
    pub outbound: Arc<PacketQueue>,
}

impl QueueBinding {
    pub fn new() -> Self {
        Self {
            inbound: Arc::new(PacketQueue::new()),
            outbound: Arc::new(PacketQueue::new()),
        }
    }

    /// Whether both bindings point at the same queues.
    pub fn same_as(&self, other: &QueueBinding) -> bool {
        Arc::ptr_eq(&self.inbound, &other.inbound) && Arc::ptr_eq(&self.outbound, &other.outbound)
    }
}

impl Default for QueueBinding {
    fn default() -> Self {
        Self::new()
    }
}
