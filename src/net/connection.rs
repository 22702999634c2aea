//! Connection records and the acceptor → dispatcher arrival queue.
//!
//! Records are pooled. A record taken from the pool may still carry the
//! previous connection's flags and group, so [`ConnectionRecord::open`]
//! overwrites every field before the record is used. Queues are replaced,
//! not drained: a subsystem still holding the previous client's
//! [`QueueBinding`] writes into queues nobody reads.
//!
//! ```text
//!   open()            activate()              close()
//!  ───────▶ Connecting ──────────▶ Active ──────────▶ Closed
//! ```

use core::task::{Context, Poll};
use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::config::{ARRIVAL_DEPTH, MAX_CONNECTIONS};
use crate::error::LinkError;
use crate::pool::{Pooled, SharedPool};
use crate::protocol::PacketGroup;

use super::queue::{PacketQueue, QueueBinding};
use super::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Active,
    Closed,
}

pub struct ConnectionRecord<L> {
    link: Option<L>,
    group: PacketGroup,
    state: ConnState,
    queues: QueueBinding,
    pub encryption: bool,
    pub sign: bool,
}

impl<L> Default for ConnectionRecord<L> {
    fn default() -> Self {
        Self {
            link: None,
            group: PacketGroup::Control,
            state: ConnState::Closed,
            queues: QueueBinding::new(),
            encryption: false,
            sign: false,
        }
    }
}

impl<L: Transport> ConnectionRecord<L> {
    /// Take ownership of a freshly accepted link. New connections start in
    /// the Control group.
    pub fn open(&mut self, link: L) {
        if let Some(mut old) = self.link.replace(link) {
            old.shutdown();
        }
        self.group = PacketGroup::Control;
        self.state = ConnState::Connecting;
        self.encryption = false;
        self.sign = false;
        self.queues = QueueBinding::new();
    }

    /// Connecting → Active once the link is non-blocking.
    pub fn activate(&mut self) -> Result<(), LinkError> {
        let link = self.link.as_mut().ok_or(LinkError::Closed)?;
        link.set_nonblocking()?;
        self.state = ConnState::Active;
        Ok(())
    }

    /// Any state → Closed. Queued packets go back to their pool.
    pub fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.shutdown();
        }
        self.queues.inbound.drain();
        self.queues.outbound.drain();
        self.state = ConnState::Closed;
    }

    pub fn link_mut(&mut self) -> Option<&mut L> {
        self.link.as_mut()
    }
}

impl<L> ConnectionRecord<L> {
    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn group(&self) -> PacketGroup {
        self.group
    }

    pub fn set_group(&mut self, group: PacketGroup) {
        self.group = group;
    }

    pub fn inbound(&self) -> &Arc<PacketQueue> {
        &self.queues.inbound
    }

    pub fn outbound(&self) -> &Arc<PacketQueue> {
        &self.queues.outbound
    }

    /// Handle to this connection's queues for a subsystem.
    pub fn binding(&self) -> QueueBinding {
        self.queues.clone()
    }
}

pub type ConnectionPool<L> = SharedPool<ConnectionRecord<L>, MAX_CONNECTIONS>;
pub type PooledConnection<L> = Pooled<ConnectionRecord<L>, MAX_CONNECTIONS>;

// ── Arrival queue ────────────────────────────────────────────

/// Hands accepted connections from the acceptor to the dispatcher.
pub struct ArrivalQueue<L> {
    chan: Channel<CriticalSectionRawMutex, PooledConnection<L>, ARRIVAL_DEPTH>,
}

impl<L> ArrivalQueue<L> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            chan: Channel::new(),
        })
    }

    /// Enqueue without waiting; a full queue hands the connection back.
    pub fn offer(&self, conn: PooledConnection<L>) -> Result<(), PooledConnection<L>> {
        self.chan.try_send(conn).map_err(|e| match e {
            embassy_sync::channel::TrySendError::Full(c) => c,
        })
    }

    pub fn try_take(&self) -> Option<PooledConnection<L>> {
        self.chan.try_receive().ok()
    }

    /// Wait indefinitely for the next connection.
    pub async fn receive(&self) -> PooledConnection<L> {
        self.chan.receive().await
    }

    /// Ready once a connection is waiting.
    pub fn poll_arrival(&self, cx: &mut Context<'_>) -> Poll<()> {
        self.chan.poll_ready_to_receive(cx)
    }

    pub fn is_empty(&self) -> bool {
        self.chan.is_empty()
    }
}
