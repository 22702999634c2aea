//! Live-connection registry.
//!
//! A fixed slot table owned by the dispatcher. The slot index is the
//! connection id used in logs and for subsystem ownership. At most one
//! Control-group connection may be registered at a time.

use core::fmt;

use crate::config::MAX_CONNECTIONS;
use crate::protocol::PacketGroup;

use super::connection::{ConnState, ConnectionRecord, PooledConnection};

pub type ConnectionId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Another Control-group connection is already registered.
    ControlTaken,
    /// Every slot is in use.
    Full,
    /// The record was not Active.
    NotActive,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ControlTaken => write!(f, "control connection already active"),
            Self::Full => write!(f, "no free connection slot"),
            Self::NotActive => write!(f, "connection not active"),
        }
    }
}

/// A refused admission. The caller decides how to dispose of the record.
pub struct Rejected<L> {
    pub reason: RejectReason,
    pub connection: PooledConnection<L>,
}

impl<L> fmt::Debug for Rejected<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

pub struct Registry<L> {
    slots: [Option<PooledConnection<L>>; MAX_CONNECTIONS],
}

impl<L> Registry<L> {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
        }
    }

    /// Register an Active connection.
    pub fn admit(&mut self, conn: PooledConnection<L>) -> Result<ConnectionId, Rejected<L>> {
        let reason = if conn.state() != ConnState::Active {
            Some(RejectReason::NotActive)
        } else if conn.group() == PacketGroup::Control && self.control_id().is_some() {
            Some(RejectReason::ControlTaken)
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(Rejected {
                reason,
                connection: conn,
            });
        }

        match self.slots.iter().position(Option::is_none) {
            Some(id) => {
                self.slots[id] = Some(conn);
                Ok(id)
            }
            None => Err(Rejected {
                reason: RejectReason::Full,
                connection: conn,
            }),
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<&ConnectionRecord<L>> {
        self.slots.get(id)?.as_deref()
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut ConnectionRecord<L>> {
        self.slots.get_mut(id)?.as_deref_mut()
    }

    /// Unregister; the caller closes the record before dropping it.
    pub fn remove(&mut self, id: ConnectionId) -> Option<PooledConnection<L>> {
        self.slots.get_mut(id)?.take()
    }

    /// Id of the registered Control-group connection, if any.
    pub fn control_id(&self) -> Option<ConnectionId> {
        self.ids()
            .into_iter()
            .find(|&id| self.get(id).is_some_and(|c| c.group() == PacketGroup::Control))
    }

    /// Registered ids in slot order.
    pub fn ids(&self) -> heapless::Vec<ConnectionId, MAX_CONNECTIONS> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(id, _)| id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<L> Default for Registry<L> {
    fn default() -> Self {
        Self::new()
    }
}
