//! Connection handling: transport seam, framing, queues, registry,
//! dispatcher and acceptor.

pub mod acceptor;
pub mod connection;
pub mod dispatcher;
pub mod framing;
pub mod queue;
pub mod registry;
pub mod transport;

pub use connection::{ArrivalQueue, ConnState, ConnectionPool, ConnectionRecord, PooledConnection};
pub use dispatcher::{ControlPorts, Dispatcher, DispatcherStats};
pub use queue::{PacketQueue, QueueBinding};
pub use registry::{ConnectionId, RejectReason};
pub use transport::{Listener, Transport};
