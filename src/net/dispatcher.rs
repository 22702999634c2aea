//! Packet dispatcher: the single owner of every live connection.
//!
//! The dispatcher runs as a task on an `edge-executor` local executor. Each
//! iteration:
//!
//! 1. waits (bounded by the select timeout) until some connection is
//!    readable, some outbound queue has data, or a new connection arrived.
//!    Sockets are re-checked on a reactor timer tick; a queued reply or an
//!    arrival wakes the task at once;
//! 2. reads exactly one framed packet from each readable connection;
//! 3. routes it: Control packets are handled inline, Programmer and Uart
//!    packets go onto the connection's inbound queue with a short bounded
//!    wait, dropped with a log entry when the queue stays full. The first
//!    Programmer packet from a connection attaches the engine to it; a
//!    packet no subsystem will serve is answered with an Error and ACK(0);
//! 4. services the UART bridge and drains every outbound queue onto its
//!    socket;
//! 5. admits newly accepted connections from the arrival queue.
//!
//! ```text
//!  ┌──────────┐ arrivals ┌────────────┐ inbound  ┌────────────┐
//!  │ Acceptor │────────▶│ Dispatcher │────────▶│  Engine /   │
//!  └──────────┘          │  registry  │◀────────│  UART       │
//!                        └────────────┘ outbound └────────────┘
//! ```
//!
//! Resource exhaustion never blocks the loop: a full pool, queue or
//! registry degrades to a logged drop or rejection.

use core::task::Poll;
use core::time::Duration;
use std::sync::Arc;
use std::time::Instant;

use futures_lite::future;
use log::{debug, info, warn};

use crate::config::{
    DISPATCH_TASK_NAME, DISPATCH_TASK_PRIORITY, DISPATCH_TASK_STACK_KB, MAX_CONNECTIONS,
    ProgrammerConfig, QUEUE_DEPTH,
};
use crate::drivers::task_pin::{Core, TaskSpec, spawn_on_core};
use crate::error::{Error, LinkError};
use crate::ports::{TargetReset, UartPort};
use crate::programmer::engine::ProgrammerHandle;
use crate::protocol::{Packet, PacketGroup, PacketPool, PacketType, PooledPacket};

use super::connection::{ArrivalQueue, ConnState, ConnectionRecord, PooledConnection};
use super::framing::{read_packet, write_packet};
use super::queue::PacketQueue;
use super::registry::{ConnectionId, RejectReason, Registry, Rejected};
use super::transport::Transport;

/// Readiness re-check interval inside one select window.
const READY_POLL: Duration = Duration::from_millis(1);

/// Collaborators driven by Control packets.
pub struct ControlPorts {
    pub programmer: ProgrammerHandle,
    pub reset: Box<dyn TargetReset>,
    pub uart: Box<dyn UartPort>,
}

/// Running counters for diagnostics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherStats {
    pub packets_in: u32,
    pub packets_out: u32,
    /// Well-formed packets discarded (queue full, no free packet).
    pub dropped: u32,
    pub parse_errors: u32,
    pub rejected: u32,
    pub closed: u32,
}

#[derive(Debug, Clone, Copy)]
struct DispatchTiming {
    select: Duration,
    recv: Duration,
    send: Duration,
    queue_write_wait: Duration,
}

/// What a Control handler asks the dispatcher to send back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlReply {
    Ack(bool),
    Unsupported,
    Silent,
}

pub struct Dispatcher<L> {
    registry: Registry<L>,
    arrivals: Arc<ArrivalQueue<L>>,
    packets: Arc<PacketPool>,
    ports: ControlPorts,
    timing: DispatchTiming,
    /// Receive buffer for frames that arrive while the packet pool is empty.
    scratch: Box<Packet>,
    stats: DispatcherStats,
    programmer_owner: Option<ConnectionId>,
    uart_owner: Option<ConnectionId>,
}

impl<L: Transport> Dispatcher<L> {
    pub fn new(
        arrivals: Arc<ArrivalQueue<L>>,
        packets: Arc<PacketPool>,
        ports: ControlPorts,
        config: &ProgrammerConfig,
    ) -> Self {
        Self {
            registry: Registry::new(),
            arrivals,
            packets,
            ports,
            timing: DispatchTiming {
                select: config.select_timeout(),
                recv: config.recv_timeout(),
                send: config.send_timeout(),
                queue_write_wait: config.queue_write_wait(),
            },
            scratch: Box::default(),
            stats: DispatcherStats::default(),
            programmer_owner: None,
            uart_owner: None,
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        self.stats
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&ConnectionRecord<L>> {
        self.registry.get(id)
    }

    pub fn connection_ids(&self) -> heapless::Vec<ConnectionId, MAX_CONNECTIONS> {
        self.registry.ids()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Admit a connection. Rejected connections are closed and released.
    pub fn offer(&mut self, conn: PooledConnection<L>) -> Result<ConnectionId, RejectReason> {
        match self.registry.admit(conn) {
            Ok(id) => {
                info!("NET[{}]: connection admitted", id);
                Ok(id)
            }
            Err(Rejected {
                reason,
                mut connection,
            }) => {
                warn!("NET: connection rejected: {}", reason);
                self.stats.rejected += 1;
                connection.close();
                Err(reason)
            }
        }
    }

    /// One dispatcher iteration, driven to completion on the calling thread.
    pub fn poll_once(&mut self) {
        future::block_on(self.step());
    }

    async fn step(&mut self) {
        for id in self.wait_ready().await {
            self.service_inbound(id).await;
        }
        let bridged = self.ports.uart.service();
        if bridged > 0 {
            debug!("NET: UART bridge handled {} packets", bridged);
        }
        for id in self.registry.ids() {
            self.flush_outbound(id).await;
        }
        self.admit_arrivals();
    }

    /// Waits indefinitely only while no connection exists.
    async fn dispatch_loop(mut self) {
        loop {
            if self.registry.is_empty() {
                let conn = self.arrivals.receive().await;
                let _ = self.offer(conn);
            }
            self.step().await;
        }
    }

    /// Dispatcher thread body: a local executor driving the dispatch loop.
    pub fn run(self) {
        let executor: edge_executor::LocalExecutor<'_, 2> = edge_executor::LocalExecutor::new();
        executor.spawn(self.dispatch_loop()).detach();
        info!("NET: dispatcher started");
        future::block_on(executor.run(core::future::pending::<()>()));
    }

    // ── Step 1: readiness ────────────────────────────────────

    async fn wait_ready(&mut self) -> heapless::Vec<ConnectionId, MAX_CONNECTIONS> {
        let deadline = Instant::now() + self.timing.select;
        loop {
            let mut ready = heapless::Vec::new();
            let mut pending_out = false;
            let mut outbound: heapless::Vec<Arc<PacketQueue>, MAX_CONNECTIONS> =
                heapless::Vec::new();
            for id in self.registry.ids() {
                let Some(conn) = self.registry.get_mut(id) else {
                    continue;
                };
                pending_out |= !conn.outbound().is_empty();
                let _ = outbound.push(Arc::clone(conn.outbound()));
                let readable = match conn.link_mut() {
                    // An error surfaces on the following read and closes the link.
                    Some(link) => link.readable().unwrap_or(true),
                    None => false,
                };
                if readable {
                    let _ = ready.push(id);
                }
            }

            let now = Instant::now();
            if !ready.is_empty()
                || pending_out
                || !self.arrivals.is_empty()
                || self.registry.is_empty()
                || now >= deadline
            {
                return ready;
            }

            let arrivals = &self.arrivals;
            future::or(
                async {
                    async_io_mini::Timer::after(READY_POLL.min(deadline - now)).await;
                },
                core::future::poll_fn(|cx| {
                    if arrivals.poll_arrival(cx).is_ready()
                        || outbound.iter().any(|q| q.poll_filled(cx).is_ready())
                    {
                        Poll::Ready(())
                    } else {
                        Poll::Pending
                    }
                }),
            )
            .await;
        }
    }

    // ── Step 2: receive ──────────────────────────────────────

    async fn service_inbound(&mut self, id: ConnectionId) {
        let slot = self.packets.acquire().ok();
        let Some(conn) = self.registry.get_mut(id) else {
            return;
        };
        let Some(link) = conn.link_mut() else {
            return;
        };

        let Some(mut packet) = slot else {
            // Keep the stream framed even though the packet is lost.
            let res = read_packet(link, &mut self.scratch, self.timing.recv).await;
            match res {
                Ok(()) => {
                    self.stats.dropped += 1;
                    warn!(
                        "NET[{}]: packet pool exhausted, dropping {:?}",
                        id,
                        self.scratch.header.packet_type()
                    );
                }
                Err(e) => self.receive_failed(id, e),
            }
            return;
        };

        let res = read_packet(link, &mut packet, self.timing.recv).await;
        match res {
            Ok(()) => {
                self.stats.packets_in += 1;
                self.route(id, packet).await;
            }
            Err(e) => self.receive_failed(id, e),
        }
    }

    fn receive_failed(&mut self, id: ConnectionId, err: Error) {
        match err {
            Error::Codec(e) => {
                self.stats.parse_errors += 1;
                warn!("NET[{}]: dropping malformed packet: {}", id, e);
            }
            Error::Link(LinkError::WouldBlock) => {}
            Error::Link(LinkError::Closed) => {
                info!("NET[{}]: peer closed", id);
                self.close(id);
            }
            e => {
                warn!("NET[{}]: receive failed: {}", id, e);
                self.close(id);
            }
        }
    }

    // ── Step 3: route ────────────────────────────────────────

    async fn route(&mut self, id: ConnectionId, packet: PooledPacket) {
        match packet.header.group() {
            PacketGroup::Control => self.handle_control(id, packet).await,
            PacketGroup::Programmer => {
                if self.programmer_owner != Some(id) && !self.attach_programmer(id) {
                    self.refuse(id, packet, "programmer busy").await;
                    return;
                }
                self.enqueue(id, packet).await;
            }
            PacketGroup::Uart => {
                if self.uart_owner != Some(id) {
                    self.refuse(id, packet, "UART bridge not started").await;
                    return;
                }
                self.enqueue(id, packet).await;
            }
        }
    }

    async fn enqueue(&mut self, id: ConnectionId, packet: PooledPacket) {
        let ty = packet.header.packet_type();
        let Some(conn) = self.registry.get(id) else {
            return;
        };
        let inbound = Arc::clone(conn.inbound());
        if let Err(e) = inbound
            .push_within(packet, self.timing.queue_write_wait)
            .await
        {
            self.stats.dropped += 1;
            warn!("NET[{}]: {}, dropping {:?}", id, e, ty);
        }
    }

    async fn handle_control(&mut self, id: ConnectionId, mut packet: PooledPacket) {
        let ty = packet.header.packet_type();
        debug!("NET[{}]: control {:?}", id, ty);

        let reply = match ty {
            PacketType::ProgrammerInit => self.programmer_init(id),
            PacketType::ProgrammerStop => self.programmer_stop(id),
            PacketType::UartInit => self.uart_init(id),
            PacketType::UartStop => self.uart_stop(id),
            PacketType::Reset => self.reset(packet.data()),
            PacketType::EnableEncryption => self.set_mode(id, ty, packet.data()),
            PacketType::EnableSign => self.set_mode(id, ty, packet.data()),
            PacketType::CloseConnection => {
                info!("NET[{}]: close requested", id);
                self.close(id);
                return;
            }
            PacketType::Ack => ControlReply::Silent,
            PacketType::NetworkConfiguration
            | PacketType::ObserverKey
            | PacketType::EncryptionConfig
            | PacketType::SignConfig
            | PacketType::Error
            | PacketType::LoadMcuInfo
            | PacketType::ProgramMemory
            | PacketType::ReadMemory
            | PacketType::Memory
            | PacketType::Cmd
            | PacketType::UartConfiguration
            | PacketType::UartData => ControlReply::Unsupported,
        };

        match reply {
            ControlReply::Silent => {}
            ControlReply::Ack(ok) => {
                packet.fill_ack(ok);
                self.reply(id, packet).await;
            }
            ControlReply::Unsupported => {
                self.refuse(id, packet, "unsupported control packet").await;
            }
        }
    }

    /// Answer a request nothing will serve: Error packet, then ACK(0).
    async fn refuse(&mut self, id: ConnectionId, mut packet: PooledPacket, reason: &str) {
        warn!(
            "NET[{}]: {:?} refused: {}",
            id,
            packet.header.packet_type(),
            reason
        );
        match self.packets.acquire() {
            Ok(mut err) => {
                err.fill_error(reason);
                self.reply(id, err).await;
            }
            Err(e) => warn!("NET[{}]: no packet for error report: {}", id, e),
        }
        packet.fill_ack(false);
        self.reply(id, packet).await;
    }

    async fn reply(&mut self, id: ConnectionId, packet: PooledPacket) {
        let Some(conn) = self.registry.get(id) else {
            return;
        };
        let outbound = Arc::clone(conn.outbound());
        if let Err(e) = outbound
            .push_within(packet, self.timing.queue_write_wait)
            .await
        {
            self.stats.dropped += 1;
            warn!("NET[{}]: reply dropped: {}", id, e);
        }
    }

    // ── Control handlers ─────────────────────────────────────

    fn owner_elsewhere(&self, owner: Option<ConnectionId>, id: ConnectionId) -> bool {
        owner.is_some_and(|o| o != id && self.registry.get(o).is_some())
    }

    fn programmer_init(&mut self, id: ConnectionId) -> ControlReply {
        ControlReply::Ack(self.attach_programmer(id))
    }

    /// Re-tag `id` as Programmer and bind the engine to its queues.
    fn attach_programmer(&mut self, id: ConnectionId) -> bool {
        if self.owner_elsewhere(self.programmer_owner, id) {
            warn!("NET[{}]: programmer busy", id);
            return false;
        }
        let Some(conn) = self.registry.get_mut(id) else {
            return false;
        };
        conn.set_group(PacketGroup::Programmer);
        self.ports.programmer.bind(conn.binding());
        self.ports.programmer.resume();
        self.programmer_owner = Some(id);
        info!("NET[{}]: programmer attached", id);
        true
    }

    fn programmer_stop(&mut self, id: ConnectionId) -> ControlReply {
        if self.programmer_owner != Some(id) {
            return ControlReply::Ack(false);
        }
        self.detach_programmer();
        info!("NET[{}]: programmer detached", id);
        ControlReply::Ack(true)
    }

    fn uart_init(&mut self, id: ConnectionId) -> ControlReply {
        if self.owner_elsewhere(self.uart_owner, id) {
            warn!("NET[{}]: UART bridge busy", id);
            return ControlReply::Ack(false);
        }
        let Some(conn) = self.registry.get_mut(id) else {
            return ControlReply::Ack(false);
        };
        if let Err(e) = self.ports.uart.start(conn.binding()) {
            warn!("NET[{}]: UART bridge failed to start: {}", id, e);
            return ControlReply::Ack(false);
        }
        conn.set_group(PacketGroup::Uart);
        self.uart_owner = Some(id);
        ControlReply::Ack(true)
    }

    fn uart_stop(&mut self, id: ConnectionId) -> ControlReply {
        if self.uart_owner != Some(id) {
            return ControlReply::Ack(false);
        }
        self.ports.uart.stop();
        self.uart_owner = None;
        ControlReply::Ack(true)
    }

    fn reset(&mut self, payload: &[u8]) -> ControlReply {
        let asserted = match payload.first() {
            Some(1) => true,
            Some(0) => false,
            _ => return ControlReply::Ack(false),
        };
        match self.ports.reset.set_reset(asserted) {
            Ok(()) => ControlReply::Ack(true),
            Err(e) => {
                warn!("NET: reset line: {}", e);
                ControlReply::Ack(false)
            }
        }
    }

    fn set_mode(&mut self, id: ConnectionId, ty: PacketType, payload: &[u8]) -> ControlReply {
        let enable = payload.first().is_none_or(|&b| b != 0);
        let Some(conn) = self.registry.get_mut(id) else {
            return ControlReply::Ack(false);
        };
        if ty == PacketType::EnableSign {
            conn.sign = enable;
        } else {
            conn.encryption = enable;
        }
        debug!("NET[{}]: {:?} = {}", id, ty, enable);
        ControlReply::Ack(true)
    }

    fn detach_programmer(&mut self) {
        self.ports.programmer.pause();
        self.ports.programmer.unbind();
        self.programmer_owner = None;
    }

    // ── Step 4: transmit ─────────────────────────────────────

    async fn flush_outbound(&mut self, id: ConnectionId) {
        for _ in 0..QUEUE_DEPTH {
            let result = {
                let Some(conn) = self.registry.get_mut(id) else {
                    return;
                };
                let Some(mut packet) = conn.outbound().try_pop() else {
                    return;
                };
                let Some(link) = conn.link_mut() else {
                    return;
                };
                write_packet(link, &mut packet, self.timing.send).await
            };
            match result {
                Ok(()) => self.stats.packets_out += 1,
                Err(e) => {
                    warn!("NET[{}]: send failed: {}", id, e);
                    self.close(id);
                    return;
                }
            }
        }
    }

    // ── Step 5: admission ────────────────────────────────────

    fn admit_arrivals(&mut self) {
        while let Some(conn) = self.arrivals.try_take() {
            let _ = self.offer(conn);
        }
    }

    // ── Teardown ─────────────────────────────────────────────

    /// Active → Closed: release subsystems, queues, socket and record.
    pub fn close(&mut self, id: ConnectionId) {
        let Some(mut conn) = self.registry.remove(id) else {
            return;
        };
        if self.programmer_owner == Some(id) {
            self.detach_programmer();
        }
        if self.uart_owner == Some(id) {
            self.ports.uart.stop();
            self.uart_owner = None;
        }
        conn.close();
        debug_assert_eq!(conn.state(), ConnState::Closed);
        self.stats.closed += 1;
        info!("NET[{}]: connection closed", id);
    }
}

impl<L: Transport + 'static> Dispatcher<L> {
    /// Start the dispatcher on its own task.
    pub fn spawn(self) -> std::io::Result<std::thread::JoinHandle<()>> {
        let spec = TaskSpec {
            core: Core::Pro,
            priority: DISPATCH_TASK_PRIORITY,
            stack_kb: DISPATCH_TASK_STACK_KB,
            name: DISPATCH_TASK_NAME,
        };
        spawn_on_core(spec, move || self.run())
    }
}
