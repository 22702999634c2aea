//! Programmer engine: executes programmer-group requests against the
//! target.
//!
//! The engine runs on its own task and never touches a socket. The
//! dispatcher binds it to one connection's queue pair through a
//! [`ProgrammerHandle`], then resumes it; the engine drains the inbound
//! queue one packet at a time and answers on the outbound queue.
//!
//! ```text
//!            resume()                  pause() observed
//!   Idle ──────────────▶ Running ─────────────────────▶ Paused
//!                          ▲                              │
//!                          └──────────── resume() ────────┘
//! ```
//!
//! Pause is cooperative: it is checked before each packet, so a program or
//! read sequence always runs to completion or to its first failure.
//!
//! Every request is answered with an ACK (1 success, 0 failure). Read-Memory
//! and CMD follow a successful ACK with the data packet. Failures send an
//! Error packet with the reason before ACK(0).

use core::cell::RefCell;
use core::fmt::Write as _;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use core::time::Duration;
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embedded_hal::delay::DelayNs;
use embedded_hal::spi::SpiBus;
use log::{debug, error, info, warn};

use crate::config::{
    PROGRAMMER_TASK_NAME, PROGRAMMER_TASK_PRIORITY, PROGRAMMER_TASK_STACK_KB, ProgrammerConfig,
};
use crate::drivers::task_pin::{Core, TaskSpec, spawn_on_core};
use crate::error::{Error, IspError};
use crate::net::queue::{PacketQueue, QueueBinding};
use crate::ports::SystemPort;
use crate::protocol::{PacketHeader, PacketPool, PacketType, PooledPacket};

use super::command::{AVR_CMD_SIZE, AvrCommand, EchoCheck};
use super::isp::IspProgrammer;
use super::mcu_info::AvrMcuInfo;
use super::request::{ProgramMemoryRequest, ReadMemoryRequest};

const ERROR_TEXT_LEN: usize = 96;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    Idle = 0,
    Paused = 1,
    Running = 2,
}

impl EngineState {
    fn from_u8(v: u8) -> Self {
        match v {
            2 => Self::Running,
            1 => Self::Paused,
            _ => Self::Idle,
        }
    }
}

// ── Shared control block ─────────────────────────────────────

struct EngineShared {
    state: AtomicU8,
    pause_requested: AtomicBool,
    resume: Signal<CriticalSectionRawMutex, ()>,
    binding: Mutex<CriticalSectionRawMutex, RefCell<Option<QueueBinding>>>,
}

impl EngineShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(EngineState::Idle as u8),
            pause_requested: AtomicBool::new(false),
            resume: Signal::new(),
            binding: Mutex::new(RefCell::new(None)),
        }
    }

    fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: EngineState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn binding(&self) -> Option<QueueBinding> {
        self.binding.lock(|b| b.borrow().clone())
    }
}

/// Control surface handed to the dispatcher.
#[derive(Clone)]
pub struct ProgrammerHandle {
    shared: Arc<EngineShared>,
}

impl ProgrammerHandle {
    /// Attach the engine to a connection's queues, replacing any binding.
    pub fn bind(&self, binding: QueueBinding) {
        self.shared
            .binding
            .lock(|b| *b.borrow_mut() = Some(binding));
    }

    pub fn unbind(&self) {
        self.shared.binding.lock(|b| *b.borrow_mut() = None);
    }

    pub fn is_bound(&self) -> bool {
        self.shared.binding.lock(|b| b.borrow().is_some())
    }

    pub fn is_bound_to(&self, binding: &QueueBinding) -> bool {
        self.shared
            .binding
            .lock(|b| b.borrow().as_ref().is_some_and(|cur| cur.same_as(binding)))
    }

    /// Idle/Paused → Running, waking the worker.
    pub fn resume(&self) {
        self.shared.pause_requested.store(false, Ordering::Release);
        self.shared.set_state(EngineState::Running);
        self.shared.resume.signal(());
    }

    /// Request a pause; honoured before the next packet.
    pub fn pause(&self) {
        self.shared.pause_requested.store(true, Ordering::Release);
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }
}

// ── Engine ───────────────────────────────────────────────────

/// Outcome of one [`ProgrammerEngine::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStep {
    Processed(PacketType),
    NoPacket,
    Paused,
    Idle,
    /// Running, but no connection is attached.
    Unbound,
}

#[derive(Debug, Clone, Copy)]
struct EngineTiming {
    enter_attempts: u8,
    retry_delay_ms: u32,
    queue_write_wait: Duration,
    poll: Duration,
}

pub struct ProgrammerEngine<B, D, S> {
    isp: IspProgrammer<B, D>,
    mcu: Option<AvrMcuInfo>,
    packets: Arc<PacketPool>,
    shared: Arc<EngineShared>,
    system: S,
    timing: EngineTiming,
}

impl<B, D, S> ProgrammerEngine<B, D, S>
where
    B: SpiBus<u8>,
    D: DelayNs,
    S: SystemPort,
{
    pub fn new(
        isp: IspProgrammer<B, D>,
        packets: Arc<PacketPool>,
        system: S,
        config: &ProgrammerConfig,
    ) -> Self {
        Self {
            isp,
            mcu: None,
            packets,
            shared: Arc::new(EngineShared::new()),
            system,
            timing: EngineTiming {
                enter_attempts: config.enter_pgm_attempts,
                retry_delay_ms: config.pgm_retry_delay_ms,
                queue_write_wait: config.queue_write_wait(),
                poll: config.engine_poll(),
            },
        }
    }

    pub fn handle(&self) -> ProgrammerHandle {
        ProgrammerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn mcu_info(&self) -> Option<&AvrMcuInfo> {
        self.mcu.as_ref()
    }

    /// One iteration: honour pause, then process at most one packet.
    pub fn step(&mut self) -> EngineStep {
        if self.shared.pause_requested.swap(false, Ordering::AcqRel) {
            self.shared.set_state(EngineState::Paused);
            info!("PROG: paused");
            return EngineStep::Paused;
        }
        match self.shared.state() {
            EngineState::Running => {}
            EngineState::Paused => return EngineStep::Paused,
            EngineState::Idle => return EngineStep::Idle,
        }

        let Some(binding) = self.shared.binding() else {
            return EngineStep::Unbound;
        };
        let Some(packet) = binding.inbound.pop_timeout(self.timing.poll) else {
            return EngineStep::NoPacket;
        };
        let ty = packet.header.packet_type();
        self.process_packet(packet, &binding.outbound);
        EngineStep::Processed(ty)
    }

    /// Worker loop. Parks on the resume signal while idle, paused or unbound.
    pub fn run(mut self) {
        info!("PROG: engine task started");
        loop {
            match self.step() {
                EngineStep::Idle | EngineStep::Paused | EngineStep::Unbound => {
                    futures_lite::future::block_on(self.shared.resume.wait());
                }
                EngineStep::Processed(_) | EngineStep::NoPacket => {}
            }
        }
    }

    /// Execute one request and queue its replies on `out`.
    pub fn process_packet(&mut self, packet: PooledPacket, out: &PacketQueue) {
        let ty = packet.header.packet_type();
        debug!("PROG: {:?} ({} bytes)", ty, packet.header.data_size());

        let result = match ty {
            PacketType::LoadMcuInfo => self.load_mcu_info(packet.data()),
            PacketType::ProgramMemory => self.program_memory(packet.data()),
            PacketType::ReadMemory => self.read_memory(packet.data()),
            PacketType::Cmd => self.raw_command(packet.data()),
            _ => Err(IspError::InvalidRequest("not a programmer request").into()),
        };
        // The request slot goes back before replies are built.
        drop(packet);

        match result {
            Ok(data) => {
                let acked = self.send_ack(out, true);
                if !acked && ty == PacketType::LoadMcuInfo {
                    self.critical("ACK for MCU info could not be queued");
                }
                if let Some(data) = data {
                    self.send(out, data);
                }
            }
            Err(e) => {
                warn!("PROG: {:?} failed: {}", ty, e);
                self.send_error(out, &e);
                let acked = self.send_ack(out, false);
                if !acked && ty == PacketType::LoadMcuInfo {
                    self.critical("failure ACK for MCU info could not be queued");
                }
            }
        }
    }

    // ── Handlers ─────────────────────────────────────────────

    fn load_mcu_info(&mut self, payload: &[u8]) -> Result<Option<PooledPacket>, Error> {
        let info = AvrMcuInfo::parse(payload)?;
        self.mcu = None;
        let attempt = self.isp.enter_programming_mode(
            &info,
            self.timing.enter_attempts,
            self.timing.retry_delay_ms,
        )?;
        info!("PROG: programming mode entered on attempt {}", attempt);
        self.mcu = Some(info);
        Ok(None)
    }

    fn program_memory(&mut self, payload: &[u8]) -> Result<Option<PooledPacket>, Error> {
        let req = ProgramMemoryRequest::parse(payload)?;
        let mcu = self.mcu.as_ref().ok_or(IspError::NoMcuInfo)?;
        self.isp
            .program_memory(mcu, req.memory, req.start_address, req.data)?;
        debug!(
            "PROG: wrote {} bytes to {:?} @0x{:X}",
            req.data.len(),
            req.memory,
            req.start_address
        );
        Ok(None)
    }

    fn read_memory(&mut self, payload: &[u8]) -> Result<Option<PooledPacket>, Error> {
        let req = ReadMemoryRequest::parse(payload)?;
        let mcu = self.mcu.as_ref().ok_or(IspError::NoMcuInfo)?;
        let mut reply = self.packets.acquire()?;
        self.isp.read_memory(
            mcu,
            req.memory,
            req.start_address,
            &mut reply.payload_mut()[..req.count],
        )?;
        reply.header = PacketHeader::new(PacketType::Memory, req.count)?;
        Ok(Some(reply))
    }

    fn raw_command(&mut self, payload: &[u8]) -> Result<Option<PooledPacket>, Error> {
        let cmd: AvrCommand = payload
            .try_into()
            .map_err(|_| IspError::InvalidRequest("CMD must be 4 bytes"))?;
        let answer = self.isp.transfer(&cmd, EchoCheck::SkipDataByte)?;
        let mut reply = self.packets.acquire()?;
        reply.fill(PacketType::Cmd, &answer[..AVR_CMD_SIZE])?;
        Ok(Some(reply))
    }

    // ── Replies ──────────────────────────────────────────────

    fn send(&self, out: &PacketQueue, packet: PooledPacket) -> bool {
        match out.push_timeout(packet, self.timing.queue_write_wait) {
            Ok(()) => true,
            Err(e) => {
                warn!("PROG: reply dropped: {}", e);
                false
            }
        }
    }

    fn send_ack(&self, out: &PacketQueue, success: bool) -> bool {
        match self.packets.acquire() {
            Ok(mut p) => {
                p.fill_ack(success);
                self.send(out, p)
            }
            Err(e) => {
                error!("PROG: no packet for ACK: {}", e);
                false
            }
        }
    }

    fn send_error(&self, out: &PacketQueue, err: &Error) {
        let mut text: heapless::String<ERROR_TEXT_LEN> = heapless::String::new();
        // Overlong messages are truncated.
        let _ = write!(text, "{err}");
        match self.packets.acquire() {
            Ok(mut p) => {
                p.fill_error(&text);
                self.send(out, p);
            }
            Err(e) => error!("PROG: no packet for error report: {}", e),
        }
    }

    fn critical(&mut self, what: &str) {
        error!("PROG: critical: {}, restarting", what);
        self.system.restart();
    }
}

impl<B, D, S> ProgrammerEngine<B, D, S>
where
    B: SpiBus<u8> + Send + 'static,
    D: DelayNs + Send + 'static,
    S: SystemPort + 'static,
{
    /// Start the worker on its own task.
    pub fn spawn(self) -> std::io::Result<std::thread::JoinHandle<()>> {
        let spec = TaskSpec {
            core: Core::App,
            priority: PROGRAMMER_TASK_PRIORITY,
            stack_kb: PROGRAMMER_TASK_STACK_KB,
            name: PROGRAMMER_TASK_NAME,
        };
        spawn_on_core(spec, move || self.run())
    }
}
