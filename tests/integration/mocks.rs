//! Recording collaborators and a test rig around the dispatcher.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use ispbridge::config::ProgrammerConfig;
use ispbridge::drivers::delay::NoDelay;
use ispbridge::drivers::sim_target::{SimAvr, SimAvrProbe};
use ispbridge::error::Error;
use ispbridge::net::{
    ArrivalQueue, ConnectionId, ConnectionPool, ControlPorts, Dispatcher, QueueBinding,
    RejectReason,
};
use ispbridge::ports::{SystemPort, TargetReset, UartPort};
use ispbridge::programmer::{AvrMcuInfo, IspProgrammer, ProgrammerEngine, Template};
use ispbridge::protocol::{PacketPool, packet_pool};

use crate::mock_link::{MemLink, MemPeer, pair};

// ── Collaborators ─────────────────────────────────────────────

/// Records every level written to the reset line.
#[derive(Clone, Default)]
pub struct RecordingReset {
    pub levels: Arc<Mutex<Vec<bool>>>,
}

impl TargetReset for RecordingReset {
    fn set_reset(&mut self, asserted: bool) -> Result<(), Error> {
        self.levels.lock().unwrap().push(asserted);
        Ok(())
    }
}

#[derive(Default)]
pub struct UartLog {
    pub starts: u32,
    pub stops: u32,
    pub services: u32,
    pub binding: Option<QueueBinding>,
}

#[derive(Clone, Default)]
pub struct RecordingUart {
    pub log: Arc<Mutex<UartLog>>,
}

impl UartPort for RecordingUart {
    fn start(&mut self, binding: QueueBinding) -> Result<(), Error> {
        let mut log = self.log.lock().unwrap();
        log.starts += 1;
        log.binding = Some(binding);
        Ok(())
    }

    fn stop(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.stops += 1;
        log.binding = None;
    }

    fn service(&mut self) -> usize {
        self.log.lock().unwrap().services += 1;
        0
    }
}

#[derive(Clone, Default)]
pub struct RecordingSystem {
    pub restarts: Arc<AtomicU32>,
}

impl SystemPort for RecordingSystem {
    fn restart(&mut self) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Fixtures ──────────────────────────────────────────────────

/// Short timings so tests never wait long on an idle link.
pub fn fast_config() -> ProgrammerConfig {
    ProgrammerConfig {
        select_timeout_ms: 1,
        recv_timeout_ms: 50,
        send_timeout_ms: 50,
        accept_poll_ms: 1,
        accept_backoff_ms: 2,
        queue_write_wait_ms: 1,
        engine_poll_ms: 1,
        pgm_retry_delay_ms: 1,
        ..ProgrammerConfig::default()
    }
}

/// ATmega328-style command set matching the simulated target.
pub fn sim_mcu() -> AvrMcuInfo {
    let t = |s: &str| Template::new(s).unwrap();
    AvrMcuInfo {
        flash_load_lo: t("0100 0000 000x xxxx xxa5a4a3a2a1a0 iiii iiii"),
        flash_load_hi: t("0100 1000 000x xxxx xxa5a4a3a2a1a0 iiii iiii"),
        flash_read_lo: t("0010 0000 00a13a12a11a10a9a8 a7a6a5a4a3a2a1a0 oooo oooo"),
        flash_read_hi: t("0010 1000 00a13a12a11a10a9a8 a7a6a5a4a3a2a1a0 oooo oooo"),
        flash_wait_ms: 0,
        eeprom_write: t("1100 0000 000x xxa9a8 a7a6a5a4a3a2a1a0 iiii iiii"),
        eeprom_read: t("1010 0000 000x xxa9a8 a7a6a5a4a3a2a1a0 oooo oooo"),
        eeprom_wait_ms: 0,
        pgm_enable: [0xAC, 0x53, 0x00, 0x00],
    }
}

pub type SimEngine = ProgrammerEngine<SimAvr, NoDelay, RecordingSystem>;

pub fn sim_engine(sim: SimAvr, packets: &Arc<PacketPool>, system: RecordingSystem) -> SimEngine {
    ProgrammerEngine::new(
        IspProgrammer::new(sim, NoDelay),
        Arc::clone(packets),
        system,
        &fast_config(),
    )
}

/// Dispatcher plus an engine stepped by hand on the test thread.
pub struct Rig {
    pub dispatcher: Dispatcher<MemLink>,
    pub engine: SimEngine,
    pub probe: SimAvrProbe,
    pub packets: Arc<PacketPool>,
    pub records: Arc<ConnectionPool<MemLink>>,
    pub arrivals: Arc<ArrivalQueue<MemLink>>,
    pub reset: RecordingReset,
    pub uart: RecordingUart,
    pub system: RecordingSystem,
}

#[allow(dead_code)]
impl Rig {
    pub fn new() -> Self {
        Self::with_config(&fast_config())
    }

    /// Rig whose dispatcher uses `config`; the engine keeps fast timings.
    pub fn with_config(config: &ProgrammerConfig) -> Self {
        let packets = packet_pool();
        let sim = SimAvr::new();
        let probe = sim.probe();
        let system = RecordingSystem::default();
        let engine = sim_engine(sim, &packets, system.clone());
        let reset = RecordingReset::default();
        let uart = RecordingUart::default();
        let arrivals = ArrivalQueue::new();
        let ports = ControlPorts {
            programmer: engine.handle(),
            reset: Box::new(reset.clone()),
            uart: Box::new(uart.clone()),
        };
        let dispatcher = Dispatcher::new(
            Arc::clone(&arrivals),
            Arc::clone(&packets),
            ports,
            config,
        );
        Self {
            dispatcher,
            engine,
            probe,
            packets,
            records: ConnectionPool::new(),
            arrivals,
            reset,
            uart,
            system,
        }
    }

    /// Open a connection and offer it straight to the dispatcher.
    pub fn connect(&mut self) -> (Result<ConnectionId, RejectReason>, MemPeer) {
        let (link, peer) = pair();
        let mut record = self.records.acquire().unwrap();
        record.open(link);
        record.activate().unwrap();
        (self.dispatcher.offer(record), peer)
    }

    /// Connect and claim the programmer.
    pub fn programmer_session(&mut self) -> (ConnectionId, MemPeer) {
        let (id, peer) = self.connect();
        let id = id.unwrap();
        peer.send(ispbridge::protocol::PacketType::ProgrammerInit, &[]);
        self.dispatcher.poll_once();
        self.dispatcher.poll_once();
        assert_eq!(
            peer.received(),
            vec![(ispbridge::protocol::PacketType::Ack, vec![1])]
        );
        (id, peer)
    }

    /// Let the engine drain whatever is queued, then flush replies.
    pub fn run_engine(&mut self) {
        use ispbridge::programmer::EngineStep;
        while let EngineStep::Processed(_) = self.engine.step() {}
        self.dispatcher.poll_once();
    }

    /// Push one request through dispatcher, engine and back.
    pub fn request(
        &mut self,
        peer: &MemPeer,
        ty: ispbridge::protocol::PacketType,
        data: &[u8],
    ) -> Vec<(ispbridge::protocol::PacketType, Vec<u8>)> {
        peer.send(ty, data);
        self.dispatcher.poll_once();
        self.run_engine();
        peer.received()
    }
}
