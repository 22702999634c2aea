//! ISP bridge firmware: main entry point.
//!
//! ```text
//! ┌──────────────┐ arrivals ┌──────────────┐ queues ┌──────────────────┐
//! │  Acceptor    │────────▶│  Dispatcher  │◀──────▶│ Programmer engine │──▶ SPI ──▶ AVR
//! │ (Core 0)     │          │  (Core 0)    │        │ (Core 1)          │
//! └──────────────┘          └──────┬───────┘        └──────────────────┘
//!        ▲                         │ control
//!   TCP listener          reset line · UART bridge
//! ```
//!
//! Wi-Fi bring-up is performed by the network configurator before this
//! image starts serving; the listener binds on whatever interface is up.

#![deny(unused_must_use)]

use anyhow::{Context, Result};
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::PinDriver;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::spi::config::{Config as SpiConfig, DriverConfig};
use esp_idf_hal::spi::{SpiBusDriver, SpiDriver};
use esp_idf_hal::units::Hertz;
use log::info;

use ispbridge::adapters::{LogUartBridge, SystemReset, TcpPortListener};
use ispbridge::config::ProgrammerConfig;
use ispbridge::drivers::reset_line::ResetLine;
use ispbridge::net::acceptor::Acceptor;
use ispbridge::net::{ArrivalQueue, ConnectionPool, ControlPorts, Dispatcher};
use ispbridge::programmer::{IspProgrammer, ProgrammerEngine};
use ispbridge::protocol::packet_pool;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  ISP bridge v{}                       ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    let config = ProgrammerConfig::default();
    config.validate().map_err(anyhow::Error::msg)?;

    // ── 2. Peripherals ────────────────────────────────────────
    let p = Peripherals::take()?;
    let spi = SpiDriver::new(
        p.spi2,
        p.pins.gpio18,
        p.pins.gpio23,
        Some(p.pins.gpio19),
        &DriverConfig::new(),
    )
    .context("SPI driver")?;
    let bus = SpiBusDriver::new(
        spi,
        &SpiConfig::new().baudrate(Hertz(config.spi_frequency_hz)),
    )
    .context("SPI bus")?;
    let reset = ResetLine::new(PinDriver::output(p.pins.gpio5)?).map_err(anyhow::Error::msg)?;

    // ── 3. Programmer engine (Core 1) ─────────────────────────
    let packets = packet_pool();
    let engine = ProgrammerEngine::new(
        IspProgrammer::new(bus, FreeRtos),
        packets.clone(),
        SystemReset::new(),
        &config,
    );
    let programmer = engine.handle();
    engine.spawn().context("spawn programmer task")?;

    // ── 4. Acceptor (Core 0) ──────────────────────────────────
    let listener = TcpPortListener::bind(config.tcp_port).map_err(anyhow::Error::msg)?;
    info!("Listening on TCP port {}", config.tcp_port);
    let arrivals = ArrivalQueue::new();
    Acceptor::new(listener, ConnectionPool::new(), arrivals.clone(), &config)
        .spawn()
        .context("spawn acceptor task")?;

    // ── 5. Dispatcher (Core 0, this thread's successor) ───────
    let ports = ControlPorts {
        programmer,
        reset: Box::new(reset),
        uart: Box::new(LogUartBridge::new()),
    };
    let dispatcher = Dispatcher::new(arrivals, packets, ports, &config)
        .spawn()
        .context("spawn dispatcher task")?;

    info!("System ready.");
    dispatcher
        .join()
        .map_err(|_| anyhow::anyhow!("dispatcher task panicked"))
}
