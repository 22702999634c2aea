//! Simulated AVR target for host builds.
//!
//! Implements the `embedded-hal` SPI bus trait the way an AVR in serial
//! programming mode answers: every four-byte instruction is echoed one byte
//! behind, and read instructions return the addressed byte in the last
//! position. Flash and EEPROM contents live in memory, and every instruction
//! is logged so tests can assert on the exact command stream.
//!
//! ## Supported instructions
//!
//! | opcode | meaning                                 |
//! |--------|-----------------------------------------|
//! | `AC 53`| programming enable                      |
//! | `40`   | load flash low byte (word address)      |
//! | `48`   | load flash high byte (word address)     |
//! | `20`   | read flash low byte                     |
//! | `28`   | read flash high byte                    |
//! | `C0`   | write EEPROM byte                       |
//! | `A0`   | read EEPROM byte                        |
//!
//! Anything else is echoed with a zero data byte. Until programming mode is
//! entered the target answers all zeros, so no echo check passes.

use core::cell::RefCell;
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embedded_hal::spi::{self, ErrorKind, ErrorType, SpiBus};

use crate::programmer::command::{AVR_CMD_SIZE, AvrCommand};

pub const FLASH_BYTES: usize = 32 * 1024;
pub const EEPROM_BYTES: usize = 1024;

const ERASED: u8 = 0xFF;

/// Injected bus failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimBusError;

impl spi::Error for SimBusError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

struct SimState {
    flash: Vec<u8>,
    eeprom: Vec<u8>,
    enabled: bool,
    failing_enables: u32,
    bus_fault: bool,
    log: Vec<AvrCommand>,
}

impl SimState {
    fn execute(&mut self, cmd: AvrCommand) -> AvrCommand {
        self.log.push(cmd);

        if !self.enabled {
            if cmd[0] == 0xAC && cmd[1] == 0x53 {
                if self.failing_enables > 0 {
                    self.failing_enables -= 1;
                    return [0; AVR_CMD_SIZE];
                }
                self.enabled = true;
                return echo(cmd, cmd[2]);
            }
            return [0; AVR_CMD_SIZE];
        }

        let address = (usize::from(cmd[1]) << 8) | usize::from(cmd[2]);
        let flash_lo = (address * 2) % FLASH_BYTES;
        let flash_hi = flash_lo + 1;
        let eeprom = address % EEPROM_BYTES;

        match cmd[0] {
            0x40 => {
                self.flash[flash_lo] = cmd[3];
                echo(cmd, cmd[2])
            }
            0x48 => {
                self.flash[flash_hi] = cmd[3];
                echo(cmd, cmd[2])
            }
            0x20 => echo(cmd, self.flash[flash_lo]),
            0x28 => echo(cmd, self.flash[flash_hi]),
            0xC0 => {
                self.eeprom[eeprom] = cmd[3];
                echo(cmd, cmd[2])
            }
            0xA0 => echo(cmd, self.eeprom[eeprom]),
            _ => echo(cmd, 0),
        }
    }
}

fn echo(cmd: AvrCommand, last: u8) -> AvrCommand {
    [0, cmd[0], cmd[1], last]
}

type Shared = Arc<Mutex<CriticalSectionRawMutex, RefCell<SimState>>>;

/// The simulated target, owned by the programmer as its SPI bus.
pub struct SimAvr {
    state: Shared,
}

/// Inspection handle that stays with the test after the bus is moved.
#[derive(Clone)]
pub struct SimAvrProbe {
    state: Shared,
}

impl SimAvr {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RefCell::new(SimState {
                flash: vec![ERASED; FLASH_BYTES],
                eeprom: vec![ERASED; EEPROM_BYTES],
                enabled: false,
                failing_enables: 0,
                bus_fault: false,
                log: Vec::new(),
            }))),
        }
    }

    /// Ignore the first `n` programming-enable instructions.
    pub fn failing_enable_attempts(self, n: u32) -> Self {
        self.state.lock(|s| s.borrow_mut().failing_enables = n);
        self
    }

    pub fn probe(&self) -> SimAvrProbe {
        SimAvrProbe {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for SimAvr {
    fn default() -> Self {
        Self::new()
    }
}

impl SimAvrProbe {
    /// Every instruction received, oldest first.
    pub fn log(&self) -> Vec<AvrCommand> {
        self.state.lock(|s| s.borrow().log.clone())
    }

    pub fn clear_log(&self) {
        self.state.lock(|s| s.borrow_mut().log.clear());
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock(|s| s.borrow().enabled)
    }

    /// Leave programming mode, as a target reset would.
    pub fn reset(&self) {
        self.state.lock(|s| s.borrow_mut().enabled = false);
    }

    pub fn set_bus_fault(&self, fault: bool) {
        self.state.lock(|s| s.borrow_mut().bus_fault = fault);
    }

    pub fn flash(&self, start: usize, len: usize) -> Vec<u8> {
        self.state.lock(|s| s.borrow().flash[start..start + len].to_vec())
    }

    pub fn eeprom(&self, start: usize, len: usize) -> Vec<u8> {
        self.state.lock(|s| s.borrow().eeprom[start..start + len].to_vec())
    }

    pub fn load_eeprom(&self, start: usize, bytes: &[u8]) {
        self.state.lock(|s| {
            s.borrow_mut().eeprom[start..start + bytes.len()].copy_from_slice(bytes);
        });
    }
}

impl ErrorType for SimAvr {
    type Error = SimBusError;
}

impl SpiBus<u8> for SimAvr {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        let zeros = vec![0u8; words.len()];
        self.transfer(words, &zeros)
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        let mut sink = vec![0u8; words.len()];
        self.transfer(&mut sink, words)
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            if s.bus_fault {
                return Err(SimBusError);
            }
            read.fill(0);
            for (i, chunk) in write.chunks_exact(AVR_CMD_SIZE).enumerate() {
                let mut cmd = [0u8; AVR_CMD_SIZE];
                cmd.copy_from_slice(chunk);
                let answer = s.execute(cmd);
                let base = i * AVR_CMD_SIZE;
                for (j, b) in answer.iter().enumerate() {
                    if let Some(slot) = read.get_mut(base + j) {
                        *slot = *b;
                    }
                }
            }
            Ok(())
        })
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        let write = words.to_vec();
        self.transfer(words, &write)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
