//! AVR serial programming sequences over an SPI bus.
//!
//! Flash is word addressed: each address holds a low and a high byte, and
//! memory images travel as `[lo, hi]` pairs. EEPROM is byte addressed.

use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{Error as _, SpiBus};

use crate::error::IspError;

use super::command::{AVR_CMD_SIZE, AvrCommand, EchoCheck, check_echo};
use super::mcu_info::{AvrMcuInfo, Template};
use super::request::MemoryType;

pub struct IspProgrammer<B, D> {
    bus: B,
    delay: D,
}

impl<B: SpiBus<u8>, D: DelayNs> IspProgrammer<B, D> {
    pub fn new(bus: B, delay: D) -> Self {
        Self { bus, delay }
    }

    /// Shift one command out and return what the target shifted back.
    pub fn transfer(&mut self, cmd: &AvrCommand, check: EchoCheck) -> Result<AvrCommand, IspError> {
        let mut answer = [0u8; AVR_CMD_SIZE];
        self.bus
            .transfer(&mut answer, cmd)
            .map_err(|e| IspError::Bus(e.kind()))?;
        self.bus.flush().map_err(|e| IspError::Bus(e.kind()))?;
        if !check_echo(cmd, &answer, check) {
            return Err(IspError::EchoMismatch {
                sent: *cmd,
                answer,
            });
        }
        Ok(answer)
    }

    /// Send the program-enable command until the target syncs.
    ///
    /// Returns the 1-based attempt that succeeded.
    pub fn enter_programming_mode(
        &mut self,
        mcu: &AvrMcuInfo,
        attempts: u8,
        retry_delay_ms: u32,
    ) -> Result<u8, IspError> {
        for attempt in 1..=attempts {
            match self.transfer(&mcu.pgm_enable, EchoCheck::Full) {
                Ok(_) => return Ok(attempt),
                Err(IspError::EchoMismatch { .. }) if attempt < attempts => {
                    self.delay.delay_ms(retry_delay_ms);
                }
                Err(IspError::EchoMismatch { .. }) => break,
                Err(e) => return Err(e),
            }
        }
        Err(IspError::EnterPgmFailed { attempts })
    }

    /// Write `data` starting at `start`. Stops at the first failing command.
    pub fn program_memory(
        &mut self,
        mcu: &AvrMcuInfo,
        memory: MemoryType,
        start: u32,
        data: &[u8],
    ) -> Result<(), IspError> {
        match memory {
            MemoryType::Flash => {
                if data.len() % 2 != 0 {
                    return Err(IspError::InvalidRequest("flash data must be whole words"));
                }
                for (offset, word) in data.chunks_exact(2).enumerate() {
                    let address = offset_address(start, offset)?;
                    self.write_byte(&mcu.flash_load_lo, address, word[0], mcu.flash_wait_ms)?;
                    self.write_byte(&mcu.flash_load_hi, address, word[1], mcu.flash_wait_ms)?;
                }
            }
            MemoryType::Eeprom => {
                for (offset, &byte) in data.iter().enumerate() {
                    let address = offset_address(start, offset)?;
                    self.write_byte(&mcu.eeprom_write, address, byte, mcu.eeprom_wait_ms)?;
                }
            }
        }
        Ok(())
    }

    /// Fill `out` from memory starting at `start`.
    pub fn read_memory(
        &mut self,
        mcu: &AvrMcuInfo,
        memory: MemoryType,
        start: u32,
        out: &mut [u8],
    ) -> Result<(), IspError> {
        match memory {
            MemoryType::Flash => {
                if out.len() % 2 != 0 {
                    return Err(IspError::InvalidRequest("flash reads must be whole words"));
                }
                for (offset, word) in out.chunks_exact_mut(2).enumerate() {
                    let address = offset_address(start, offset)?;
                    word[1] = self.read_byte(&mcu.flash_read_hi, address)?;
                    word[0] = self.read_byte(&mcu.flash_read_lo, address)?;
                }
            }
            MemoryType::Eeprom => {
                for (offset, byte) in out.iter_mut().enumerate() {
                    let address = offset_address(start, offset)?;
                    *byte = self.read_byte(&mcu.eeprom_read, address)?;
                }
            }
        }
        Ok(())
    }

    fn write_byte(
        &mut self,
        template: &Template,
        address: u32,
        value: u8,
        wait_ms: u8,
    ) -> Result<(), IspError> {
        let cmd = template.expand(address, value)?;
        self.transfer(&cmd, EchoCheck::Full)?;
        self.delay.delay_ms(u32::from(wait_ms));
        Ok(())
    }

    fn read_byte(&mut self, template: &Template, address: u32) -> Result<u8, IspError> {
        let cmd = template.expand(address, 0)?;
        let answer = self.transfer(&cmd, EchoCheck::SkipDataByte)?;
        Ok(answer[AVR_CMD_SIZE - 1])
    }
}

fn offset_address(start: u32, offset: usize) -> Result<u32, IspError> {
    u32::try_from(offset)
        .ok()
        .and_then(|o| start.checked_add(o))
        .ok_or(IspError::AddressOverflow)
}
