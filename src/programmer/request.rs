//! Program-Memory and Read-Memory request payloads.

use crate::error::IspError;
use crate::protocol::MAX_DATA_LENGTH;

const PROGRAM_FIXED_SIZE: usize = 5;
const READ_SIZE: usize = 9;

/// Target memory selected by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MemoryType {
    Flash = 0x00,
    Eeprom = 0x01,
}

impl MemoryType {
    pub fn from_byte(byte: u8) -> Result<Self, IspError> {
        match byte {
            0x00 => Ok(Self::Flash),
            0x01 => Ok(Self::Eeprom),
            other => Err(IspError::UnsupportedMemory(other)),
        }
    }
}

/// `[start address u32 BE][memory type][data...]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramMemoryRequest<'a> {
    pub memory: MemoryType,
    pub start_address: u32,
    pub data: &'a [u8],
}

impl<'a> ProgramMemoryRequest<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self, IspError> {
        if payload.len() < PROGRAM_FIXED_SIZE {
            return Err(IspError::InvalidRequest("program request too short"));
        }
        let start_address = be_u32(&payload[0..4]);
        let memory = MemoryType::from_byte(payload[4])?;
        let data = &payload[PROGRAM_FIXED_SIZE..];
        if memory == MemoryType::Flash && data.len() % 2 != 0 {
            return Err(IspError::InvalidRequest("flash data must be whole words"));
        }
        Ok(Self {
            memory,
            start_address,
            data,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PROGRAM_FIXED_SIZE + self.data.len());
        out.extend_from_slice(&self.start_address.to_be_bytes());
        out.push(self.memory as u8);
        out.extend_from_slice(self.data);
        out
    }
}

/// `[memory type][start address u32 BE][count u32 BE]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadMemoryRequest {
    pub memory: MemoryType,
    pub start_address: u32,
    pub count: usize,
}

impl ReadMemoryRequest {
    pub fn parse(payload: &[u8]) -> Result<Self, IspError> {
        if payload.len() != READ_SIZE {
            return Err(IspError::InvalidRequest("read request must be 9 bytes"));
        }
        let memory = MemoryType::from_byte(payload[0])?;
        let start_address = be_u32(&payload[1..5]);
        let count = be_u32(&payload[5..9]) as usize;
        if count > MAX_DATA_LENGTH {
            return Err(IspError::InvalidRequest("read count exceeds packet size"));
        }
        if memory == MemoryType::Flash && count % 2 != 0 {
            return Err(IspError::InvalidRequest("flash reads must be whole words"));
        }
        Ok(Self {
            memory,
            start_address,
            count,
        })
    }

    pub fn encode(&self) -> [u8; READ_SIZE] {
        let mut out = [0u8; READ_SIZE];
        out[0] = self.memory as u8;
        out[1..5].copy_from_slice(&self.start_address.to_be_bytes());
        out[5..9].copy_from_slice(&(self.count as u32).to_be_bytes());
        out
    }
}

fn be_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}
