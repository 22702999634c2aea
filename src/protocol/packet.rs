//! Reusable packet container.
//!
//! Packets live in a [`PacketPool`] and are recycled without being cleared.
//! Every holder that takes one from the pool must either receive into it
//! (header first, then `data_size` bytes) or call [`Packet::fill`] before
//! reading anything back.

use std::sync::Arc;

use crate::config::PACKET_POOL_SIZE;
use crate::error::CodecError;
use crate::pool::{Pooled, SharedPool};

use super::header::{
    HEADER_SIZE, MAX_DATA_LENGTH, PacketHeader, PacketType, START_BYTE, serialize_header,
};

pub const ACK_SUCCESS: u8 = 1;
pub const ACK_FAILURE: u8 = 0;

pub struct Packet {
    pub header: PacketHeader,
    raw_header: [u8; HEADER_SIZE],
    payload: [u8; MAX_DATA_LENGTH],
}

impl Default for Packet {
    fn default() -> Self {
        Self {
            header: PacketHeader::default(),
            raw_header: [0; HEADER_SIZE],
            payload: [0; MAX_DATA_LENGTH],
        }
    }
}

impl core::fmt::Debug for Packet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Packet")
            .field("header", &self.header)
            .field("data", &self.data())
            .finish()
    }
}

impl Packet {
    /// Pool constructor: stamps the start byte once per allocation.
    pub fn prime(packet: &mut Packet) {
        packet.raw_header[0] = START_BYTE;
    }

    /// Overwrite type and payload, clearing all flags.
    pub fn fill(&mut self, packet_type: PacketType, data: &[u8]) -> Result<(), CodecError> {
        if data.len() > MAX_DATA_LENGTH {
            return Err(CodecError::PayloadTooLarge(data.len()));
        }
        self.header = PacketHeader::new(packet_type, data.len())?;
        self.payload[..data.len()].copy_from_slice(data);
        Ok(())
    }

    /// One-byte ACK carrying success or failure.
    pub fn fill_ack(&mut self, success: bool) {
        let status = if success { ACK_SUCCESS } else { ACK_FAILURE };
        // One byte always fits.
        let _ = self.fill(PacketType::Ack, &[status]);
    }

    /// Error packet carrying a text description, truncated to fit.
    pub fn fill_error(&mut self, text: &str) {
        let len = text.len().min(MAX_DATA_LENGTH);
        let _ = self.fill(PacketType::Error, &text.as_bytes()[..len]);
    }

    /// Payload bytes declared by the header.
    pub fn data(&self) -> &[u8] {
        &self.payload[..self.header.data_size()]
    }

    /// Whole payload buffer, for receiving or building in place.
    pub fn payload_mut(&mut self) -> &mut [u8; MAX_DATA_LENGTH] {
        &mut self.payload
    }

    /// Serialize the in-memory header into the raw buffer and return it.
    pub fn stamp_header(&mut self) -> &[u8; HEADER_SIZE] {
        self.raw_header = serialize_header(&self.header);
        &self.raw_header
    }

    /// Raw header buffer, for receiving.
    pub fn raw_header_mut(&mut self) -> &mut [u8; HEADER_SIZE] {
        &mut self.raw_header
    }

    /// Status byte of an ACK packet, if this is one.
    pub fn ack_status(&self) -> Option<bool> {
        match (self.header.packet_type(), self.data().first()) {
            (PacketType::Ack, Some(&b)) => Some(b == ACK_SUCCESS),
            _ => None,
        }
    }
}

pub type PacketPool = SharedPool<Packet, PACKET_POOL_SIZE>;
pub type PooledPacket = Pooled<Packet, PACKET_POOL_SIZE>;

/// Packet pool whose objects are primed on first allocation.
pub fn packet_pool() -> Arc<PacketPool> {
    PacketPool::with_constructor(Packet::prime)
}
