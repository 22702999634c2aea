//! Binary packet protocol: header codec and the pooled packet container.

pub mod header;
pub mod packet;

pub use header::{
    HEADER_SIZE, MAX_DATA_LENGTH, PacketGroup, PacketHeader, PacketType, START_BYTE, parse_header,
    serialize_header,
};
pub use packet::{Packet, PacketPool, PooledPacket, packet_pool};
