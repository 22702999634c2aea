//! Packet header codec.
//!
//! Wire format (5 bytes, size big-endian):
//! ```text
//! ┌───────┬───────┬──────┬─────────────────┐
//! │ 0x1B  │ flags │ type │ data_size (u16) │
//! └───────┴───────┴──────┴─────────────────┘
//!   [0]     [1]     [2]     [3..5]
//! ```
//!
//! The high nibble of the type byte selects the group, the full byte
//! selects the concrete type within that group's table.

use crate::error::CodecError;

/// First byte of every frame.
pub const START_BYTE: u8 = 0x1B;

/// Header length on the wire.
pub const HEADER_SIZE: usize = 5;

/// Largest payload a header may declare. Equals the payload buffer capacity.
pub const MAX_DATA_LENGTH: usize = 1029;

const FLAG_COMPRESSION: u8 = 1 << 0;
const FLAG_ENCRYPTION: u8 = 1 << 1;
const FLAG_SIGN: u8 = 1 << 2;

const GROUP_MASK: u8 = 0xF0;

// ---------------------------------------------------------------------------
// Groups and types
// ---------------------------------------------------------------------------

/// Routing partition a packet type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketGroup {
    Control,
    Programmer,
    Uart,
}

impl PacketGroup {
    pub const fn mask(self) -> u8 {
        match self {
            Self::Control => 0x10,
            Self::Programmer => 0x20,
            Self::Uart => 0x30,
        }
    }

    fn from_type_byte(byte: u8) -> Option<Self> {
        match byte & GROUP_MASK {
            0x10 => Some(Self::Control),
            0x20 => Some(Self::Programmer),
            0x30 => Some(Self::Uart),
            _ => None,
        }
    }
}

/// Every packet type the protocol defines, with its wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    // Control
    ProgrammerInit = 0x10,
    ProgrammerStop = 0x11,
    UartInit = 0x12,
    UartStop = 0x13,
    Reset = 0x14,
    Ack = 0x15,
    CloseConnection = 0x16,
    NetworkConfiguration = 0x17,
    ObserverKey = 0x18,
    EncryptionConfig = 0x19,
    SignConfig = 0x1A,
    EnableEncryption = 0x1B,
    EnableSign = 0x1C,
    /// Device → host failure description (UTF-8 text).
    Error = 0x1D,

    // Programmer
    LoadMcuInfo = 0x20,
    ProgramMemory = 0x21,
    ReadMemory = 0x22,
    Memory = 0x23,
    Cmd = 0x24,

    // Uart
    UartConfiguration = 0x30,
    UartData = 0x31,
}

const CONTROL_TYPES: [PacketType; 14] = [
    PacketType::ProgrammerInit,
    PacketType::ProgrammerStop,
    PacketType::UartInit,
    PacketType::UartStop,
    PacketType::Reset,
    PacketType::Ack,
    PacketType::CloseConnection,
    PacketType::NetworkConfiguration,
    PacketType::ObserverKey,
    PacketType::EncryptionConfig,
    PacketType::SignConfig,
    PacketType::EnableEncryption,
    PacketType::EnableSign,
    PacketType::Error,
];

const PROGRAMMER_TYPES: [PacketType; 5] = [
    PacketType::LoadMcuInfo,
    PacketType::ProgramMemory,
    PacketType::ReadMemory,
    PacketType::Memory,
    PacketType::Cmd,
];

const UART_TYPES: [PacketType; 2] = [PacketType::UartConfiguration, PacketType::UartData];

impl PacketType {
    /// Every defined type, grouped in wire order.
    pub const ALL: [PacketType; 21] = [
        Self::ProgrammerInit,
        Self::ProgrammerStop,
        Self::UartInit,
        Self::UartStop,
        Self::Reset,
        Self::Ack,
        Self::CloseConnection,
        Self::NetworkConfiguration,
        Self::ObserverKey,
        Self::EncryptionConfig,
        Self::SignConfig,
        Self::EnableEncryption,
        Self::EnableSign,
        Self::Error,
        Self::LoadMcuInfo,
        Self::ProgramMemory,
        Self::ReadMemory,
        Self::Memory,
        Self::Cmd,
        Self::UartConfiguration,
        Self::UartData,
    ];

    pub const fn wire(self) -> u8 {
        self as u8
    }

    pub const fn group(self) -> PacketGroup {
        match self {
            Self::ProgrammerInit
            | Self::ProgrammerStop
            | Self::UartInit
            | Self::UartStop
            | Self::Reset
            | Self::Ack
            | Self::CloseConnection
            | Self::NetworkConfiguration
            | Self::ObserverKey
            | Self::EncryptionConfig
            | Self::SignConfig
            | Self::EnableEncryption
            | Self::EnableSign
            | Self::Error => PacketGroup::Control,
            Self::LoadMcuInfo
            | Self::ProgramMemory
            | Self::ReadMemory
            | Self::Memory
            | Self::Cmd => PacketGroup::Programmer,
            Self::UartConfiguration | Self::UartData => PacketGroup::Uart,
        }
    }

    /// Resolve a type byte through its group's table.
    pub fn from_wire(byte: u8) -> Result<Self, CodecError> {
        let table: &[PacketType] = match PacketGroup::from_type_byte(byte) {
            Some(PacketGroup::Control) => &CONTROL_TYPES,
            Some(PacketGroup::Programmer) => &PROGRAMMER_TYPES,
            Some(PacketGroup::Uart) => &UART_TYPES,
            None => return Err(CodecError::WrongType(byte)),
        };
        table
            .iter()
            .copied()
            .find(|t| t.wire() == byte)
            .ok_or(CodecError::WrongType(byte))
    }
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Decoded packet header. The group is always derived from the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    packet_type: PacketType,
    data_size: u16,
    pub compression: bool,
    pub encryption: bool,
    pub sign: bool,
}

impl PacketHeader {
    /// Header with all flags cleared.
    pub fn new(packet_type: PacketType, data_size: usize) -> Result<Self, CodecError> {
        let data_size = checked_size(data_size)?;
        Ok(Self {
            packet_type,
            data_size,
            compression: false,
            encryption: false,
            sign: false,
        })
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn group(&self) -> PacketGroup {
        self.packet_type.group()
    }

    pub fn data_size(&self) -> usize {
        self.data_size as usize
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.compression {
            flags |= FLAG_COMPRESSION;
        }
        if self.encryption {
            flags |= FLAG_ENCRYPTION;
        }
        if self.sign {
            flags |= FLAG_SIGN;
        }
        flags
    }
}

impl Default for PacketHeader {
    fn default() -> Self {
        Self {
            packet_type: PacketType::Ack,
            data_size: 0,
            compression: false,
            encryption: false,
            sign: false,
        }
    }
}

fn checked_size(size: usize) -> Result<u16, CodecError> {
    if size > MAX_DATA_LENGTH {
        // Anything past the maximum is reported saturated to u16.
        return Err(CodecError::WrongSize(u16::try_from(size).unwrap_or(u16::MAX)));
    }
    Ok(size as u16)
}

/// Decode a header. Performs no I/O; on error the body must not be read.
pub fn parse_header(raw: &[u8; HEADER_SIZE]) -> Result<PacketHeader, CodecError> {
    if raw[0] != START_BYTE {
        return Err(CodecError::WrongStartByte(raw[0]));
    }
    let flags = raw[1];
    let packet_type = PacketType::from_wire(raw[2])?;
    let size = u16::from_be_bytes([raw[3], raw[4]]);
    if size as usize > MAX_DATA_LENGTH {
        return Err(CodecError::WrongSize(size));
    }
    Ok(PacketHeader {
        packet_type,
        data_size: size,
        compression: flags & FLAG_COMPRESSION != 0,
        encryption: flags & FLAG_ENCRYPTION != 0,
        sign: flags & FLAG_SIGN != 0,
    })
}

/// Encode a header into its wire form.
pub fn serialize_header(header: &PacketHeader) -> [u8; HEADER_SIZE] {
    let size = header.data_size.to_be_bytes();
    [
        START_BYTE,
        header.flags(),
        header.packet_type.wire(),
        size[0],
        size[1],
    ]
}
