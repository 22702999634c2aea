//! Unified error types for the ISP bridge firmware.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! dispatcher's and engine's recoverability decisions uniform. All variants
//! are `Copy` so they can travel through queues and logs without allocation.
//! Lower layers (codec, pool, framing, command synthesis) return the
//! specific sub-error; they never log and never restart anything.

use core::fmt;

use crate::programmer::command::AvrCommand;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A packet header or payload could not be decoded.
    Codec(CodecError),
    /// A fixed-capacity pool refused an operation.
    Pool(PoolError),
    /// A bounded queue refused an operation.
    Queue(QueueError),
    /// Socket-level failure.
    Link(LinkError),
    /// ISP command or programming failure.
    Isp(IspError),
    /// Configuration is invalid.
    Config(&'static str),
    /// Peripheral or task initialisation failed.
    Init(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Codec(e) => write!(f, "codec: {e}"),
            Self::Pool(e) => write!(f, "pool: {e}"),
            Self::Queue(e) => write!(f, "queue: {e}"),
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Isp(e) => write!(f, "isp: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
        }
    }
}

impl core::error::Error for Error {}

// ---------------------------------------------------------------------------
// Codec errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// First header byte is not the frame start byte.
    WrongStartByte(u8),
    /// Declared payload size exceeds the protocol maximum.
    WrongSize(u16),
    /// Type byte matches no group or no type within its group.
    WrongType(u8),
    /// Payload handed to a packet builder does not fit the buffer.
    PayloadTooLarge(usize),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongStartByte(b) => write!(f, "wrong start byte 0x{b:02X}"),
            Self::WrongSize(n) => write!(f, "declared size {n} exceeds maximum"),
            Self::WrongType(t) => write!(f, "unknown packet type 0x{t:02X}"),
            Self::PayloadTooLarge(n) => write!(f, "payload of {n} bytes does not fit"),
        }
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

// ---------------------------------------------------------------------------
// Pool errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// Every object is allocated and none is free.
    Exhausted,
    /// Release called while every allocated object is already free.
    AlreadyFull,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => write!(f, "pool exhausted"),
            Self::AlreadyFull => write!(f, "release on a full pool"),
        }
    }
}

impl From<PoolError> for Error {
    fn from(e: PoolError) -> Self {
        Self::Pool(e)
    }
}

// ---------------------------------------------------------------------------
// Queue errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The queue stayed full for the whole bounded wait.
    Full,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "queue full"),
        }
    }
}

impl From<QueueError> for Error {
    fn from(e: QueueError) -> Self {
        Self::Queue(e)
    }
}

// ---------------------------------------------------------------------------
// Link errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// Non-blocking operation would have blocked.
    WouldBlock,
    /// Peer closed the connection (zero-length read).
    Closed,
    /// A started frame or write did not complete in time.
    TimedOut,
    /// Any other socket error.
    Io(std::io::ErrorKind),
}

impl LinkError {
    /// Whether the connection must be torn down after this error.
    pub fn is_fatal(self) -> bool {
        !matches!(self, Self::WouldBlock)
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WouldBlock => write!(f, "operation would block"),
            Self::Closed => write!(f, "connection closed by peer"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Io(kind) => write!(f, "socket error: {kind}"),
        }
    }
}

impl From<std::io::Error> for LinkError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::WouldBlock => Self::WouldBlock,
            std::io::ErrorKind::TimedOut => Self::TimedOut,
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => Self::Closed,
            kind => Self::Io(kind),
        }
    }
}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

// ---------------------------------------------------------------------------
// Template errors
// ---------------------------------------------------------------------------

/// Malformed ISP command template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateError {
    /// Character that is not a template token.
    UnknownToken(char),
    /// `a` not followed by a bit index.
    MissingAddressBit,
    /// Address bit index above 31.
    AddressBitOutOfRange(u32),
    /// Template encodes more bits than one ISP command holds.
    TooManyBits,
    /// More than eight `i` tokens.
    TooManyInputBits,
    /// Template longer than the storage limit.
    TooLong(usize),
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownToken(c) => write!(f, "unknown template token {c:?}"),
            Self::MissingAddressBit => write!(f, "address token without bit index"),
            Self::AddressBitOutOfRange(n) => write!(f, "address bit a{n} out of range"),
            Self::TooManyBits => write!(f, "template exceeds command width"),
            Self::TooManyInputBits => write!(f, "template consumes more than 8 input bits"),
            Self::TooLong(n) => write!(f, "template of {n} chars is too long"),
        }
    }
}

impl From<TemplateError> for Error {
    fn from(e: TemplateError) -> Self {
        Self::Isp(IspError::Template(e))
    }
}

// ---------------------------------------------------------------------------
// ISP errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IspError {
    /// SPI bus transfer failed.
    Bus(embedded_hal::spi::ErrorKind),
    /// Target did not echo the previous command bytes.
    EchoMismatch { sent: AvrCommand, answer: AvrCommand },
    /// Command template could not be expanded.
    Template(TemplateError),
    /// Memory type byte names no supported memory.
    UnsupportedMemory(u8),
    /// Request payload is malformed.
    InvalidRequest(&'static str),
    /// A memory operation arrived before any MCU description.
    NoMcuInfo,
    /// Programming mode could not be entered.
    EnterPgmFailed { attempts: u8 },
    /// Address arithmetic left the 32-bit range.
    AddressOverflow,
}

impl fmt::Display for IspError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus(kind) => write!(f, "SPI bus error: {kind:?}"),
            Self::EchoMismatch { sent, answer } => write!(
                f,
                "echo mismatch: sent {:02X?}, answer {:02X?}",
                sent, answer
            ),
            Self::Template(e) => write!(f, "template: {e}"),
            Self::UnsupportedMemory(b) => write!(f, "unsupported memory type 0x{b:02X}"),
            Self::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            Self::NoMcuInfo => write!(f, "no MCU info loaded"),
            Self::EnterPgmFailed { attempts } => {
                write!(f, "failed to enter programming mode after {attempts} attempts")
            }
            Self::AddressOverflow => write!(f, "address overflow"),
        }
    }
}

impl From<IspError> for Error {
    fn from(e: IspError) -> Self {
        Self::Isp(e)
    }
}

impl From<TemplateError> for IspError {
    fn from(e: TemplateError) -> Self {
        Self::Template(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
