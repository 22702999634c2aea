//! In-memory transport for integration tests.
//!
//! A [`MemLink`] is the device end of a connection; the matching
//! [`MemPeer`] is the host tool. Both share two byte queues, so tests can
//! write frames, run the dispatcher and read back what it sent.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use ispbridge::error::LinkError;
use ispbridge::net::{Listener, Transport};
use ispbridge::protocol::{HEADER_SIZE, PacketHeader, PacketType, parse_header, serialize_header};

#[derive(Default)]
struct Pipe {
    to_device: VecDeque<u8>,
    to_host: Vec<u8>,
    peer_closed: bool,
    device_shut: bool,
    nonblocking: bool,
}

type SharedPipe = Arc<Mutex<Pipe>>;

pub struct MemLink {
    pipe: SharedPipe,
}

#[derive(Clone)]
pub struct MemPeer {
    pipe: SharedPipe,
}

/// A connected link/peer pair.
pub fn pair() -> (MemLink, MemPeer) {
    let pipe = SharedPipe::default();
    (
        MemLink {
            pipe: Arc::clone(&pipe),
        },
        MemPeer { pipe },
    )
}

impl Transport for MemLink {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        let mut p = self.pipe.lock().unwrap();
        if p.device_shut {
            return Err(LinkError::Closed);
        }
        if p.to_device.is_empty() {
            return Err(if p.peer_closed {
                LinkError::Closed
            } else {
                LinkError::WouldBlock
            });
        }
        let n = buf.len().min(p.to_device.len());
        for (dst, src) in buf.iter_mut().zip(p.to_device.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, LinkError> {
        let mut p = self.pipe.lock().unwrap();
        if p.peer_closed || p.device_shut {
            return Err(LinkError::Closed);
        }
        p.to_host.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), LinkError> {
        Ok(())
    }

    fn readable(&mut self) -> Result<bool, LinkError> {
        let p = self.pipe.lock().unwrap();
        Ok(!p.to_device.is_empty() || p.peer_closed)
    }

    fn set_nonblocking(&mut self) -> Result<(), LinkError> {
        self.pipe.lock().unwrap().nonblocking = true;
        Ok(())
    }

    fn shutdown(&mut self) {
        self.pipe.lock().unwrap().device_shut = true;
    }
}

#[allow(dead_code)]
impl MemPeer {
    pub fn send_raw(&self, bytes: &[u8]) {
        self.pipe.lock().unwrap().to_device.extend(bytes.iter().copied());
    }

    pub fn send(&self, ty: PacketType, data: &[u8]) {
        self.send_raw(&frame(ty, data));
    }

    pub fn close(&self) {
        self.pipe.lock().unwrap().peer_closed = true;
    }

    /// Whether the device side shut the link down.
    pub fn is_shut(&self) -> bool {
        self.pipe.lock().unwrap().device_shut
    }

    pub fn is_nonblocking(&self) -> bool {
        self.pipe.lock().unwrap().nonblocking
    }

    /// Take every complete frame the device has written so far.
    pub fn received(&self) -> Vec<(PacketType, Vec<u8>)> {
        let mut p = self.pipe.lock().unwrap();
        let (frames, used) = split_frames(&p.to_host);
        p.to_host.drain(..used);
        frames
    }
}

pub fn frame(ty: PacketType, data: &[u8]) -> Vec<u8> {
    let header = PacketHeader::new(ty, data.len()).unwrap();
    let mut v = serialize_header(&header).to_vec();
    v.extend_from_slice(data);
    v
}

/// Decode back-to-back frames; returns them and the bytes consumed.
pub fn split_frames(mut bytes: &[u8]) -> (Vec<(PacketType, Vec<u8>)>, usize) {
    let mut frames = Vec::new();
    let mut used = 0;
    while bytes.len() >= HEADER_SIZE {
        let raw: [u8; HEADER_SIZE] = bytes[..HEADER_SIZE].try_into().unwrap();
        let header = parse_header(&raw).expect("device sent a malformed header");
        let end = HEADER_SIZE + header.data_size();
        if bytes.len() < end {
            break;
        }
        frames.push((header.packet_type(), bytes[HEADER_SIZE..end].to_vec()));
        used += end;
        bytes = &bytes[end..];
    }
    (frames, used)
}

/// Listener handing out links queued by [`MemListener::connect`].
#[derive(Clone, Default)]
pub struct MemListener {
    pending: Arc<Mutex<VecDeque<MemLink>>>,
}

#[allow(dead_code)]
impl MemListener {
    pub fn connect(&self) -> MemPeer {
        let (link, peer) = pair();
        self.pending.lock().unwrap().push_back(link);
        peer
    }

    pub fn backlog(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

impl Listener for MemListener {
    type Link = MemLink;

    fn try_accept(&mut self) -> Result<Option<MemLink>, LinkError> {
        Ok(self.pending.lock().unwrap().pop_front())
    }
}
