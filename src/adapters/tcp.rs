//! TCP transport adapter.
//!
//! ESP-IDF maps `std::net` onto lwIP sockets, so the same code serves the
//! device and host tests. The listener is non-blocking; accepted streams
//! switch to non-blocking mode when the record is activated.

use std::io::{ErrorKind, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};

use log::debug;

use crate::error::LinkError;
use crate::net::{Listener, Transport};

/// One accepted client socket.
pub struct TcpLink {
    stream: TcpStream,
    peer: Option<SocketAddr>,
}

impl TcpLink {
    pub fn new(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        Self { stream, peer }
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }
}

impl Transport for TcpLink {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        match self.stream.read(buf) {
            Ok(0) if !buf.is_empty() => Err(LinkError::Closed),
            Ok(n) => Ok(n),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, LinkError> {
        Ok(self.stream.write(data)?)
    }

    fn flush(&mut self) -> Result<(), LinkError> {
        Ok(self.stream.flush()?)
    }

    fn readable(&mut self) -> Result<bool, LinkError> {
        let mut probe = [0u8; 1];
        match self.stream.peek(&mut probe) {
            // Ok(0) is an orderly shutdown; the next read reports it.
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn set_nonblocking(&mut self) -> Result<(), LinkError> {
        self.stream.set_nonblocking(true)?;
        self.stream.set_nodelay(true)?;
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown(std::net::Shutdown::Both) {
            debug!("TCP: shutdown {:?}: {}", self.peer, e);
        }
    }
}

/// Non-blocking listening socket.
pub struct TcpPortListener {
    listener: TcpListener,
}

impl TcpPortListener {
    /// Bind `0.0.0.0:port`. Port 0 picks an ephemeral port.
    pub fn bind(port: u16) -> Result<Self, LinkError> {
        Self::bind_addr(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
    }

    pub fn bind_addr(addr: SocketAddr) -> Result<Self, LinkError> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, LinkError> {
        Ok(self.listener.local_addr()?)
    }
}

impl Listener for TcpPortListener {
    type Link = TcpLink;

    fn try_accept(&mut self) -> Result<Option<TcpLink>, LinkError> {
        match self.listener.accept() {
            Ok((stream, addr)) => {
                debug!("TCP: accepted {}", addr);
                Ok(Some(TcpLink::new(stream)))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
