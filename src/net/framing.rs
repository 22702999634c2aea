//! Packet framing over a non-blocking [`Transport`].
//!
//! Reads pull one header, validate it, then pull exactly `data_size` body
//! bytes. Writes stamp the canonical header and push header and body out in
//! full. Both directions retry on `WouldBlock` until their deadline, yielding
//! to the executor on a reactor timer between attempts.

use core::time::Duration;
use std::time::Instant;

use crate::error::{Error, LinkError};
use crate::protocol::{Packet, parse_header};

use super::transport::Transport;

/// Back-off between retries on a blocked socket.
const RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// Read one packet into `packet`.
///
/// `Error::Codec` means the header was rejected and no body was read; the
/// connection is still usable. `Error::Link` is fatal for the connection.
pub async fn read_packet<T: Transport>(
    link: &mut T,
    packet: &mut Packet,
    timeout: Duration,
) -> Result<(), Error> {
    let deadline = Instant::now() + timeout;

    read_exact(link, packet.raw_header_mut(), deadline).await?;
    let header = parse_header(packet.raw_header_mut())?;
    packet.header = header;

    let size = header.data_size();
    if size > 0 {
        read_exact(link, &mut packet.payload_mut()[..size], deadline).await?;
    }
    Ok(())
}

/// Write `packet` with a freshly serialized header.
pub async fn write_packet<T: Transport>(
    link: &mut T,
    packet: &mut Packet,
    timeout: Duration,
) -> Result<(), LinkError> {
    let deadline = Instant::now() + timeout;
    let header = *packet.stamp_header();
    write_all(link, &header, deadline).await?;
    write_all(link, packet.data(), deadline).await?;
    link.flush()
}

async fn read_exact<T: Transport>(
    link: &mut T,
    buf: &mut [u8],
    deadline: Instant,
) -> Result<(), LinkError> {
    let mut filled = 0;
    while filled < buf.len() {
        match link.read(&mut buf[filled..]) {
            Ok(0) => return Err(LinkError::Closed),
            Ok(n) => filled += n,
            Err(LinkError::WouldBlock) => wait_until(deadline).await?,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

async fn write_all<T: Transport>(link: &mut T, data: &[u8], deadline: Instant) -> Result<(), LinkError> {
    let mut sent = 0;
    while sent < data.len() {
        match link.write(&data[sent..]) {
            Ok(0) => return Err(LinkError::Closed),
            Ok(n) => sent += n,
            Err(LinkError::WouldBlock) => wait_until(deadline).await?,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

async fn wait_until(deadline: Instant) -> Result<(), LinkError> {
    let now = Instant::now();
    if now >= deadline {
        return Err(LinkError::TimedOut);
    }
    async_io_mini::Timer::after(RETRY_INTERVAL.min(deadline - now)).await;
    Ok(())
}
