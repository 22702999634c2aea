//! UART bridge stand-in.
//!
//! Raw UART bridging to the target is handled outside this crate. This
//! adapter accepts the dispatcher's start/stop requests, keeps the bound
//! queues so the owning connection stays consistent, and discards inbound
//! UART-group packets with a log entry each time the dispatcher services it.

use log::{debug, info};

use crate::error::Error;
use crate::net::QueueBinding;
use crate::ports::UartPort;

#[derive(Default)]
pub struct LogUartBridge {
    binding: Option<QueueBinding>,
    discarded: u32,
}

impl LogUartBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.binding.is_some()
    }

    /// Packets drained and discarded since creation.
    pub fn discarded(&self) -> u32 {
        self.discarded
    }
}

impl UartPort for LogUartBridge {
    fn start(&mut self, binding: QueueBinding) -> Result<(), Error> {
        info!("UART: bridge started");
        self.binding = Some(binding);
        Ok(())
    }

    fn stop(&mut self) {
        if self.binding.take().is_some() {
            info!("UART: bridge stopped");
        }
    }

    /// Drain whatever the dispatcher queued for the bridge.
    fn service(&mut self) -> usize {
        let Some(binding) = self.binding.as_ref() else {
            return 0;
        };
        let mut n = 0;
        while let Some(packet) = binding.inbound.try_pop() {
            debug!(
                "UART: discarding {:?} ({} bytes)",
                packet.header.packet_type(),
                packet.header.data_size()
            );
            n += 1;
        }
        self.discarded += n as u32;
        n
    }
}
