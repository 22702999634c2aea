//! Device restart hook.

use log::error;

use crate::ports::SystemPort;

/// Restarts the chip on ESP-IDF; on the host the request is logged and
/// counted so tests can observe it.
#[derive(Debug, Default)]
pub struct SystemReset {
    requests: u32,
}

impl SystemReset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> u32 {
        self.requests
    }
}

impl SystemPort for SystemReset {
    fn restart(&mut self) {
        self.requests += 1;
        error!("SYS: restart requested");
        #[cfg(feature = "espidf")]
        esp_idf_hal::reset::restart();
    }
}
