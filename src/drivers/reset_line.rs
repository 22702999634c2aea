//! Target reset line.
//!
//! AVR reset is active-low: asserting reset drives the pin low, releasing
//! it drives the pin high. The line starts released so the target runs
//! until a client asks for programming.
//!
//! ## Dual-target design
//!
//! On ESP-IDF: wraps an `esp_idf_hal` output `PinDriver`.
//! On host/test: [`SimPin`] records the level in memory.

use core::convert::Infallible;

use embedded_hal::digital::{ErrorType, OutputPin};

use crate::error::Error;
use crate::ports::TargetReset;

pub struct ResetLine<P> {
    pin: P,
    asserted: bool,
}

impl<P: OutputPin> ResetLine<P> {
    /// Take the pin and release the target.
    pub fn new(mut pin: P) -> Result<Self, Error> {
        pin.set_high().map_err(|_| Error::Init("reset pin"))?;
        Ok(Self {
            pin,
            asserted: false,
        })
    }

    pub fn is_asserted(&self) -> bool {
        self.asserted
    }
}

impl<P: OutputPin + Send> TargetReset for ResetLine<P> {
    fn set_reset(&mut self, asserted: bool) -> Result<(), Error> {
        let res = if asserted {
            self.pin.set_low()
        } else {
            self.pin.set_high()
        };
        res.map_err(|_| Error::Init("reset pin write failed"))?;
        self.asserted = asserted;
        Ok(())
    }
}

/// In-memory output pin. `high` mirrors the driven level.
#[derive(Debug, Default)]
pub struct SimPin {
    pub high: bool,
    pub writes: u32,
}

impl ErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.high = false;
        self.writes += 1;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.high = true;
        self.writes += 1;
        Ok(())
    }
}
