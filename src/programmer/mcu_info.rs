//! Target device description carried by a Load-MCU-Info packet.
//!
//! Payload layout:
//! ```text
//! [len][flash load lo] [len][flash load hi] [len][flash read lo] [len][flash read hi]
//! [flash wait ms]
//! [len][eeprom write] [len][eeprom read]
//! [eeprom wait ms]
//! [program enable: 4 bytes]
//! ```

use core::fmt;

use crate::error::{IspError, TemplateError};

use super::command::{AVR_CMD_SIZE, AvrCommand, synthesize, validate_template};

/// Longest template a length byte can describe.
pub const MAX_TEMPLATE_LEN: usize = u8::MAX as usize;

/// A validated command template.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Template(heapless::String<MAX_TEMPLATE_LEN>);

impl Template {
    pub fn new(text: &str) -> Result<Self, TemplateError> {
        validate_template(text)?;
        let mut s = heapless::String::new();
        s.push_str(text)
            .map_err(|()| TemplateError::TooLong(text.len()))?;
        Ok(Self(s))
    }

    pub fn expand(&self, address: u32, input: u8) -> Result<AvrCommand, TemplateError> {
        synthesize(&self.0, address, input)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AvrMcuInfo {
    pub flash_load_lo: Template,
    pub flash_load_hi: Template,
    pub flash_read_lo: Template,
    pub flash_read_hi: Template,
    pub flash_wait_ms: u8,
    pub eeprom_write: Template,
    pub eeprom_read: Template,
    pub eeprom_wait_ms: u8,
    pub pgm_enable: AvrCommand,
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], IspError> {
        let end = self.pos + n;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or(IspError::InvalidRequest("truncated MCU info"))?;
        self.pos = end;
        Ok(bytes)
    }

    fn byte(&mut self) -> Result<u8, IspError> {
        Ok(self.take(1)?[0])
    }

    fn template(&mut self) -> Result<Template, IspError> {
        let len = self.byte()? as usize;
        let raw = self.take(len)?;
        let text = core::str::from_utf8(raw)
            .map_err(|_| IspError::InvalidRequest("template is not ASCII"))?;
        Ok(Template::new(text)?)
    }
}

impl AvrMcuInfo {
    pub fn parse(payload: &[u8]) -> Result<Self, IspError> {
        let mut c = Cursor { buf: payload, pos: 0 };

        let flash_load_lo = c.template()?;
        let flash_load_hi = c.template()?;
        let flash_read_lo = c.template()?;
        let flash_read_hi = c.template()?;
        let flash_wait_ms = c.byte()?;
        let eeprom_write = c.template()?;
        let eeprom_read = c.template()?;
        let eeprom_wait_ms = c.byte()?;

        let mut pgm_enable = [0u8; AVR_CMD_SIZE];
        pgm_enable.copy_from_slice(c.take(AVR_CMD_SIZE)?);

        Ok(Self {
            flash_load_lo,
            flash_load_hi,
            flash_read_lo,
            flash_read_hi,
            flash_wait_ms,
            eeprom_write,
            eeprom_read,
            eeprom_wait_ms,
            pgm_enable,
        })
    }

    /// Wire form, as a host tool would send it.
    pub fn encode(&self) -> Vec<u8> {
        fn put(out: &mut Vec<u8>, t: &Template) {
            out.push(t.as_str().len() as u8);
            out.extend_from_slice(t.as_str().as_bytes());
        }

        let mut out = Vec::new();
        put(&mut out, &self.flash_load_lo);
        put(&mut out, &self.flash_load_hi);
        put(&mut out, &self.flash_read_lo);
        put(&mut out, &self.flash_read_hi);
        out.push(self.flash_wait_ms);
        put(&mut out, &self.eeprom_write);
        put(&mut out, &self.eeprom_read);
        out.push(self.eeprom_wait_ms);
        out.extend_from_slice(&self.pgm_enable);
        out
    }
}
