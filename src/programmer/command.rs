//! ISP command synthesis and echo checking.
//!
//! A template describes one 32-bit ISP instruction, MSB first:
//!
//! | token    | bit value                                   |
//! |----------|---------------------------------------------|
//! | `0`, `1` | literal                                     |
//! | `x`, `o` | don't-care / output bit, sent as 0          |
//! | `a<N>`   | bit `N` of the target address (`N` ≤ 31)    |
//! | `i`      | next input bit, most significant first      |
//!
//! ASCII whitespace is ignored, so templates may be grouped by byte.

use crate::error::TemplateError;

/// Width of one ISP instruction in bytes.
pub const AVR_CMD_SIZE: usize = 4;

pub type AvrCommand = [u8; AVR_CMD_SIZE];

const CMD_BITS: usize = AVR_CMD_SIZE * 8;

/// Expand a template into a command for `address` and `input`.
pub fn synthesize(template: &str, address: u32, input: u8) -> Result<AvrCommand, TemplateError> {
    let mut cmd = [0u8; AVR_CMD_SIZE];
    let mut bit = 0usize;
    let mut input_bits = 0u8;
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        let value = match c {
            c if c.is_ascii_whitespace() => continue,
            '0' | 'x' | 'o' => false,
            '1' => true,
            'a' => {
                let mut index: Option<u32> = None;
                while let Some(d) = chars.peek().and_then(|d| d.to_digit(10)) {
                    chars.next();
                    let n = index.unwrap_or(0).saturating_mul(10).saturating_add(d);
                    index = Some(n);
                }
                let index = index.ok_or(TemplateError::MissingAddressBit)?;
                if index > 31 {
                    return Err(TemplateError::AddressBitOutOfRange(index));
                }
                (address >> index) & 1 == 1
            }
            'i' => {
                if input_bits == 8 {
                    return Err(TemplateError::TooManyInputBits);
                }
                let v = (input >> (7 - input_bits)) & 1 == 1;
                input_bits += 1;
                v
            }
            other => return Err(TemplateError::UnknownToken(other)),
        };

        if bit == CMD_BITS {
            return Err(TemplateError::TooManyBits);
        }
        if value {
            cmd[bit / 8] |= 0x80 >> (bit % 8);
        }
        bit += 1;
    }

    Ok(cmd)
}

/// Expand `template` once to prove it is well formed.
pub fn validate_template(template: &str) -> Result<(), TemplateError> {
    synthesize(template, 0, 0).map(|_| ())
}

/// How much of a response must mirror the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoCheck {
    /// Every answer byte after the first echoes the previous command byte.
    Full,
    /// As `Full`, but the final byte carries data and is not compared.
    SkipDataByte,
}

/// The target shifts the previous command out one byte behind: `answer[i]`
/// must equal `sent[i - 1]`.
pub fn check_echo(sent: &AvrCommand, answer: &AvrCommand, check: EchoCheck) -> bool {
    let end = match check {
        EchoCheck::Full => AVR_CMD_SIZE,
        EchoCheck::SkipDataByte => AVR_CMD_SIZE - 1,
    };
    (1..end).all(|i| answer[i] == sent[i - 1])
}
