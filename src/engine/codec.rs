//! Byte-level decoding and encoding of the pipeline's endpoints.
//!
//! Units flowing between stages are `u32` values: bytes on a byte side,
//! scalar values on a Unicode side.

use std::collections::VecDeque;

use crate::form::BaseForm;
use crate::{Error, Result};

/// Outcome of decoding the first character of a byte slice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decoded {
    Char { value: u32, len: usize },
    Truncated,
    Malformed,
}

/// Decode the first character of `bytes`
fn decode_one(base: BaseForm, bytes: &[u8]) -> Decoded {
    match base {
        BaseForm::Unspecified | BaseForm::RawBytes => match bytes.first() {
            Some(&b) => Decoded::Char {
                value: u32::from(b),
                len: 1,
            },
            None => Decoded::Truncated,
        },
        BaseForm::UTF8 => decode_utf8(bytes),
        BaseForm::UTF16LE => decode_utf16(bytes, u16::from_le_bytes),
        BaseForm::UTF16BE => decode_utf16(bytes, u16::from_be_bytes),
        BaseForm::UTF32LE => decode_utf32(bytes, u32::from_le_bytes),
        BaseForm::UTF32BE => decode_utf32(bytes, u32::from_be_bytes),
    }
}

fn first_char(valid: &[u8]) -> Decoded {
    match std::str::from_utf8(valid).ok().and_then(|s| s.chars().next()) {
        Some(c) => Decoded::Char {
            value: c as u32,
            len: c.len_utf8(),
        },
        None => Decoded::Malformed,
    }
}

fn decode_utf8(bytes: &[u8]) -> Decoded {
    match std::str::from_utf8(bytes) {
        Ok(_) => first_char(bytes),
        Err(e) if e.valid_up_to() > 0 => first_char(&bytes[..e.valid_up_to()]),
        // A prefix of a valid sequence that ran out of bytes
        Err(e) if e.error_len().is_none() => Decoded::Truncated,
        Err(_) => Decoded::Malformed,
    }
}

fn decode_utf16(bytes: &[u8], read: fn([u8; 2]) -> u16) -> Decoded {
    if bytes.len() < 2 {
        return Decoded::Truncated;
    }
    let unit = read([bytes[0], bytes[1]]);
    match unit {
        0xD800..=0xDBFF => {
            if bytes.len() < 4 {
                return Decoded::Truncated;
            }
            let low = read([bytes[2], bytes[3]]);
            if !(0xDC00..=0xDFFF).contains(&low) {
                return Decoded::Malformed;
            }
            let value = 0x10000 + ((u32::from(unit) - 0xD800) << 10) + (u32::from(low) - 0xDC00);
            Decoded::Char { value, len: 4 }
        }
        0xDC00..=0xDFFF => Decoded::Malformed,
        _ => Decoded::Char {
            value: u32::from(unit),
            len: 2,
        },
    }
}

fn decode_utf32(bytes: &[u8], read: fn([u8; 4]) -> u32) -> Decoded {
    if bytes.len() < 4 {
        return Decoded::Truncated;
    }
    let value = read([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if char::from_u32(value).is_some() {
        Decoded::Char { value, len: 4 }
    } else {
        Decoded::Malformed
    }
}

/// One step of the incremental decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// A whole character; `taken` bytes of the current input were used
    /// and `width` is its full encoded length
    Char { value: u32, width: u8, taken: usize },
    /// The rest of the input was stashed as a partial sequence
    Partial { taken: usize },
    /// The bytes at the cursor can never form a character
    Malformed,
}

/// Incremental decoder that carries an incomplete sequence between calls
#[derive(Debug, Clone)]
pub(crate) struct Decoder {
    base: BaseForm,
    partial: [u8; 4],
    partial_len: usize,
}

impl Decoder {
    pub fn new(base: BaseForm) -> Self {
        Self {
            base,
            partial: [0; 4],
            partial_len: 0,
        }
    }

    /// Bytes held from earlier input
    pub fn partial_len(&self) -> usize {
        self.partial_len
    }

    pub fn reset(&mut self) {
        self.partial_len = 0;
    }

    /// Decode the next character from `input`, which must not be empty
    pub fn next(&mut self, input: &[u8]) -> Step {
        let held = self.partial_len;
        let mut buf = [0u8; 4];
        buf[..held].copy_from_slice(&self.partial[..held]);
        let extra = input.len().min(4 - held);
        buf[held..held + extra].copy_from_slice(&input[..extra]);
        let available = held + extra;

        match decode_one(self.base, &buf[..available]) {
            Decoded::Char { value, len } => match len.checked_sub(held) {
                Some(taken) => {
                    self.partial_len = 0;
                    Step::Char {
                        value,
                        width: len as u8,
                        taken,
                    }
                }
                None => Step::Malformed,
            },
            Decoded::Truncated => {
                self.partial = buf;
                self.partial_len = available;
                Step::Partial { taken: extra }
            }
            Decoded::Malformed => Step::Malformed,
        }
    }
}

/// Encoder for the target side
#[derive(Debug, Clone, Copy)]
pub(crate) struct Encoder {
    base: BaseForm,
}

impl Encoder {
    pub fn new(base: BaseForm) -> Self {
        Self { base }
    }

    pub fn encode(&self, unit: u32, out: &mut VecDeque<u8>) -> Result<()> {
        if matches!(self.base, BaseForm::RawBytes | BaseForm::Unspecified) {
            let byte = u8::try_from(unit).map_err(|_| {
                Error::Exception(format!("value 0x{:X} reached a byte encoder", unit))
            })?;
            out.push_back(byte);
            return Ok(());
        }

        let ch = char::from_u32(unit).ok_or_else(|| {
            Error::Exception(format!("value 0x{:X} is not a Unicode scalar value", unit))
        })?;
        match self.base {
            BaseForm::UTF8 => {
                let mut buf = [0u8; 4];
                out.extend(ch.encode_utf8(&mut buf).as_bytes());
            }
            BaseForm::UTF16LE | BaseForm::UTF16BE => {
                let mut buf = [0u16; 2];
                for code_unit in ch.encode_utf16(&mut buf) {
                    match self.base {
                        BaseForm::UTF16LE => out.extend(code_unit.to_le_bytes()),
                        _ => out.extend(code_unit.to_be_bytes()),
                    }
                }
            }
            BaseForm::UTF32LE => out.extend(unit.to_le_bytes()),
            BaseForm::UTF32BE => out.extend(unit.to_be_bytes()),
            BaseForm::RawBytes | BaseForm::Unspecified => {}
        }
        Ok(())
    }
}
