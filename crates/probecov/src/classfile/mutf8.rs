//! Modified UTF-8, the string encoding of class file constants and exec files.
//!
//! Differs from UTF-8 in two ways: NUL is encoded as the two bytes `C0 80`
//! and supplementary characters are written as a surrogate pair, each half
//! encoded in three bytes.

use super::{FormatError, FormatResult};

/// Encode a string as modified UTF-8
#[must_use]
pub fn encode(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

/// Decode modified UTF-8 bytes
///
/// Unpaired surrogates are legal in class files; they decode to U+FFFD.
pub fn decode(bytes: &[u8]) -> FormatResult<String> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b & 0x80 == 0 {
            units.push(u16::from(b));
            i += 1;
        } else if b & 0xE0 == 0xC0 {
            let b2 = continuation(bytes, i + 1)?;
            units.push((u16::from(b & 0x1F) << 6) | u16::from(b2));
            i += 2;
        } else if b & 0xF0 == 0xE0 {
            let b2 = continuation(bytes, i + 1)?;
            let b3 = continuation(bytes, i + 2)?;
            units.push((u16::from(b & 0x0F) << 12) | (u16::from(b2) << 6) | u16::from(b3));
            i += 3;
        } else {
            return Err(FormatError::new(format!(
                "invalid modified UTF-8 lead byte 0x{b:02x}"
            )));
        }
    }
    Ok(String::from_utf16_lossy(&units))
}

fn continuation(bytes: &[u8], at: usize) -> FormatResult<u8> {
    match bytes.get(at) {
        Some(b) if b & 0xC0 == 0x80 => Ok(b & 0x3F),
        Some(b) => Err(FormatError::new(format!(
            "invalid modified UTF-8 continuation byte 0x{b:02x}"
        ))),
        None => Err(FormatError::new("truncated modified UTF-8 sequence")),
    }
}
