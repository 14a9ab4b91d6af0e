//! Character encodings for string fields.
//!
//! Strings are held as UTF-8 in the tree and converted to 8, 16, or 32-bit
//! units at the parse/build boundary.

use crate::error::{Error, Result};
use crate::field::Endianness;
use byteorder::{BigEndian, ByteOrder, LittleEndian};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharWidth {
    Utf8,
    Utf16,
    Utf32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoding {
    pub width: CharWidth,
    pub endianness: Endianness,
}

impl Encoding {
    pub const UTF8: Encoding = Encoding::new(CharWidth::Utf8, Endianness::Little);
    pub const UTF16_LE: Encoding = Encoding::new(CharWidth::Utf16, Endianness::Little);
    pub const UTF16_BE: Encoding = Encoding::new(CharWidth::Utf16, Endianness::Big);
    pub const UTF32_LE: Encoding = Encoding::new(CharWidth::Utf32, Endianness::Little);
    pub const UTF32_BE: Encoding = Encoding::new(CharWidth::Utf32, Endianness::Big);

    pub const fn new(width: CharWidth, endianness: Endianness) -> Self {
        Encoding { width, endianness }
    }

    /// Bytes per code unit.
    pub fn unit(&self) -> usize {
        match self.width {
            CharWidth::Utf8 => 1,
            CharWidth::Utf16 => 2,
            CharWidth::Utf32 => 4,
        }
    }
}

/// Decode raw units into a UTF-8 string.
pub fn decode(raw: &[u8], encoding: Encoding) -> Result<String> {
    let unit = encoding.unit();
    if raw.len() % unit != 0 {
        return Err(Error::Encoding(format!(
            "{} bytes is not a whole number of {unit}-byte units",
            raw.len()
        )));
    }
    match encoding.width {
        CharWidth::Utf8 => String::from_utf8(raw.to_vec()).map_err(|e| Error::Encoding(e.to_string())),
        CharWidth::Utf16 => {
            let units = raw.chunks_exact(2).map(|c| match encoding.endianness {
                Endianness::Big => BigEndian::read_u16(c),
                Endianness::Little => LittleEndian::read_u16(c),
            });
            char::decode_utf16(units)
                .collect::<std::result::Result<String, _>>()
                .map_err(|e| Error::Encoding(e.to_string()))
        }
        CharWidth::Utf32 => raw
            .chunks_exact(4)
            .map(|c| {
                let code = match encoding.endianness {
                    Endianness::Big => BigEndian::read_u32(c),
                    Endianness::Little => LittleEndian::read_u32(c),
                };
                char::from_u32(code).ok_or_else(|| Error::Encoding(format!("invalid code point {code:#x}")))
            })
            .collect(),
    }
}

/// Encode a string into raw units, without any terminator.
pub fn encode(s: &str, encoding: Encoding) -> Vec<u8> {
    match encoding.width {
        CharWidth::Utf8 => s.as_bytes().to_vec(),
        CharWidth::Utf16 => {
            let mut out = Vec::with_capacity(s.len() * 2);
            for u in s.encode_utf16() {
                let mut buf = [0u8; 2];
                match encoding.endianness {
                    Endianness::Big => BigEndian::write_u16(&mut buf, u),
                    Endianness::Little => LittleEndian::write_u16(&mut buf, u),
                }
                out.extend_from_slice(&buf);
            }
            out
        }
        CharWidth::Utf32 => {
            let mut out = Vec::with_capacity(s.len() * 4);
            for c in s.chars() {
                let mut buf = [0u8; 4];
                match encoding.endianness {
                    Endianness::Big => BigEndian::write_u32(&mut buf, c as u32),
                    Endianness::Little => LittleEndian::write_u32(&mut buf, c as u32),
                }
                out.extend_from_slice(&buf);
            }
            out
        }
    }
}

/// Encoded byte length of `s`, without any terminator.
pub fn encoded_len(s: &str, encoding: Encoding) -> u64 {
    match encoding.width {
        CharWidth::Utf8 => s.len() as u64,
        CharWidth::Utf16 => s.encode_utf16().count() as u64 * 2,
        CharWidth::Utf32 => s.chars().count() as u64 * 4,
    }
}
