//! Binary encoding and decoding utilities
//!
//! Class files are big-endian throughout. This module provides the cursor-style
//! reader and the growable writer every other module builds on, plus the
//! modified UTF-8 codec used by `CONSTANT_Utf8` entries.

use thiserror::Error;

/// Errors that can occur while decoding class-file bytes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Unexpected end of the byte stream
    #[error("Unexpected end of class data at offset {0}")]
    UnexpectedEnd(usize),

    /// Invalid modified UTF-8 string
    #[error("Invalid modified UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    /// Invalid opcode
    #[error("Invalid opcode {0:#04x} at offset {1}")]
    InvalidOpcode(u8, usize),
}

/// Writer for big-endian class-file data
///
/// Provides methods for emitting integers, modified UTF-8 strings and raw
/// bytes into a binary buffer, with patching support for length prefixes.
pub struct BytecodeWriter {
    /// Internal buffer containing the encoded bytes
    pub(crate) buffer: Vec<u8>,
}

impl BytecodeWriter {
    /// Create a new writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new writer with capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Get the current buffer
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer and return the encoded bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get the current offset (number of bytes written)
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    // ===== Basic Emission =====

    /// Emit a raw byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a signed byte
    pub fn emit_i8(&mut self, value: i8) {
        self.buffer.push(value as u8);
    }

    /// Emit a 16-bit unsigned integer (big-endian)
    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Emit a 16-bit signed integer (big-endian)
    pub fn emit_i16(&mut self, value: i16) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Emit a 32-bit unsigned integer (big-endian)
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Emit a 32-bit signed integer (big-endian)
    pub fn emit_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Emit a 64-bit unsigned integer (big-endian)
    pub fn emit_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Emit raw bytes
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Emit a u16-length-prefixed modified UTF-8 string
    ///
    /// Strings whose encoding exceeds 65535 bytes are truncated at the
    /// length prefix; callers that care check [`modified_utf8_len`] first.
    pub fn emit_utf8(&mut self, value: &str) {
        let encoded = encode_modified_utf8(value);
        self.emit_u16(encoded.len() as u16);
        self.emit_bytes(&encoded);
    }

    /// Pad with zero bytes until the offset is a multiple of four
    pub fn align4(&mut self) {
        while self.buffer.len() % 4 != 0 {
            self.buffer.push(0);
        }
    }
}

impl Default for BytecodeWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Reader for big-endian class-file data
///
/// Every read is bounds-checked; running off the end yields
/// [`DecodeError::UnexpectedEnd`] with the position of the failed read.
pub struct BytecodeReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BytecodeReader<'a> {
    /// Create a new reader
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Get the current position in the buffer
    pub fn position(&self) -> usize {
        self.position
    }

    /// Get the remaining bytes in the buffer
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Check if there are more bytes to read
    pub fn has_more(&self) -> bool {
        self.position < self.buffer.len()
    }

    /// Advance past `count` bytes
    pub fn skip(&mut self, count: usize) -> Result<(), DecodeError> {
        if count > self.remaining() {
            return Err(DecodeError::UnexpectedEnd(self.position));
        }
        self.position += count;
        Ok(())
    }

    // ===== Basic Reading =====

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        if N > self.remaining() {
            return Err(DecodeError::UnexpectedEnd(self.position));
        }
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.buffer[self.position..self.position + N]);
        self.position += N;
        Ok(bytes)
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take::<1>()?[0])
    }

    /// Read a signed byte
    pub fn read_i8(&mut self) -> Result<i8, DecodeError> {
        Ok(self.take::<1>()?[0] as i8)
    }

    /// Read a 16-bit unsigned integer (big-endian)
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.take()?))
    }

    /// Read a 16-bit signed integer (big-endian)
    pub fn read_i16(&mut self) -> Result<i16, DecodeError> {
        Ok(i16::from_be_bytes(self.take()?))
    }

    /// Read a 32-bit unsigned integer (big-endian)
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.take()?))
    }

    /// Read a 32-bit signed integer (big-endian)
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_be_bytes(self.take()?))
    }

    /// Read a 64-bit unsigned integer (big-endian)
    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_be_bytes(self.take()?))
    }

    /// Read a fixed number of bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::UnexpectedEnd(self.position));
        }
        let bytes = &self.buffer[self.position..self.position + len];
        self.position += len;
        Ok(bytes)
    }

    /// Read a u16-length-prefixed modified UTF-8 string
    pub fn read_utf8(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u16()? as usize;
        let start = self.position;
        let bytes = self.read_bytes(len)?;
        decode_modified_utf8(bytes).ok_or(DecodeError::InvalidUtf8(start))
    }

    /// Skip padding so the position relative to `base` is a multiple of four
    pub fn align4(&mut self, base: usize) -> Result<(), DecodeError> {
        let relative = self.position - base;
        let pad = (4 - relative % 4) % 4;
        self.skip(pad)
    }
}

// ===== Modified UTF-8 =====

/// Decode a modified UTF-8 byte sequence
///
/// Accepts the JVM encoding: NUL as `C0 80`, supplementary characters as
/// surrogate pairs of three-byte sequences. Returns `None` on malformed input.
pub fn decode_modified_utf8(bytes: &[u8]) -> Option<String> {
    if bytes.iter().all(|&b| b != 0 && b < 0x80) {
        return std::str::from_utf8(bytes).ok().map(str::to_owned);
    }

    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == 0 {
            return None;
        } else if b < 0x80 {
            units.push(b as u16);
            i += 1;
        } else if b & 0xE0 == 0xC0 {
            let b2 = *bytes.get(i + 1)?;
            if b2 & 0xC0 != 0x80 {
                return None;
            }
            units.push((((b & 0x1F) as u16) << 6) | (b2 & 0x3F) as u16);
            i += 2;
        } else if b & 0xF0 == 0xE0 {
            let b2 = *bytes.get(i + 1)?;
            let b3 = *bytes.get(i + 2)?;
            if b2 & 0xC0 != 0x80 || b3 & 0xC0 != 0x80 {
                return None;
            }
            units.push(
                (((b & 0x0F) as u16) << 12) | (((b2 & 0x3F) as u16) << 6) | (b3 & 0x3F) as u16,
            );
            i += 3;
        } else {
            return None;
        }
    }
    String::from_utf16(&units).ok()
}

/// Encode a string as modified UTF-8
pub fn encode_modified_utf8(value: &str) -> Vec<u8> {
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

/// Length in bytes of the modified UTF-8 encoding of `value`
pub fn modified_utf8_len(value: &str) -> usize {
    value
        .encode_utf16()
        .map(|unit| match unit {
            0x0001..=0x007F => 1,
            0x0000 | 0x0080..=0x07FF => 2,
            _ => 3,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_layout() {
        let mut writer = BytecodeWriter::new();
        writer.emit_u16(0xCAFE);
        writer.emit_u32(0xDEADBEEF);
        assert_eq!(writer.buffer(), &[0xCA, 0xFE, 0xDE, 0xAD, 0xBE, 0xEF]);

        let bytes = writer.into_bytes();
        let mut reader = BytecodeReader::new(&bytes);
        assert_eq!(reader.read_u16().unwrap(), 0xCAFE);
        assert_eq!(reader.read_u32().unwrap(), 0xDEADBEEF);
        assert!(!reader.has_more());
    }

    #[test]
    fn test_signed_values() {
        let mut writer = BytecodeWriter::new();
        writer.emit_i8(-3);
        writer.emit_i16(-300);
        writer.emit_i32(-70000);
        let bytes = writer.into_bytes();
        let mut reader = BytecodeReader::new(&bytes);
        assert_eq!(reader.read_i8().unwrap(), -3);
        assert_eq!(reader.read_i16().unwrap(), -300);
        assert_eq!(reader.read_i32().unwrap(), -70000);
    }

    #[test]
    fn test_unexpected_end_reports_position() {
        let bytes = [0x00, 0x01, 0x02];
        let mut reader = BytecodeReader::new(&bytes);
        reader.read_u16().unwrap();
        assert_eq!(reader.read_u16(), Err(DecodeError::UnexpectedEnd(2)));
        assert_eq!(reader.position(), 2);
        assert_eq!(reader.skip(5), Err(DecodeError::UnexpectedEnd(2)));
    }

    #[test]
    fn test_modified_utf8_nul_and_supplementary() {
        let text = "a\0b\u{1F600}";
        let encoded = encode_modified_utf8(text);
        assert_eq!(&encoded[..4], &[b'a', 0xC0, 0x80, b'b']);
        // surrogate pair, three bytes each
        assert_eq!(encoded.len(), 4 + 6);
        assert_eq!(modified_utf8_len(text), encoded.len());
        assert_eq!(decode_modified_utf8(&encoded).as_deref(), Some(text));
    }

    #[test]
    fn test_modified_utf8_rejects_raw_nul_and_four_byte_forms() {
        assert_eq!(decode_modified_utf8(&[b'a', 0x00]), None);
        assert_eq!(decode_modified_utf8(&[0xF0, 0x9F, 0x98, 0x80]), None);
        assert_eq!(decode_modified_utf8(&[0xC3]), None);
    }

    #[test]
    fn test_read_utf8() {
        let mut writer = BytecodeWriter::new();
        writer.emit_utf8("org/osgi/framework/BundleActivator");
        let bytes = writer.into_bytes();
        let mut reader = BytecodeReader::new(&bytes);
        assert_eq!(
            reader.read_utf8().unwrap(),
            "org/osgi/framework/BundleActivator"
        );
    }

    #[test]
    fn test_align4_relative_to_base() {
        let bytes = [0u8; 8];
        let mut reader = BytecodeReader::new(&bytes);
        reader.skip(5).unwrap();
        reader.align4(0).unwrap();
        assert_eq!(reader.position(), 8);

        let mut writer = BytecodeWriter::new();
        writer.emit_u8(0xAA);
        writer.align4();
        assert_eq!(writer.offset(), 4);
    }
}
