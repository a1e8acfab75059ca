//! Little-endian payload encoding and decoding utilities.

use thiserror::Error;

/// Errors that can occur while decoding a payload
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload ended before the field could be read
    #[error("Unexpected end of payload at offset {0}")]
    UnexpectedEnd(usize),

    /// A fixed-length string field held invalid UTF-8
    #[error("Invalid UTF-8 in string field at offset {0}")]
    InvalidUtf8(usize),

    /// Bytes were left over after a strict decode
    #[error("{0} trailing byte(s) after payload")]
    TrailingBytes(usize),
}

/// Payload writer for encoding command payloads
///
/// Thin wrapper over a byte buffer with little-endian emit methods.
#[derive(Default)]
pub struct WireWriter {
    buffer: Vec<u8>,
}

impl WireWriter {
    /// Create a new empty writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a writer with pre-allocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Consume the writer and return the encoded bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Current encoded length
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True if nothing has been written yet
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Emit a raw byte
    pub fn put_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a 16-bit unsigned integer (little-endian)
    pub fn put_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit unsigned integer (little-endian)
    pub fn put_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit raw bytes verbatim
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Emit a string into a fixed-length NUL-padded field.
    ///
    /// The string is truncated to `len` bytes if longer; the remainder is
    /// zero-filled.
    pub fn put_fixed_str(&mut self, value: &str, len: usize) {
        let bytes = value.as_bytes();
        let take = bytes.len().min(len);
        self.buffer.extend_from_slice(&bytes[..take]);
        self.buffer.resize(self.buffer.len() + (len - take), 0);
    }
}

/// Payload reader for decoding command payloads
pub struct WireReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> WireReader<'a> {
    /// Create a reader over a payload slice
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Bytes remaining past the cursor
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Current cursor offset
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::UnexpectedEnd(self.offset));
        }
        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    /// Read a raw byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    /// Read a 16-bit unsigned integer (little-endian)
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read a 32-bit unsigned integer (little-endian)
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read `len` raw bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        self.take(len)
    }

    /// Read a fixed-length NUL-padded string field
    pub fn read_fixed_str(&mut self, len: usize) -> Result<String, DecodeError> {
        let start = self.offset;
        let bytes = self.take(len)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(len);
        std::str::from_utf8(&bytes[..end])
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8(start))
    }

    /// Everything past the cursor, consuming the reader
    pub fn rest(self) -> &'a [u8] {
        &self.data[self.offset..]
    }

    /// Fail if any bytes remain unconsumed
    pub fn finish(self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}
