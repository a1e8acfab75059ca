//! Packet framing: magic, header, payload, additive checksum.
//!
//! Frame layout (both directions):
//!
//! | offset | size | field                                  |
//! |--------|------|----------------------------------------|
//! | 0      | 2    | magic `A5 5A`                          |
//! | 2      | 1    | command id                             |
//! | 3      | 1    | kind: 0 request, 1 ok, 2 error         |
//! | 4      | 4    | payload length (little-endian)         |
//! | 8      | n    | payload                                |
//! | 8+n    | 2    | checksum (little-endian)               |
//!
//! The checksum is the unsigned sum of every header and payload byte,
//! modulo 2^16.

use crate::wire::DecodeError;
use thiserror::Error;

/// First magic byte of every frame.
pub const MAGIC0: u8 = 0xA5;
/// Second magic byte of every frame.
pub const MAGIC1: u8 = 0x5A;

/// Header length in bytes (magic through payload length).
pub const HEADER_LEN: usize = 8;
/// Trailing checksum length in bytes.
pub const CHECKSUM_LEN: usize = 2;

/// Frame encoding/decoding errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Frame did not start with the magic bytes
    #[error("Bad magic: expected A5 5A, got {0:02X} {1:02X}")]
    BadMagic(u8, u8),

    /// Frame ended before header, payload, or checksum completed
    #[error("Truncated frame: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    /// Stored checksum did not match the computed one
    #[error("Checksum mismatch: computed {computed:#06X}, received {received:#06X}")]
    ChecksumMismatch { computed: u16, received: u16 },

    /// Unknown value in the kind byte
    #[error("Unknown frame kind: {0:#04X}")]
    UnknownKind(u8),

    /// Payload decode error
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Direction/status discriminator carried in the kind byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Host-to-device request
    Request = 0x00,
    /// Successful response
    Ok = 0x01,
    /// Error response carrying a wire error code
    Error = 0x02,
}

impl TryFrom<u8> for FrameKind {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, FrameError> {
        match value {
            0x00 => Ok(FrameKind::Request),
            0x01 => Ok(FrameKind::Ok),
            0x02 => Ok(FrameKind::Error),
            other => Err(FrameError::UnknownKind(other)),
        }
    }
}

/// One protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command id this frame belongs to
    pub cmd: u8,
    /// Request / ok / error discriminator
    pub kind: FrameKind,
    /// Raw payload bytes
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a request frame
    pub fn request(cmd: u8, payload: Vec<u8>) -> Self {
        Self {
            cmd,
            kind: FrameKind::Request,
            payload,
        }
    }

    /// Build an ok-response frame
    pub fn ok(cmd: u8, payload: Vec<u8>) -> Self {
        Self {
            cmd,
            kind: FrameKind::Ok,
            payload,
        }
    }

    /// Build an error-response frame carrying a 32-bit error code
    pub fn error(cmd: u8, code: u32) -> Self {
        Self {
            cmd,
            kind: FrameKind::Error,
            payload: code.to_le_bytes().to_vec(),
        }
    }

    /// Encode the 8-byte header for this frame
    pub fn header(&self) -> [u8; HEADER_LEN] {
        let len = (self.payload.len() as u32).to_le_bytes();
        [
            MAGIC0,
            MAGIC1,
            self.cmd,
            self.kind as u8,
            len[0],
            len[1],
            len[2],
            len[3],
        ]
    }

    /// Checksum over this frame's header and payload
    pub fn checksum(&self) -> u16 {
        let mut sum = additive_checksum(&self.header());
        sum = sum.wrapping_add(additive_checksum(&self.payload));
        sum
    }

    /// Encode the complete frame including header and trailing checksum
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len() + CHECKSUM_LEN);
        out.extend_from_slice(&self.header());
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&self.checksum().to_le_bytes());
        out
    }

    /// Total encoded length of this frame
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len() + CHECKSUM_LEN
    }

    /// Decode one complete frame from a buffer.
    ///
    /// The buffer must contain exactly one frame; this is the strict
    /// test-and-tooling entry point. The streaming sides (device loop, host
    /// client) read field-by-field off the link instead so they can
    /// resynchronize on garbage.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < HEADER_LEN + CHECKSUM_LEN {
            return Err(FrameError::Truncated {
                needed: HEADER_LEN + CHECKSUM_LEN,
                have: data.len(),
            });
        }
        if data[0] != MAGIC0 || data[1] != MAGIC1 {
            return Err(FrameError::BadMagic(data[0], data[1]));
        }
        let cmd = data[2];
        let kind = FrameKind::try_from(data[3])?;
        let len = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;

        let total = HEADER_LEN + len + CHECKSUM_LEN;
        if data.len() < total {
            return Err(FrameError::Truncated {
                needed: total,
                have: data.len(),
            });
        }

        let payload = data[HEADER_LEN..HEADER_LEN + len].to_vec();
        let received = u16::from_le_bytes([data[HEADER_LEN + len], data[HEADER_LEN + len + 1]]);
        let computed = additive_checksum(&data[..HEADER_LEN + len]);
        if computed != received {
            return Err(FrameError::ChecksumMismatch { computed, received });
        }

        Ok(Self { cmd, kind, payload })
    }
}

/// Unsigned byte sum modulo 2^16
pub fn additive_checksum(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |sum, &b| sum.wrapping_add(u16::from(b)))
}
