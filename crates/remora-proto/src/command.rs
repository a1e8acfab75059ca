//! Command ids and request/response payload codecs.
//!
//! Every payload is a fixed little-endian struct except ping (opaque echo),
//! write-memory (header followed by the data bytes), and read-memory's
//! response (raw bytes). The codecs are strict: trailing bytes after a fixed
//! payload are a decode error, and short payloads report the offset they
//! ended at.

use crate::wire::{DecodeError, WireReader, WireWriter};
use thiserror::Error;

/// Length of the NUL-padded firmware version field in the get-info response.
pub const FIRMWARE_VERSION_LEN: usize = 16;

/// Command identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandId {
    /// Echo arbitrary bytes
    Ping = 0x01,
    /// Protocol and device capability report
    GetInfo = 0x02,
    /// Allocate a device memory region
    Alloc = 0x10,
    /// Free a previously allocated region
    Free = 0x11,
    /// Write bytes into device memory (cache-synced)
    WriteMem = 0x20,
    /// Read bytes out of device memory
    ReadMem = 0x21,
    /// Call an address as `int (*)(void)`
    Exec = 0x30,
    /// Heap statistics for both memory regions
    HeapInfo = 0x40,
}

impl CommandId {
    /// Decode a command id byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(CommandId::Ping),
            0x02 => Some(CommandId::GetInfo),
            0x10 => Some(CommandId::Alloc),
            0x11 => Some(CommandId::Free),
            0x20 => Some(CommandId::WriteMem),
            0x21 => Some(CommandId::ReadMem),
            0x30 => Some(CommandId::Exec),
            0x40 => Some(CommandId::HeapInfo),
            _ => None,
        }
    }
}

/// Error codes carried by error-response frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[repr(u32)]
pub enum WireError {
    /// Frame checksum did not match
    #[error("checksum mismatch")]
    Checksum = 0x01,
    /// Unknown command id or malformed payload
    #[error("unknown command or malformed payload")]
    BadCommand = 0x02,
    /// The underlying allocator refused the request
    #[error("allocation failed")]
    AllocFailed = 0x03,
    /// Address range not covered by a live allocation
    #[error("invalid address")]
    InvalidAddress = 0x04,
}

impl WireError {
    /// Wire representation of this code
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Decode a wire error code
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0x01 => Some(WireError::Checksum),
            0x02 => Some(WireError::BadCommand),
            0x03 => Some(WireError::AllocFailed),
            0x04 => Some(WireError::InvalidAddress),
            _ => None,
        }
    }
}

/// Per-request memory access flags on write-memory and read-memory.
///
/// Bit 0 skips the device-side bounds check; the escape hatch for touching
/// memory owned by other firmware subsystems. All other bits are reserved
/// and must be zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemFlags(pub u8);

impl MemFlags {
    /// Bounds-checked access (the default)
    pub const CHECKED: MemFlags = MemFlags(0);
    /// Skip the device allocation-table bounds check
    pub const SKIP_BOUNDS: MemFlags = MemFlags(1);

    /// True if the bounds check is skipped
    pub fn skips_bounds(self) -> bool {
        self.0 & 0x01 != 0
    }
}

/// get-info ok-response payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Protocol major version; mismatch refuses the session
    pub protocol_major: u8,
    /// Protocol minor version; mismatch warns
    pub protocol_minor: u8,
    /// Largest payload the device will accept in one frame
    pub max_payload: u32,
    /// Cache line size used for sync rounding
    pub cache_line: u32,
    /// Capacity of the device allocation table
    pub max_allocations: u32,
    /// Firmware version string (NUL-padded to 16 bytes on the wire)
    pub firmware_version: String,
}

impl DeviceInfo {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(16 + FIRMWARE_VERSION_LEN);
        w.put_u8(self.protocol_major);
        w.put_u8(self.protocol_minor);
        w.put_u16(0); // reserved
        w.put_u32(self.max_payload);
        w.put_u32(self.cache_line);
        w.put_u32(self.max_allocations);
        w.put_fixed_str(&self.firmware_version, FIRMWARE_VERSION_LEN);
        w.into_bytes()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = WireReader::new(payload);
        let protocol_major = r.read_u8()?;
        let protocol_minor = r.read_u8()?;
        let _reserved = r.read_u16()?;
        let max_payload = r.read_u32()?;
        let cache_line = r.read_u32()?;
        let max_allocations = r.read_u32()?;
        let firmware_version = r.read_fixed_str(FIRMWARE_VERSION_LEN)?;
        r.finish()?;
        Ok(Self {
            protocol_major,
            protocol_minor,
            max_payload,
            cache_line,
            max_allocations,
            firmware_version,
        })
    }
}

/// allocate request payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocRequest {
    /// Requested size in bytes
    pub size: u32,
    /// Capability bits (see [`crate::caps`])
    pub caps: u32,
    /// Required alignment; nonzero power of two
    pub alignment: u32,
}

impl AllocRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(12);
        w.put_u32(self.size);
        w.put_u32(self.caps);
        w.put_u32(self.alignment);
        w.into_bytes()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = WireReader::new(payload);
        let out = Self {
            size: r.read_u32()?,
            caps: r.read_u32()?,
            alignment: r.read_u32()?,
        };
        r.finish()?;
        Ok(out)
    }
}

/// allocate ok-response payload.
///
/// The frame itself reports success of the command; `error` reports the
/// allocator's verdict (0 = ok, otherwise [`WireError::AllocFailed`]'s code
/// with `address` zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocResponse {
    pub address: u32,
    pub error: u32,
}

impl AllocResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(8);
        w.put_u32(self.address);
        w.put_u32(self.error);
        w.into_bytes()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = WireReader::new(payload);
        let out = Self {
            address: r.read_u32()?,
            error: r.read_u32()?,
        };
        r.finish()?;
        Ok(out)
    }
}

/// free request payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRequest {
    pub address: u32,
}

impl FreeRequest {
    pub fn encode(&self) -> Vec<u8> {
        self.address.to_le_bytes().to_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = WireReader::new(payload);
        let out = Self {
            address: r.read_u32()?,
        };
        r.finish()?;
        Ok(out)
    }
}

/// write-memory request header; the data bytes follow it in the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRequest {
    pub address: u32,
    pub flags: MemFlags,
}

impl WriteRequest {
    /// Fixed header length before the data bytes
    pub const HEADER_LEN: usize = 8;

    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(Self::HEADER_LEN + data.len());
        w.put_u32(self.address);
        w.put_u8(self.flags.0);
        w.put_bytes(&[0; 3]); // reserved
        w.put_bytes(data);
        w.into_bytes()
    }

    /// Split a payload into the request header and the trailing data bytes
    pub fn decode(payload: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        let mut r = WireReader::new(payload);
        let address = r.read_u32()?;
        let flags = MemFlags(r.read_u8()?);
        let _reserved = r.read_bytes(3)?;
        Ok((Self { address, flags }, r.rest()))
    }
}

/// write-memory ok-response payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResponse {
    pub bytes_written: u32,
    /// Cache sync status: 0 on success
    pub status: u32,
}

impl WriteResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(8);
        w.put_u32(self.bytes_written);
        w.put_u32(self.status);
        w.into_bytes()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = WireReader::new(payload);
        let out = Self {
            bytes_written: r.read_u32()?,
            status: r.read_u32()?,
        };
        r.finish()?;
        Ok(out)
    }
}

/// read-memory request payload; the ok-response is the raw bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub address: u32,
    pub size: u32,
    pub flags: MemFlags,
}

impl ReadRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(12);
        w.put_u32(self.address);
        w.put_u32(self.size);
        w.put_u8(self.flags.0);
        w.put_bytes(&[0; 3]); // reserved
        w.into_bytes()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = WireReader::new(payload);
        let address = r.read_u32()?;
        let size = r.read_u32()?;
        let flags = MemFlags(r.read_u8()?);
        let _reserved = r.read_bytes(3)?;
        r.finish()?;
        Ok(Self {
            address,
            size,
            flags,
        })
    }
}

/// execute request payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecRequest {
    pub address: u32,
}

impl ExecRequest {
    pub fn encode(&self) -> Vec<u8> {
        self.address.to_le_bytes().to_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = WireReader::new(payload);
        let out = Self {
            address: r.read_u32()?,
        };
        r.finish()?;
        Ok(out)
    }
}

/// execute ok-response payload: the called function's return value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecResponse {
    pub return_value: u32,
}

impl ExecResponse {
    pub fn encode(&self) -> Vec<u8> {
        self.return_value.to_le_bytes().to_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = WireReader::new(payload);
        let out = Self {
            return_value: r.read_u32()?,
        };
        r.finish()?;
        Ok(out)
    }
}

/// heap-info ok-response payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapInfo {
    /// Free bytes in external cached RAM
    pub free_external: u32,
    /// Total bytes in external cached RAM
    pub total_external: u32,
    /// Free bytes in on-chip SRAM
    pub free_internal: u32,
    /// Total bytes in on-chip SRAM
    pub total_internal: u32,
}

impl HeapInfo {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(16);
        w.put_u32(self.free_external);
        w.put_u32(self.total_external);
        w.put_u32(self.free_internal);
        w.put_u32(self.total_internal);
        w.into_bytes()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = WireReader::new(payload);
        let out = Self {
            free_external: r.read_u32()?,
            total_external: r.read_u32()?,
            free_internal: r.read_u32()?,
            total_internal: r.read_u32()?,
        };
        r.finish()?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_id_roundtrip() {
        for id in [
            CommandId::Ping,
            CommandId::GetInfo,
            CommandId::Alloc,
            CommandId::Free,
            CommandId::WriteMem,
            CommandId::ReadMem,
            CommandId::Exec,
            CommandId::HeapInfo,
        ] {
            assert_eq!(CommandId::from_u8(id as u8), Some(id));
        }
        assert_eq!(CommandId::from_u8(0x7F), None);
    }

    #[test]
    fn test_device_info_roundtrip() {
        let info = DeviceInfo {
            protocol_major: 1,
            protocol_minor: 0,
            max_payload: 1024 * 1024,
            cache_line: 128,
            max_allocations: 64,
            firmware_version: "remora-0.1.0".into(),
        };
        let bytes = info.encode();
        assert_eq!(bytes.len(), 16 + FIRMWARE_VERSION_LEN);
        assert_eq!(DeviceInfo::decode(&bytes).unwrap(), info);
    }

    #[test]
    fn test_alloc_roundtrip() {
        let req = AllocRequest {
            size: 4096,
            caps: 0x404,
            alignment: 16,
        };
        assert_eq!(AllocRequest::decode(&req.encode()).unwrap(), req);

        let resp = AllocResponse {
            address: 0x4800_0040,
            error: 0,
        };
        assert_eq!(AllocResponse::decode(&resp.encode()).unwrap(), resp);
    }

    #[test]
    fn test_write_request_splits_data() {
        let req = WriteRequest {
            address: 0x4800_0000,
            flags: MemFlags::SKIP_BOUNDS,
        };
        let payload = req.encode(&[9, 8, 7]);
        assert_eq!(payload.len(), WriteRequest::HEADER_LEN + 3);

        let (decoded, data) = WriteRequest::decode(&payload).unwrap();
        assert_eq!(decoded, req);
        assert!(decoded.flags.skips_bounds());
        assert_eq!(data, &[9, 8, 7]);
    }

    #[test]
    fn test_write_request_empty_data() {
        let req = WriteRequest {
            address: 0x10,
            flags: MemFlags::CHECKED,
        };
        let encoded = req.encode(&[]);
        let (decoded, data) = WriteRequest::decode(&encoded).unwrap();
        assert_eq!(decoded, req);
        assert!(data.is_empty());
    }

    #[test]
    fn test_read_request_roundtrip() {
        let req = ReadRequest {
            address: 0x4800_1000,
            size: 64,
            flags: MemFlags::CHECKED,
        };
        assert_eq!(ReadRequest::decode(&req.encode()).unwrap(), req);
    }

    #[test]
    fn test_malformed_payload_rejected() {
        assert!(AllocRequest::decode(&[0; 8]).is_err());
        assert!(ReadRequest::decode(&[0; 11]).is_err());
        // trailing junk after a fixed payload
        assert!(FreeRequest::decode(&[0; 5]).is_err());
    }

    #[test]
    fn test_heap_info_roundtrip() {
        let info = HeapInfo {
            free_external: 1,
            total_external: 2,
            free_internal: 3,
            total_internal: 4,
        };
        assert_eq!(HeapInfo::decode(&info.encode()).unwrap(), info);
    }

    #[test]
    fn test_wire_error_codes() {
        assert_eq!(WireError::Checksum.code(), 0x01);
        assert_eq!(WireError::BadCommand.code(), 0x02);
        assert_eq!(WireError::AllocFailed.code(), 0x03);
        assert_eq!(WireError::InvalidAddress.code(), 0x04);
        assert_eq!(WireError::from_code(0x04), Some(WireError::InvalidAddress));
        assert_eq!(WireError::from_code(0x99), None);
    }
}
