//! Framed transport client.
//!
//! One request in flight at a time: `&mut self` on every operation, and
//! the response is read to completion (and checksum-verified) before the
//! next request can be issued. Every memory operation is validated against
//! the shadow allocation table before the packet is sent; the skip-bounds
//! variants are the documented escape hatch for memory owned by other
//! firmware subsystems.

use crate::error::ClientError;
use crate::shadow::ShadowTable;
use log::{debug, info, warn};
use remora_proto::command::{
    AllocRequest, AllocResponse, CommandId, DeviceInfo, ExecRequest, ExecResponse, FreeRequest,
    HeapInfo, MemFlags, ReadRequest, WireError, WriteRequest, WriteResponse,
};
use remora_proto::frame::{additive_checksum, Frame, FrameError, FrameKind, MAGIC0, MAGIC1};
use remora_proto::link::Link;
use remora_proto::PROTOCOL_MAJOR;

/// Host endpoint of the command protocol
pub struct DeviceClient<L: Link> {
    link: L,
    shadow: ShadowTable,
    info: Option<DeviceInfo>,
}

impl<L: Link> DeviceClient<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            shadow: ShadowTable::new(),
            info: None,
        }
    }

    /// The shadow allocation table.
    pub fn shadow(&self) -> &ShadowTable {
        &self.shadow
    }

    /// Device info from the last handshake.
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.info.as_ref()
    }

    /// Handshake: fetch device info and enforce protocol compatibility.
    ///
    /// A major-version mismatch refuses the connection; a minor mismatch
    /// warns and proceeds (minor bumps are additive).
    pub fn connect(&mut self) -> Result<DeviceInfo, ClientError> {
        let payload = self.transact(CommandId::GetInfo, vec![])?;
        let info = DeviceInfo::decode(&payload)?;
        if info.protocol_major != PROTOCOL_MAJOR {
            return Err(ClientError::VersionMismatch {
                device: info.protocol_major,
                host: PROTOCOL_MAJOR,
            });
        }
        if info.protocol_minor != remora_proto::PROTOCOL_MINOR {
            warn!(
                "device protocol minor {} differs from host {}",
                info.protocol_minor,
                remora_proto::PROTOCOL_MINOR
            );
        }
        info!(
            "connected: {} (protocol {}.{}, max payload {})",
            info.firmware_version, info.protocol_major, info.protocol_minor, info.max_payload
        );
        self.info = Some(info.clone());
        Ok(info)
    }

    /// Echo `data` through the device.
    pub fn ping(&mut self, data: &[u8]) -> Result<Vec<u8>, ClientError> {
        self.transact(CommandId::Ping, data.to_vec())
    }

    /// Allocate a device region and record it in the shadow table.
    pub fn allocate(&mut self, size: u32, caps: u32, alignment: u32) -> Result<u32, ClientError> {
        let payload = AllocRequest {
            size,
            caps,
            alignment,
        }
        .encode();
        let resp = AllocResponse::decode(&self.transact(CommandId::Alloc, payload)?)?;
        if resp.error != 0 || resp.address == 0 {
            warn!("device refused allocation of {} bytes", size);
            return Err(ClientError::AllocRefused { size });
        }
        self.shadow.insert(resp.address, size);
        debug!("allocated {} bytes at {:#010X}", size, resp.address);
        Ok(resp.address)
    }

    /// Free a device region recorded in the shadow table.
    pub fn free(&mut self, address: u32) -> Result<(), ClientError> {
        if !self.shadow.contains_exact(address) {
            return Err(ClientError::UntrackedAllocation(address));
        }
        self.transact(CommandId::Free, FreeRequest { address }.encode())?;
        self.shadow.remove(address);
        debug!("freed {:#010X}", address);
        Ok(())
    }

    /// Write bytes into a tracked device region.
    pub fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<(), ClientError> {
        if !self.shadow.covers(address, data.len() as u32) {
            return Err(ClientError::OutOfBounds {
                op: "write",
                address,
                size: data.len() as u32,
            });
        }
        self.write_with_flags(address, data, MemFlags::CHECKED)
    }

    /// Write bytes to memory owned by another firmware subsystem,
    /// bypassing both bounds tables.
    pub fn write_memory_unchecked(&mut self, address: u32, data: &[u8]) -> Result<(), ClientError> {
        self.write_with_flags(address, data, MemFlags::SKIP_BOUNDS)
    }

    fn write_with_flags(
        &mut self,
        address: u32,
        data: &[u8],
        flags: MemFlags,
    ) -> Result<(), ClientError> {
        let payload = WriteRequest { address, flags }.encode(data);
        let resp = WriteResponse::decode(&self.transact(CommandId::WriteMem, payload)?)?;
        if resp.status != 0 {
            warn!("cache sync reported status {} after write", resp.status);
        }
        Ok(())
    }

    /// Read bytes from a tracked device region.
    pub fn read_memory(&mut self, address: u32, size: u32) -> Result<Vec<u8>, ClientError> {
        if !self.shadow.covers(address, size) {
            return Err(ClientError::OutOfBounds {
                op: "read",
                address,
                size,
            });
        }
        self.read_with_flags(address, size, MemFlags::CHECKED)
    }

    /// Read memory owned by another firmware subsystem, bypassing both
    /// bounds tables.
    pub fn read_memory_unchecked(&mut self, address: u32, size: u32) -> Result<Vec<u8>, ClientError> {
        self.read_with_flags(address, size, MemFlags::SKIP_BOUNDS)
    }

    fn read_with_flags(
        &mut self,
        address: u32,
        size: u32,
        flags: MemFlags,
    ) -> Result<Vec<u8>, ClientError> {
        let payload = ReadRequest {
            address,
            size,
            flags,
        }
        .encode();
        self.transact(CommandId::ReadMem, payload)
    }

    /// Execute a loaded entry point and return its raw result.
    pub fn execute(&mut self, address: u32) -> Result<u32, ClientError> {
        if !self.shadow.covers(address, 1) {
            return Err(ClientError::OutOfBounds {
                op: "execute",
                address,
                size: 1,
            });
        }
        let resp = ExecResponse::decode(&self.transact(CommandId::Exec, ExecRequest { address }.encode())?)?;
        Ok(resp.return_value)
    }

    /// Heap statistics for both device memory regions.
    pub fn heap_info(&mut self) -> Result<HeapInfo, ClientError> {
        let payload = self.transact(CommandId::HeapInfo, vec![])?;
        Ok(HeapInfo::decode(&payload)?)
    }

    /// Send one request and read its response to completion.
    fn transact(&mut self, cmd: CommandId, payload: Vec<u8>) -> Result<Vec<u8>, ClientError> {
        let request = Frame::request(cmd as u8, payload);
        self.link.send(&request.encode())?;

        match self.read_response(cmd as u8) {
            Ok(payload) => Ok(payload),
            Err(err) => {
                // Drop whatever half-frame is sitting in the receive
                // buffer so the next request starts clean.
                if let Err(e) = self.link.discard_input() {
                    warn!("failed to discard input after error: {}", e);
                }
                Err(err)
            }
        }
    }

    fn read_response(&mut self, expected_cmd: u8) -> Result<Vec<u8>, ClientError> {
        let mut header = [0u8; 8];
        self.link.recv(&mut header)?;
        if header[0] != MAGIC0 || header[1] != MAGIC1 {
            return Err(ClientError::Frame(FrameError::BadMagic(header[0], header[1])));
        }
        let cmd = header[2];
        let kind = FrameKind::try_from(header[3]).map_err(ClientError::Frame)?;
        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;

        let mut payload = vec![0u8; len];
        self.link.recv(&mut payload)?;
        let mut ck = [0u8; 2];
        self.link.recv(&mut ck)?;
        let received = u16::from_le_bytes(ck);
        let computed = additive_checksum(&header).wrapping_add(additive_checksum(&payload));
        if computed != received {
            return Err(ClientError::Frame(FrameError::ChecksumMismatch {
                computed,
                received,
            }));
        }

        if cmd != expected_cmd {
            return Err(ClientError::CommandMismatch {
                expected: expected_cmd,
                got: cmd,
            });
        }

        match kind {
            FrameKind::Ok => Ok(payload),
            FrameKind::Error => {
                let code = if payload.len() >= 4 {
                    u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]])
                } else {
                    0
                };
                let wire = WireError::from_code(code).unwrap_or(WireError::BadCommand);
                Err(ClientError::Device(wire))
            }
            FrameKind::Request => Err(ClientError::Frame(FrameError::UnknownKind(0x00))),
        }
    }
}

impl<L: Link> DeviceClient<L> {
    /// The underlying link (e.g. to adjust timeouts).
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }
}
