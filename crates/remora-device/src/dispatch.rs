//! Command handlers.
//!
//! Each handler decodes its request payload, performs the operation against
//! the memory bus, and encodes the ok-response payload into the shared TX
//! buffer. User-induced failures never panic; they surface as a wire error
//! code the protocol loop turns into an error frame, and the loop carries
//! on.

use crate::bus::MemoryBus;
use crate::region::{RegionTable, REGION_CAPACITY};
use log::{debug, info, warn};
use remora_proto::command::{
    AllocRequest, AllocResponse, CommandId, DeviceInfo, ExecRequest, ExecResponse, FreeRequest,
    ReadRequest, WireError, WriteRequest, WriteResponse,
};
use remora_proto::{PROTOCOL_MAJOR, PROTOCOL_MINOR};

/// Tunables reported through get-info and enforced by the protocol loop
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Largest request or response payload in bytes
    pub max_payload: u32,
    /// Version string reported in the get-info response
    pub firmware_version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_payload: 1024 * 1024,
            firmware_version: concat!("remora-", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

/// Command dispatcher: allocation table plus platform bus.
pub struct Dispatcher<M: MemoryBus> {
    bus: M,
    regions: RegionTable,
    config: ServerConfig,
}

impl<M: MemoryBus> Dispatcher<M> {
    pub fn new(bus: M, config: ServerConfig) -> Self {
        Self {
            bus,
            regions: RegionTable::new(),
            config,
        }
    }

    /// The allocation table (tests assert parity against the host shadow).
    pub fn regions(&self) -> &RegionTable {
        &self.regions
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn bus_mut(&mut self) -> &mut M {
        &mut self.bus
    }

    /// Dispatch one verified request.
    ///
    /// On `Ok` the response payload is in `out`; on `Err` the loop emits an
    /// error frame with the returned code.
    pub fn handle(&mut self, cmd: u8, payload: &[u8], out: &mut Vec<u8>) -> Result<(), WireError> {
        out.clear();
        let cmd = CommandId::from_u8(cmd).ok_or(WireError::BadCommand)?;
        match cmd {
            CommandId::Ping => {
                out.extend_from_slice(payload);
                Ok(())
            }
            CommandId::GetInfo => {
                let info = DeviceInfo {
                    protocol_major: PROTOCOL_MAJOR,
                    protocol_minor: PROTOCOL_MINOR,
                    max_payload: self.config.max_payload,
                    cache_line: self.bus.cache_line(),
                    max_allocations: REGION_CAPACITY as u32,
                    firmware_version: self.config.firmware_version.clone(),
                };
                *out = info.encode();
                Ok(())
            }
            CommandId::Alloc => self.handle_alloc(payload, out),
            CommandId::Free => self.handle_free(payload, out),
            CommandId::WriteMem => self.handle_write(payload, out),
            CommandId::ReadMem => self.handle_read(payload, out),
            CommandId::Exec => self.handle_exec(payload, out),
            CommandId::HeapInfo => {
                *out = self.bus.heap_info().encode();
                Ok(())
            }
        }
    }

    fn handle_alloc(&mut self, payload: &[u8], out: &mut Vec<u8>) -> Result<(), WireError> {
        let req = AllocRequest::decode(payload).map_err(|_| WireError::BadCommand)?;
        debug!(
            "alloc: size={} caps={:#010X} align={}",
            req.size, req.caps, req.alignment
        );

        // Alignment must be a nonzero power of two; refuse in-band so the
        // host sees an allocator verdict rather than a protocol error.
        if req.alignment == 0 || !req.alignment.is_power_of_two() {
            warn!("alloc: bad alignment {}", req.alignment);
            return refuse_alloc(out);
        }

        let address = match self.bus.alloc(req.alignment, req.size, req.caps) {
            Some(address) => address,
            None => {
                warn!("alloc: allocator refused {} bytes", req.size);
                return refuse_alloc(out);
            }
        };

        if !self.regions.insert(address, req.size) {
            warn!("alloc: table full ({} live regions)", REGION_CAPACITY);
            self.bus.free(address);
            return refuse_alloc(out);
        }

        info!("alloc: {} bytes at {:#010X}", req.size, address);
        *out = AllocResponse { address, error: 0 }.encode();
        Ok(())
    }

    fn handle_free(&mut self, payload: &[u8], out: &mut Vec<u8>) -> Result<(), WireError> {
        let req = FreeRequest::decode(payload).map_err(|_| WireError::BadCommand)?;
        if !self.regions.remove(req.address) {
            warn!("free: {:#010X} is not a live region", req.address);
            return Err(WireError::InvalidAddress);
        }
        if !self.bus.free(req.address) {
            warn!("free: allocator did not recognize {:#010X}", req.address);
        }
        debug!("free: {:#010X}", req.address);
        out.extend_from_slice(&0u32.to_le_bytes());
        Ok(())
    }

    fn handle_write(&mut self, payload: &[u8], out: &mut Vec<u8>) -> Result<(), WireError> {
        let (req, data) = WriteRequest::decode(payload).map_err(|_| WireError::BadCommand)?;
        let len = data.len() as u32;

        if !req.flags.skips_bounds() && !self.regions.covers(req.address, len) {
            warn!("write: {:#010X}+{} out of bounds", req.address, len);
            return Err(WireError::InvalidAddress);
        }

        self.bus
            .write(req.address, data)
            .map_err(|_| WireError::InvalidAddress)?;

        // Round the dirty range out to cache-line boundaries; the sync
        // primitive requires line-aligned inputs.
        let line = u64::from(self.bus.cache_line());
        let start = u64::from(req.address) & !(line - 1);
        let end = (u64::from(req.address) + u64::from(len) + line - 1) & !(line - 1);
        let status = match self.bus.sync_range(start as u32, (end - start) as u32) {
            Ok(()) => 0,
            Err(fault) => {
                warn!("write: cache sync failed: {}", fault);
                1
            }
        };

        debug!(
            "write: {} bytes at {:#010X}, synced [{:#010X}, {:#010X})",
            len, req.address, start, end
        );
        *out = WriteResponse {
            bytes_written: len,
            status,
        }
        .encode();
        Ok(())
    }

    fn handle_read(&mut self, payload: &[u8], out: &mut Vec<u8>) -> Result<(), WireError> {
        let req = ReadRequest::decode(payload).map_err(|_| WireError::BadCommand)?;

        // The response must fit the TX buffer.
        if req.size > self.config.max_payload {
            warn!("read: {} bytes exceeds max payload", req.size);
            return Err(WireError::BadCommand);
        }
        if !req.flags.skips_bounds() && !self.regions.covers(req.address, req.size) {
            warn!("read: {:#010X}+{} out of bounds", req.address, req.size);
            return Err(WireError::InvalidAddress);
        }

        out.resize(req.size as usize, 0);
        self.bus
            .read(req.address, out)
            .map_err(|_| WireError::InvalidAddress)?;
        Ok(())
    }

    fn handle_exec(&mut self, payload: &[u8], out: &mut Vec<u8>) -> Result<(), WireError> {
        let req = ExecRequest::decode(payload).map_err(|_| WireError::BadCommand)?;

        // The entry address must lie inside a live region.
        if !self.regions.covers(req.address, 1) {
            warn!("exec: {:#010X} not in a live region", req.address);
            return Err(WireError::InvalidAddress);
        }

        info!("exec: calling {:#010X}", req.address);
        let return_value = self.bus.execute(req.address);
        debug!("exec: returned {}", return_value as i32);
        *out = ExecResponse { return_value }.encode();
        Ok(())
    }
}

fn refuse_alloc(out: &mut Vec<u8>) -> Result<(), WireError> {
    *out = AllocResponse {
        address: 0,
        error: WireError::AllocFailed.code(),
    }
    .encode();
    Ok(())
}
