//! Arena-backed memory bus for tests and loopback sessions.
//!
//! Models the target's two heap regions (external cached RAM and on-chip
//! SRAM) as byte arenas behind a first-fit free-list allocator, records
//! every cache-sync call so tests can assert line rounding, and lets tests
//! install per-address execution hooks that stand in for uploaded machine
//! code.

use crate::bus::{BusFault, MemoryBus};
use log::warn;
use parking_lot::Mutex;
use remora_proto::caps::CAP_INTERNAL;
use remora_proto::command::HeapInfo;
use rustc_hash::FxHashMap;
use std::sync::Arc;

type ExecHook = Box<dyn FnMut(&mut SimState) -> u32 + Send>;

/// Simulated memory map
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub external_base: u32,
    pub external_size: u32,
    pub internal_base: u32,
    pub internal_size: u32,
    pub cache_line: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            external_base: 0x4800_0000,
            external_size: 4 * 1024 * 1024,
            internal_base: 0x4FF0_0000,
            internal_size: 512 * 1024,
            cache_line: 128,
        }
    }
}

// ===== First-fit free-list heap =====

struct Heap {
    base: u32,
    size: u32,
    free: Vec<(u32, u32)>,
    used: FxHashMap<u32, u32>,
}

impl Heap {
    fn new(base: u32, size: u32) -> Self {
        Self {
            base,
            size,
            free: vec![(base, size)],
            used: FxHashMap::default(),
        }
    }

    fn alloc(&mut self, align: u32, size: u32) -> Option<u32> {
        let size = size.max(1);
        for i in 0..self.free.len() {
            let (baddr, bsize) = self.free[i];
            let aligned = baddr.checked_add(align - 1)? & !(align - 1);
            let end = u64::from(aligned) + u64::from(size);
            if end > u64::from(baddr) + u64::from(bsize) {
                continue;
            }
            self.free.remove(i);
            if aligned > baddr {
                self.free.push((baddr, aligned - baddr));
            }
            let block_end = u64::from(baddr) + u64::from(bsize);
            if end < block_end {
                self.free.push((end as u32, (block_end - end) as u32));
            }
            self.free.sort_unstable();
            self.used.insert(aligned, size);
            return Some(aligned);
        }
        None
    }

    fn free(&mut self, addr: u32) -> bool {
        let Some(size) = self.used.remove(&addr) else {
            return false;
        };
        self.free.push((addr, size));
        self.free.sort_unstable();
        // Coalesce adjacent blocks.
        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(self.free.len());
        for &(addr, size) in &self.free {
            match merged.last_mut() {
                Some((last_addr, last_size)) if *last_addr + *last_size == addr => {
                    *last_size += size;
                }
                _ => merged.push((addr, size)),
            }
        }
        self.free = merged;
        true
    }

    fn free_bytes(&self) -> u32 {
        self.free.iter().map(|&(_, s)| s).sum()
    }

    fn contains(&self, addr: u32, len: u32) -> bool {
        let end = u64::from(addr) + u64::from(len);
        u64::from(self.base) <= u64::from(addr) && end <= u64::from(self.base) + u64::from(self.size)
    }
}

// ===== Simulated memory state =====

/// Arena state shared by the bus handle and execution hooks.
pub struct SimState {
    cfg: SimConfig,
    external: Heap,
    internal: Heap,
    ext_mem: Vec<u8>,
    int_mem: Vec<u8>,
    sync_log: Vec<(u32, u32)>,
    hooks: FxHashMap<u32, ExecHook>,
}

impl SimState {
    fn new(cfg: SimConfig) -> Self {
        Self {
            external: Heap::new(cfg.external_base, cfg.external_size),
            internal: Heap::new(cfg.internal_base, cfg.internal_size),
            ext_mem: vec![0; cfg.external_size as usize],
            int_mem: vec![0; cfg.internal_size as usize],
            sync_log: Vec::new(),
            hooks: FxHashMap::default(),
            cfg,
        }
    }

    fn slice(&self, addr: u32, len: usize) -> Result<&[u8], BusFault> {
        let len32 = len as u32;
        if self.external.contains(addr, len32) {
            let off = (addr - self.cfg.external_base) as usize;
            Ok(&self.ext_mem[off..off + len])
        } else if self.internal.contains(addr, len32) {
            let off = (addr - self.cfg.internal_base) as usize;
            Ok(&self.int_mem[off..off + len])
        } else {
            Err(BusFault::Unmapped { addr, len: len32 })
        }
    }

    fn slice_mut(&mut self, addr: u32, len: usize) -> Result<&mut [u8], BusFault> {
        let len32 = len as u32;
        if self.external.contains(addr, len32) {
            let off = (addr - self.cfg.external_base) as usize;
            Ok(&mut self.ext_mem[off..off + len])
        } else if self.internal.contains(addr, len32) {
            let off = (addr - self.cfg.internal_base) as usize;
            Ok(&mut self.int_mem[off..off + len])
        } else {
            Err(BusFault::Unmapped { addr, len: len32 })
        }
    }

    /// Read raw bytes out of the arenas.
    pub fn read_bytes(&self, addr: u32, out: &mut [u8]) -> Result<(), BusFault> {
        out.copy_from_slice(self.slice(addr, out.len())?);
        Ok(())
    }

    /// Write raw bytes into the arenas.
    pub fn write_bytes(&mut self, addr: u32, data: &[u8]) -> Result<(), BusFault> {
        self.slice_mut(addr, data.len())?.copy_from_slice(data);
        Ok(())
    }

    /// Read a little-endian u32; helper for exec hooks reading the arg frame.
    pub fn read_u32(&self, addr: u32) -> u32 {
        let mut buf = [0u8; 4];
        self.read_bytes(addr, &mut buf).expect("unmapped read_u32");
        u32::from_le_bytes(buf)
    }

    /// Write a little-endian u32; helper for exec hooks writing slot 31.
    pub fn write_u32(&mut self, addr: u32, value: u32) {
        self.write_bytes(addr, &value.to_le_bytes())
            .expect("unmapped write_u32");
    }

    /// Read an IEEE-754 f32 by bit pattern.
    pub fn read_f32(&self, addr: u32) -> f32 {
        f32::from_bits(self.read_u32(addr))
    }

    /// Write an IEEE-754 f32 by bit pattern.
    pub fn write_f32(&mut self, addr: u32, value: f32) {
        self.write_u32(addr, value.to_bits());
    }
}

/// Cloneable handle to a simulated memory bus.
#[derive(Clone)]
pub struct SimBus {
    state: Arc<Mutex<SimState>>,
}

impl SimBus {
    pub fn new(cfg: SimConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(cfg))),
        }
    }

    /// Install an execution hook at `addr`: it runs when the dispatcher
    /// executes that address, standing in for uploaded machine code.
    pub fn install_exec_hook<F>(&self, addr: u32, hook: F)
    where
        F: FnMut(&mut SimState) -> u32 + Send + 'static,
    {
        self.state.lock().hooks.insert(addr, Box::new(hook));
    }

    /// Every cache-sync range recorded so far, in call order.
    pub fn sync_log(&self) -> Vec<(u32, u32)> {
        self.state.lock().sync_log.clone()
    }

    /// Run `f` against the arena state (test inspection helper).
    pub fn with_state<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        f(&mut self.state.lock())
    }
}

impl MemoryBus for SimBus {
    fn alloc(&mut self, alignment: u32, size: u32, caps: u32) -> Option<u32> {
        let mut state = self.state.lock();
        if caps & CAP_INTERNAL != 0 {
            state.internal.alloc(alignment, size)
        } else {
            state.external.alloc(alignment, size)
        }
    }

    fn free(&mut self, address: u32) -> bool {
        let mut state = self.state.lock();
        state.external.free(address) || state.internal.free(address)
    }

    fn read(&mut self, address: u32, out: &mut [u8]) -> Result<(), BusFault> {
        self.state.lock().read_bytes(address, out)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), BusFault> {
        self.state.lock().write_bytes(address, data)
    }

    fn sync_range(&mut self, address: u32, len: u32) -> Result<(), BusFault> {
        let mut state = self.state.lock();
        let line = state.cfg.cache_line;
        if address % line != 0 || len % line != 0 {
            return Err(BusFault::Unaligned { addr: address, len });
        }
        state.sync_log.push((address, len));
        Ok(())
    }

    fn execute(&mut self, address: u32) -> u32 {
        let mut state = self.state.lock();
        match state.hooks.remove(&address) {
            Some(mut hook) => {
                let result = hook(&mut state);
                state.hooks.insert(address, hook);
                result
            }
            None => {
                warn!("exec: no hook installed at {:#010X}", address);
                0
            }
        }
    }

    fn heap_info(&self) -> HeapInfo {
        let state = self.state.lock();
        HeapInfo {
            free_external: state.external.free_bytes(),
            total_external: state.external.size,
            free_internal: state.internal.free_bytes(),
            total_internal: state.internal.size,
        }
    }

    fn cache_line(&self) -> u32 {
        self.state.lock().cfg.cache_line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remora_proto::caps;

    #[test]
    fn test_alloc_respects_alignment() {
        let mut bus = SimBus::new(SimConfig::default());
        let a = bus.alloc(16, 10, caps::DATA_CAPS).unwrap();
        let b = bus.alloc(64, 10, caps::DATA_CAPS).unwrap();
        assert_eq!(a % 16, 0);
        assert_eq!(b % 64, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_caps_select_the_region() {
        let cfg = SimConfig::default();
        let mut bus = SimBus::new(cfg.clone());
        let ext = bus.alloc(16, 64, caps::DATA_CAPS).unwrap();
        let int = bus.alloc(16, 64, caps::CAP_INTERNAL | caps::CAP_8BIT).unwrap();
        assert!(ext >= cfg.external_base && ext < cfg.external_base + cfg.external_size);
        assert!(int >= cfg.internal_base && int < cfg.internal_base + cfg.internal_size);
    }

    #[test]
    fn test_free_returns_space() {
        let cfg = SimConfig {
            external_size: 1024,
            ..SimConfig::default()
        };
        let mut bus = SimBus::new(cfg);
        let before = bus.heap_info().free_external;
        let addr = bus.alloc(16, 512, caps::DATA_CAPS).unwrap();
        assert!(bus.heap_info().free_external < before);
        assert!(bus.free(addr));
        assert_eq!(bus.heap_info().free_external, before);
        assert!(!bus.free(addr));
    }

    #[test]
    fn test_exhaustion_refuses() {
        let cfg = SimConfig {
            external_size: 256,
            ..SimConfig::default()
        };
        let mut bus = SimBus::new(cfg);
        assert!(bus.alloc(16, 200, caps::DATA_CAPS).is_some());
        assert!(bus.alloc(16, 200, caps::DATA_CAPS).is_none());
    }

    #[test]
    fn test_read_write_roundtrip() {
        let mut bus = SimBus::new(SimConfig::default());
        let addr = bus.alloc(16, 16, caps::DATA_CAPS).unwrap();
        bus.write(addr, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        bus.read(addr, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn test_unmapped_access_faults() {
        let mut bus = SimBus::new(SimConfig::default());
        let mut out = [0u8; 4];
        assert!(matches!(
            bus.read(0x1000_0000, &mut out),
            Err(BusFault::Unmapped { .. })
        ));
    }

    #[test]
    fn test_sync_requires_line_alignment() {
        let mut bus = SimBus::new(SimConfig::default());
        let base = SimConfig::default().external_base;
        assert!(bus.sync_range(base, 256).is_ok());
        assert!(matches!(
            bus.sync_range(base + 1, 128),
            Err(BusFault::Unaligned { .. })
        ));
        assert_eq!(bus.sync_log(), vec![(base, 256)]);
    }

    #[test]
    fn test_exec_hook_runs_with_arena_access() {
        let mut bus = SimBus::new(SimConfig::default());
        let addr = bus.alloc(16, 64, caps::DATA_CAPS).unwrap();
        bus.write(addr, &7u32.to_le_bytes()).unwrap();

        let data_addr = addr;
        bus.install_exec_hook(addr, move |mem| {
            let v = mem.read_u32(data_addr);
            mem.write_u32(data_addr, v * 2);
            v
        });

        assert_eq!(bus.execute(addr), 7);
        assert_eq!(bus.execute(addr), 14);
        assert_eq!(bus.execute(0xDEAD_0000), 0);
    }
}
