//! Platform collaborator surface.
//!
//! The server core is generic over this trait; it captures exactly the
//! operations the original firmware gets from its SDK: capability-aware
//! aligned heap allocation, raw memory copies, cache maintenance over a
//! line-aligned range, and the jump into loaded code.

use remora_proto::command::HeapInfo;
use thiserror::Error;

/// Faults reported by a memory bus implementation
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BusFault {
    /// Address range is not backed by any memory
    #[error("Address range {addr:#010X}+{len} is not mapped")]
    Unmapped { addr: u32, len: u32 },

    /// Cache sync called with a range not aligned to the cache line
    #[error("Cache sync range {addr:#010X}+{len} is not line-aligned")]
    Unaligned { addr: u32, len: u32 },
}

/// Heap, memory, cache, and execution services of the platform.
///
/// Implementations run single-threaded under the protocol loop; no handler
/// holds a reference across a suspension point, so interior locking is an
/// implementation choice, not a requirement.
pub trait MemoryBus {
    /// Allocate `size` bytes aligned to `alignment` from memory satisfying
    /// `caps`. Returns the address, or `None` when the allocator refuses.
    ///
    /// `alignment` has already been validated as a nonzero power of two.
    fn alloc(&mut self, alignment: u32, size: u32, caps: u32) -> Option<u32>;

    /// Release an allocation made by [`MemoryBus::alloc`]. Returns false
    /// when the address is not a live allocation of this bus.
    fn free(&mut self, address: u32) -> bool;

    /// Copy bytes out of memory at `address`.
    fn read(&mut self, address: u32, out: &mut [u8]) -> Result<(), BusFault>;

    /// Copy bytes into memory at `address`.
    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), BusFault>;

    /// Flush the data cache and invalidate the instruction cache over
    /// `[address, address + len)`. Both bounds must be cache-line aligned;
    /// the caller (the write handler) rounds the dirty range outward.
    fn sync_range(&mut self, address: u32, len: u32) -> Result<(), BusFault>;

    /// Call `address` as `int (*)(void)` and return its result.
    fn execute(&mut self, address: u32) -> u32;

    /// Free/total statistics for both memory regions.
    fn heap_info(&self) -> HeapInfo;

    /// Cache line size in bytes; a power of two.
    fn cache_line(&self) -> u32;
}
