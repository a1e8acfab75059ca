//! Memory capability bits.
//!
//! Passed through verbatim to the target allocator; the device makes no
//! permission assumptions beyond what the allocator returns. The bit layout
//! mirrors the target SDK's capability mask so firmware-side code and host
//! requests agree.

/// Region must be able to run executable code
pub const CAP_EXEC: u32 = 1 << 0;
/// Region must allow aligned 32-bit accesses
pub const CAP_32BIT: u32 = 1 << 1;
/// Region must allow 8/16-bit accesses
pub const CAP_8BIT: u32 = 1 << 2;
/// Region must be reachable by DMA
pub const CAP_DMA: u32 = 1 << 3;
/// Region must be in external cached RAM
pub const CAP_EXTERNAL: u32 = 1 << 10;
/// Region must be in on-chip SRAM
pub const CAP_INTERNAL: u32 = 1 << 11;
/// Region may satisfy non-capability-specific allocations
pub const CAP_DEFAULT: u32 = 1 << 12;
/// Region start must be aligned to the cache line size
pub const CAP_CACHE_ALIGNED: u32 = 1 << 19;

/// Default capabilities for uploaded code regions.
pub const CODE_CAPS: u32 = CAP_EXEC | CAP_EXTERNAL | CAP_8BIT;

/// Default capabilities for argument frames and array buffers.
pub const DATA_CAPS: u32 = CAP_EXTERNAL | CAP_8BIT;
