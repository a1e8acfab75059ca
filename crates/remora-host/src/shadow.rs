//! Host shadow of the device allocation table.
//!
//! Mirrors the device's live regions one-for-one under normal operation so
//! bad pointers are caught before a packet is sent. The device table
//! remains the authority; this is the first line of defense, not the last.

use rustc_hash::FxHashMap;

/// Address-to-size map of live device allocations
#[derive(Debug, Default)]
pub struct ShadowTable {
    regions: FxHashMap<u32, u32>,
}

impl ShadowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly allocated region.
    pub fn insert(&mut self, address: u32, size: u32) {
        self.regions.insert(address, size);
    }

    /// Drop a freed region. Returns false when the address was untracked.
    pub fn remove(&mut self, address: u32) -> bool {
        self.regions.remove(&address).is_some()
    }

    /// True if a tracked region starts exactly at `address`.
    pub fn contains_exact(&self, address: u32) -> bool {
        self.regions.contains_key(&address)
    }

    /// True if `[address, address + len)` lies inside one tracked region.
    pub fn covers(&self, address: u32, len: u32) -> bool {
        let end = match address.checked_add(len) {
            Some(end) => u64::from(end),
            None => return false,
        };
        let address = u64::from(address);
        self.regions.iter().any(|(&start, &size)| {
            u64::from(start) <= address && end <= u64::from(start) + u64::from(size)
        })
    }

    /// Number of tracked regions.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Tracked `(address, size)` pairs in address order.
    pub fn regions(&self) -> Vec<(u32, u32)> {
        let mut out: Vec<_> = self.regions.iter().map(|(&a, &s)| (a, s)).collect();
        out.sort_unstable();
        out
    }
}
