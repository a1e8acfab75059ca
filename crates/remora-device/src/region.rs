//! Bounded allocation-tracking table.
//!
//! Every region handed out through the allocate command is recorded here,
//! and every write, read, and execute is checked against the live records
//! before it touches memory. The table never merges or splits records; the
//! underlying allocator guarantees live regions do not overlap.

/// Fixed capacity of the table. Exhaustion refuses further allocations even
/// when the underlying allocator still has space.
pub const REGION_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, Default)]
struct Region {
    address: u32,
    size: u32,
    live: bool,
}

/// Fixed-capacity table of live allocations
pub struct RegionTable {
    slots: [Region; REGION_CAPACITY],
}

impl Default for RegionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionTable {
    pub fn new() -> Self {
        Self {
            slots: [Region::default(); REGION_CAPACITY],
        }
    }

    /// Record a new live region. Returns false when the table is full.
    pub fn insert(&mut self, address: u32, size: u32) -> bool {
        for slot in self.slots.iter_mut() {
            if !slot.live {
                *slot = Region {
                    address,
                    size,
                    live: true,
                };
                return true;
            }
        }
        false
    }

    /// Mark the region starting at `address` dead. Returns false when no
    /// live region starts there.
    pub fn remove(&mut self, address: u32) -> bool {
        for slot in self.slots.iter_mut() {
            if slot.live && slot.address == address {
                slot.live = false;
                return true;
            }
        }
        false
    }

    /// True if a live region starts exactly at `address`.
    pub fn contains_exact(&self, address: u32) -> bool {
        self.slots
            .iter()
            .any(|s| s.live && s.address == address)
    }

    /// True if `[address, address + len)` lies entirely inside one live
    /// region. Ranges that overflow the 32-bit address space never fit.
    pub fn covers(&self, address: u32, len: u32) -> bool {
        let end = match address.checked_add(len) {
            Some(end) => u64::from(end),
            None => return false,
        };
        let address = u64::from(address);
        self.slots.iter().any(|s| {
            s.live
                && u64::from(s.address) <= address
                && end <= u64::from(s.address) + u64::from(s.size)
        })
    }

    /// Number of live records.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.live).count()
    }

    /// Live `(address, size)` pairs, in slot order.
    pub fn live_regions(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.slots
            .iter()
            .filter(|s| s.live)
            .map(|s| (s.address, s.size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_exact_lookup() {
        let mut table = RegionTable::new();
        assert!(table.insert(0x1000, 64));
        assert!(table.contains_exact(0x1000));
        assert!(!table.contains_exact(0x1001));
        assert_eq!(table.live_count(), 1);
    }

    #[test]
    fn test_remove_frees_the_slot() {
        let mut table = RegionTable::new();
        assert!(table.insert(0x1000, 64));
        assert!(table.remove(0x1000));
        assert!(!table.contains_exact(0x1000));
        assert!(!table.remove(0x1000));
        assert_eq!(table.live_count(), 0);
    }

    #[test]
    fn test_covers_inside_one_region() {
        let mut table = RegionTable::new();
        table.insert(0x1000, 64);

        assert!(table.covers(0x1000, 64));
        assert!(table.covers(0x1010, 16));
        assert!(table.covers(0x103F, 1));
        assert!(table.covers(0x1040, 0)); // empty range at the end

        assert!(!table.covers(0x0FFF, 2)); // straddles the start
        assert!(!table.covers(0x1030, 32)); // runs past the end
        assert!(!table.covers(0x2000, 1)); // elsewhere entirely
    }

    #[test]
    fn test_covers_rejects_address_overflow() {
        let mut table = RegionTable::new();
        table.insert(0xFFFF_FF00, 0xFF);
        assert!(!table.covers(0xFFFF_FFFF, 2));
    }

    #[test]
    fn test_covers_ignores_dead_regions() {
        let mut table = RegionTable::new();
        table.insert(0x1000, 64);
        table.remove(0x1000);
        assert!(!table.covers(0x1000, 1));
    }

    #[test]
    fn test_capacity_exhaustion_and_slot_reuse() {
        let mut table = RegionTable::new();
        for i in 0..REGION_CAPACITY {
            assert!(table.insert(0x1000 * (i as u32 + 1), 16));
        }
        assert!(!table.insert(0xFF00_0000, 16));

        // Freeing one slot makes room again.
        assert!(table.remove(0x1000));
        assert!(table.insert(0xFF00_0000, 16));
        assert_eq!(table.live_count(), REGION_CAPACITY);
    }
}
