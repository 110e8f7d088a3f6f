//! The sector buffer cache.
//!
//! A fixed-capacity set of sector-sized slots sitting between the inode
//! layer and the block device, using clock (second-chance) eviction: each
//! slot carries an `accessed` bit cleared by a sweeping hand instead of
//! true LRU bookkeeping. A scan first looks for a free slot; failing that
//! it sweeps clearing `accessed` bits until it finds an unpinned,
//! unreferenced slot, flushing it first if dirty. One lock guards the
//! whole slot table, and a pin count lets a caller hold a slot across more
//! than one operation.
//!
//! There is no condition variable: when every slot is pinned,
//! [`Cache::acquire_slot`] releases the table lock and spins
//! (`core::hint::spin_loop`) before retrying. See `DESIGN.md` for why.

use core::hint::spin_loop;

use crate::device::BlockDevice;
use crate::lock::Spinlock;
use crate::param::{CACHE_CAPACITY, SECTOR_SIZE};

#[derive(Clone, Copy)]
struct CacheSlot {
    sector: Option<u32>,
    data: [u8; SECTOR_SIZE],
    accessed: bool,
    dirty: bool,
    pin_count: u32,
}

impl CacheSlot {
    const fn empty() -> Self {
        Self {
            sector: None,
            data: [0u8; SECTOR_SIZE],
            accessed: false,
            dirty: false,
            pin_count: 0,
        }
    }
}

struct CacheInner {
    slots: [CacheSlot; CACHE_CAPACITY],
    clock_hand: usize,
}

impl CacheInner {
    /// Sweeps from `clock_hand` looking for an unpinned slot, clearing
    /// `accessed` bits as it passes over referenced-but-unpinned slots. Two
    /// full laps guarantee termination: a slot cleared in lap one is
    /// evictable in lap two unless it was re-accessed in between.
    fn evict_candidate(&mut self) -> Option<usize> {
        for _ in 0..(2 * CACHE_CAPACITY) {
            let idx = self.clock_hand;
            self.clock_hand = (self.clock_hand + 1) % CACHE_CAPACITY;
            let slot = &mut self.slots[idx];
            if slot.pin_count > 0 {
                continue;
            }
            if slot.accessed {
                slot.accessed = false;
                continue;
            }
            return Some(idx);
        }
        None
    }
}

/// The buffer cache.
pub struct Cache<D: BlockDevice> {
    inner: Spinlock<CacheInner>,
    device: D,
}

/// A pinned reference to a cached sector.
///
/// Holding a handle guarantees the slot will not be evicted; dropping it
/// unpins. The underlying bytes
/// are only touched while briefly re-taking the cache's internal lock, so a
/// handle may be held across unrelated work without blocking other callers'
/// metadata operations for long.
pub struct CacheHandle<'a, D: BlockDevice> {
    cache: &'a Cache<D>,
    slot: usize,
}

impl<D: BlockDevice + Sync> Cache<D> {
    pub fn new(device: D) -> Self {
        Self {
            inner: Spinlock::new("cache", CacheInner {
                slots: [CacheSlot::empty(); CACHE_CAPACITY],
                clock_hand: 0,
            }),
            device,
        }
    }

    fn flush_if_dirty(&self, inner: &mut CacheInner, idx: usize) {
        let slot = &mut inner.slots[idx];
        if slot.dirty {
            if let Some(sector) = slot.sector {
                self.device.write(sector, &slot.data);
            }
            slot.dirty = false;
        }
    }

    fn load_into(&self, inner: &mut CacheInner, idx: usize, sector: u32) {
        {
            let slot = &mut inner.slots[idx];
            slot.sector = Some(sector);
            slot.accessed = false;
            slot.dirty = false;
        }
        self.device.read(sector, &mut inner.slots[idx].data);
    }

    /// Pins the slot holding `sector`, loading it from the device first if
    /// it is not already cached. Blocks (busy-waits) if every slot is
    /// currently pinned.
    pub fn acquire_slot(&self, sector: u32) -> CacheHandle<'_, D> {
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some(idx) = inner.slots.iter().position(|s| s.sector == Some(sector)) {
                    let slot = &mut inner.slots[idx];
                    slot.pin_count += 1;
                    slot.accessed = true;
                    return CacheHandle { cache: self, slot: idx };
                }
                if let Some(idx) = inner.slots.iter().position(|s| s.sector.is_none()) {
                    self.load_into(&mut inner, idx, sector);
                    inner.slots[idx].pin_count += 1;
                    return CacheHandle { cache: self, slot: idx };
                }
                if let Some(idx) = inner.evict_candidate() {
                    self.flush_if_dirty(&mut inner, idx);
                    self.load_into(&mut inner, idx, sector);
                    inner.slots[idx].pin_count += 1;
                    return CacheHandle { cache: self, slot: idx };
                }
                // Every slot pinned. Drop the lock and let the pinning
                // callers make progress before we try the sweep again.
            }
            spin_loop();
        }
    }

    /// Reads `sector` into `buf` without holding a pin past the call.
    pub fn read(&self, sector: u32, buf: &mut [u8]) {
        self.acquire_slot(sector).read(buf);
    }

    /// Writes `buf` to `sector` without holding a pin past the call.
    pub fn write(&self, sector: u32, buf: &[u8]) {
        self.acquire_slot(sector).write(buf);
    }

    /// Flushes every dirty slot to the device, leaving slots populated.
    pub fn flush_all(&self) {
        let mut inner = self.inner.lock();
        for idx in 0..CACHE_CAPACITY {
            self.flush_if_dirty(&mut inner, idx);
        }
    }

    /// Flushes and hands the device back, consuming the cache.
    pub fn shutdown(self) -> D {
        self.flush_all();
        self.device
    }
}

impl<'a, D: BlockDevice + Sync> CacheHandle<'a, D> {
    pub fn read(&self, buf: &mut [u8]) {
        assert_eq!(buf.len(), SECTOR_SIZE);
        let mut inner = self.cache.inner.lock();
        let slot = &mut inner.slots[self.slot];
        buf.copy_from_slice(&slot.data);
        slot.accessed = true;
    }

    pub fn write(&self, buf: &[u8]) {
        assert_eq!(buf.len(), SECTOR_SIZE);
        let mut inner = self.cache.inner.lock();
        let slot = &mut inner.slots[self.slot];
        slot.data.copy_from_slice(buf);
        slot.accessed = true;
        slot.dirty = true;
    }

    pub fn sector(&self) -> u32 {
        let inner = self.cache.inner.lock();
        inner.slots[self.slot].sector.expect("pinned slot always has a sector")
    }
}

impl<'a, D: BlockDevice + Sync> Drop for CacheHandle<'a, D> {
    fn drop(&mut self) {
        let mut inner = self.cache.inner.lock();
        inner.slots[self.slot].pin_count -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RamDisk;

    #[test]
    fn read_after_write_round_trips() {
        let cache = Cache::new(RamDisk::new(8));
        let mut buf = [7u8; SECTOR_SIZE];
        cache.write(3, &buf);
        buf = [0u8; SECTOR_SIZE];
        cache.read(3, &mut buf);
        assert_eq!(buf, [7u8; SECTOR_SIZE]);
    }

    #[test]
    fn eviction_flushes_dirty_slots() {
        // Capacity + 1 distinct sectors forces at least one eviction; every
        // sector must still read back correctly afterward.
        let cache = Cache::new(RamDisk::new((CACHE_CAPACITY as u32) + 4));
        for s in 0..(CACHE_CAPACITY as u32 + 4) {
            let buf = [s as u8; SECTOR_SIZE];
            cache.write(s, &buf);
        }
        for s in 0..(CACHE_CAPACITY as u32 + 4) {
            let mut buf = [0u8; SECTOR_SIZE];
            cache.read(s, &mut buf);
            assert_eq!(buf, [s as u8; SECTOR_SIZE]);
        }
    }

    #[test]
    fn pin_prevents_eviction() {
        let cache = Cache::new(RamDisk::new((CACHE_CAPACITY as u32) + 2));
        let handle = cache.acquire_slot(0);
        for s in 1..(CACHE_CAPACITY as u32 + 2) {
            cache.write(s, &[s as u8; SECTOR_SIZE]);
        }
        let mut buf = [0u8; SECTOR_SIZE];
        handle.read(&mut buf);
        assert_eq!(handle.sector(), 0);
    }
}
