//! The open-inode table.
//!
//! Tracks, per sector, how many callers currently hold the inode open
//! (`open_count`), whether its directory entry has been unlinked
//! (`removed`, deferred deletion), and how many holders have denied writes
//! to it (`deny_write_count`). At most one [`OpenInode`] exists per sector
//! at a time, shared via `Arc` in a growable `Spinlock<Vec<Arc<OpenInode>>>`
//! rather than a fixed-size slot array, with `MAX_OPEN_INODES` enforced as
//! a capacity check instead of a hard array bound.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::inode::{self, DiskInode};
use crate::alloc_map::SectorAllocator;
use crate::cache::Cache;
use crate::device::BlockDevice;
use crate::error::{FsError, FsResult};
use crate::lock::{SleepLock, Spinlock};
use crate::param::MAX_OPEN_INODES;

/// A single open instance of an on-disk inode, shared by every caller that
/// has it open.
pub struct OpenInode {
    sector: u32,
    open_count: AtomicU32,
    removed: AtomicBool,
    deny_write_count: AtomicU32,
    /// Serializes read-modify-write sequences against this inode's
    /// on-disk state.
    lock: SleepLock<()>,
}

impl OpenInode {
    pub fn sector(&self) -> u32 {
        self.sector
    }

    /// Every open inode can report its own sector number as an inode
    /// number.
    pub fn inumber(&self) -> u32 {
        self.sector
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    pub fn deny_write(&self) {
        self.deny_write_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn allow_write(&self) {
        self.deny_write_count.fetch_sub(1, Ordering::AcqRel);
    }

    fn write_denied(&self) -> bool {
        self.deny_write_count.load(Ordering::Acquire) > 0
    }

    pub fn length<D: BlockDevice + Sync>(&self, cache: &Cache<D>) -> u32 {
        let _guard = self.lock.lock();
        DiskInode::read_from_sector(cache, self.sector).length()
    }

    pub fn is_dir<D: BlockDevice + Sync>(&self, cache: &Cache<D>) -> bool {
        let _guard = self.lock.lock();
        DiskInode::read_from_sector(cache, self.sector).is_dir()
    }

    pub fn read_at<D: BlockDevice + Sync>(&self, cache: &Cache<D>, offset: u32, buf: &mut [u8]) -> usize {
        let _guard = self.lock.lock();
        let disk = DiskInode::read_from_sector(cache, self.sector);
        inode::read_at(cache, &disk, offset, buf)
    }

    /// Writes through to the inode's on-disk data, growing it if needed.
    /// Returns `Ok(0)` without touching the disk if writes are currently
    /// denied.
    pub fn write_at<D: BlockDevice + Sync, A: SectorAllocator>(
        &self,
        cache: &Cache<D>,
        allocator: &A,
        offset: u32,
        buf: &[u8],
    ) -> FsResult<usize> {
        if self.write_denied() {
            return Ok(0);
        }
        let _guard = self.lock.lock();
        let mut disk = DiskInode::read_from_sector(cache, self.sector);
        let n = inode::write_at(cache, allocator, &mut disk, offset, buf)?;
        disk.write_to_sector(cache, self.sector);
        Ok(n)
    }
}

/// The live set of open inodes.
pub struct OpenInodeTable {
    entries: Spinlock<Vec<Arc<OpenInode>>>,
}

impl OpenInodeTable {
    pub fn new() -> Self {
        Self {
            entries: Spinlock::new("open-inodes", Vec::new()),
        }
    }

    /// Opens (reference-counting a reopen of) the inode at `sector`.
    pub fn open(&self, sector: u32) -> FsResult<Arc<OpenInode>> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.iter().find(|e| e.sector == sector) {
            existing.open_count.fetch_add(1, Ordering::AcqRel);
            return Ok(Arc::clone(existing));
        }
        if entries.len() >= MAX_OPEN_INODES {
            return Err(FsError::TableFull);
        }
        let opened = Arc::new(OpenInode {
            sector,
            open_count: AtomicU32::new(1),
            removed: AtomicBool::new(false),
            deny_write_count: AtomicU32::new(0),
            lock: SleepLock::new(()),
        });
        entries.push(Arc::clone(&opened));
        Ok(opened)
    }

    /// Marks the inode at `sector` as unlinked from its directory. Its
    /// storage is released once the last holder closes it (deferred
    /// deletion). A no-op if `sector` is not currently open — the caller
    /// is responsible for destroying storage directly in that case.
    pub fn mark_removed(&self, sector: u32) -> bool {
        let entries = self.entries.lock();
        match entries.iter().find(|e| e.sector == sector) {
            Some(e) => {
                e.removed.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Drops one reference to `inode`. If it was the last one and the
    /// inode had been unlinked, its on-disk storage is released.
    pub fn close<D: BlockDevice + Sync, A: SectorAllocator>(
        &self,
        cache: &Cache<D>,
        allocator: &A,
        target: Arc<OpenInode>,
    ) {
        let mut entries = self.entries.lock();
        let remaining = target.open_count.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining != 0 {
            return;
        }
        entries.retain(|e| !Arc::ptr_eq(e, &target));
        drop(entries);
        if target.removed.load(Ordering::Acquire) {
            let disk = DiskInode::read_from_sector(cache, target.sector);
            inode::destroy(cache, allocator, &disk);
            allocator.release(target.sector);
        }
    }
}

impl Default for OpenInodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc_map::BumpAllocator;
    use crate::device::RamDisk;

    #[test]
    fn reopen_shares_the_same_instance() {
        let cache = Cache::new(RamDisk::new(32));
        let allocator = BumpAllocator::new(32, 8);
        let table = OpenInodeTable::new();
        let sector = inode::create(&cache, &allocator, false).unwrap();

        let a = table.open(sector).unwrap();
        let b = table.open(sector).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        table.close(&cache, &allocator, a);
        // Still one outstanding reference (`b`); storage must not be freed,
        // so only 23 of the 24 non-reserved sectors are free.
        let reclaimed = allocator.alloc(32 - 8 - 1).unwrap();
        assert_eq!(reclaimed.len(), 32 - 9);
        for s in reclaimed {
            allocator.release(s);
        }
        table.close(&cache, &allocator, b);
    }

    #[test]
    fn removed_inode_is_destroyed_on_last_close() {
        let cache = Cache::new(RamDisk::new(32));
        let allocator = BumpAllocator::new(32, 8);
        let table = OpenInodeTable::new();
        let sector = inode::create(&cache, &allocator, false).unwrap();

        let handle = table.open(sector).unwrap();
        table.mark_removed(sector);
        table.close(&cache, &allocator, handle);

        let reclaimed = allocator.alloc(32 - 8).unwrap();
        assert_eq!(reclaimed.len(), 32 - 8, "the inode's own sector was released");
    }

    #[test]
    fn deny_write_blocks_writes_without_erroring() {
        let cache = Cache::new(RamDisk::new(32));
        let allocator = BumpAllocator::new(32, 8);
        let table = OpenInodeTable::new();
        let sector = inode::create(&cache, &allocator, false).unwrap();
        let handle = table.open(sector).unwrap();

        handle.deny_write();
        let n = handle.write_at(&cache, &allocator, 0, b"denied").unwrap();
        assert_eq!(n, 0);

        handle.allow_write();
        let n = handle.write_at(&cache, &allocator, 0, b"allowed").unwrap();
        assert_eq!(n, b"allowed".len());
    }
}
