//! The free-sector allocator collaborator.
//!
//! The free-map lives outside this crate: something else tracks which
//! sectors are free and hands out/reclaims runs of them. The inode layer
//! only ever calls `alloc`/`release` against this trait, keeping block
//! allocation policy separate from the layer that walks an inode's index
//! structure.

use alloc::vec::Vec;

/// Allocates and releases sectors on behalf of the inode layer.
///
/// Implementations decide their own free-space representation (bitmap,
/// extent list, ...); this crate only needs whole-sector granularity.
pub trait SectorAllocator {
    /// Allocates `n` free sectors, returning their sector numbers, or
    /// `None` if fewer than `n` are available.
    fn alloc(&self, n: usize) -> Option<Vec<u32>>;

    /// Marks `sector` free again.
    fn release(&self, sector: u32);
}

#[cfg(any(test, feature = "testing"))]
mod bump {
    use super::*;
    use crate::lock::Spinlock;

    /// A bitmap-backed [`SectorAllocator`] for tests and simulators: a
    /// linear scan over a `Vec<bool>` free list.
    pub struct BumpAllocator {
        free: Spinlock<Vec<bool>>,
    }

    impl BumpAllocator {
        /// `reserved` sectors starting at 0 (boot sector, root dir inode,
        /// free-map inode, ...) are marked used up front.
        pub fn new(num_sectors: u32, reserved: u32) -> Self {
            let mut free = alloc::vec![true; num_sectors as usize];
            for s in free.iter_mut().take(reserved as usize) {
                *s = false;
            }
            Self {
                free: Spinlock::new("free-map", free),
            }
        }
    }

    impl SectorAllocator for BumpAllocator {
        fn alloc(&self, n: usize) -> Option<Vec<u32>> {
            let mut free = self.free.lock();
            let available = free.iter().filter(|&&f| f).count();
            if available < n {
                return None;
            }
            let mut out = Vec::with_capacity(n);
            for (i, slot) in free.iter_mut().enumerate() {
                if out.len() == n {
                    break;
                }
                if *slot {
                    *slot = false;
                    out.push(i as u32);
                }
            }
            Some(out)
        }

        fn release(&self, sector: u32) {
            let mut free = self.free.lock();
            free[sector as usize] = true;
        }
    }
}

#[cfg(any(test, feature = "testing"))]
pub use bump::BumpAllocator;
