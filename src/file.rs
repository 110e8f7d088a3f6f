//! The open-file handle table.
//!
//! One [`FdTable`] per process, holding [`Handle`]s — a pinned open inode
//! plus a file kind and a seek offset. Descriptor allocation uses a hint
//! (`next_free_fd`) advanced past occupied slots rather than scanning from
//! zero every time, and closing a descriptor below the current hint lowers
//! it again so freed low descriptors are reused before the table grows.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::alloc_map::SectorAllocator;
use crate::cache::Cache;
use crate::device::BlockDevice;
use crate::error::{FsError, FsResult};
use crate::fs::table::OpenInode;
use crate::fs::dir;
use crate::param::{MAX_HANDLES_PER_PROC, NAME_MAX};
use crate::stat::Stat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    File,
    Directory,
}

/// One process's view of an open inode: what it's open as, and where the
/// next read/write/readdir picks up.
pub struct Handle {
    inode: Arc<OpenInode>,
    kind: HandleKind,
    offset: u32,
}

impl Handle {
    pub fn inumber(&self) -> u32 {
        self.inode.inumber()
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, HandleKind::Directory)
    }

    pub fn tell(&self) -> u32 {
        self.offset
    }

    pub fn seek(&mut self, pos: u32) {
        self.offset = pos;
    }

    pub fn length<D: BlockDevice + Sync>(&self, cache: &Cache<D>) -> u32 {
        self.inode.length(cache)
    }

    pub fn stat<D: BlockDevice + Sync>(&self, cache: &Cache<D>) -> Stat {
        Stat {
            inumber: self.inumber(),
            is_dir: self.is_dir(),
            size: self.length(cache),
        }
    }

    pub fn deny_write(&self) {
        self.inode.deny_write();
    }

    pub fn allow_write(&self) {
        self.inode.allow_write();
    }

    /// Reads from the current offset, advancing it by the number of bytes
    /// actually read.
    pub fn read<D: BlockDevice + Sync>(&mut self, cache: &Cache<D>, buf: &mut [u8]) -> FsResult<usize> {
        if self.is_dir() {
            return Err(FsError::WrongType);
        }
        let n = self.inode.read_at(cache, self.offset, buf);
        self.offset += n as u32;
        Ok(n)
    }

    /// Writes at the current offset, advancing it. Returns `Ok(0)` without
    /// writing if the inode currently has writes denied.
    pub fn write<D: BlockDevice + Sync, A: SectorAllocator>(
        &mut self,
        cache: &Cache<D>,
        allocator: &A,
        buf: &[u8],
    ) -> FsResult<usize> {
        if self.is_dir() {
            return Err(FsError::WrongType);
        }
        let n = self.inode.write_at(cache, allocator, self.offset, buf)?;
        self.offset += n as u32;
        Ok(n)
    }

    /// Returns the next live directory entry, advancing the offset past it.
    pub fn readdir<D: BlockDevice + Sync>(
        &mut self,
        cache: &Cache<D>,
    ) -> FsResult<Option<([u8; NAME_MAX], u32)>> {
        if !self.is_dir() {
            return Err(FsError::WrongType);
        }
        let mut pos = self.offset;
        let entry = dir::readdir(cache, &self.inode, &mut pos);
        self.offset = pos;
        Ok(entry)
    }

    pub fn into_inode(self) -> Arc<OpenInode> {
        self.inode
    }
}

/// A process's open-file descriptor table.
pub struct FdTable {
    slots: Vec<Option<Handle>>,
    next_free_fd: usize,
}

impl FdTable {
    pub fn new() -> Self {
        Self { slots: Vec::new(), next_free_fd: 0 }
    }

    fn alloc_fd(&mut self) -> FsResult<usize> {
        while self.next_free_fd < self.slots.len() && self.slots[self.next_free_fd].is_some() {
            self.next_free_fd += 1;
        }
        if self.next_free_fd == self.slots.len() {
            if self.slots.len() >= MAX_HANDLES_PER_PROC {
                return Err(FsError::TableFull);
            }
            self.slots.push(None);
        }
        Ok(self.next_free_fd)
    }

    /// Installs a freshly opened inode under a new descriptor.
    pub fn insert(&mut self, inode: Arc<OpenInode>, kind: HandleKind) -> FsResult<usize> {
        let fd = self.alloc_fd()?;
        self.slots[fd] = Some(Handle { inode, kind, offset: 0 });
        Ok(fd)
    }

    pub fn get(&self, fd: usize) -> FsResult<&Handle> {
        self.slots.get(fd).and_then(Option::as_ref).ok_or(FsError::NotFound)
    }

    pub fn get_mut(&mut self, fd: usize) -> FsResult<&mut Handle> {
        self.slots.get_mut(fd).and_then(Option::as_mut).ok_or(FsError::NotFound)
    }

    pub fn is_dir(&self, fd: usize) -> FsResult<bool> {
        Ok(self.get(fd)?.is_dir())
    }

    pub fn inumber(&self, fd: usize) -> FsResult<u32> {
        Ok(self.get(fd)?.inumber())
    }

    /// Drops `fd`, returning the inode it held so the caller can close it
    /// through the filesystem facade (this table does not hold a cache or
    /// allocator reference of its own). Lowers the allocation hint if `fd`
    /// was below it.
    pub fn remove(&mut self, fd: usize) -> FsResult<Arc<OpenInode>> {
        let handle = self
            .slots
            .get_mut(fd)
            .and_then(Option::take)
            .ok_or(FsError::NotFound)?;
        if fd < self.next_free_fd {
            self.next_free_fd = fd;
        }
        Ok(handle.into_inode())
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}
