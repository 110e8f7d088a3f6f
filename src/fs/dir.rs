//! Directories, stored as regular inodes whose contents are a flat array
//! of directory entries.
//!
//! `DirEntry` is an inode sector number, a name, and an in-use flag, read
//! and written through the same `OpenInode::read_at`/`write_at` the file
//! layer uses — a directory has no storage of its own beyond being an
//! inode whose bytes happen to be a sequence of fixed-size entries.

use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, Unaligned};

use super::table::OpenInode;
use crate::alloc_map::SectorAllocator;
use crate::cache::Cache;
use crate::device::BlockDevice;
use crate::error::{FsError, FsResult};
use crate::param::NAME_MAX;

type LE32 = U32<LittleEndian>;

#[repr(C)]
#[derive(Clone, Copy, FromBytes, AsBytes, Unaligned)]
pub struct DirEntry {
    inum: LE32,
    in_use: u8,
    name: [u8; NAME_MAX],
    _pad: u8,
}

const ENTRY_SIZE: u32 = core::mem::size_of::<DirEntry>() as u32;

impl DirEntry {
    fn empty() -> Self {
        DirEntry::new_zeroed()
    }

    fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    fn set_name(&mut self, name: &str) -> FsResult<()> {
        if name.is_empty() || name.len() > NAME_MAX {
            return Err(FsError::NameError);
        }
        self.name = [0u8; NAME_MAX];
        self.name[..name.len()].copy_from_slice(name.as_bytes());
        Ok(())
    }
}

/// Finds `name` among `dir`'s entries, returning the target's inode sector.
pub fn lookup<D: BlockDevice + Sync>(cache: &Cache<D>, dir: &OpenInode, name: &str) -> Option<u32> {
    let len = dir.length(cache);
    let mut offset = 0u32;
    while offset < len {
        let mut buf = DirEntry::empty();
        let n = dir.read_at(cache, offset, buf.as_bytes_mut());
        if (n as u32) < ENTRY_SIZE {
            break;
        }
        if buf.in_use != 0 && buf.name_str() == name {
            return Some(buf.inum.get());
        }
        offset += ENTRY_SIZE;
    }
    None
}

/// Adds a `name -> inum` entry to `dir`, reusing a freed slot if one exists
/// or appending (growing the directory's inode) otherwise. Fails with
/// [`FsError::Exists`] if `name` is already present.
pub fn add<D: BlockDevice + Sync, A: SectorAllocator>(
    cache: &Cache<D>,
    allocator: &A,
    dir: &OpenInode,
    name: &str,
    inum: u32,
) -> FsResult<()> {
    if lookup(cache, dir, name).is_some() {
        return Err(FsError::Exists);
    }
    let len = dir.length(cache);
    let mut offset = 0u32;
    let mut free_offset = None;
    while offset < len {
        let mut buf = DirEntry::empty();
        let n = dir.read_at(cache, offset, buf.as_bytes_mut());
        if (n as u32) < ENTRY_SIZE {
            break;
        }
        if buf.in_use == 0 {
            free_offset = Some(offset);
            break;
        }
        offset += ENTRY_SIZE;
    }
    let write_offset = free_offset.unwrap_or(len);

    let mut entry = DirEntry::empty();
    entry.in_use = 1;
    entry.inum.set(inum);
    entry.set_name(name)?;

    let written = dir.write_at(cache, allocator, write_offset, entry.as_bytes())?;
    if (written as u32) != ENTRY_SIZE {
        return Err(FsError::NoSpace);
    }
    Ok(())
}

/// Removes `name` from `dir`, returning the inode sector it pointed to.
pub fn remove<D: BlockDevice + Sync, A: SectorAllocator>(
    cache: &Cache<D>,
    allocator: &A,
    dir: &OpenInode,
    name: &str,
) -> FsResult<u32> {
    let len = dir.length(cache);
    let mut offset = 0u32;
    while offset < len {
        let mut buf = DirEntry::empty();
        let n = dir.read_at(cache, offset, buf.as_bytes_mut());
        if (n as u32) < ENTRY_SIZE {
            break;
        }
        if buf.in_use != 0 && buf.name_str() == name {
            let inum = buf.inum.get();
            buf.in_use = 0;
            dir.write_at(cache, allocator, offset, buf.as_bytes())?;
            return Ok(inum);
        }
        offset += ENTRY_SIZE;
    }
    Err(FsError::NotFound)
}

/// True if `dir` contains nothing but (at most) `.` and `..`.
pub fn is_empty<D: BlockDevice + Sync>(cache: &Cache<D>, dir: &OpenInode) -> bool {
    let len = dir.length(cache);
    let mut offset = 0u32;
    while offset < len {
        let mut buf = DirEntry::empty();
        let n = dir.read_at(cache, offset, buf.as_bytes_mut());
        if (n as u32) < ENTRY_SIZE {
            break;
        }
        if buf.in_use != 0 {
            let name = buf.name_str();
            if name != "." && name != ".." {
                return false;
            }
        }
        offset += ENTRY_SIZE;
    }
    true
}

/// Iterates live entries starting at `*pos`, advancing it past the entry
/// returned. Returns `None` once the directory is exhausted.
pub fn readdir<D: BlockDevice + Sync>(
    cache: &Cache<D>,
    dir: &OpenInode,
    pos: &mut u32,
) -> Option<([u8; NAME_MAX], u32)> {
    let len = dir.length(cache);
    loop {
        if *pos >= len {
            return None;
        }
        let mut buf = DirEntry::empty();
        let n = dir.read_at(cache, *pos, buf.as_bytes_mut());
        *pos += ENTRY_SIZE;
        if (n as u32) < ENTRY_SIZE {
            return None;
        }
        if buf.in_use != 0 {
            let name = buf.name_str();
            if name == "." || name == ".." {
                continue;
            }
            return Some((buf.name, buf.inum.get()));
        }
    }
}

/// Wires up `.` and `..` for a newly created directory.
pub fn init<D: BlockDevice + Sync, A: SectorAllocator>(
    cache: &Cache<D>,
    allocator: &A,
    dir: &OpenInode,
    parent_inum: u32,
) -> FsResult<()> {
    add(cache, allocator, dir, ".", dir.inumber())?;
    add(cache, allocator, dir, "..", parent_inum)?;
    Ok(())
}
