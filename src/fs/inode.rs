//! On-disk inode layout and the sector-mapped read/write/grow/destroy
//! operations built on it.
//!
//! `DiskInode` packs 122 direct pointers, one indirect pointer, one
//! doubly-indirect pointer, an `end` (bytes currently allocated, which can
//! run ahead of `length` while a write is growing the file) and a magic
//! number into exactly one sector. Fields are
//! `zerocopy::byteorder::U32<LittleEndian>` so the whole struct derives
//! `FromBytes`/`AsBytes`/`Unaligned` and sector (de)serialization needs no
//! unsafe casts of its own — a sector buffer is just reinterpreted.
//!
//! No in-memory copy of the on-disk inode is kept here: every operation
//! reads it fresh from the buffer cache and writes it back when it
//! changes. The per-inode lock serializing concurrent access to one
//! inode's on-disk state lives one layer up, in `table.rs`, which also
//! owns `open_count`/`removed`/`deny_write_count`.

use alloc::vec::Vec;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, Unaligned};

use crate::alloc_map::SectorAllocator;
use crate::cache::Cache;
use crate::device::BlockDevice;
use crate::error::{FsError, FsResult};
use crate::param::{MAXFILE, NDIRECT, NINDIRECT, SECTOR_SIZE};

type LE32 = U32<LittleEndian>;

pub const INODE_MAGIC: u32 = 0x494E_4F44;

/// The on-disk inode. Exactly [`SECTOR_SIZE`] bytes.
#[repr(C)]
#[derive(Clone, Copy, FromBytes, AsBytes, Unaligned)]
pub struct DiskInode {
    end: LE32,
    length: LE32,
    direct: [LE32; NDIRECT],
    indirect: LE32,
    doubly_indirect: LE32,
    is_dir: u8,
    _reserved: [u8; 3],
    magic: LE32,
}

impl DiskInode {
    pub fn new(is_dir: bool) -> Self {
        Self {
            end: LE32::new(0),
            length: LE32::new(0),
            direct: [LE32::new(0); NDIRECT],
            indirect: LE32::new(0),
            doubly_indirect: LE32::new(0),
            is_dir: is_dir as u8,
            _reserved: [0; 3],
            magic: LE32::new(INODE_MAGIC),
        }
    }

    pub fn length(&self) -> u32 {
        self.length.get()
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir != 0
    }

    pub fn is_valid(&self) -> bool {
        self.magic.get() == INODE_MAGIC
    }

    pub fn read_from_sector<D: BlockDevice + Sync>(cache: &Cache<D>, sector: u32) -> Self {
        let mut buf = [0u8; SECTOR_SIZE];
        cache.read(sector, &mut buf);
        *DiskInode::ref_from(&buf[..]).expect("sector-sized buffer")
    }

    pub fn write_to_sector<D: BlockDevice + Sync>(&self, cache: &Cache<D>, sector: u32) {
        cache.write(sector, self.as_bytes());
    }
}

#[repr(C)]
#[derive(Clone, Copy, FromBytes, AsBytes, Unaligned)]
struct IndexBlock {
    entries: [LE32; NINDIRECT],
}

fn read_index_block<D: BlockDevice + Sync>(cache: &Cache<D>, sector: u32) -> IndexBlock {
    let mut buf = [0u8; SECTOR_SIZE];
    cache.read(sector, &mut buf);
    *IndexBlock::ref_from(&buf[..]).expect("sector-sized buffer")
}

fn write_index_block<D: BlockDevice + Sync>(cache: &Cache<D>, sector: u32, block: &IndexBlock) {
    cache.write(sector, block.as_bytes());
}

fn ceil_div(n: usize, d: usize) -> usize {
    (n + d - 1) / d
}

/// Allocates a fresh sector and formats it as an empty inode of the given
/// kind, returning its sector number.
pub fn create<D: BlockDevice + Sync, A: SectorAllocator>(
    cache: &Cache<D>,
    allocator: &A,
    is_dir: bool,
) -> FsResult<u32> {
    let sector = allocator
        .alloc(1)
        .and_then(|v| v.into_iter().next())
        .ok_or(FsError::NoSpace)?;
    let disk = DiskInode::new(is_dir);
    disk.write_to_sector(cache, sector);
    Ok(sector)
}

/// Maps a byte offset to the data sector holding it, or `None` if that
/// offset falls in a hole (not yet allocated).
pub fn byte_to_sector<D: BlockDevice + Sync>(
    cache: &Cache<D>,
    disk: &DiskInode,
    byte_pos: u32,
) -> Option<u32> {
    if byte_pos >= disk.end.get() {
        return None;
    }
    let mut index = (byte_pos as usize) / SECTOR_SIZE;
    if index < NDIRECT {
        let s = disk.direct[index].get();
        return if s == 0 { None } else { Some(s) };
    }
    index -= NDIRECT;
    if index < NINDIRECT {
        let ind_sector = disk.indirect.get();
        if ind_sector == 0 {
            return None;
        }
        let block = read_index_block(cache, ind_sector);
        let s = block.entries[index].get();
        return if s == 0 { None } else { Some(s) };
    }
    index -= NINDIRECT;
    if index < NINDIRECT * NINDIRECT {
        let outer_idx = index / NINDIRECT;
        let inner_idx = index % NINDIRECT;
        let di_sector = disk.doubly_indirect.get();
        if di_sector == 0 {
            return None;
        }
        let outer = read_index_block(cache, di_sector);
        let inner_sector = outer.entries[outer_idx].get();
        if inner_sector == 0 {
            return None;
        }
        let inner = read_index_block(cache, inner_sector);
        let s = inner.entries[inner_idx].get();
        return if s == 0 { None } else { Some(s) };
    }
    None
}

fn ensure_index_block<D: BlockDevice + Sync, A: SectorAllocator>(
    cache: &Cache<D>,
    allocator: &A,
    field: &mut LE32,
    allocated: &mut Vec<u32>,
) -> FsResult<u32> {
    let cur = field.get();
    if cur != 0 {
        return Ok(cur);
    }
    let sector = allocator
        .alloc(1)
        .and_then(|v| v.into_iter().next())
        .ok_or(FsError::NoSpace)?;
    allocated.push(sector);
    cache.write(sector, &[0u8; SECTOR_SIZE]);
    field.set(sector);
    Ok(sector)
}

fn set_sector_at<D: BlockDevice + Sync, A: SectorAllocator>(
    cache: &Cache<D>,
    allocator: &A,
    disk: &mut DiskInode,
    mut index: usize,
    sector: u32,
    allocated: &mut Vec<u32>,
) -> FsResult<()> {
    if index < NDIRECT {
        disk.direct[index].set(sector);
        return Ok(());
    }
    index -= NDIRECT;
    if index < NINDIRECT {
        let ind_sector = ensure_index_block(cache, allocator, &mut disk.indirect, allocated)?;
        let mut block = read_index_block(cache, ind_sector);
        block.entries[index].set(sector);
        write_index_block(cache, ind_sector, &block);
        return Ok(());
    }
    index -= NINDIRECT;
    let outer_idx = index / NINDIRECT;
    let inner_idx = index % NINDIRECT;
    let di_sector = ensure_index_block(cache, allocator, &mut disk.doubly_indirect, allocated)?;
    let mut outer = read_index_block(cache, di_sector);
    let inner_sector = if outer.entries[outer_idx].get() == 0 {
        let s = allocator
            .alloc(1)
            .and_then(|v| v.into_iter().next())
            .ok_or(FsError::NoSpace)?;
        allocated.push(s);
        cache.write(s, &[0u8; SECTOR_SIZE]);
        outer.entries[outer_idx].set(s);
        write_index_block(cache, di_sector, &outer);
        s
    } else {
        outer.entries[outer_idx].get()
    };
    let mut inner = read_index_block(cache, inner_sector);
    inner.entries[inner_idx].set(sector);
    write_index_block(cache, inner_sector, &inner);
    Ok(())
}

/// Extends the allocated range of `disk` toward `new_end` bytes, allocating
/// and zeroing new data (and index) sectors one at a time and bumping
/// `disk.end` immediately after each data sector is linked in. If a sector
/// allocation runs out of space partway through, growth simply stops there:
/// every sector already linked (and reflected in `disk.end`) stays linked,
/// and only the sectors touched by the failing step — its orphaned data
/// sector and any index block freshly allocated to route it — are released.
/// Returns the range actually reached, which may fall short of `new_end`.
pub fn grow<D: BlockDevice + Sync, A: SectorAllocator>(
    cache: &Cache<D>,
    allocator: &A,
    disk: &mut DiskInode,
    new_end: u32,
) -> u32 {
    let old_end = disk.end.get();
    if new_end <= old_end {
        return old_end;
    }
    let old_sectors = ceil_div(old_end as usize, SECTOR_SIZE);
    let full_needed_sectors = ceil_div(new_end as usize, SECTOR_SIZE);
    let needed_sectors = full_needed_sectors.min(MAXFILE);
    let target_end = if full_needed_sectors <= MAXFILE {
        new_end
    } else {
        (MAXFILE * SECTOR_SIZE) as u32
    };

    for index in old_sectors..needed_sectors {
        let sector = match allocator.alloc(1).and_then(|v| v.into_iter().next()) {
            Some(s) => s,
            None => break,
        };
        cache.write(sector, &[0u8; SECTOR_SIZE]);

        let mut step_allocated = Vec::new();
        match set_sector_at(cache, allocator, &mut *disk, index, sector, &mut step_allocated) {
            Ok(()) => {
                let is_last = index + 1 == needed_sectors;
                let reached = if is_last { target_end } else { ((index + 1) * SECTOR_SIZE) as u32 };
                disk.end.set(reached);
            }
            Err(_) => {
                allocator.release(sector);
                for s in step_allocated {
                    allocator.release(s);
                }
                break;
            }
        }
    }
    disk.end.get()
}

/// Releases every sector this inode owns: its data sectors and the index
/// blocks addressing them, in three passes (direct, indirect, doubly
/// indirect).
pub fn destroy<D: BlockDevice + Sync, A: SectorAllocator>(
    cache: &Cache<D>,
    allocator: &A,
    disk: &DiskInode,
) {
    let sectors = ceil_div(disk.end.get() as usize, SECTOR_SIZE);

    for index in 0..sectors.min(NDIRECT) {
        let s = disk.direct[index].get();
        if s != 0 {
            allocator.release(s);
        }
    }

    if sectors > NDIRECT {
        let ind_sector = disk.indirect.get();
        if ind_sector != 0 {
            let block = read_index_block(cache, ind_sector);
            let count = (sectors - NDIRECT).min(NINDIRECT);
            for entry in block.entries.iter().take(count) {
                let s = entry.get();
                if s != 0 {
                    allocator.release(s);
                }
            }
            allocator.release(ind_sector);
        }
    }

    if sectors > NDIRECT + NINDIRECT {
        let di_sector = disk.doubly_indirect.get();
        if di_sector != 0 {
            let outer = read_index_block(cache, di_sector);
            let remaining = sectors - NDIRECT - NINDIRECT;
            let outer_count = ceil_div(remaining, NINDIRECT);
            for (o, outer_entry) in outer.entries.iter().take(outer_count).enumerate() {
                let inner_sector = outer_entry.get();
                if inner_sector == 0 {
                    continue;
                }
                let inner = read_index_block(cache, inner_sector);
                let inner_count = if o == outer_count - 1 {
                    remaining - o * NINDIRECT
                } else {
                    NINDIRECT
                };
                for entry in inner.entries.iter().take(inner_count) {
                    let s = entry.get();
                    if s != 0 {
                        allocator.release(s);
                    }
                }
                allocator.release(inner_sector);
            }
            allocator.release(di_sector);
        }
    }
}

/// Reads up to `buf.len()` bytes starting at `offset`, returning the number
/// actually read (short only at end-of-file). Holes in the allocated range
/// read back as zero.
pub fn read_at<D: BlockDevice + Sync>(cache: &Cache<D>, disk: &DiskInode, offset: u32, buf: &mut [u8]) -> usize {
    let file_len = disk.length.get();
    if offset >= file_len || buf.is_empty() {
        return 0;
    }
    let want = core::cmp::min(buf.len() as u32, file_len - offset);
    let mut done = 0u32;
    while done < want {
        let pos = offset + done;
        let sector_ofs = (pos as usize) % SECTOR_SIZE;
        let chunk = core::cmp::min(SECTOR_SIZE - sector_ofs, (want - done) as usize);
        match byte_to_sector(cache, disk, pos) {
            Some(sector) => {
                let mut sector_buf = [0u8; SECTOR_SIZE];
                cache.read(sector, &mut sector_buf);
                let d = done as usize;
                buf[d..d + chunk].copy_from_slice(&sector_buf[sector_ofs..sector_ofs + chunk]);
            }
            None => {
                let d = done as usize;
                for b in &mut buf[d..d + chunk] {
                    *b = 0;
                }
            }
        }
        done += chunk as u32;
    }
    done as usize
}

/// Writes `buf` at `offset`, growing the inode first if needed, and updates
/// `disk.length` if the write extends the file. Running out of space mid-
/// growth is not an error here: the write falls back to however many bytes
/// actually fit in the range `grow` managed to reach and returns that short
/// count, the same way a write that fills the disk trails off rather than
/// failing outright.
pub fn write_at<D: BlockDevice + Sync, A: SectorAllocator>(
    cache: &Cache<D>,
    allocator: &A,
    disk: &mut DiskInode,
    offset: u32,
    buf: &[u8],
) -> FsResult<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    let new_required_len = offset.saturating_add(buf.len() as u32);
    let new_required_len = core::cmp::min(new_required_len, crate::param::MAX_FILE_BYTES as u32);

    let reached_end = if new_required_len > disk.end.get() {
        grow(cache, allocator, disk, new_required_len)
    } else {
        disk.end.get()
    };
    let writable_len = reached_end.saturating_sub(offset).min(buf.len() as u32) as usize;
    let buf = &buf[..writable_len];

    let mut written = 0usize;
    while written < buf.len() {
        let pos = offset + written as u32;
        let sector_ofs = (pos as usize) % SECTOR_SIZE;
        let chunk = core::cmp::min(SECTOR_SIZE - sector_ofs, buf.len() - written);
        let sector = byte_to_sector(cache, disk, pos).expect("grow() covered this offset");
        let mut sector_buf = [0u8; SECTOR_SIZE];
        if sector_ofs != 0 || chunk != SECTOR_SIZE {
            cache.read(sector, &mut sector_buf);
        }
        sector_buf[sector_ofs..sector_ofs + chunk].copy_from_slice(&buf[written..written + chunk]);
        cache.write(sector, &sector_buf);
        written += chunk;
    }

    let new_length = offset + written as u32;
    if new_length > disk.length.get() {
        disk.length.set(new_length);
    }
    Ok(written)
}
