//! Sizing constants for the cache and the on-disk layout: a single place
//! naming the fixed capacities the rest of the crate assumes.

/// Sector size in bytes. All on-disk structures are sector-aligned.
pub const SECTOR_SIZE: usize = 512;

/// Number of fixed slots in the buffer cache.
pub const CACHE_CAPACITY: usize = 64;

/// Number of direct block pointers in an on-disk inode.
pub const NDIRECT: usize = 122;

/// Number of sector pointers that fit in one indirect (or doubly-indirect
/// second-level) block: one sector of `u32`s.
pub const NINDIRECT: usize = SECTOR_SIZE / core::mem::size_of::<u32>();

/// Largest file-sector index (exclusive) reachable through direct,
/// indirect, and doubly-indirect pointers.
pub const MAXFILE: usize = NDIRECT + NINDIRECT + NINDIRECT * NINDIRECT;

/// Maximum bytes a file may grow to.
pub const MAX_FILE_BYTES: u64 = (MAXFILE * SECTOR_SIZE) as u64;

/// Maximum length of one path component, not counting the NUL terminator.
pub const NAME_MAX: usize = 14;

/// Sector holding the root directory's inode.
pub const ROOT_DIR_SECTOR: u32 = 1;

/// Sector holding the free-map's own inode (owned by the `SectorAllocator`
/// collaborator; reserved here only so callers agree on the layout).
pub const FREE_MAP_SECTOR: u32 = 2;

/// Maximum number of simultaneously open (in-memory) inodes.
pub const MAX_OPEN_INODES: usize = 64;

/// Maximum number of open file/directory handles per process.
pub const MAX_HANDLES_PER_PROC: usize = 16;

/// Number of directory entries a freshly created directory is pre-sized
/// for (the inode still grows on demand beyond this).
pub const INITIAL_DIR_ENTRIES: usize = 16;
