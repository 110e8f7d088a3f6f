//! The filesystem facade: path resolution plus the create/open/remove/chdir
//! operations built on top of it, and format-time root directory
//! construction.
//!
//! This module owns none of the on-disk format, only the orchestration:
//! resolve a path, touch the directory and inode layers, roll back on
//! failure.

pub mod dir;
pub mod inode;
pub mod path;
pub mod table;

use alloc::sync::Arc;

use crate::alloc_map::SectorAllocator;
use crate::cache::Cache;
use crate::device::BlockDevice;
use crate::error::{FsError, FsResult};
use inode::DiskInode;
use table::{OpenInode, OpenInodeTable};

bitflags::bitflags! {
    /// Flags for [`Filesystem::open_with`].
    pub struct OpenFlags: u32 {
        /// Create `path` as a file if it does not already exist.
        const CREATE = 1 << 0;
    }
}

/// The per-thread state this crate needs but does not own: which inode is
/// the calling thread's current working directory. The scheduler/thread
/// subsystem owns the storage; this crate only reads it per call.
pub trait ThreadContext {
    fn cwd_sector(&self) -> u32;
}

/// The filesystem facade.
pub struct Filesystem<D: BlockDevice + Sync, A: SectorAllocator> {
    cache: Cache<D>,
    allocator: A,
    table: OpenInodeTable,
    root_sector: u32,
}

impl<D: BlockDevice + Sync, A: SectorAllocator> Filesystem<D, A> {
    /// Formats a fresh filesystem on `device`: allocates and initializes
    /// the root directory, wiring its own `.` and `..` to itself.
    /// `allocator` is expected to have already reserved
    /// whatever low sectors are externally significant (boot sector,
    /// free-map's own inode) so the root directory lands on the sector the
    /// rest of the system expects — see `DESIGN.md` for how this crate
    /// reconciles that with not owning a superblock.
    pub fn format(device: D, allocator: A) -> FsResult<Self> {
        let cache = Cache::new(device);
        let table = OpenInodeTable::new();
        let root_sector = inode::create(&cache, &allocator, true)?;
        let root = table.open(root_sector)?;
        let init_result = dir::init(&cache, &allocator, &root, root_sector);
        table.close(&cache, &allocator, root);
        init_result?;
        Ok(Self { cache, allocator, table, root_sector })
    }

    /// Mounts an already-formatted filesystem whose root directory lives at
    /// `root_sector`.
    pub fn mount(device: D, allocator: A, root_sector: u32) -> Self {
        Self {
            cache: Cache::new(device),
            allocator,
            table: OpenInodeTable::new(),
            root_sector,
        }
    }

    pub fn root_sector(&self) -> u32 {
        self.root_sector
    }

    /// Flushes the buffer cache and hands the device back.
    pub fn shutdown(self) -> D {
        self.cache.shutdown()
    }

    /// Creates a file or directory at `path`. The new entry's parent must
    /// already exist and must not already contain `path`'s final component.
    pub fn create(&self, ctx: &impl ThreadContext, path: &str, is_dir: bool) -> FsResult<()> {
        let (parent_sector, name) =
            path::resolve_parent(&self.cache, &self.allocator, &self.table, self.root_sector, ctx.cwd_sector(), path)?;
        let parent = self.table.open(parent_sector)?;

        let result = (|| -> FsResult<()> {
            if dir::lookup(&self.cache, &parent, name).is_some() {
                return Err(FsError::Exists);
            }
            let new_sector = inode::create(&self.cache, &self.allocator, is_dir)?;
            if is_dir {
                let new_dir = self.table.open(new_sector)?;
                let init_result = dir::init(&self.cache, &self.allocator, &new_dir, parent_sector);
                self.table.close(&self.cache, &self.allocator, new_dir);
                init_result?;
            }
            dir::add(&self.cache, &self.allocator, &parent, name, new_sector).map_err(|e| {
                let disk = DiskInode::read_from_sector(&self.cache, new_sector);
                inode::destroy(&self.cache, &self.allocator, &disk);
                self.allocator.release(new_sector);
                e
            })
        })();

        self.table.close(&self.cache, &self.allocator, parent);
        result
    }

    /// Opens `path`, returning a pinned open-inode handle. A per-process
    /// handle table is built on top of this (see `file.rs`).
    pub fn open(&self, ctx: &impl ThreadContext, path: &str) -> FsResult<Arc<OpenInode>> {
        let sector =
            path::resolve(&self.cache, &self.allocator, &self.table, self.root_sector, ctx.cwd_sector(), path)?;
        self.table.open(sector)
    }

    /// `open`, but creates `path` as a file first if it doesn't already
    /// exist and [`OpenFlags::CREATE`] is set. The caller-facing convenience
    /// a syscall-dispatch layer would otherwise have to build itself out of
    /// `create`+`open`.
    pub fn open_with(&self, ctx: &impl ThreadContext, path: &str, flags: OpenFlags) -> FsResult<Arc<OpenInode>> {
        match self.open(ctx, path) {
            Ok(handle) => Ok(handle),
            Err(FsError::NotFound) if flags.contains(OpenFlags::CREATE) => {
                self.create(ctx, path, false)?;
                self.open(ctx, path)
            }
            Err(e) => Err(e),
        }
    }

    /// Releases a handle obtained from [`Filesystem::open`] or
    /// [`Filesystem::chdir`]. There is no `Drop`-based auto-close: closing
    /// needs the cache and allocator to potentially destroy storage, so it
    /// is a call the holder must make explicitly rather than an RAII
    /// destructor.
    pub fn close(&self, handle: Arc<OpenInode>) {
        self.table.close(&self.cache, &self.allocator, handle)
    }

    /// Unlinks `path`'s directory entry. If the target is still open
    /// elsewhere, its storage is released only once the last holder closes
    /// it (deferred deletion). Refuses to remove the root, `.`, `..`, a
    /// non-empty directory, or the caller's own current directory — since
    /// this crate does not own CWD storage, it cannot detach a reference
    /// it cannot reach, so it refuses the removal instead (see
    /// `DESIGN.md`).
    pub fn remove(&self, ctx: &impl ThreadContext, path: &str) -> FsResult<()> {
        let (parent_sector, name) =
            path::resolve_parent(&self.cache, &self.allocator, &self.table, self.root_sector, ctx.cwd_sector(), path)?;
        if name == "." || name == ".." {
            return Err(FsError::Forbidden);
        }
        let parent = self.table.open(parent_sector)?;

        let result = (|| -> FsResult<()> {
            let target_sector = dir::lookup(&self.cache, &parent, name).ok_or(FsError::NotFound)?;
            if target_sector == self.root_sector || target_sector == ctx.cwd_sector() {
                return Err(FsError::Forbidden);
            }
            if path::sector_is_dir(&self.cache, &self.allocator, &self.table, target_sector)? {
                let target = self.table.open(target_sector)?;
                let empty = dir::is_empty(&self.cache, &target);
                self.table.close(&self.cache, &self.allocator, target);
                if !empty {
                    return Err(FsError::NotEmpty);
                }
            }
            dir::remove(&self.cache, &self.allocator, &parent, name)?;
            if !self.table.mark_removed(target_sector) {
                // Nobody has it open, so no future `close()` will trigger
                // the deferred-delete path; destroy it now.
                let disk = DiskInode::read_from_sector(&self.cache, target_sector);
                inode::destroy(&self.cache, &self.allocator, &disk);
                self.allocator.release(target_sector);
            }
            Ok(())
        })();

        self.table.close(&self.cache, &self.allocator, parent);
        result
    }

    /// Resolves `path` to a directory and pins it, for the caller to adopt
    /// as its new current working directory. The caller is responsible for
    /// closing its previous CWD handle.
    pub fn chdir(&self, ctx: &impl ThreadContext, path: &str) -> FsResult<Arc<OpenInode>> {
        let sector =
            path::resolve(&self.cache, &self.allocator, &self.table, self.root_sector, ctx.cwd_sector(), path)?;
        let handle = self.table.open(sector)?;
        if !handle.is_dir(&self.cache) {
            self.table.close(&self.cache, &self.allocator, handle);
            return Err(FsError::NotADirectory);
        }
        Ok(handle)
    }
}

#[cfg(any(test, feature = "testing"))]
impl<D: BlockDevice + Sync, A: SectorAllocator> Filesystem<D, A> {
    /// Exposes the cache/allocator to other modules' and integration tests
    /// (`file.rs`'s `FdTable` tests and `tests/integration.rs` both need to
    /// drive an `OpenInode`/`Handle` directly) without making them part of
    /// the real API.
    pub fn test_cache(&self) -> &Cache<D> {
        &self.cache
    }

    pub fn test_allocator(&self) -> &A {
        &self.allocator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc_map::BumpAllocator;
    use crate::device::RamDisk;

    struct FixedCwd(u32);
    impl ThreadContext for FixedCwd {
        fn cwd_sector(&self) -> u32 {
            self.0
        }
    }

    fn new_fs() -> Filesystem<RamDisk, BumpAllocator> {
        let device = RamDisk::new(64);
        let allocator = BumpAllocator::new(64, 8);
        Filesystem::format(device, allocator).unwrap()
    }

    #[test]
    fn create_and_open_a_file() {
        let fs = new_fs();
        let root = fs.root_sector();
        let ctx = FixedCwd(root);
        fs.create(&ctx, "/greeting.txt", false).unwrap();

        let handle = fs.open(&ctx, "/greeting.txt").unwrap();
        let n = handle.write_at(fs_cache(&fs), fs_allocator(&fs), 0, b"hi").unwrap();
        assert_eq!(n, 2);
        fs.close(handle);
    }

    #[test]
    fn create_existing_path_fails() {
        let fs = new_fs();
        let ctx = FixedCwd(fs.root_sector());
        fs.create(&ctx, "/a", false).unwrap();
        assert_eq!(fs.create(&ctx, "/a", false), Err(FsError::Exists));
    }

    #[test]
    fn remove_nonempty_directory_fails_then_succeeds_when_empty() {
        let fs = new_fs();
        let ctx = FixedCwd(fs.root_sector());
        fs.create(&ctx, "/dir", true).unwrap();
        fs.create(&ctx, "/dir/child", false).unwrap();

        assert_eq!(fs.remove(&ctx, "/dir"), Err(FsError::NotEmpty));
        fs.remove(&ctx, "/dir/child").unwrap();
        fs.remove(&ctx, "/dir").unwrap();
        assert_eq!(fs.open(&ctx, "/dir").unwrap_err(), FsError::NotFound);
    }

    #[test]
    fn chdir_into_a_file_fails() {
        let fs = new_fs();
        let ctx = FixedCwd(fs.root_sector());
        fs.create(&ctx, "/f", false).unwrap();
        assert_eq!(fs.chdir(&ctx, "/f").err(), Some(FsError::NotADirectory));
    }

    #[test]
    fn removed_file_is_unreachable_but_still_usable_while_open() {
        let fs = new_fs();
        let ctx = FixedCwd(fs.root_sector());
        fs.create(&ctx, "/f", false).unwrap();
        let handle = fs.open(&ctx, "/f").unwrap();

        fs.remove(&ctx, "/f").unwrap();
        assert_eq!(
            fs.open(&ctx, "/f").err(),
            Some(FsError::NotFound),
            "unlinked name must not resolve anymore"
        );

        // The already-open handle keeps working until closed.
        let n = handle.write_at(fs_cache(&fs), fs_allocator(&fs), 0, b"x").unwrap();
        assert_eq!(n, 1);
        fs.close(handle);
    }

    // Test-only accessors: production code never needs to reach back into
    // the facade's private cache/allocator, but exercising `OpenInode`
    // directly here is the simplest way to assert on written bytes without
    // going through the full per-process handle table covered in
    // `file.rs`'s tests.
    fn fs_cache<D: BlockDevice + Sync, A: SectorAllocator>(fs: &Filesystem<D, A>) -> &Cache<D> {
        &fs.cache
    }
    fn fs_allocator<D: BlockDevice + Sync, A: SectorAllocator>(fs: &Filesystem<D, A>) -> &A {
        &fs.allocator
    }
}
