//! Path resolution.
//!
//! Splits a path into components (slash-separated, empty components from
//! repeated or trailing slashes ignored), then walks them one directory
//! lookup at a time starting from the root (absolute paths) or the
//! caller's current working directory (relative paths).
//!
//! Resolution reports its failure mode through [`FsError`] directly: a
//! missing component is `NotFound`, a non-directory component in the
//! middle of the path is `NotADirectory`, and a malformed component is
//! `NameError`.

use alloc::vec::Vec;

use super::dir;
use super::table::OpenInodeTable;
use crate::alloc_map::SectorAllocator;
use crate::cache::Cache;
use crate::device::BlockDevice;
use crate::error::{FsError, FsResult};
use crate::param::NAME_MAX;

/// Splits `path` into non-empty, `NAME_MAX`-bounded components.
pub fn split_components(path: &str) -> FsResult<Vec<&str>> {
    let mut parts = Vec::new();
    for part in path.split('/') {
        if part.is_empty() {
            continue;
        }
        if part.len() > NAME_MAX {
            return Err(FsError::NameError);
        }
        parts.push(part);
    }
    Ok(parts)
}

fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

/// Resolves `path` to the sector of the inode it names.
pub fn resolve<D: BlockDevice + Sync, A: SectorAllocator>(
    cache: &Cache<D>,
    allocator: &A,
    table: &OpenInodeTable,
    root_sector: u32,
    cwd_sector: u32,
    path: &str,
) -> FsResult<u32> {
    let components = split_components(path)?;
    let mut current = if is_absolute(path) { root_sector } else { cwd_sector };

    for comp in &components {
        let dir_handle = table.open(current)?;
        if !dir_handle.is_dir(cache) {
            table.close(cache, allocator, dir_handle);
            return Err(FsError::NotADirectory);
        }
        let next = dir::lookup(cache, &dir_handle, comp);
        table.close(cache, allocator, dir_handle);
        current = next.ok_or(FsError::NotFound)?;
    }
    Ok(current)
}

/// Resolves every component but the last, returning the parent directory's
/// sector and a borrow of the final component — the shape `filesys_create`/
/// `filesys_remove` need: a directory to mutate plus the name to mutate it
/// under.
pub fn resolve_parent<'p, D: BlockDevice + Sync, A: SectorAllocator>(
    cache: &Cache<D>,
    allocator: &A,
    table: &OpenInodeTable,
    root_sector: u32,
    cwd_sector: u32,
    path: &'p str,
) -> FsResult<(u32, &'p str)> {
    let components = split_components(path)?;
    let last = *components.last().ok_or(FsError::NameError)?;
    let mut current = if is_absolute(path) { root_sector } else { cwd_sector };

    for comp in &components[..components.len() - 1] {
        let dir_handle = table.open(current)?;
        if !dir_handle.is_dir(cache) {
            table.close(cache, allocator, dir_handle);
            return Err(FsError::NotADirectory);
        }
        let next = dir::lookup(cache, &dir_handle, comp);
        table.close(cache, allocator, dir_handle);
        current = next.ok_or(FsError::NotFound)?;
    }

    let parent = table.open(current)?;
    let parent_is_dir = parent.is_dir(cache);
    table.close(cache, allocator, parent);
    if !parent_is_dir {
        return Err(FsError::NotADirectory);
    }
    Ok((current, last))
}

/// True if `sector` names a directory, used by callers deciding whether a
/// resolved target may be `chdir`'d into or must reject directory-only
/// operations.
pub fn sector_is_dir<D: BlockDevice + Sync, A: SectorAllocator>(
    cache: &Cache<D>,
    allocator: &A,
    table: &OpenInodeTable,
    sector: u32,
) -> FsResult<bool> {
    let handle = table.open(sector)?;
    let is_dir = handle.is_dir(cache);
    table.close(cache, allocator, handle);
    Ok(is_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc_map::BumpAllocator;
    use crate::device::RamDisk;
    use crate::fs::inode;
    use crate::fs::table::OpenInodeTable;
    use crate::param::ROOT_DIR_SECTOR;

    fn make_root() -> (Cache<RamDisk>, BumpAllocator, OpenInodeTable) {
        let cache = Cache::new(RamDisk::new(64));
        let allocator = BumpAllocator::new(64, 8);
        let table = OpenInodeTable::new();
        let root_sector = inode::create(&cache, &allocator, true).unwrap();
        assert_eq!(root_sector, 8, "first allocation after the reserved prefix");
        let root = table.open(root_sector).unwrap();
        dir::init(&cache, &allocator, &root, root_sector).unwrap();
        table.close(&cache, &allocator, root);
        (cache, allocator, table)
    }

    #[test]
    fn resolves_nested_absolute_path() {
        let (cache, allocator, table) = make_root();
        let root_sector = 8;

        let sub_sector = inode::create(&cache, &allocator, true).unwrap();
        let root = table.open(root_sector).unwrap();
        dir::add(&cache, &allocator, &root, "sub", sub_sector).unwrap();
        table.close(&cache, &allocator, root);

        let sub = table.open(sub_sector).unwrap();
        dir::init(&cache, &allocator, &sub, root_sector).unwrap();
        let file_sector = inode::create(&cache, &allocator, false).unwrap();
        dir::add(&cache, &allocator, &sub, "file.txt", file_sector).unwrap();
        table.close(&cache, &allocator, sub);

        let found = resolve(&cache, &allocator, &table, root_sector, root_sector, "/sub/file.txt").unwrap();
        assert_eq!(found, file_sector);
    }

    #[test]
    fn missing_component_is_not_found() {
        let (cache, allocator, table) = make_root();
        let root_sector = 8;
        let err = resolve(&cache, &allocator, &table, root_sector, root_sector, "/nope").unwrap_err();
        assert_eq!(err, FsError::NotFound);
    }

    #[test]
    fn walking_through_a_file_is_rejected() {
        let (cache, allocator, table) = make_root();
        let root_sector = 8;
        let file_sector = inode::create(&cache, &allocator, false).unwrap();
        let root = table.open(root_sector).unwrap();
        dir::add(&cache, &allocator, &root, "f", file_sector).unwrap();
        table.close(&cache, &allocator, root);

        let err = resolve(&cache, &allocator, &table, root_sector, root_sector, "/f/x").unwrap_err();
        assert_eq!(err, FsError::NotADirectory);
    }
}
