//! Typed errors surfaced by this crate's layers.
//!
//! `Busy` deliberately has no variant here: a write against a
//! deny-write-locked inode returns `Ok(0)`, not an error. `FatalIO` has no
//! variant either: device failure is assumed infallible at this layer and
//! panics.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// Path was empty, too long, or had a structurally invalid component.
    NameError,
    /// No entry exists along the resolved path.
    NotFound,
    /// Target already exists where a create was attempted.
    Exists,
    /// Attempted to remove a non-empty directory.
    NotEmpty,
    /// Free-sector allocation failed.
    NoSpace,
    /// Attempted to remove the root, or `.`/`..` directly.
    Forbidden,
    /// An intermediate path component was not a directory.
    NotADirectory,
    /// Operation requires a directory target but found a file, or vice versa.
    WrongType,
    /// The calling thread has no current working directory set.
    NoCwd,
    /// No open-inode table slot / no file descriptor slot available.
    TableFull,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            FsError::NameError => "invalid path component",
            FsError::NotFound => "no such file or directory",
            FsError::Exists => "file exists",
            FsError::NotEmpty => "directory not empty",
            FsError::NoSpace => "no space left on device",
            FsError::Forbidden => "operation not permitted",
            FsError::NotADirectory => "not a directory",
            FsError::WrongType => "inappropriate file type",
            FsError::NoCwd => "no current working directory",
            FsError::TableFull => "too many open files",
        };
        f.write_str(msg)
    }
}

pub type FsResult<T> = Result<T, FsError>;
