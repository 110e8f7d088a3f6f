#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod alloc_map;
pub mod cache;
pub mod device;
pub mod error;
pub mod file;
pub mod fs;
pub mod lock;
pub mod param;
pub mod stat;

pub use error::{FsError, FsResult};
pub use fs::{Filesystem, OpenFlags, ThreadContext};
