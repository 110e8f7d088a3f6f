//! Synchronization primitives the rest of the crate builds on.

mod sleeplock;
mod spinlock;

pub use sleeplock::{SleepLock, SleepLockGuard};
pub use spinlock::{Spinlock, SpinlockGuard};
