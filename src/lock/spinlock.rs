//! Busy-wait mutual exclusion.
//!
//! Acquire is a `compare_exchange` loop with `core::hint::spin_loop()`
//! between attempts, release is a single atomic store. No
//! `push_off`/`pop_off` interrupt bookkeeping is done here — this crate
//! never runs with interrupts enabled in the first place, that's left to
//! whatever owns the interrupt controller.

use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// A busy-wait mutex protecting `T`.
///
/// Used for the short, metadata-only critical sections in this crate: the
/// cache's slot table and the open-inode table.
pub struct Spinlock<T> {
    name: &'static str,
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for Spinlock<T> {}
unsafe impl<T: Send> Send for Spinlock<T> {}

pub struct SpinlockGuard<'a, T> {
    lock: &'a Spinlock<T>,
}

impl<T> Spinlock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            name,
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spin_loop();
        }
        SpinlockGuard { lock: self }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<'a, T> Deref for SpinlockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding the guard means `locked` was exchanged to `true`
        // by us and nobody else accesses `data` concurrently.
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for SpinlockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see `Deref`.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for SpinlockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
