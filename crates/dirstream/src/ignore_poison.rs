//! Extension traits to ignore lock poisoning.
//!
//! The listing cache, the active-request slot and the volume snapshot are plain value
//! stores: a panic on a worker thread never leaves them half-updated in a way that
//! matters, so every lock in the crate goes through these helpers instead of
//! `.lock().unwrap_or_else(|e| e.into_inner())`.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub trait IgnorePoison<T> {
    /// Locks the mutex, ignoring poison.
    fn lock_ignore_poison(&self) -> MutexGuard<'_, T>;
}

impl<T> IgnorePoison<T> for Mutex<T> {
    fn lock_ignore_poison(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub trait IgnorePoisonRw<T> {
    /// Takes a shared read guard, ignoring poison.
    fn read_ignore_poison(&self) -> RwLockReadGuard<'_, T>;

    /// Takes the exclusive write guard, ignoring poison.
    fn write_ignore_poison(&self) -> RwLockWriteGuard<'_, T>;
}

impl<T> IgnorePoisonRw<T> for RwLock<T> {
    fn read_ignore_poison(&self) -> RwLockReadGuard<'_, T> {
        self.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_ignore_poison(&self) -> RwLockWriteGuard<'_, T> {
        self.write().unwrap_or_else(|e| e.into_inner())
    }
}
