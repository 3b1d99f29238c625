//! Spinlock (C1).
//!
//! A single atomic word. Safe to acquire with interrupts enabled or
//! disabled — it is the *caller's* responsibility to disable interrupts
//! first when the lock might also be taken from an interrupt handler
//! (§3 Synchronization objects), which is why `acquire`/`release` never
//! touch IF themselves; `lock_irq`/`unlock_irq` are a convenience pair for
//! call sites that need that discipline and don't want to hand-roll it.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

pub struct Spinlock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for Spinlock<T> {}
unsafe impl<T: Send> Send for Spinlock<T> {}

pub struct SpinlockGuard<'a, T> {
    lock: &'a Spinlock<T>,
}

impl<T> Spinlock<T> {
    pub const fn new(value: T) -> Self {
        Spinlock { locked: AtomicBool::new(false), value: UnsafeCell::new(value) }
    }

    pub fn acquire(&self) -> SpinlockGuard<'_, T> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
        SpinlockGuard { lock: self }
    }

    pub fn try_acquire(&self) -> Option<SpinlockGuard<'_, T>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|()| SpinlockGuard { lock: self })
    }

    /// Read-only predicate for assertions (§3). Not a substitute for
    /// `try_acquire` — the result can be stale the instant it's read.
    pub fn is_acquirable(&self) -> bool {
        !self.locked.load(Ordering::Relaxed)
    }

    /// Disables interrupts, then acquires. Pairs with
    /// `SpinlockGuard::release_irq`. Use at call sites that may run with
    /// interrupts enabled but must exclude a handler that also takes this
    /// lock.
    pub fn lock_irq(&self) -> (SpinlockGuard<'_, T>, bool) {
        let was_enabled = crate::arch::x86::interrupts_enabled();
        crate::arch::x86::disable_interrupts();
        (self.acquire(), was_enabled)
    }

    fn release(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

impl<'a, T> SpinlockGuard<'a, T> {
    /// Releases the lock and restores interrupts to the state captured by
    /// `lock_irq`'s return value.
    pub fn release_irq(self, was_enabled: bool) {
        drop(self);
        if was_enabled {
            crate::arch::x86::enable_interrupts();
        }
    }
}

impl<'a, T> Deref for SpinlockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<'a, T> DerefMut for SpinlockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<'a, T> Drop for SpinlockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_access() {
        let lock = Spinlock::new(0u32);
        {
            let mut guard = lock.acquire();
            *guard += 1;
        }
        assert_eq!(*lock.acquire(), 1);
    }

    #[test]
    fn try_acquire_fails_while_held() {
        let lock = Spinlock::new(());
        let guard = lock.acquire();
        assert!(lock.try_acquire().is_none());
        assert!(!lock.is_acquirable());
        drop(guard);
        assert!(lock.is_acquirable());
        assert!(lock.try_acquire().is_some());
    }
}
