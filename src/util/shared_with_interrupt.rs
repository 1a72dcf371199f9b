// SPDX-License-Identifier: GPL-3.0-or-later

use core::cell::UnsafeCell;

// Owned by an interrupt handler, occasionally poked at by tasks (e.g. to
// move the phase origin). Tasks mask interrupts while they hold it.
pub struct SharedWithInterrupt<T>(UnsafeCell<T>);
impl<T> SharedWithInterrupt<T> {
    pub const fn new(v: T) -> Self {
        Self(UnsafeCell::new(v))
    }

    pub fn lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        critical_section::with(|_| {
            let mut_self = unsafe { &mut *self.0.get() };
            f(mut_self)
        })
    }

    /// # Safety
    /// Only the interrupt that owns the data may call this. It must not be
    /// reentrant, and no task can run while it executes.
    pub unsafe fn lock_from_interrupt<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut_self = &mut *self.0.get();
        f(mut_self)
    }
}

unsafe impl<T: Send> Sync for SharedWithInterrupt<T> {}
unsafe impl<T: Send> Send for SharedWithInterrupt<T> {}
