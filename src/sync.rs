//! # Synchronization Primitives
//!
//! All kernel state lives in one [`Kernel`] value. Interrupt handlers reach
//! it through a [`KernelCell`], a critical-section mutex around a
//! `RefCell<Option<Kernel>>`: entering the closure masks interrupts, so the
//! kernel is only ever mutated by one context at a time and every
//! check-then-act sequence inside it (the flag test and the block in
//! `wait_event`, for example) is atomic with respect to the tick.
//!
//! On the target the critical section comes from `cortex-m`'s single-core
//! implementation; host tests use the `std` implementation of the
//! `critical-section` crate.

use core::cell::RefCell;

use critical_section::{with, CriticalSection, Mutex};

use crate::arch::Port;
use crate::kernel::Kernel;

/// Slot for the kernel instance shared with interrupt handlers.
pub struct KernelCell<P: Port> {
    inner: Mutex<RefCell<Option<Kernel<P>>>>,
}

impl<P: Port> KernelCell<P> {
    /// An empty cell, usable in a `static`.
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(None)),
        }
    }

    /// Store `kernel`, replacing any previous instance.
    pub fn install(&self, kernel: Kernel<P>) {
        with(|cs| {
            self.inner.borrow(cs).replace(Some(kernel));
        });
    }

    /// Run `f` on the kernel with interrupts masked.
    ///
    /// Returns `None` if no kernel is installed yet, or if the cell is
    /// already borrowed further up the stack.
    pub fn with<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut Kernel<P>) -> R,
    {
        with(|cs| self.with_cs(cs, f))
    }

    /// Same as [`KernelCell::with`] for callers already inside a critical
    /// section.
    pub fn with_cs<F, R>(&self, cs: CriticalSection, f: F) -> Option<R>
    where
        F: FnOnce(&mut Kernel<P>) -> R,
    {
        let mut slot = self.inner.borrow(cs).try_borrow_mut().ok()?;
        slot.as_mut().map(f)
    }
}

impl<P: Port> Default for KernelCell<P> {
    fn default() -> Self {
        Self::new()
    }
}
