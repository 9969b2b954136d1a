//! # SpinLock
//!
//! Busy-wait mutual exclusion. This is the kernel's only lock: short
//! critical sections, no owner tracking, no timeout. A holder that never
//! releases spins every other contender forever — an accepted property of
//! the environment, recovered by the external watchdog, not by the lock.
//!
//! The IRQ-safe variant disables this core's interrupts for the duration of
//! the critical section and restores the *previous* enable state on release,
//! so balanced `acquire_irq`/`release_irq` pairs nest correctly. It is
//! required whenever the same lock can also be taken from an interrupt
//! handler.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch;

/// Saved interrupt-enable state returned by [`SpinLock::acquire_irq`].
/// Hand it back to [`SpinLock::release_irq`] to restore the state that was
/// in force before the critical section.
#[must_use = "dropping an IrqState leaves interrupts disabled"]
#[derive(Debug)]
pub struct IrqState {
    enabled: bool,
}

/// Busy-wait mutual exclusion over one atomic word.
///
/// Non-reentrant: a holder that re-acquires deadlocks itself. `release`
/// clears the word unconditionally — callers must not release a lock they
/// do not hold.
pub struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    /// Create a new, unlocked lock.
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Spin until the lock transitions from unlocked to locked under our
    /// own hand. Never times out.
    pub fn acquire(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // Spin on a plain load until the holder clears the word, then
            // retry the exchange. Keeps the cache line shared while waiting.
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
    }

    /// Attempt to take the lock without spinning.
    pub fn try_acquire(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Release the lock. The caller must hold it.
    pub fn release(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Whether the lock is currently held by someone.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Disable this core's interrupts, then take the lock.
    ///
    /// The returned token records whether interrupts were enabled on entry;
    /// [`release_irq`](Self::release_irq) restores exactly that state, so
    /// nested pairs are safe.
    pub fn acquire_irq(&self) -> IrqState {
        let enabled = arch::irq_save();
        self.acquire();
        IrqState { enabled }
    }

    /// Release the lock, then restore the interrupt-enable state captured
    /// by the matching [`acquire_irq`](Self::acquire_irq).
    pub fn release_irq(&self, state: IrqState) {
        self.release();
        arch::irq_restore(state.enabled);
    }

    /// Run `f` under the lock. Convenience wrapper for short sections that
    /// do not need the IRQ-safe variant.
    pub fn with<R>(&self, f: impl FnOnce() -> R) -> R {
        self.acquire();
        let r = f();
        self.release();
        r
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}
