//! # Host Port
//!
//! Stub port used when the crate is built for the development host, chiefly
//! for unit tests. Interrupt masking and the peer-core doorbell are emulated
//! with plain state so the lock and mailbox contracts can be asserted
//! without hardware. There is no host context switch: scheduling decisions
//! are tested directly against [`crate::scheduler::Scheduler`].

#[cfg(not(test))]
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

// Under `cargo test` the harness runs tests on several threads; keep the
// emulated state per-thread so tests cannot interfere with each other.
#[cfg(test)]
extern crate std;
#[cfg(test)]
use core::cell::Cell;

#[cfg(test)]
std::thread_local! {
    static IRQ_ENABLED: Cell<bool> = const { Cell::new(true) };
    static DOORBELLS: Cell<u32> = const { Cell::new(0) };
}

#[cfg(not(test))]
static IRQ_ENABLED: AtomicBool = AtomicBool::new(true);
#[cfg(not(test))]
static DOORBELLS: AtomicU32 = AtomicU32::new(0);

/// Disable "interrupts", returning whether they were enabled before.
pub fn irq_save() -> bool {
    #[cfg(test)]
    {
        IRQ_ENABLED.with(|f| f.replace(false))
    }
    #[cfg(not(test))]
    {
        IRQ_ENABLED.swap(false, Ordering::SeqCst)
    }
}

/// Restore the interrupt-enable state captured by [`irq_save`].
pub fn irq_restore(enabled: bool) {
    #[cfg(test)]
    IRQ_ENABLED.with(|f| f.set(enabled));
    #[cfg(not(test))]
    IRQ_ENABLED.store(enabled, Ordering::SeqCst);
}

/// Current emulated interrupt-enable state.
pub fn irq_enabled() -> bool {
    #[cfg(test)]
    {
        IRQ_ENABLED.with(|f| f.get())
    }
    #[cfg(not(test))]
    {
        IRQ_ENABLED.load(Ordering::SeqCst)
    }
}

/// Record a doorbell raise. Real hardware pends an interrupt on the peer
/// core; the host just counts so tests can observe the notification.
pub fn raise_peer_doorbell() {
    #[cfg(test)]
    DOORBELLS.with(|d| d.set(d.get() + 1));
    #[cfg(not(test))]
    DOORBELLS.fetch_add(1, Ordering::SeqCst);
}

/// Number of doorbell raises observed on this thread (test builds) or
/// process (otherwise).
pub fn doorbell_count() -> u32 {
    #[cfg(test)]
    {
        DOORBELLS.with(|d| d.get())
    }
    #[cfg(not(test))]
    {
        DOORBELLS.load(Ordering::SeqCst)
    }
}

/// Terminal halt. On hardware this parks the core in `wfi` for the
/// watchdog; the host equivalent just spins.
pub fn halt() -> ! {
    loop {
        core::hint::spin_loop();
    }
}
