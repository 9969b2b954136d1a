//! # Architecture Port Layer
//!
//! Hardware abstraction boundary for the portable kernel. Two ports exist:
//!
//! - [`cortex_m`]: the real ARM Cortex-M port — PendSV context switch,
//!   SysTick tick source, PRIMASK interrupt control, peer-core doorbell.
//! - [`host`]: a stub port so the portable logic (scheduling decisions,
//!   locks, rings, frame synthesis) builds and unit-tests on the build host.
//!
//! The portable kernel never interprets a saved execution context. It only
//! stores and loads the opaque [`Context`] handle; the two operations that
//! give it meaning (save on suspend, load on resume) live in the port.

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use self::cortex_m::{
    configure_systick, halt, irq_restore, irq_save, raise_peer_doorbell,
    set_interrupt_priorities, start_first_task, trigger_pendsv,
};

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub mod host;
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub use self::host::{halt, irq_enabled, irq_restore, irq_save, raise_peer_doorbell};

use crate::task::StackRegion;

/// Entry signature for a task. The argument is delivered in the
/// architecture's argument-passing location by [`init_context`].
pub type TaskEntry = extern "C" fn(usize) -> !;

// Saved-frame geometry, shared by both ports: 8 software-saved registers
// (R4-R11) below the 8-word hardware exception frame (R0-R3, R12, LR, PC,
// xPSR).
const FRAME_WORDS: usize = 16;
const FRAME_R0: usize = 8;
const FRAME_LR: usize = 13;
const FRAME_PC: usize = 14;
const FRAME_XPSR: usize = 15;

/// xPSR value for a synthetic frame: Thumb bit set, everything else clear.
const INITIAL_XPSR: u32 = 0x0100_0000;

/// An opaque saved execution context: the stack pointer left behind by the
/// last save, pointing at a full register frame inside the owning task's
/// stack region. Portable code treats it as a handle and nothing more.
#[derive(Debug, Clone, Copy)]
pub struct Context {
    sp: *mut u32,
}

// The pointer always targets the owning task's own stack region, and the
// scheduler only touches contexts from its own core.
unsafe impl Send for Context {}
unsafe impl Sync for Context {}

impl Context {
    /// A context that has never been saved. Free table slots hold this.
    pub const fn empty() -> Self {
        Self {
            sp: core::ptr::null_mut(),
        }
    }

    /// The raw saved stack pointer. Only the port layer gives it meaning.
    pub fn sp(&self) -> *mut u32 {
        self.sp
    }

    pub(crate) fn from_sp(sp: *mut u32) -> Self {
        Self { sp }
    }
}

/// Synthesize the initial saved context for a new task, equivalent to
/// "interrupted immediately after `entry`":
///
/// - the argument register (R0) already holds `arg`,
/// - the return path (LR) leads to a trampoline that calls
///   [`crate::kernel::task_exit`], so a task that returns exits cleanly,
/// - PC is the entry point, xPSR has the Thumb bit set,
/// - R1-R12 and the software-saved R4-R11 are zeroed.
///
/// The frame is written at the top of `region`, aligned down to 8 bytes as
/// the AAPCS requires.
///
/// # Safety
///
/// `region` must describe memory this core may write and that no live task
/// is currently using as its stack.
pub unsafe fn init_context(region: StackRegion, entry: TaskEntry, arg: usize) -> Context {
    let aligned_top = region.top() & !0x07;
    let frame = (aligned_top - FRAME_WORDS * 4) as *mut u32;

    for i in 0..FRAME_WORDS {
        frame.add(i).write(0);
    }
    frame.add(FRAME_R0).write(arg as u32);
    frame.add(FRAME_LR).write(exit_trampoline as usize as u32);
    frame.add(FRAME_PC).write(entry as usize as u32);
    frame.add(FRAME_XPSR).write(INITIAL_XPSR);

    Context { sp: frame }
}

/// Landing pad for a task whose entry function returns. Entries are
/// declared `-> !`, but a corrupted frame can still get here, so route it
/// through the normal exit path instead of running off the stack.
extern "C" fn exit_trampoline() -> ! {
    crate::kernel::task_exit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::StackRegion;

    extern "C" fn probe_entry(_arg: usize) -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    #[test]
    fn test_synthetic_frame_layout() {
        static mut STACK: [u8; 512] = [0; 512];
        let base = unsafe { core::ptr::addr_of_mut!(STACK) } as usize;
        let region = StackRegion::new(base, 512);

        let ctx = unsafe { init_context(region, probe_entry, 0x1234) };
        let sp = ctx.sp();

        // Stack pointer lands inside the region, 8-byte aligned, leaving
        // room for the full 16-word frame.
        assert!(region.contains(sp as usize));
        assert_eq!(sp as usize % 8, 0);

        unsafe {
            assert_eq!(sp.add(FRAME_R0).read(), 0x1234); // arg in R0
            assert_eq!(sp.add(FRAME_PC).read(), probe_entry as usize as u32);
            assert_eq!(sp.add(FRAME_LR).read(), exit_trampoline as usize as u32);
            assert_eq!(sp.add(FRAME_XPSR).read(), INITIAL_XPSR);
            // Software-saved registers start zeroed.
            for i in 0..8 {
                assert_eq!(sp.add(i).read(), 0);
            }
        }
    }

    #[test]
    fn test_empty_context_is_null() {
        assert!(Context::empty().sp().is_null());
    }
}
