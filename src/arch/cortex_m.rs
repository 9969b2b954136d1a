//! # Cortex-M Port
//!
//! Hardware-specific code for ARM Cortex-M (Thumb-2) parts. Implements the
//! context-switch protocol via PendSV, the timer tick via SysTick, PRIMASK
//! interrupt control and the peer-core doorbell.
//!
//! ## Context switch
//!
//! Cortex-M uses a split-stack model: MSP for the kernel and handlers, PSP
//! for tasks in Thread mode. On exception entry the hardware stacks R0-R3,
//! R12, LR, PC and xPSR onto the process stack; the PendSV handler saves and
//! restores R4-R11 around that, completing the 16-word frame described in
//! [`super::init_context`].
//!
//! ## Interrupt priorities
//!
//! PendSV and SysTick both run at the lowest priority, so a context switch
//! never preempts another ISR and the tick never delays a device interrupt.

use core::arch::{asm, global_asm};

use crate::config::{SYSTEM_CLOCK_HZ, TICK_HZ};

/// Configure SysTick as the external tick source at [`TICK_HZ`].
///
/// Each tick drives the same switch path as a voluntary yield. A task that
/// never yields with the tick disabled starves every other task on its core.
pub fn configure_systick(syst: &mut cortex_m::peripheral::SYST) {
    use cortex_m::peripheral::syst::SystClkSource;

    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

/// Request a deferred context switch by pending PendSV.
#[inline]
pub fn trigger_pendsv() {
    // ICSR, PENDSVSET = bit 28.
    const ICSR: *mut u32 = 0xE000_ED04 as *mut u32;
    unsafe {
        core::ptr::write_volatile(ICSR, 1 << 28);
    }
}

/// Set PendSV and SysTick to the lowest interrupt priority.
pub fn set_interrupt_priorities() {
    unsafe {
        // SHPR3: bits [23:16] PendSV, bits [31:24] SysTick.
        let shpr3: *mut u32 = 0xE000_ED20 as *mut u32;
        let val = core::ptr::read_volatile(shpr3) | (0xFF << 16) | (0xFF << 24);
        core::ptr::write_volatile(shpr3, val);
    }
}

/// Disable interrupts on this core, returning whether they were enabled.
pub fn irq_save() -> bool {
    let enabled = cortex_m::register::primask::read().is_active();
    cortex_m::interrupt::disable();
    enabled
}

/// Restore the interrupt-enable state captured by [`irq_save`].
pub fn irq_restore(enabled: bool) {
    if enabled {
        unsafe { cortex_m::interrupt::enable() };
    }
}

/// Raise the doorbell on the peer core.
///
/// Notification only — the mailbox rings carry the data. `sev` pulses this
/// core's TXEV event line, which wakes a peer parked in `wfe`; dual-core
/// parts that route TXEV into the peer's interrupt controller get a
/// doorbell IRQ out of the same pulse. A peer doing neither must poll the
/// ring.
#[inline]
pub fn raise_peer_doorbell() {
    cortex_m::asm::sev();
}

/// Terminal halt: park the core until the external watchdog resets it.
pub fn halt() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

/// Launch the first task. Called once from scheduler start; never returns.
///
/// Switches Thread mode onto the PSP, manually unwinds the synthetic
/// exception frame and branches to the task entry.
///
/// # Safety
///
/// `psp` must point at a frame built by [`super::init_context`], and the
/// scheduler must already name that task as Running.
pub unsafe fn start_first_task(psp: *const u32) -> ! {
    asm!(
        // Skip the 8 software-saved registers; the hardware frame follows.
        "adds r0, #32",
        "msr psp, r0",
        // Thread mode uses PSP from here on (CONTROL.SPSEL = 1).
        "movs r0, #2",
        "msr control, r0",
        "isb",
        // Unwind the synthetic hardware frame by hand.
        "pop {{r0-r3, r12}}",
        "pop {{r4}}",          // LR slot: the exit trampoline
        "mov lr, r4",          // same return path a PendSV-restored task gets
        "pop {{r5}}",          // PC = task entry
        "pop {{r6}}",          // xPSR (processor state is set on the branch)
        "cpsie i",
        "bx r5",
        in("r0") psp,
        options(noreturn)
    );
}

// PendSV handler — the context switch itself.
//
// 1. Save R4-R11 below the hardware-stacked frame on the outgoing PSP.
// 2. Hand the PSP to the scheduler, which files it into the outgoing
//    task's context and rotates to the next Ready slot.
// 3. Restore R4-R11 from the incoming context and resume it.
//
// Runs at the lowest priority, so it never lands inside another ISR.
global_asm!(
    ".syntax unified",
    ".thumb_func",
    ".global PendSV",
    "PendSV:",
    "mrs r0, psp",
    "stmdb r0!, {{r4-r11}}",
    "bl mkern_switch_context", // fn(*mut u32) -> *mut u32
    "ldmia r0!, {{r4-r11}}",
    "msr psp, r0",
    "mvn r0, #2", // EXC_RETURN 0xFFFFFFFD: Thread mode, PSP
    "bx r0",
);

/// Scheduler trampoline for PendSV: save the outgoing context, rotate,
/// return the incoming saved stack pointer.
#[no_mangle]
unsafe extern "C" fn mkern_switch_context(psp: *mut u32) -> *mut u32 {
    crate::kernel::with_scheduler_isr(|sched| sched.switch_context(psp))
}

/// SysTick handler — the periodic tick.
///
/// Performs the canary sweep and requests the same switch a voluntary
/// yield would make. If no other task is Ready, PendSV resumes the
/// current one and the tick is a no-op.
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    crate::kernel::with_scheduler_isr(|sched| sched.stack_check());
    trigger_pendsv();
}
