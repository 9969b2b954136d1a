//! # Kernel
//!
//! The public surface excluded subsystems call into: install a scheduler,
//! create tasks, start, yield, exit. One scheduler instance exists per
//! core; it is constructed at boot with explicit arena bounds and handed to
//! [`init`] — this module holds only the pointer the interrupt handlers
//! need, never the table itself.
//!
//! ## Startup sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► mpu::mpu_init()       ← isolation (optional, degraded-ok)
//!         ├─► kernel::init(&mut S)  ← install this core's scheduler
//!         ├─► kernel::task_create() ← register tasks (×N)
//!         └─► kernel::start()       ← SysTick on, first task in, no return
//! ```

use crate::arch::{self, TaskEntry};
use crate::error::KernelError;
use crate::scheduler::Scheduler;
use crate::task::TaskId;

/// This core's scheduler. Set once by [`init`]; read from ISR context,
/// where interrupts are already serialized by priority.
static mut SCHEDULER_PTR: *mut Scheduler = core::ptr::null_mut();

/// Install `sched` as this core's scheduler. Must be called exactly once
/// per core, from the main thread, before any other kernel function.
pub fn init(sched: &'static mut Scheduler) {
    unsafe {
        SCHEDULER_PTR = sched;
    }
    log::info!("scheduler installed, {} slots", crate::config::MAX_TASKS);
}

/// Run `f` against this core's scheduler.
///
/// # Safety
///
/// [`init`] must have run on this core. Callers in thread mode must not
/// race the interrupt handlers — either interrupts are not live yet
/// (boot), or the scheduler's own lock discipline covers the access.
pub(crate) unsafe fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    debug_assert!(!SCHEDULER_PTR.is_null(), "kernel::init not called");
    f(&mut *SCHEDULER_PTR)
}

/// ISR-side alias used by the PendSV and SysTick handlers.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub(crate) unsafe fn with_scheduler_isr<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    with_scheduler(f)
}

/// Create a task on this core.
///
/// `entry` receives `arg` in the argument register on first run and may
/// simply return — the synthesized frame routes a return into
/// [`task_exit`]. Fails with `NoFreeSlot` when the table is full and
/// `StackTooLarge` when the stack cannot fit an arena slot.
pub fn task_create(
    entry: TaskEntry,
    arg: usize,
    stack_size: usize,
) -> Result<TaskId, KernelError> {
    unsafe { with_scheduler(|s| s.create(entry, arg, stack_size)) }
}

/// Start multitasking on this core. **Never returns.**
///
/// Configures SysTick as the tick source, drops PendSV and SysTick to the
/// lowest priority and switches irrevocably into the first Ready task.
/// Starting with no Ready task is a fatal configuration error: the core
/// parks for the external watchdog.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn start(mut peripherals: cortex_m::Peripherals) -> ! {
    arch::configure_systick(&mut peripherals.SYST);
    arch::set_interrupt_priorities();
    unsafe { with_scheduler(|s| s.start()) }
}

/// Give up the CPU voluntarily. The next Ready task in round-robin order
/// runs; with no other task Ready this returns immediately to the caller.
pub fn yield_task() {
    request_reschedule();
}

/// Terminate the calling task. Its slot becomes Free, its id is retired
/// forever, and control passes to the next Ready task. Never returns.
pub fn task_exit() -> ! {
    unsafe { with_scheduler(|s| s.exit_current()) };
    request_reschedule();
    // Unreachable once the switch lands; with nothing left to run the
    // switch path parks the core for the watchdog.
    arch::halt()
}

/// Terminal failure: park the core and let the external watchdog restart
/// the system from a known-good state.
pub fn fatal_halt() -> ! {
    log::error!("fatal: halting for watchdog");
    arch::halt()
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
fn request_reschedule() {
    arch::trigger_pendsv();
}

/// Host builds have no deferred-switch interrupt; apply the round-robin
/// step directly so kernel-level logic stays observable in tests.
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
fn request_reschedule() {
    unsafe {
        with_scheduler(|s| {
            s.rotate();
        })
    }
}
