//! # Scheduler
//!
//! Cooperative round-robin driver over a fixed-capacity task table. One
//! instance exists per core; it exclusively owns its table and the notion
//! of the current task, and two instances on a dual-core part share nothing
//! (cross-core traffic goes through [`crate::mailbox`]).
//!
//! ## Switch path
//!
//! Every switch — voluntary yield, external timer tick, task exit — funnels
//! through the same decision: a wrap-around linear scan from the current
//! slot for the next Ready slot ([`Scheduler::next_slot`]). If one is found
//! the outgoing task is demoted to Ready (unless it just freed itself), the
//! incoming one promoted to Running, and the port layer swaps contexts. If
//! none is found the current task simply keeps the CPU.
//!
//! Round-robin guarantees every non-Free task one turn before any task
//! repeats — provided the tick is active or tasks yield. A task that never
//! yields with the tick disabled starves its core; that is the documented
//! contract, not a defect this module masks.
//!
//! ## Locking
//!
//! The table is guarded by one [`SpinLock`]. Task-level paths take it with
//! the IRQ-safe variant; the PendSV/tick path takes it plain, which cannot
//! deadlock precisely because every task-level holder has interrupts
//! disabled for the duration of its critical section.

use crate::arch::{self, Context, TaskEntry};
use crate::config::MAX_TASKS;
use crate::error::KernelError;
use crate::sync::SpinLock;
use crate::task::{StackArena, TaskId, TaskState, Tcb};

/// Per-core scheduler: the task table, the current-task cursor and the
/// monotonic pid counter. Constructed at boot with explicit arena bounds;
/// there is no global table hidden in this module.
pub struct Scheduler {
    /// Fixed-capacity task table. Slot index is also the stack-region index.
    pub tasks: [Tcb; MAX_TASKS],

    /// Index of the task currently holding the CPU, once started.
    pub current: Option<usize>,

    next_pid: u32,
    arena: StackArena,
    lock: SpinLock,
}

impl Scheduler {
    /// Create a scheduler with every slot Free and the pid counter at 1.
    pub const fn new(arena: StackArena) -> Self {
        Self {
            tasks: [Tcb::EMPTY; MAX_TASKS],
            current: None,
            next_pid: 1,
            arena,
            lock: SpinLock::new(),
        }
    }

    /// The arena this scheduler carves stacks from.
    pub fn arena(&self) -> StackArena {
        self.arena
    }

    // -----------------------------------------------------------------------
    // Task creation
    // -----------------------------------------------------------------------

    /// Create a task: scan for a Free slot, assign the next monotonic id,
    /// carve the slot's stack region, arm the canary and synthesize an
    /// initial context that delivers `arg` to `entry` with an exit
    /// trampoline as the return path. The slot becomes Ready.
    ///
    /// On error the table is left untouched: `NoFreeSlot` when every slot
    /// is live, `StackTooLarge` when the request exceeds the arena stride
    /// or is not a multiple of the stack alignment.
    pub fn create(
        &mut self,
        entry: TaskEntry,
        arg: usize,
        stack_size: usize,
    ) -> Result<TaskId, KernelError> {
        let irq = self.lock.acquire_irq();
        let result = self.create_locked(entry, arg, stack_size);
        self.lock.release_irq(irq);
        result
    }

    fn create_locked(
        &mut self,
        entry: TaskEntry,
        arg: usize,
        stack_size: usize,
    ) -> Result<TaskId, KernelError> {
        let slot = self
            .tasks
            .iter()
            .position(|t| t.state == TaskState::Free)
            .ok_or(KernelError::NoFreeSlot)?;
        let region = self
            .arena
            .slot_region(slot, stack_size)
            .ok_or(KernelError::StackTooLarge)?;

        // All checks passed; only now does any state change.
        let pid = self.next_pid;
        self.next_pid += 1;

        let tcb = &mut self.tasks[slot];
        tcb.pid = pid;
        tcb.stack_base = region.base();
        tcb.stack_size = region.size();
        tcb.priority = 0;
        unsafe {
            // The region was carved for this slot and no live task uses it:
            // either the slot was never allocated or its task exited. The
            // fresh frame below is the guard against resuming a stale
            // context out of a recycled region.
            tcb.arm_canary();
            tcb.context = arch::init_context(region, entry, arg);
        }
        tcb.state = TaskState::Ready;

        Ok(TaskId::from_raw(pid))
    }

    // -----------------------------------------------------------------------
    // Switch decisions (pure table logic, host-testable)
    // -----------------------------------------------------------------------

    /// First Ready slot in table order, if any. Start-up uses this to pick
    /// the task the core is irrevocably switched into.
    pub fn first_ready(&self) -> Option<usize> {
        self.tasks.iter().position(|t| t.state == TaskState::Ready)
    }

    /// Wrap-around linear scan: the next Ready slot strictly after `from`
    /// in circular table order. `None` when no other task can run.
    pub fn next_slot(&self, from: usize) -> Option<usize> {
        (1..=MAX_TASKS)
            .map(|i| (from + i) % MAX_TASKS)
            .find(|&idx| self.tasks[idx].state == TaskState::Ready)
    }

    /// Promote the first Ready slot to Running and make it current.
    /// The start path's half of the irreversible first switch.
    pub fn take_first(&mut self) -> Option<usize> {
        let first = self.first_ready()?;
        self.tasks[first].state = TaskState::Running;
        self.current = Some(first);
        Some(first)
    }

    /// The round-robin step shared by yield, tick and exit: demote the
    /// outgoing Running task to Ready (a task that freed itself stays
    /// Free), promote the next Ready slot, move the cursor.
    ///
    /// Returns the incoming slot, or `None` when no other task is Ready —
    /// in which case the table is left exactly as it was and the caller
    /// must not switch.
    pub fn rotate(&mut self) -> Option<usize> {
        let from = self.current.unwrap_or(MAX_TASKS - 1);
        let next = self.next_slot(from)?;

        if let Some(cur) = self.current {
            if self.tasks[cur].state == TaskState::Running {
                self.tasks[cur].state = TaskState::Ready;
            }
        }
        self.tasks[next].state = TaskState::Running;
        self.current = Some(next);
        Some(next)
    }

    // -----------------------------------------------------------------------
    // Switch execution (called from the port layer)
    // -----------------------------------------------------------------------

    /// The PendSV entry point: file the outgoing context, rotate, hand back
    /// the stack pointer to resume.
    ///
    /// With no other Ready task the current one resumes (`psp` comes
    /// straight back). If the current task exited and nothing remains
    /// runnable, the core halts for the watchdog — resuming a Free slot's
    /// context is never an option.
    pub fn switch_context(&mut self, psp: *mut u32) -> *mut u32 {
        self.lock.acquire();

        if let Some(cur) = self.current {
            if self.tasks[cur].state != TaskState::Free {
                self.tasks[cur].context = Context::from_sp(psp);
            }
        }

        let sp = match self.rotate() {
            Some(next) => self.tasks[next].context.sp(),
            None => {
                let outgoing_live = self
                    .current
                    .map(|c| self.tasks[c].state != TaskState::Free)
                    .unwrap_or(false);
                if !outgoing_live {
                    self.lock.release();
                    arch::halt();
                }
                psp
            }
        };

        self.lock.release();
        sp
    }

    // -----------------------------------------------------------------------
    // Exit and supervision
    // -----------------------------------------------------------------------

    /// Retire the current task's slot. Its pid is never handed out again;
    /// its stack region index is, to the next task created in this slot.
    pub fn exit_current(&mut self) {
        let irq = self.lock.acquire_irq();
        if let Some(cur) = self.current {
            self.tasks[cur].free();
        }
        self.lock.release_irq(irq);
    }

    /// Canary sweep, run from the tick path: kill any live task whose
    /// stack canary died. The canary word sits above the MPU guard band,
    /// so the sweep reads accessible memory even while isolation is
    /// active; an overflow that runs past the canary into the band then
    /// faults on the guard.
    pub fn stack_check(&mut self) {
        for tcb in self.tasks.iter_mut() {
            if tcb.pid != 0 && tcb.state != TaskState::Free && unsafe { !tcb.canary_ok() } {
                log::warn!("stack overflow, killing task {}", tcb.pid);
                tcb.free();
            }
        }
    }

    /// Count of slots that are not Free.
    pub fn live_tasks(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.state != TaskState::Free)
            .count()
    }

    // -----------------------------------------------------------------------
    // Start (hardware only)
    // -----------------------------------------------------------------------

    /// Promote the first Ready task and switch into it. Never returns.
    ///
    /// Starting with an empty table is a fatal configuration error: the
    /// core parks for the external watchdog instead of guessing at
    /// recovery.
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    pub fn start(&mut self) -> ! {
        match self.take_first() {
            Some(first) => {
                let sp = self.tasks[first].context.sp();
                unsafe { arch::start_first_task(sp) }
            }
            None => {
                log::error!("start with no runnable task");
                arch::halt()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::STACK_CANARY;

    extern "C" fn spin_entry(_arg: usize) -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    // Each test carves its own arena out of its own static buffer; the
    // scheduler only ever sees raw bounds, exactly as on hardware. The
    // buffer is 8-aligned like a real linker-placed arena.
    #[repr(align(8))]
    struct AlignedArena([u8; 4096]);

    macro_rules! test_scheduler {
        ($buf:ident) => {{
            static mut $buf: AlignedArena = AlignedArena([0; 4096]);
            let base = unsafe { core::ptr::addr_of_mut!($buf) } as usize;
            Scheduler::new(StackArena::new(base + 4096, 4096))
        }};
    }

    #[test]
    fn test_pids_monotonic_and_pool_exhaustion() {
        let mut sched = test_scheduler!(ARENA);

        let mut last = 0;
        for _ in 0..MAX_TASKS {
            let id = sched.create(spin_entry, 0, 256).unwrap();
            assert!(id.get() > last, "ids must strictly increase");
            last = id.get();
        }
        assert_eq!(sched.live_tasks(), MAX_TASKS);

        // Table full: the extra create fails and changes nothing.
        let pids_before: [u32; MAX_TASKS] = core::array::from_fn(|i| sched.tasks[i].pid);
        assert_eq!(
            sched.create(spin_entry, 0, 256),
            Err(KernelError::NoFreeSlot)
        );
        let pids_after: [u32; MAX_TASKS] = core::array::from_fn(|i| sched.tasks[i].pid);
        assert_eq!(pids_before, pids_after);
        assert_eq!(sched.live_tasks(), MAX_TASKS);
    }

    #[test]
    fn test_oversized_stack_rejected_without_side_effects() {
        let mut sched = test_scheduler!(ARENA);
        // stride is 4096 / MAX_TASKS = 512
        assert_eq!(
            sched.create(spin_entry, 0, 4096),
            Err(KernelError::StackTooLarge)
        );
        assert_eq!(sched.live_tasks(), 0);
        // The failed attempt must not have burned a pid.
        assert_eq!(sched.create(spin_entry, 0, 256).unwrap().get(), 1);
    }

    #[test]
    fn test_unaligned_stack_size_rejected() {
        let mut sched = test_scheduler!(ARENA);
        // A size that is not a multiple of the stack alignment would put
        // the canary word at an unaligned address; refuse it up front.
        assert_eq!(
            sched.create(spin_entry, 0, 130),
            Err(KernelError::StackTooLarge)
        );
        assert_eq!(sched.live_tasks(), 0);
        assert_eq!(sched.create(spin_entry, 0, 136).unwrap().get(), 1);
    }

    #[test]
    fn test_first_ready_and_take_first() {
        let mut sched = test_scheduler!(ARENA);
        assert_eq!(sched.first_ready(), None);

        sched.create(spin_entry, 0, 256).unwrap();
        sched.create(spin_entry, 0, 256).unwrap();
        assert_eq!(sched.first_ready(), Some(0));

        assert_eq!(sched.take_first(), Some(0));
        assert_eq!(sched.current, Some(0));
        assert_eq!(sched.tasks[0].state, TaskState::Running);
        assert_eq!(sched.tasks[1].state, TaskState::Ready);
    }

    #[test]
    fn test_round_robin_fairness() {
        let mut sched = test_scheduler!(ARENA);
        for _ in 0..3 {
            sched.create(spin_entry, 0, 256).unwrap();
        }
        sched.take_first().unwrap();

        // Over k consecutive switches every task runs at least once before
        // any repeats.
        let mut turns = [0u32; 3];
        turns[sched.current.unwrap()] += 1;
        for _ in 0..2 {
            let next = sched.rotate().unwrap();
            turns[next] += 1;
        }
        assert_eq!(turns, [1, 1, 1]);

        // And the cycle repeats in the same order.
        assert_eq!(sched.rotate(), Some(0));
        assert_eq!(sched.rotate(), Some(1));
        assert_eq!(sched.rotate(), Some(2));
    }

    #[test]
    fn test_lone_task_keeps_cpu() {
        let mut sched = test_scheduler!(ARENA);
        sched.create(spin_entry, 0, 256).unwrap();
        sched.take_first().unwrap();

        assert_eq!(sched.rotate(), None);
        assert_eq!(sched.current, Some(0));
        assert_eq!(sched.tasks[0].state, TaskState::Running);
    }

    #[test]
    fn test_next_slot_wraps() {
        let mut sched = test_scheduler!(ARENA);
        for _ in 0..3 {
            sched.create(spin_entry, 0, 256).unwrap();
        }
        // From the last populated slot the scan wraps to slot 0.
        sched.tasks[0].state = TaskState::Ready;
        assert_eq!(sched.next_slot(2), Some(0));
        // A Running slot is never selected.
        sched.tasks[0].state = TaskState::Running;
        assert_eq!(sched.next_slot(2), Some(1));
    }

    #[test]
    fn test_exit_frees_slot_and_retires_pid() {
        let mut sched = test_scheduler!(ARENA);
        let a = sched.create(spin_entry, 0, 256).unwrap();
        sched.create(spin_entry, 0, 256).unwrap();
        sched.take_first().unwrap();

        sched.exit_current();
        assert_eq!(sched.tasks[0].state, TaskState::Free);
        assert_eq!(sched.tasks[0].pid, 0);

        // The freed slot index is reused; the pid never is.
        let c = sched.create(spin_entry, 0, 256).unwrap();
        assert!(c.get() > a.get());
        assert_ne!(c.get(), a.get());
        assert_eq!(sched.tasks[0].pid, c.get());
    }

    #[test]
    fn test_rotate_after_exit_skips_freed_slot() {
        let mut sched = test_scheduler!(ARENA);
        sched.create(spin_entry, 0, 256).unwrap();
        sched.create(spin_entry, 0, 256).unwrap();
        sched.take_first().unwrap();

        sched.exit_current();
        // The exited slot stays Free across the switch.
        assert_eq!(sched.rotate(), Some(1));
        assert_eq!(sched.tasks[0].state, TaskState::Free);
        assert_eq!(sched.tasks[1].state, TaskState::Running);
    }

    #[test]
    fn test_switch_context_files_outgoing_and_loads_incoming() {
        let mut sched = test_scheduler!(ARENA);
        sched.create(spin_entry, 0, 256).unwrap();
        sched.create(spin_entry, 0, 256).unwrap();
        sched.take_first().unwrap();

        let expected = sched.tasks[1].context.sp();
        // A plausible "interrupted" stack pointer inside task 0's region.
        let psp = (sched.tasks[0].stack_base + 64) as *mut u32;

        let loaded = sched.switch_context(psp);
        assert_eq!(loaded, expected);
        assert_eq!(sched.tasks[0].context.sp(), psp);
        assert_eq!(sched.current, Some(1));

        // Lone runnable task: the tick resumes it unchanged.
        sched.tasks[0].free();
        let psp1 = (sched.tasks[1].stack_base + 64) as *mut u32;
        assert_eq!(sched.switch_context(psp1), psp1);
    }

    #[test]
    fn test_stack_check_kills_smashed_task() {
        let mut sched = test_scheduler!(ARENA);
        sched.create(spin_entry, 0, 256).unwrap();
        sched.create(spin_entry, 0, 256).unwrap();

        unsafe {
            (sched.tasks[1].canary_addr() as *mut u32).write_volatile(!STACK_CANARY);
        }
        sched.stack_check();

        assert_eq!(sched.tasks[0].state, TaskState::Ready);
        assert_eq!(sched.tasks[1].state, TaskState::Free);
    }

    #[test]
    fn test_stacks_live_inside_arena() {
        let mut sched = test_scheduler!(ARENA);
        let top = sched.arena().top();
        for _ in 0..3 {
            sched.create(spin_entry, 0, 256).unwrap();
        }
        for i in 0..3 {
            let region = sched.tasks[i].region();
            assert!(region.top() <= top);
            assert!(region.contains(sched.tasks[i].context.sp() as usize));
        }
    }
}
