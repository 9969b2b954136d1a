//! # Task Model
//!
//! The per-task bookkeeping record ([`Tcb`]), its lifecycle states, and the
//! fixed descending stack arena tasks draw their stacks from.
//!
//! ## Lifecycle
//!
//! ```text
//!   ┌──────┐  create()   ┌───────┐  rotate()   ┌─────────┐
//!   │ Free │ ──────────► │ Ready │ ──────────► │ Running │
//!   └──────┘             └───────┘             └─────────┘
//!      ▲                     ▲    yield/tick       │
//!      │                     └────────────────────┘
//!      │                          exit()           │
//!      └──────────────────────────────────────────┘
//! ```
//!
//! A freed slot's pid is retired forever (the counter is monotonic), but its
//! stack region index is reused by the next task created into that slot.
//! `create` re-synthesizes the slot's saved context from scratch, so no
//! stale context can ever be resumed out of a recycled region.

use crate::arch::Context;
use crate::config::{GUARD_SIZE, MAX_TASKS, STACK_CANARY};

/// Smallest stack the arena will hand out: room for the 16-word initial
/// frame, the guard band, the canary word and alignment slack.
pub const MIN_STACK: usize = 128;

/// Stack sizes must be a multiple of this. Keeps every region base (and the
/// canary word above the guard band) word-aligned, per the AAPCS stack
/// alignment rule.
pub const STACK_ALIGN: usize = 8;

// ---------------------------------------------------------------------------
// Lifecycle state
// ---------------------------------------------------------------------------

/// Execution state of one task-table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Slot is unallocated (or the task exited). Never scheduled.
    Free,
    /// Task is runnable and waiting for its turn.
    Ready,
    /// Task currently owns the CPU. Exactly one per core.
    Running,
}

// ---------------------------------------------------------------------------
// Task identity
// ---------------------------------------------------------------------------

/// Unique, non-zero task id. Ids come from a monotonic per-scheduler
/// counter and are never reused; 0 is reserved as the "free" marker in
/// the raw table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TaskId(u32);

impl TaskId {
    /// Wrap a raw id, refusing the reserved zero marker.
    pub fn new(raw: u32) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self(raw))
        }
    }

    /// Wrap an id the caller already knows to be non-zero (the pid counter
    /// starts at 1 and only grows).
    pub(crate) const fn from_raw(raw: u32) -> Self {
        debug_assert!(raw != 0);
        Self(raw)
    }

    /// The raw id value. Always non-zero.
    pub fn get(&self) -> u32 {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Stack regions and the arena
// ---------------------------------------------------------------------------

/// One task's stack region: `[base, base + size)`. Stacks grow downward
/// from `top()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRegion {
    base: usize,
    size: usize,
}

impl StackRegion {
    pub const fn new(base: usize, size: usize) -> Self {
        Self { base, size }
    }

    /// Lowest address of the region.
    pub fn base(&self) -> usize {
        self.base
    }

    /// Region size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// One past the highest address; the initial stack pointer starts here.
    pub fn top(&self) -> usize {
        self.base + self.size
    }

    /// Whether `addr` lies within `[base, base + size)`.
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.top()
    }

    /// Whether two regions share any byte.
    pub fn overlaps(&self, other: &StackRegion) -> bool {
        self.base < other.top() && other.base < self.top()
    }
}

/// A fixed descending arena the scheduler carves task stacks from.
///
/// The arena is split into `MAX_TASKS` equal-stride slots below `top`;
/// table slot `i` always receives the region
/// `[top - i*stride - stack_size, top - i*stride)`. The mapping is a pure
/// function of the slot index, so a recycled slot lands on exactly the
/// same region — and a request larger than the stride is refused rather
/// than allowed to overlap its neighbor.
#[derive(Debug, Clone, Copy)]
pub struct StackArena {
    top: usize,
    size: usize,
}

impl StackArena {
    /// Describe an arena ending (exclusive) at `top` and spanning `size`
    /// bytes downward. `top` is rounded down to [`STACK_ALIGN`].
    pub const fn new(top: usize, size: usize) -> Self {
        Self {
            top: top & !(STACK_ALIGN - 1),
            size,
        }
    }

    /// High-water mark: no task stack byte lies at or above this address.
    pub fn top(&self) -> usize {
        self.top
    }

    /// Bytes per table slot, rounded down to [`STACK_ALIGN`] so every slot
    /// top stays word-aligned.
    pub fn stride(&self) -> usize {
        (self.size / MAX_TASKS) & !(STACK_ALIGN - 1)
    }

    /// Compute the stack region for table slot `index` with the requested
    /// size, or `None` if the request cannot fit the slot. Sizes must be a
    /// multiple of [`STACK_ALIGN`]; the aligned top and stride then keep
    /// every region base word-aligned, which the canary write relies on.
    pub fn slot_region(&self, index: usize, stack_size: usize) -> Option<StackRegion> {
        if index >= MAX_TASKS
            || stack_size < MIN_STACK
            || stack_size > self.stride()
            || stack_size % STACK_ALIGN != 0
        {
            return None;
        }
        let slot_top = self.top - index * self.stride();
        Some(StackRegion::new(slot_top - stack_size, stack_size))
    }
}

// ---------------------------------------------------------------------------
// Task control block
// ---------------------------------------------------------------------------

/// Per-task bookkeeping record.
///
/// The saved [`Context`] is opaque: the scheduler stores and loads it but
/// never reads its bytes. The invariant that the saved stack pointer lies
/// within `[stack_base, stack_base + stack_size)` is the port layer's to
/// uphold; the canary just above the guard band is the coarse runtime
/// check that it held.
pub struct Tcb {
    /// Raw id; 0 marks a free slot.
    pub pid: u32,
    pub state: TaskState,
    pub stack_base: usize,
    pub stack_size: usize,
    /// Saved execution context, valid only while `state != Free`.
    pub context: Context,
    /// Reserved for future scheduling policies; round-robin ignores it.
    pub priority: u8,
    canary: u32,
}

// Slots hold raw addresses into the statically carved arena and are only
// touched by their own core's scheduler.
unsafe impl Send for Tcb {}
unsafe impl Sync for Tcb {}

impl Tcb {
    /// An unallocated slot, usable as an array-repeat operand.
    pub const EMPTY: Tcb = Tcb::empty();

    /// An unallocated slot.
    pub const fn empty() -> Self {
        Self {
            pid: 0,
            state: TaskState::Free,
            stack_base: 0,
            stack_size: 0,
            context: Context::empty(),
            priority: 0,
            canary: 0,
        }
    }

    /// The slot's stack region.
    pub fn region(&self) -> StackRegion {
        StackRegion::new(self.stack_base, self.stack_size)
    }

    /// Address of the canary word. It sits directly above the MPU guard
    /// band at the bottom of the stack: a descending overflow smashes it
    /// first, and the tick-path sweep never reads the guarded bytes
    /// themselves (those fault by design where isolation is active).
    pub fn canary_addr(&self) -> usize {
        self.stack_base + GUARD_SIZE
    }

    /// Write the overflow canary above the guard band.
    ///
    /// # Safety
    ///
    /// The canary word must lie in writable memory owned by this slot.
    pub unsafe fn arm_canary(&mut self) {
        (self.canary_addr() as *mut u32).write_volatile(STACK_CANARY);
        self.canary = STACK_CANARY;
    }

    /// Whether the canary word still holds the value written at creation.
    ///
    /// # Safety
    ///
    /// Only meaningful while the slot is live; the canary word must still
    /// be readable.
    pub unsafe fn canary_ok(&self) -> bool {
        (self.canary_addr() as *const u32).read_volatile() == self.canary
    }

    /// Retire the slot: pid cleared, never scheduled again. The stack
    /// region stays carved out and is re-armed by the next `create` here.
    pub fn free(&mut self) {
        self.pid = 0;
        self.state = TaskState::Free;
        self.context = Context::empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_stacks_from_4k_arena() {
        // 256/256/512-byte stacks carved below a fixed high-water mark.
        let mark = 0x2000_8000;
        let arena = StackArena::new(mark, 4096);

        let r0 = arena.slot_region(0, 256).unwrap();
        let r1 = arena.slot_region(1, 256).unwrap();
        let r2 = arena.slot_region(2, 512).unwrap();

        for r in [&r0, &r1, &r2] {
            assert!(r.top() <= mark, "region reaches above the mark");
        }
        assert!(!r0.overlaps(&r1));
        assert!(!r0.overlaps(&r2));
        assert!(!r1.overlaps(&r2));
    }

    #[test]
    fn test_slot_region_is_deterministic() {
        let arena = StackArena::new(0x2001_C000, 16 * 1024);
        assert_eq!(arena.slot_region(3, 512), arena.slot_region(3, 512));
        // Same index, same region — even after the slot was freed and reused.
        let before = arena.slot_region(5, 1024).unwrap();
        let after = arena.slot_region(5, 1024).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_oversized_request_is_refused() {
        let arena = StackArena::new(0x2000_8000, 4096);
        // stride = 4096 / MAX_TASKS = 512
        assert_eq!(arena.stride(), 512);
        assert!(arena.slot_region(0, 520).is_none());
        assert!(arena.slot_region(0, 512).is_some());
        assert!(arena.slot_region(MAX_TASKS, 256).is_none());
        assert!(arena.slot_region(0, MIN_STACK - 8).is_none());
    }

    #[test]
    fn test_unaligned_stack_size_is_refused() {
        let arena = StackArena::new(0x2000_8000, 4096);
        // Odd sizes would leave the region base (and the canary word)
        // unaligned; they are configuration errors, not roundable requests.
        assert!(arena.slot_region(0, 130).is_none());
        assert!(arena.slot_region(0, 257).is_none());
        assert!(arena.slot_region(0, 256).is_some());
    }

    #[test]
    fn test_region_bases_are_word_aligned() {
        // An unaligned high-water mark is rounded down; every region base
        // and canary address stays 8-byte aligned regardless.
        let arena = StackArena::new(0x2000_8003, 4096);
        assert_eq!(arena.top() % STACK_ALIGN, 0);
        for slot in 0..4 {
            let region = arena.slot_region(slot, 256).unwrap();
            assert_eq!(region.base() % STACK_ALIGN, 0);
            assert_eq!((region.base() + GUARD_SIZE) % 4, 0);
        }
    }

    #[test]
    fn test_region_contains_and_top() {
        let r = StackRegion::new(0x1000, 0x100);
        assert!(r.contains(0x1000));
        assert!(r.contains(0x10FF));
        assert!(!r.contains(0x1100));
        assert!(!r.contains(0xFFF));
        assert_eq!(r.top(), 0x1100);
    }

    #[test]
    fn test_canary_round_trip() {
        #[repr(align(8))]
        struct AlignedStack([u8; 256]);
        static mut STACK: AlignedStack = AlignedStack([0; 256]);
        let base = unsafe { core::ptr::addr_of_mut!(STACK) } as usize;

        let mut tcb = Tcb::empty();
        tcb.stack_base = base;
        tcb.stack_size = 256;
        unsafe {
            tcb.arm_canary();
            assert!(tcb.canary_ok());
            // Smash the canary word, as a deep call chain would on its way
            // down toward the guard band.
            (tcb.canary_addr() as *mut u32).write_volatile(0);
            assert!(!tcb.canary_ok());
        }
    }

    #[test]
    fn test_canary_sits_above_guard_band() {
        let mut tcb = Tcb::empty();
        tcb.stack_base = 0x2000_1000;
        tcb.stack_size = 256;
        // The sweep must never read inside [base, base + GUARD_SIZE): that
        // band is a no-access MPU region while isolation is active.
        assert_eq!(tcb.canary_addr(), tcb.stack_base + GUARD_SIZE);
        assert!(tcb.region().contains(tcb.canary_addr()));
    }

    #[test]
    fn test_task_id_rejects_zero() {
        assert!(TaskId::new(0).is_none());
        assert_eq!(TaskId::new(7).unwrap().get(), 7);
    }
}
