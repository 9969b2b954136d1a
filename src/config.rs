//! # Kernel Configuration
//!
//! Compile-time constants governing pool sizes and default memory layout.
//! All limits are fixed at compile time — no dynamic allocation.
//!
//! The scheduler itself is constructed with explicit arena bounds (see
//! [`crate::task::StackArena`]); the `STACK_ARENA_*` values here are only
//! the defaults the demo firmware passes in for an STM32F4-class part.

/// Maximum number of tasks one core's scheduler can manage. Bounds the
/// static task table. Increase with care — each slot reserves
/// `STACK_ARENA_SIZE / MAX_TASKS` bytes of the stack arena.
pub const MAX_TASKS: usize = 8;

/// SysTick frequency in Hz. Each tick drives the same switch path as a
/// voluntary yield, so this is also the preemption granularity.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Top of the default task-stack arena. Stacks are carved downward from
/// here, one fixed-stride slot per task table entry.
pub const STACK_ARENA_TOP: usize = 0x2001_C000;

/// Size in bytes of the default task-stack arena.
pub const STACK_ARENA_SIZE: usize = 16 * 1024;

/// Size in bytes of the MPU no-access trip-wire at the bottom of a task
/// stack. 32 bytes is the smallest region the hardware can express.
pub const GUARD_SIZE: usize = 32;

/// Pattern written to the canary word of every task stack at creation,
/// directly above the guard band. The tick path kills any task whose
/// canary no longer matches; the sweep never touches the guarded bytes.
pub const STACK_CANARY: u32 = 0xC0DE_CAFE;

/// Payload size in bytes of one [`crate::msg::Message`].
pub const MSG_SIZE: usize = 32;

/// Capacity of a [`crate::msg::MessageQueue`] in messages.
pub const MSG_DEPTH: usize = 16;

/// Capacity in bytes of one cross-core mailbox ring. Must be a power of
/// two: ring indices are free-running and masked on access. One slot is
/// always kept empty, so at most `MBOX_CAPACITY - 1` bytes are held.
pub const MBOX_CAPACITY: usize = 64;

/// Minimum number of hardware MPU regions required before the kernel
/// bothers with isolation. Below this it boots with the MPU disabled.
pub const MIN_MPU_REGIONS: u8 = 8;

const _: () = assert!(MBOX_CAPACITY.is_power_of_two());
const _: () = assert!(STACK_ARENA_SIZE % MAX_TASKS == 0);
