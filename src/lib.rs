//! # mkern — a minimal multi-tasking kernel core
//!
//! A small cooperative round-robin kernel for microcontrollers. It provides
//! the primitives every peripheral or application task needs — task creation,
//! scheduling, mutual exclusion, bounded messaging, cross-core mailboxes and
//! coarse memory isolation — and nothing else. Peripheral drivers, the boot
//! flow and feature detection live outside this crate and consume the kernel
//! only through the public surface in [`kernel`].
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                   Application Tasks                    │
//! ├────────────────────────────────────────────────────────┤
//! │                Kernel API (kernel.rs)                  │
//! │   init() · task_create() · start() · yield · exit      │
//! ├───────────────┬───────────────────┬────────────────────┤
//! │  Scheduler    │  Messaging        │  Isolation         │
//! │  scheduler.rs │  msg.rs (queue)   │  mpu.rs            │
//! │  ─ create()   │  mailbox.rs       │  ─ region_plan()   │
//! │  ─ rotate()   │  (cross-core)     │  ─ mpu_init()      │
//! │  ─ exit()     │                   │                    │
//! ├───────────────┴───────────────────┴────────────────────┤
//! │          Task model (task.rs) · SpinLock (sync.rs)     │
//! │          Tcb · TaskState · StackArena · canary         │
//! ├────────────────────────────────────────────────────────┤
//! │            Arch port (arch/cortex_m.rs)                │
//! │    PendSV · SysTick · frame synthesis · doorbell       │
//! ├────────────────────────────────────────────────────────┤
//! │              ARM Cortex-M hardware                     │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency model
//!
//! - One [`scheduler::Scheduler`] per core, cooperative round-robin. A task
//!   suspends only at `yield`/`exit` call sites or when the external timer
//!   tick drives the equivalent switch.
//! - No primitive blocks. Queue and mailbox operations on full/empty state
//!   return immediately; callers poll and yield between attempts.
//! - The only mutable state shared across cores is the pair of mailbox byte
//!   rings, each guarded by its own dedicated [`sync::SpinLock`]. The
//!   doorbell interrupt notifies the peer of new data; it never transfers it.
//!
//! ## Memory model
//!
//! - No heap, no `alloc`: fixed-capacity task table, inline ring buffers.
//! - Task stacks are carved once from a fixed descending arena at creation
//!   and never reclaimed for safe reuse.
//! - Portable logic never interprets a saved execution context; it only
//!   stores and loads the opaque [`arch::Context`] handle.

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod config;
pub mod error;
pub mod kernel;
pub mod mailbox;
pub mod mpu;
pub mod msg;
pub mod scheduler;
pub mod sync;
pub mod task;

pub use error::KernelError;
