//! # Error Taxonomy
//!
//! Every recoverable condition in the kernel is a local return value; there
//! is no unwinding and no global handler. Fatal conditions (no runnable task
//! at start-up) never reach this type — they halt awaiting the external
//! watchdog, see [`crate::kernel::fatal_halt`].

/// Recoverable kernel errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Task table exhausted: every slot is in use.
    NoFreeSlot,
    /// Requested stack does not fit the arena slot for that table index.
    StackTooLarge,
    /// Message queue is at capacity; the send was not performed.
    QueueFull,
    /// Message queue is empty; there is nothing to receive.
    QueueEmpty,
    /// Mailbox ring lacks space for the whole payload. Partial writes are
    /// never performed.
    MailboxFull,
    /// MPU region base is not aligned to the region size.
    Misaligned,
}
