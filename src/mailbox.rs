//! # Cross-Core Mailbox
//!
//! The only mutable state shared between the two cores of a dual-core part:
//! two independent byte rings, one per direction, living in memory visible
//! to both. Each core runs its own [`crate::scheduler::Scheduler`]; the
//! rings are how their tasks exchange data.
//!
//! Each ring is guarded by its own dedicated [`SpinLock`], shared only by
//! the two parties touching that specific ring. The doorbell interrupt
//! raised after a send is purely a notification — it never carries data and
//! never substitutes for the lock.
//!
//! Capacity is a power of two; head and tail run free and are masked on
//! access, so `used = head - tail` needs no count field. One slot is always
//! left empty to tell a full ring from an empty one, giving
//! `MBOX_CAPACITY - 1` usable bytes.
//!
//! A send that exceeds the free space is rejected as a whole — no partial,
//! silently truncated writes.

use core::cell::UnsafeCell;

use crate::arch;
use crate::config::MBOX_CAPACITY;
use crate::error::KernelError;
use crate::sync::SpinLock;

const MASK: usize = MBOX_CAPACITY - 1;

struct RingState {
    buf: [u8; MBOX_CAPACITY],
    /// Free-running write index; masked on access.
    head: usize,
    /// Free-running read index; masked on access.
    tail: usize,
}

impl RingState {
    const fn new() -> Self {
        Self {
            buf: [0; MBOX_CAPACITY],
            head: 0,
            tail: 0,
        }
    }

    fn used(&self) -> usize {
        self.head.wrapping_sub(self.tail)
    }

    fn free(&self) -> usize {
        // One slot reserved to disambiguate empty from full.
        MBOX_CAPACITY - 1 - self.used()
    }
}

/// One direction of a cross-core mailbox: a byte ring with its own lock.
pub struct MailboxRing {
    lock: SpinLock,
    state: UnsafeCell<RingState>,
}

// Shared between exactly two cores, always under `lock`.
unsafe impl Sync for MailboxRing {}

impl MailboxRing {
    pub const fn new() -> Self {
        Self {
            lock: SpinLock::new(),
            state: UnsafeCell::new(RingState::new()),
        }
    }

    /// Copy `bytes` into the ring and ring the peer's doorbell.
    ///
    /// The write is all-or-nothing: if the payload exceeds the free space
    /// the ring is left untouched and `MailboxFull` is returned. The
    /// doorbell is raised after the lock is dropped; it only tells the
    /// peer there is something to drain.
    pub fn send(&self, bytes: &[u8]) -> Result<(), KernelError> {
        let result = self.lock.with(|| {
            let ring = unsafe { &mut *self.state.get() };
            if bytes.len() > ring.free() {
                return Err(KernelError::MailboxFull);
            }
            for &b in bytes {
                ring.buf[ring.head & MASK] = b;
                ring.head = ring.head.wrapping_add(1);
            }
            Ok(())
        });

        if result.is_ok() && !bytes.is_empty() {
            arch::raise_peer_doorbell();
        }
        result
    }

    /// Drain up to `out.len()` bytes from the ring, returning how many
    /// were copied. An empty ring yields 0 — there is no blocking wait.
    pub fn recv(&self, out: &mut [u8]) -> usize {
        self.lock.with(|| {
            let ring = unsafe { &mut *self.state.get() };
            let n = ring.used().min(out.len());
            for slot in out[..n].iter_mut() {
                *slot = ring.buf[ring.tail & MASK];
                ring.tail = ring.tail.wrapping_add(1);
            }
            n
        })
    }

    /// Bytes currently held.
    pub fn used(&self) -> usize {
        self.lock.with(|| unsafe { (*self.state.get()).used() })
    }

    /// Bytes a send could currently accept.
    pub fn free(&self) -> usize {
        self.lock.with(|| unsafe { (*self.state.get()).free() })
    }
}

impl Default for MailboxRing {
    fn default() -> Self {
        Self::new()
    }
}

/// The mailbox for one core pair: one ring per direction. Which ring is
/// "tx" is a matter of perspective — core 0 sends on `to_peer` and drains
/// `from_peer`, core 1 the other way around.
pub struct Mailbox {
    pub to_peer: MailboxRing,
    pub from_peer: MailboxRing,
}

impl Mailbox {
    pub const fn new() -> Self {
        Self {
            to_peer: MailboxRing::new(),
            from_peer: MailboxRing::new(),
        }
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch;

    #[test]
    fn test_round_trip_order_and_values() {
        let ring = MailboxRing::new();
        let payload: [u8; 13] = *b"hello, core 1";
        ring.send(&payload).unwrap();

        let mut out = [0u8; 32];
        let n = ring.recv(&mut out);
        assert_eq!(n, payload.len());
        assert_eq!(&out[..n], &payload);
    }

    #[test]
    fn test_max_payload_is_capacity_minus_one() {
        let ring = MailboxRing::new();
        let payload = [0xAB; MBOX_CAPACITY - 1];
        ring.send(&payload).unwrap();
        assert_eq!(ring.used(), MBOX_CAPACITY - 1);
        assert_eq!(ring.free(), 0);

        let mut out = [0u8; MBOX_CAPACITY];
        assert_eq!(ring.recv(&mut out), MBOX_CAPACITY - 1);
        assert!(out[..MBOX_CAPACITY - 1].iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_oversized_send_rejected_whole() {
        let ring = MailboxRing::new();
        ring.send(&[1, 2, 3]).unwrap();

        // More than the remaining space: nothing may be written.
        let too_big = [9u8; MBOX_CAPACITY];
        assert_eq!(ring.send(&too_big), Err(KernelError::MailboxFull));
        assert_eq!(ring.used(), 3);

        let mut out = [0u8; 8];
        assert_eq!(ring.recv(&mut out), 3);
        assert_eq!(&out[..3], &[1, 2, 3]);
    }

    #[test]
    fn test_indices_wrap_across_boundary() {
        let ring = MailboxRing::new();
        let mut out = [0u8; MBOX_CAPACITY];

        // March the free-running indices well past the capacity.
        for round in 0..10 {
            let chunk = [round as u8; MBOX_CAPACITY / 2 + 1];
            ring.send(&chunk).unwrap();
            let n = ring.recv(&mut out);
            assert_eq!(n, chunk.len());
            assert_eq!(&out[..n], &chunk);
        }
        assert_eq!(ring.used(), 0);
    }

    #[test]
    fn test_recv_bounded_by_caller_buffer() {
        let ring = MailboxRing::new();
        ring.send(&[1, 2, 3, 4, 5]).unwrap();

        let mut small = [0u8; 2];
        assert_eq!(ring.recv(&mut small), 2);
        assert_eq!(small, [1, 2]);
        assert_eq!(ring.used(), 3);

        let mut rest = [0u8; 8];
        assert_eq!(ring.recv(&mut rest), 3);
        assert_eq!(&rest[..3], &[3, 4, 5]);
    }

    #[test]
    fn test_send_raises_doorbell() {
        let ring = MailboxRing::new();
        let before = arch::host::doorbell_count();
        ring.send(&[42]).unwrap();
        assert_eq!(arch::host::doorbell_count(), before + 1);

        // A rejected send must not ring the bell.
        let too_big = [0u8; MBOX_CAPACITY];
        let _ = ring.send(&too_big);
        assert_eq!(arch::host::doorbell_count(), before + 1);
    }

    #[test]
    fn test_rings_are_independent() {
        let mbox = Mailbox::new();
        mbox.to_peer.send(&[1]).unwrap();
        assert_eq!(mbox.from_peer.used(), 0);

        let mut out = [0u8; 4];
        assert_eq!(mbox.from_peer.recv(&mut out), 0);
        assert_eq!(mbox.to_peer.recv(&mut out), 1);
    }
}
