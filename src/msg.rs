//! # Message Queue
//!
//! Bounded inter-task messaging on one core: a fixed-capacity ring of
//! fixed-size messages guarded by one [`SpinLock`]. Nothing here blocks —
//! `send` on a full queue and `recv` on an empty one fail immediately, and
//! callers needing a rendezvous poll and yield between attempts. There is
//! no wait/notify mechanism in this kernel by design.

use core::cell::UnsafeCell;

use crate::config::{MSG_DEPTH, MSG_SIZE};
use crate::error::KernelError;
use crate::sync::SpinLock;

/// A fixed-size opaque payload. The kernel copies it; it never looks inside.
#[derive(Debug, Clone, Copy)]
pub struct Message {
    pub data: [u8; MSG_SIZE],
}

impl Message {
    pub const fn zeroed() -> Self {
        Self {
            data: [0; MSG_SIZE],
        }
    }

    /// Build a message from a byte slice, truncated or zero-padded to
    /// [`MSG_SIZE`].
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut msg = Self::zeroed();
        let n = bytes.len().min(MSG_SIZE);
        msg.data[..n].copy_from_slice(&bytes[..n]);
        msg
    }
}

struct Ring {
    buf: [Message; MSG_DEPTH],
    head: usize,
    tail: usize,
    count: usize,
}

/// Fixed-capacity message ring, shareable between tasks on one core.
///
/// Invariant: `0 <= count <= MSG_DEPTH` at all times, and `count` equals
/// successful sends minus successful recvs.
pub struct MessageQueue {
    lock: SpinLock,
    ring: UnsafeCell<Ring>,
}

// The ring is only touched under `lock`.
unsafe impl Sync for MessageQueue {}

impl MessageQueue {
    pub const fn new() -> Self {
        Self {
            lock: SpinLock::new(),
            ring: UnsafeCell::new(Ring {
                buf: [Message::zeroed(); MSG_DEPTH],
                head: 0,
                tail: 0,
                count: 0,
            }),
        }
    }

    /// Copy `msg` in and advance the head. Fails immediately with
    /// `QueueFull` at capacity — no blocking, no eviction.
    pub fn send(&self, msg: &Message) -> Result<(), KernelError> {
        self.lock.with(|| {
            let ring = unsafe { &mut *self.ring.get() };
            if ring.count == MSG_DEPTH {
                return Err(KernelError::QueueFull);
            }
            ring.buf[ring.head] = *msg;
            ring.head = (ring.head + 1) % MSG_DEPTH;
            ring.count += 1;
            Ok(())
        })
    }

    /// Copy the oldest message out and advance the tail. Fails immediately
    /// with `QueueEmpty` when nothing is queued.
    pub fn recv(&self) -> Result<Message, KernelError> {
        self.lock.with(|| {
            let ring = unsafe { &mut *self.ring.get() };
            if ring.count == 0 {
                return Err(KernelError::QueueEmpty);
            }
            let msg = ring.buf[ring.tail];
            ring.tail = (ring.tail + 1) % MSG_DEPTH;
            ring.count -= 1;
            Ok(msg)
        })
    }

    /// Messages currently queued.
    pub fn len(&self) -> usize {
        self.lock.with(|| unsafe { (*self.ring.get()).count })
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(tag: u8) -> Message {
        Message::from_bytes(&[tag])
    }

    #[test]
    fn test_fifo_order() {
        let q = MessageQueue::new();
        q.send(&tagged(1)).unwrap();
        q.send(&tagged(2)).unwrap();
        q.send(&tagged(3)).unwrap();

        assert_eq!(q.recv().unwrap().data[0], 1);
        assert_eq!(q.recv().unwrap().data[0], 2);
        assert_eq!(q.recv().unwrap().data[0], 3);
        assert_eq!(q.recv().unwrap_err(), KernelError::QueueEmpty);
    }

    #[test]
    fn test_send_fails_at_capacity() {
        let q = MessageQueue::new();
        for i in 0..MSG_DEPTH {
            q.send(&tagged(i as u8)).unwrap();
        }
        assert_eq!(q.len(), MSG_DEPTH);
        assert_eq!(q.send(&tagged(0xFF)), Err(KernelError::QueueFull));
        assert_eq!(q.len(), MSG_DEPTH);

        // The rejected message must not have evicted anything.
        assert_eq!(q.recv().unwrap().data[0], 0);
    }

    #[test]
    fn test_count_tracks_sends_minus_recvs() {
        let q = MessageQueue::new();
        let mut sends = 0usize;
        let mut recvs = 0usize;

        // A mixed workload, including refused operations, keeps the
        // invariant count == sends - recvs within [0, capacity].
        for round in 0..100 {
            if round % 3 != 2 {
                if q.send(&tagged(round as u8)).is_ok() {
                    sends += 1;
                }
            } else if q.recv().is_ok() {
                recvs += 1;
            }
            let count = q.len();
            assert_eq!(count, sends - recvs);
            assert!(count <= MSG_DEPTH);
        }
    }

    #[test]
    fn test_wraps_around_capacity_boundary() {
        let q = MessageQueue::new();
        // Push the indices past MSG_DEPTH to exercise the modulo.
        for i in 0..(3 * MSG_DEPTH) {
            q.send(&tagged(i as u8)).unwrap();
            assert_eq!(q.recv().unwrap().data[0], i as u8);
        }
        assert!(q.is_empty());
    }
}
