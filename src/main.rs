//! # Demo Firmware
//!
//! A small firmware image exercising the kernel on an STM32F4-class part:
//!
//! | Task       | Stack | Behavior                                        |
//! |------------|-------|-------------------------------------------------|
//! | `producer` | 1 KB  | pushes a counter into the queue, yields         |
//! | `consumer` | 1 KB  | drains the queue, yields                        |
//! | `busy`     | 1 KB  | never yields — preempted by the SysTick tick    |
//!
//! The producer/consumer pair demonstrates the poll-and-yield rendezvous
//! (neither queue operation blocks); the busy task demonstrates that the
//! external tick keeps the round-robin fair even against a task that never
//! cooperates.

#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_std)]
#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_main)]

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod firmware {
    use cortex_m_rt::entry;
    use panic_halt as _;

    use mkern::config::{STACK_ARENA_SIZE, STACK_ARENA_TOP};
    use mkern::kernel;
    use mkern::mpu;
    use mkern::msg::{Message, MessageQueue};
    use mkern::scheduler::Scheduler;
    use mkern::task::StackArena;

    const TASK_STACK: usize = 1024;

    static QUEUE: MessageQueue = MessageQueue::new();

    extern "C" fn producer(arg: usize) -> ! {
        let queue = unsafe { &*(arg as *const MessageQueue) };
        let mut counter: u32 = 0;
        loop {
            let msg = Message::from_bytes(&counter.to_le_bytes());
            // Full queue: back off and let the consumer drain.
            if queue.send(&msg).is_ok() {
                counter = counter.wrapping_add(1);
            }
            kernel::yield_task();
        }
    }

    extern "C" fn consumer(arg: usize) -> ! {
        let queue = unsafe { &*(arg as *const MessageQueue) };
        let mut received: u32 = 0;
        loop {
            while queue.recv().is_ok() {
                received = received.wrapping_add(1);
            }
            // Empty queue: poll again next turn.
            kernel::yield_task();
        }
    }

    extern "C" fn busy(_arg: usize) -> ! {
        let mut spins: u32 = 0;
        loop {
            // No voluntary yield: only the tick takes the CPU back.
            spins = spins.wrapping_add(1);
        }
    }

    #[entry]
    fn main() -> ! {
        let peripherals = cortex_m::Peripherals::take().unwrap_or_else(|| kernel::fatal_halt());

        let arena = StackArena::new(STACK_ARENA_TOP, STACK_ARENA_SIZE);
        static mut SCHEDULER: Option<Scheduler> = None;
        let sched: &'static mut Scheduler = unsafe {
            let slot = &mut *core::ptr::addr_of_mut!(SCHEDULER);
            slot.replace(Scheduler::new(arena));
            match slot.as_mut() {
                Some(s) => s,
                None => kernel::fatal_halt(),
            }
        };
        kernel::init(sched);

        let queue_arg = &QUEUE as *const MessageQueue as usize;
        for (entry_fn, arg) in [
            (producer as mkern::arch::TaskEntry, queue_arg),
            (consumer, queue_arg),
            (busy, 0),
        ] {
            if kernel::task_create(entry_fn, arg, TASK_STACK).is_err() {
                kernel::fatal_halt();
            }
        }

        // Isolate around the first task's stack; a small MPU just means
        // we boot without isolation.
        if let Some(region) = arena.slot_region(0, TASK_STACK) {
            if mpu::mpu_init(region).is_err() {
                kernel::fatal_halt();
            }
        }

        kernel::start(peripherals)
    }
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
fn main() {
    // The firmware image only exists for the embedded target; the host
    // build carries the library and its tests.
}
