//! Freestanding kernel runtime for YulaOS.
//!
//! Everything here is usable from any crate above `yula-abi` without
//! dragging in the scheduler: IRQ-safe locks, counting semaphores, wait
//! queues, ring buffers, the klog backend, the monotonic clock, per-CPU
//! bookkeeping, and the in-kernel test harness. Blocking primitives reach
//! the scheduler through the registered `task_runtime` service, never by
//! direct dependency.

#![no_std]
#![allow(unsafe_op_in_unsafe_fn)]

pub mod alignment;
pub mod clock;
pub mod cpu;
pub mod init_flag;
pub mod kernel_services;
pub mod klog;
pub mod pcr;
pub mod ports;
pub mod preempt;
pub mod ring_buffer;
pub mod semaphore;
pub mod service_cell;
pub mod spinlock;
pub mod string;
pub mod testing;
pub mod waitqueue;

pub mod tsc {
    use core::arch::asm;

    #[inline(always)]
    pub fn rdtsc() -> u64 {
        let lo: u32;
        let hi: u32;
        unsafe {
            asm!(
                "rdtsc",
                out("eax") lo,
                out("edx") hi,
                options(nomem, nostack, preserves_flags)
            );
        }
        ((hi as u64) << 32) | (lo as u64)
    }
}

#[doc(hidden)]
pub use paste;

pub use alignment::{align_down_u64, align_down_usize, align_up_u64, align_up_usize};
pub use alignment::{align_down_usize as align_down, align_up_usize as align_up};
pub use init_flag::InitFlag;
pub use klog::{KlogLevel, klog_register_backend, klog_set_level};
pub use pcr::{MAX_CPUS, get_cpu_count, get_current_cpu, set_cpu_count};
pub use preempt::PreemptGuard;
pub use ring_buffer::RingBuffer;
pub use semaphore::Semaphore;
pub use service_cell::ServiceCell;
pub use spinlock::{IrqMutex, IrqMutexGuard, IrqRwLock};
pub use string::FixedName;
pub use waitqueue::WaitQueue;
