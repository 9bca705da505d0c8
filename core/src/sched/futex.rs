//! Futex wait/wake.
//!
//! A fixed hash table of wait buckets keyed by the address of the futex
//! word. `futex_wait` re-reads the word under the bucket lock before
//! enqueueing, so a wake between the userspace check and the syscall is
//! never lost; wakes are FIFO within a bucket and spurious wakeups are
//! allowed (callers loop).
//!
//! This is the signaling primitive under the compositor's shared-memory
//! input ring: the consumer sleeps on the write cursor, the producer on
//! the read cursor.

use core::ptr;
use core::sync::atomic::{AtomicU32, Ordering};

use yula_abi::ERRNO_EAGAIN;
use yula_abi::task::BlockReason;
use yula_lib::IrqMutex;

use super::scheduler::{block_current_task, unblock_task};
use super::task::{Task, current_task};

/// Power of two.
const FUTEX_HASH_BUCKETS: usize = 64;
const FUTEX_MAX_WAITERS_PER_BUCKET: usize = 16;

#[derive(Clone, Copy)]
struct FutexWaiter {
    futex_addr: u64,
    task: *mut Task,
}

impl FutexWaiter {
    const fn empty() -> Self {
        Self { futex_addr: 0, task: ptr::null_mut() }
    }

    fn is_empty(&self) -> bool {
        self.task.is_null()
    }
}

// SAFETY: raw task pointers are scheduler-owned; bucket access is
// serialized by the per-bucket IrqMutex.
unsafe impl Send for FutexWaiter {}

struct FutexBucket {
    waiters: [FutexWaiter; FUTEX_MAX_WAITERS_PER_BUCKET],
    count: usize,
}

impl FutexBucket {
    const fn new() -> Self {
        Self {
            waiters: [const { FutexWaiter::empty() }; FUTEX_MAX_WAITERS_PER_BUCKET],
            count: 0,
        }
    }
}

static FUTEX_TABLE: [IrqMutex<FutexBucket>; FUTEX_HASH_BUCKETS] =
    [const { IrqMutex::new(FutexBucket::new()) }; FUTEX_HASH_BUCKETS];

#[inline]
fn futex_hash(addr: u64) -> usize {
    // Words are 4-byte aligned; mix with a prime to spread neighbors.
    let h = (addr >> 2).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    (h as usize) & (FUTEX_HASH_BUCKETS - 1)
}

/// Block while `*uaddr == expected`.
///
/// `key` identifies the futex word across address spaces (the syscall
/// layer passes the physical address; kernel-internal users pass the
/// kernel virtual address, which is stable). `uaddr` is the caller's
/// mapping of the word, used only for the value check.
///
/// Returns 0 after a wakeup, `-EAGAIN` if the value already differed or
/// the bucket was full.
pub fn futex_wait_keyed(key: u64, uaddr: u64, expected: u32) -> i64 {
    let bucket_idx = futex_hash(key);

    let current = current_task();
    if current.is_null() {
        return ERRNO_EAGAIN;
    }

    {
        let mut bucket = FUTEX_TABLE[bucket_idx].lock();
        if bucket.count >= FUTEX_MAX_WAITERS_PER_BUCKET {
            return ERRNO_EAGAIN;
        }

        // SAFETY: validated, mapped, 4-byte aligned user address.
        let current_val = unsafe { (*(uaddr as *const AtomicU32)).load(Ordering::SeqCst) };
        if current_val != expected {
            return ERRNO_EAGAIN;
        }

        let Some(slot) = bucket.waiters.iter().position(|w| w.is_empty()) else {
            return ERRNO_EAGAIN;
        };
        bucket.waiters[slot] = FutexWaiter { futex_addr: key, task: current };
        bucket.count += 1;

        unsafe {
            (*current).block_reason = BlockReason::FutexWait;
        }
    }
    // Bucket lock dropped before parking; a racing wake is absorbed by
    // the scheduler's pending-wakeup flag.

    block_current_task();
    0
}

/// Wake up to `max_wake` tasks waiting on `key`. Returns the count.
pub fn futex_wake_keyed(key: u64, max_wake: u32) -> i64 {
    let bucket_idx = futex_hash(key);
    let mut woken = 0u32;

    let mut to_wake = [ptr::null_mut::<Task>(); FUTEX_MAX_WAITERS_PER_BUCKET];
    {
        let mut bucket = FUTEX_TABLE[bucket_idx].lock();
        for waiter in bucket.waiters.iter_mut() {
            if woken >= max_wake {
                break;
            }
            if !waiter.is_empty() && waiter.futex_addr == key {
                to_wake[woken as usize] = waiter.task;
                *waiter = FutexWaiter::empty();
                woken += 1;
            }
        }
        bucket.count = bucket.count.saturating_sub(woken as usize);
    }

    for &task in &to_wake[..woken as usize] {
        let _ = unblock_task(task);
    }
    woken as i64
}

/// Kernel-internal wait on a kernel-virtual word.
pub fn futex_wait(uaddr: u64, expected: u32) -> i64 {
    futex_wait_keyed(uaddr, uaddr, expected)
}

/// Kernel-internal wake on a kernel-virtual word.
pub fn futex_wake(uaddr: u64, max_wake: u32) -> i64 {
    futex_wake_keyed(uaddr, max_wake)
}

/// Scrub a dying task out of every bucket.
pub fn futex_remove_task(task: *mut Task) {
    if task.is_null() {
        return;
    }
    for bucket_mutex in FUTEX_TABLE.iter() {
        let mut bucket = bucket_mutex.lock();
        let mut removed = 0usize;
        for waiter in bucket.waiters.iter_mut() {
            if !waiter.is_empty() && waiter.task == task {
                *waiter = FutexWaiter::empty();
                removed += 1;
            }
        }
        bucket.count = bucket.count.saturating_sub(removed);
    }
}
