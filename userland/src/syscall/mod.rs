//! Userland syscall wrappers.
//!
//! Each wrapper packs its arguments for the kernel dispatcher and
//! flattens failures to `-1` (the raw negated errno is available from
//! [`errno`]). The trap gate itself belongs to the platform layer;
//! programs in this tree enter the dispatcher through the kernel's
//! published entry point.

pub mod fs;
pub mod input;
pub mod ipc;
pub mod mem;
pub mod process;

use core::sync::atomic::{AtomicI64, Ordering};

use yula_abi::syscall::*;

static LAST_ERRNO: AtomicI64 = AtomicI64::new(0);

#[inline]
pub(crate) fn raw(num: u64, a1: u64, a2: u64, a3: u64) -> i64 {
    yula_core::syscall::dispatch(num, a1, a2, a3)
}

/// Flatten a kernel result: negative becomes -1 with the errno stashed.
#[inline]
pub(crate) fn flatten(result: i64) -> i64 {
    if result < 0 {
        LAST_ERRNO.store(result, Ordering::Relaxed);
        -1
    } else {
        result
    }
}

/// The negated errno of the last failed wrapper call.
pub fn errno() -> i64 {
    LAST_ERRNO.load(Ordering::Relaxed)
}

pub fn getpid() -> u32 {
    raw(SYS_GETPID, 0, 0, 0) as u32
}

pub fn yield_now() {
    let _ = raw(SYS_YIELD, 0, 0, 0);
}

pub fn exit(status: i32) -> ! {
    let _ = raw(SYS_EXIT, status as u64, 0, 0);
    unreachable!("exit returned");
}

pub fn sleep_ms(ms: u64) {
    let _ = raw(SYS_SLEEP_MS, ms, 0, 0);
}

pub fn usleep(us: u64) {
    let _ = raw(SYS_USLEEP, us, 0, 0);
}

pub fn uptime_ms() -> u64 {
    raw(SYS_UPTIME_MS, 0, 0, 0) as u64
}
