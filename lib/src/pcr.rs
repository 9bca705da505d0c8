//! Per-CPU records: CPU identity and online count.
//!
//! The platform bring-up registers a `current_cpu` resolver (typically
//! backed by the APIC ID); before that, everything runs on CPU 0. Keeping
//! the resolver a function pointer lets this crate stay free of any APIC
//! knowledge.

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

pub const MAX_CPUS: usize = 16;

static CPU_COUNT: AtomicU32 = AtomicU32::new(1);
static CURRENT_CPU_FN: AtomicUsize = AtomicUsize::new(0);

pub type CurrentCpuFn = fn() -> usize;

pub fn register_current_cpu_fn(f: CurrentCpuFn) {
    CURRENT_CPU_FN.store(f as usize, Ordering::Release);
}

/// Index of the executing CPU, 0 before SMP bring-up.
#[inline]
pub fn get_current_cpu() -> usize {
    let raw = CURRENT_CPU_FN.load(Ordering::Acquire);
    if raw == 0 {
        return 0;
    }
    // SAFETY: only ever stores a valid `CurrentCpuFn`.
    let f: CurrentCpuFn = unsafe { core::mem::transmute(raw) };
    let cpu = f();
    if cpu < MAX_CPUS { cpu } else { 0 }
}

pub fn set_cpu_count(count: u32) {
    let clamped = count.clamp(1, MAX_CPUS as u32);
    CPU_COUNT.store(clamped, Ordering::Release);
}

#[inline]
pub fn get_cpu_count() -> u32 {
    CPU_COUNT.load(Ordering::Acquire)
}
