//! Preemption disable counting.
//!
//! A [`PreemptGuard`] bumps a per-CPU-ish (global, interrupt-safe) counter
//! for its lifetime. The scheduler's timer path checks
//! [`is_preemption_disabled`] before forcing a reschedule, so lock holders
//! are never switched out mid-critical-section.

use core::sync::atomic::{AtomicU32, Ordering};

static PREEMPT_COUNT: AtomicU32 = AtomicU32::new(0);

pub struct PreemptGuard(());

impl PreemptGuard {
    #[inline]
    pub fn new() -> Self {
        PREEMPT_COUNT.fetch_add(1, Ordering::AcqRel);
        Self(())
    }
}

impl Default for PreemptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PreemptGuard {
    #[inline]
    fn drop(&mut self) {
        let prev = PREEMPT_COUNT.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev != 0, "unbalanced PreemptGuard drop");
    }
}

#[inline]
pub fn is_preemption_disabled() -> bool {
    PREEMPT_COUNT.load(Ordering::Acquire) != 0
}

#[inline]
pub fn preempt_count() -> u32 {
    PREEMPT_COUNT.load(Ordering::Acquire)
}
