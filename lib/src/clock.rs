//! Monotonic kernel clock.
//!
//! The platform timer interrupt calls [`timer_tick`] once per tick; all
//! time queries derive from the tick counter and the registered timer
//! frequency. Tick 0 is boot.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::kernel_services::platform;

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Called from the timer interrupt path. Returns the new tick count.
#[inline]
pub fn timer_tick() -> u64 {
    TICKS.fetch_add(1, Ordering::Relaxed) + 1
}

#[inline]
pub fn now_ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Monotonic milliseconds since boot.
pub fn uptime_ms() -> u64 {
    let freq = platform::timer_frequency() as u64;
    if freq == 0 {
        return 0;
    }
    now_ticks().saturating_mul(1000) / freq
}

/// Ticks needed to cover at least `ms` milliseconds, rounded up, never 0.
pub fn ms_to_ticks(ms: u64) -> u64 {
    let freq = platform::timer_frequency() as u64;
    if freq == 0 {
        return 1;
    }
    ms.saturating_mul(freq).saturating_add(999).wrapping_div(1000).max(1)
}

/// Ticks for a microsecond sleep, rounded up, never 0.
pub fn us_to_ticks(us: u64) -> u64 {
    let freq = platform::timer_frequency() as u64;
    if freq == 0 {
        return 1;
    }
    us.saturating_mul(freq).saturating_add(999_999).wrapping_div(1_000_000).max(1)
}

/// Wrap-safe "deadline reached" comparison on free-running tick counters.
#[inline]
pub fn tick_reached(now: u64, deadline: u64) -> bool {
    now.wrapping_sub(deadline) < (1u64 << 63)
}
