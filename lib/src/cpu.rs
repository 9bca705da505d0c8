//! Thin CPU intrinsics: interrupt flag save/restore, halt, pause.
//!
//! Only the operations the locking and scheduling layers need; everything
//! heavier (MSRs, CPUID, APIC) belongs to the platform bring-up, which is
//! outside this tree's scope.

use core::arch::asm;

/// Read RFLAGS, then clear IF. Returns the prior RFLAGS for
/// [`restore_flags`].
#[inline(always)]
pub fn save_flags_cli() -> u64 {
    let flags: u64;
    unsafe {
        asm!(
            "pushfq",
            "pop {}",
            "cli",
            out(reg) flags,
            options(nomem, preserves_flags)
        );
    }
    flags
}

/// Restore RFLAGS previously captured by [`save_flags_cli`].
#[inline(always)]
pub fn restore_flags(flags: u64) {
    unsafe {
        asm!(
            "push {}",
            "popfq",
            in(reg) flags,
            options(nomem)
        );
    }
}

#[inline(always)]
pub fn interrupts_enabled() -> bool {
    let flags: u64;
    unsafe {
        asm!("pushfq", "pop {}", out(reg) flags, options(nomem, preserves_flags));
    }
    flags & (1 << 9) != 0
}

#[inline(always)]
pub fn enable_interrupts() {
    unsafe { asm!("sti", options(nomem, nostack)) };
}

#[inline(always)]
pub fn disable_interrupts() {
    unsafe { asm!("cli", options(nomem, nostack)) };
}

/// Halt until the next interrupt.
#[inline(always)]
pub fn halt() {
    unsafe { asm!("hlt", options(nomem, nostack, preserves_flags)) };
}

#[inline(always)]
pub fn relax() {
    core::hint::spin_loop();
}
