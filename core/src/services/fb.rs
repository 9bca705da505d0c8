//! Framebuffer ownership and presentation.
//!
//! Exactly one task may own the display at a time (`fb_acquire`). Only
//! the owner may map the framebuffer or present; everyone else gets -1
//! and is expected to fall back to the compositor path. `fb_present`
//! copies caller rectangles from a user staging buffer into the scanout
//! buffer.

use core::sync::atomic::{AtomicU32, Ordering};

use yula_abi::syscall::PresentRequest;
use yula_abi::task::INVALID_TASK_ID;
use yula_abi::{ERRNO_EBUSY, ERRNO_EINVAL, ERRNO_EPERM, VirtAddr};
use yula_lib::kernel_services::platform;
use yula_lib::klog_debug;

static FB_OWNER: AtomicU32 = AtomicU32::new(INVALID_TASK_ID);

/// Claim exclusive framebuffer ownership.
pub fn fb_acquire(pid: u32) -> i64 {
    match FB_OWNER.compare_exchange(INVALID_TASK_ID, pid, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => {
            klog_debug!("fb: task {} acquired the display", pid);
            0
        }
        Err(owner) if owner == pid => 0,
        Err(_) => ERRNO_EBUSY,
    }
}

pub fn fb_release(pid: u32) -> i64 {
    match FB_OWNER.compare_exchange(pid, INVALID_TASK_ID, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => 0,
        Err(_) => ERRNO_EPERM,
    }
}

/// Exit-path cleanup: drop ownership if `pid` still holds it.
pub fn fb_release_if_owner(pid: u32) {
    let _ = FB_OWNER.compare_exchange(pid, INVALID_TASK_ID, Ordering::AcqRel, Ordering::Acquire);
}

pub fn fb_owner() -> u32 {
    FB_OWNER.load(Ordering::Acquire)
}

#[inline]
fn is_owner(pid: u32) -> bool {
    fb_owner() == pid
}

/// Copy `req`'s rectangles from the caller's staging buffer into the
/// framebuffer. Owner only; rectangles are clipped to the screen.
pub fn fb_present(pid: u32, req: &PresentRequest) -> i64 {
    if !is_owner(pid) {
        return ERRNO_EPERM;
    }
    let Some(info) = platform::framebuffer_info() else {
        return ERRNO_EINVAL;
    };
    let fb_base = platform::framebuffer_base();
    if fb_base.is_null() || req.src == 0 {
        return ERRNO_EINVAL;
    }
    let rect_count = (req.rect_count as usize).min(req.rects.len());
    let bpp = info.bytes_per_pixel as usize;

    for rect in &req.rects[..rect_count] {
        let x0 = rect.x.max(0) as u32;
        let y0 = rect.y.max(0) as u32;
        let x1 = (rect.x + rect.w as i32).clamp(0, info.width as i32) as u32;
        let y1 = (rect.y + rect.h as i32).clamp(0, info.height as i32) as u32;
        if x1 <= x0 || y1 <= y0 {
            continue;
        }

        let row_bytes = (x1 - x0) as usize * bpp;
        for y in y0..y1 {
            let src_off = (y as u64 * req.src_stride as u64 + x0 as u64) * bpp as u64;
            let dst_off = (y as u64 * info.pitch as u64 + x0 as u64) * bpp as u64;
            let src = VirtAddr::new(req.src + src_off);
            let dst = fb_base.offset(dst_off);
            // SAFETY: rect clipped against the framebuffer; the source
            // range was validated by the syscall layer.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    src.as_ptr::<u8>(),
                    dst.as_mut_ptr::<u8>(),
                    row_bytes,
                );
            }
        }
    }
    0
}
