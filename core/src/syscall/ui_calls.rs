//! Framebuffer syscalls.

use yula_abi::syscall::{FbInfo, PresentRequest};
use yula_abi::{ERRNO_EFAULT, ERRNO_EINVAL, ERRNO_EPERM};
use yula_lib::kernel_services::platform;
use yula_mm::process_vm::{INVALID_VM_ID, vm_map_framebuffer};
use yula_mm::user_copy::{user_read, user_slice, user_write};

use crate::sched::task::{current_task, current_task_id};
use crate::services::fb;

pub fn sys_fb_acquire() -> i64 {
    fb::fb_acquire(current_task_id())
}

pub fn sys_fb_release() -> i64 {
    fb::fb_release(current_task_id())
}

/// Map the framebuffer into the caller's address space; fills an
/// [`FbInfo`] through `info_ptr` and returns the mapping base. Owner
/// only.
pub fn sys_map_framebuffer(info_ptr: u64) -> i64 {
    let pid = current_task_id();
    if fb::fb_owner() != pid {
        return ERRNO_EPERM;
    }

    let Some(info) = platform::framebuffer_info() else {
        return ERRNO_EINVAL;
    };

    let task = current_task();
    if task.is_null() {
        return ERRNO_EINVAL;
    }
    let vm_id = unsafe { (*task).vm_id };
    if vm_id == INVALID_VM_ID {
        // Kernel-rooted tasks see the framebuffer through the direct map.
        let base = platform::framebuffer_base();
        if base.is_null() {
            return ERRNO_EINVAL;
        }
        if info_ptr != 0 && write_fb_info(info_ptr, &info).is_err() {
            return ERRNO_EFAULT;
        }
        return base.as_u64() as i64;
    }

    let size = info.pitch as u64 * info.height as u64 * info.bytes_per_pixel as u64;
    let fb_phys = yula_abi::PhysAddr::new(info.base);
    match vm_map_framebuffer(vm_id, fb_phys, size) {
        Ok(va) => {
            if info_ptr != 0 && write_fb_info(info_ptr, &info).is_err() {
                return ERRNO_EFAULT;
            }
            va.as_u64() as i64
        }
        Err(_) => ERRNO_EINVAL,
    }
}

fn write_fb_info(info_ptr: u64, info: &platform::FramebufferInfo) -> Result<(), ()> {
    let out = FbInfo {
        width: info.width,
        height: info.height,
        pitch: info.pitch,
        bytes_per_pixel: info.bytes_per_pixel,
    };
    user_write(info_ptr, out).map_err(|_| ())
}

pub fn sys_fb_present(req_ptr: u64) -> i64 {
    let Ok(req) = user_read::<PresentRequest>(req_ptr) else {
        return ERRNO_EFAULT;
    };
    // Validate the staging buffer range before the copy loop trusts it.
    if req.src != 0 {
        let Some(info) = platform::framebuffer_info() else {
            return ERRNO_EINVAL;
        };
        let span = req.src_stride as u64 * info.height as u64 * info.bytes_per_pixel as u64;
        if span != 0 && user_slice(req.src, span as usize).is_err() {
            return ERRNO_EFAULT;
        }
    }
    fb::fb_present(current_task_id(), &req)
}
