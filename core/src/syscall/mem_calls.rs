//! Memory and shared-memory syscalls.

use yula_abi::{ERRNO_EBADF, ERRNO_EFAULT, ERRNO_EINVAL, ERRNO_ENOENT, ERRNO_ENOMEM};
use yula_abi::{PhysAddr, VirtAddr};
use yula_fs::vfs::{NodeFlags, NodePayload, node_create, node_payload, node_unref};
use yula_fs::{fd_node, fileio};
use yula_lib::FixedName;
use yula_mm::process_vm::{INVALID_VM_ID, vm_map_shm_pages, vm_sbrk, vm_unmap};
use yula_mm::shm::{
    SHM_MAX_PAGES, shm_create, shm_create_named, shm_open_named, shm_pages, shm_retain_pages,
    shm_size, shm_unlink_named,
};
use yula_mm::user_copy::user_cstr;
use yula_mm::{pmm_get_free_blocks, pmm_get_used_blocks};

use crate::sched::task::{current_task, current_task_id};

fn current_vm() -> Option<u32> {
    let task = current_task();
    if task.is_null() {
        return None;
    }
    let vm_id = unsafe { (*task).vm_id };
    if vm_id == INVALID_VM_ID { None } else { Some(vm_id) }
}

pub fn sys_sbrk(incr: i64) -> i64 {
    let Some(vm_id) = current_vm() else {
        return ERRNO_EINVAL;
    };
    match vm_sbrk(vm_id, incr) {
        Ok(old_brk) => old_brk.as_u64() as i64,
        Err(_) => ERRNO_ENOMEM,
    }
}

/// Fill `(used_kib, free_kib)` counters.
pub fn sys_mem_info(used_ptr: u64, free_ptr: u64) -> i64 {
    let used_kib = pmm_get_used_blocks() as u64 * 4;
    let free_kib = pmm_get_free_blocks() as u64 * 4;
    if used_ptr != 0 && yula_mm::user_copy::user_write(used_ptr, used_kib).is_err() {
        return ERRNO_EFAULT;
    }
    if free_ptr != 0 && yula_mm::user_copy::user_write(free_ptr, free_kib).is_err() {
        return ERRNO_EFAULT;
    }
    0
}

fn install_shm_node(handle: u32, name: &[u8]) -> i64 {
    let size = shm_size(handle);
    let Some(node) = node_create(name, NodeFlags::SHM, size, NodePayload::Shm { handle }) else {
        yula_mm::shm::shm_release(handle);
        return ERRNO_ENOMEM;
    };
    match fileio::fd_install(current_task_id(), node, 0) {
        Some(fd) => fd as i64,
        None => {
            node_unref(node);
            yula_abi::ERRNO_EMFILE
        }
    }
}

pub fn sys_shm_create(size: u64) -> i64 {
    if size == 0 || size > u32::MAX as u64 {
        return ERRNO_EINVAL;
    }
    match shm_create(size as u32) {
        Some(handle) => install_shm_node(handle, b"shm"),
        None => ERRNO_ENOMEM,
    }
}

fn copy_shm_name(name_ptr: u64) -> Result<FixedName<32>, i64> {
    let mut raw = [0u8; 32];
    let len = user_cstr(name_ptr, &mut raw, 31).map_err(|_| ERRNO_EFAULT)?;
    FixedName::<32>::new(&raw[..len]).ok_or(ERRNO_EINVAL)
}

pub fn sys_shm_create_named(name_ptr: u64, size: u64) -> i64 {
    if size == 0 || size > u32::MAX as u64 {
        return ERRNO_EINVAL;
    }
    let name = match copy_shm_name(name_ptr) {
        Ok(n) => n,
        Err(e) => return e,
    };
    match shm_create_named(&name, size as u32) {
        Some(handle) => install_shm_node(handle, name.as_bytes()),
        None => yula_abi::ERRNO_EEXIST,
    }
}

pub fn sys_shm_open_named(name_ptr: u64) -> i64 {
    let name = match copy_shm_name(name_ptr) {
        Ok(n) => n,
        Err(e) => return e,
    };
    match shm_open_named(&name) {
        Some(handle) => install_shm_node(handle, name.as_bytes()),
        None => ERRNO_ENOENT,
    }
}

pub fn sys_shm_unlink_named(name_ptr: u64) -> i64 {
    let name = match copy_shm_name(name_ptr) {
        Ok(n) => n,
        Err(e) => return e,
    };
    if shm_unlink_named(&name) { 0 } else { ERRNO_ENOENT }
}

/// `mmap(fd, size, flags)`: map an SHM node into the caller's address
/// space; returns the virtual base.
pub fn sys_mmap(fd: i32, size: u64, _flags: u64) -> i64 {
    let Some(vm_id) = current_vm() else {
        return ERRNO_EINVAL;
    };
    let Some(node) = fd_node(current_task_id(), fd) else {
        return ERRNO_EBADF;
    };
    let Some(NodePayload::Shm { handle }) = node_payload(node) else {
        return ERRNO_EINVAL;
    };

    let object_size = shm_size(handle) as u64;
    if object_size == 0 || size > object_size.next_multiple_of(4096) {
        return ERRNO_EINVAL;
    }

    let mut pages = [PhysAddr::NULL; SHM_MAX_PAGES as usize];
    let count = shm_pages(handle, &mut pages);
    if count == 0 {
        return ERRNO_EINVAL;
    }

    // The mapping holds its own reference on every page.
    if !shm_retain_pages(handle) {
        return ERRNO_EINVAL;
    }

    match vm_map_shm_pages(vm_id, &pages[..count as usize], object_size) {
        Ok(va) => va.as_u64() as i64,
        Err(_) => {
            // Roll the page references back.
            for &page in &pages[..count as usize] {
                yula_mm::page_alloc::page_dec_ref_and_maybe_free(page);
            }
            ERRNO_ENOMEM
        }
    }
}

pub fn sys_munmap(addr: u64, len: u64) -> i64 {
    let Some(vm_id) = current_vm() else {
        return ERRNO_EINVAL;
    };
    let Some(va) = VirtAddr::try_new(addr) else {
        return ERRNO_EFAULT;
    };
    match vm_unmap(vm_id, va, len) {
        Ok(()) => 0,
        Err(_) => ERRNO_EINVAL,
    }
}
