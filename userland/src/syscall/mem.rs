//! Memory, shared-memory, and framebuffer syscall wrappers.

use yula_abi::syscall::*;

use super::{flatten, raw};

pub fn sbrk(incr: i64) -> i64 {
    flatten(raw(SYS_SBRK, incr as u64, 0, 0))
}

pub fn mem_info(used_kib: &mut u64, free_kib: &mut u64) -> i64 {
    flatten(raw(
        SYS_MEM_INFO,
        used_kib as *mut u64 as u64,
        free_kib as *mut u64 as u64,
        0,
    ))
}

pub fn shm_create(size: u32) -> i64 {
    flatten(raw(SYS_SHM_CREATE, size as u64, 0, 0))
}

fn name_buf(name: &[u8]) -> [u8; 32] {
    let mut buf = [0u8; 32];
    let n = name.len().min(31);
    buf[..n].copy_from_slice(&name[..n]);
    buf
}

pub fn shm_create_named(name: &[u8], size: u32) -> i64 {
    let buf = name_buf(name);
    flatten(raw(SYS_SHM_CREATE_NAMED, buf.as_ptr() as u64, size as u64, 0))
}

pub fn shm_open_named(name: &[u8]) -> i64 {
    let buf = name_buf(name);
    flatten(raw(SYS_SHM_OPEN_NAMED, buf.as_ptr() as u64, 0, 0))
}

pub fn shm_unlink_named(name: &[u8]) -> i64 {
    let buf = name_buf(name);
    flatten(raw(SYS_SHM_UNLINK_NAMED, buf.as_ptr() as u64, 0, 0))
}

/// Map an SHM fd; returns the base address or 0 on failure.
pub fn mmap(fd: i32, size: u32, flags: u64) -> u64 {
    let result = raw(SYS_MMAP, fd as u64, size as u64, flags);
    if result < 0 { 0 } else { result as u64 }
}

pub fn munmap(addr: u64, len: u64) -> i64 {
    flatten(raw(SYS_MUNMAP, addr, len, 0))
}

pub fn fb_acquire() -> i64 {
    flatten(raw(SYS_FB_ACQUIRE, 0, 0, 0))
}

pub fn fb_release() -> i64 {
    flatten(raw(SYS_FB_RELEASE, 0, 0, 0))
}

/// Map the framebuffer (owner only); fills `info`, returns base or 0.
pub fn map_framebuffer(info: &mut FbInfo) -> u64 {
    let result = raw(SYS_MAP_FRAMEBUFFER, info as *mut FbInfo as u64, 0, 0);
    if result < 0 { 0 } else { result as u64 }
}

pub fn fb_present(req: &PresentRequest) -> i64 {
    flatten(raw(SYS_FB_PRESENT, req as *const PresentRequest as u64, 0, 0))
}
