//! Named IPC, futex, and poll wrappers.

use yula_abi::poll::PollFd;
use yula_abi::syscall::*;

use super::{flatten, raw};

fn name_buf(name: &[u8]) -> [u8; 32] {
    let mut buf = [0u8; 32];
    let n = name.len().min(31);
    buf[..n].copy_from_slice(&name[..n]);
    buf
}

pub fn ipc_listen(name: &[u8]) -> i64 {
    let buf = name_buf(name);
    flatten(raw(SYS_IPC_LISTEN, buf.as_ptr() as u64, 0, 0))
}

/// 1 with `{c2s_read, s2c_write}` fds on success, 0 when none pending.
pub fn ipc_accept(listen_fd: i32, fds: &mut [i32; 2]) -> i64 {
    raw(SYS_IPC_ACCEPT, listen_fd as u64, fds.as_mut_ptr() as u64, 0)
}

/// 0 with `{c2s_write, s2c_read}` fds on success.
pub fn ipc_connect(name: &[u8], fds: &mut [i32; 2]) -> i64 {
    let buf = name_buf(name);
    flatten(raw(SYS_IPC_CONNECT, buf.as_ptr() as u64, fds.as_mut_ptr() as u64, 0))
}

pub fn futex_wait(addr: &core::sync::atomic::AtomicU32, expected: u32) -> i64 {
    raw(SYS_FUTEX_WAIT, addr.as_ptr() as u64, expected as u64, 0)
}

pub fn futex_wait_raw(addr: u64, expected: u32) -> i64 {
    raw(SYS_FUTEX_WAIT, addr, expected as u64, 0)
}

pub fn futex_wake_raw(addr: u64, count: u32) -> i64 {
    raw(SYS_FUTEX_WAKE, addr, count as u64, 0)
}

pub fn poll(fds: &mut [PollFd], timeout_ms: i32) -> i64 {
    flatten(raw(
        SYS_POLL,
        fds.as_mut_ptr() as u64,
        fds.len() as u64,
        timeout_ms as u64,
    ))
}
