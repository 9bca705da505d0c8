//! Process and signal wrappers.

use yula_abi::syscall::*;
use yula_abi::task::ProcInfo;

use super::{flatten, raw};

pub fn spawn_process(path: &[u8], argc: u32, argv: u64) -> i64 {
    let mut buf = [0u8; 128];
    let n = path.len().min(127);
    buf[..n].copy_from_slice(&path[..n]);
    flatten(raw(SYS_SPAWN_PROCESS, buf.as_ptr() as u64, argc as u64, argv))
}

pub fn waitpid(pid: i32, status: &mut i32) -> i64 {
    flatten(raw(SYS_WAITPID, pid as u64, status as *mut i32 as u64, 0))
}

pub fn kill(pid: u32, sig: u8) -> i64 {
    flatten(raw(SYS_KILL, pid as u64, sig as u64, 0))
}

pub fn signal(sig: u8, handler: u64) -> i64 {
    flatten(raw(SYS_SIGNAL, sig as u64, handler, 0))
}

pub fn sigreturn() -> i64 {
    raw(SYS_SIGRETURN, 0, 0, 0)
}

pub fn set_term_mode(mode: u32) -> i64 {
    flatten(raw(SYS_SET_TERM_MODE, mode as u64, 0, 0))
}

pub fn clipboard_copy(data: &[u8]) -> i64 {
    flatten(raw(SYS_CLIPBOARD_COPY, data.as_ptr() as u64, data.len() as u64, 0))
}

pub fn clipboard_paste(buf: &mut [u8]) -> i64 {
    flatten(raw(SYS_CLIPBOARD_PASTE, buf.as_mut_ptr() as u64, buf.len() as u64, 0))
}

pub fn proc_list(out: &mut [ProcInfo]) -> i64 {
    flatten(raw(SYS_PROC_LIST, out.as_mut_ptr() as u64, out.len() as u64, 0))
}

pub fn setsid() -> i64 {
    flatten(raw(SYS_SETSID, 0, 0, 0))
}

pub fn setpgid(pid: u32, pgid: u32) -> i64 {
    flatten(raw(SYS_SETPGID, pid as u64, pgid as u64, 0))
}

pub fn getpgrp() -> i64 {
    flatten(raw(SYS_GETPGRP, 0, 0, 0))
}
