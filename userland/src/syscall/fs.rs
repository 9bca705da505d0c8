//! File and pipe syscall wrappers.

use yula_abi::syscall::*;

use super::{flatten, raw};

pub fn open(path: &[u8], flags: u64) -> i64 {
    let mut buf = [0u8; 128];
    let n = path.len().min(127);
    buf[..n].copy_from_slice(&path[..n]);
    flatten(raw(SYS_OPEN, buf.as_ptr() as u64, flags, 0))
}

pub fn close(fd: i32) -> i64 {
    flatten(raw(SYS_CLOSE, fd as u64, 0, 0))
}

pub fn read(fd: i32, buf: &mut [u8]) -> i64 {
    flatten(raw(SYS_READ, fd as u64, buf.as_mut_ptr() as u64, buf.len() as u64))
}

pub fn write(fd: i32, buf: &[u8]) -> i64 {
    flatten(raw(SYS_WRITE, fd as u64, buf.as_ptr() as u64, buf.len() as u64))
}

pub fn pipe(fds: &mut [i32; 2]) -> i64 {
    flatten(raw(SYS_PIPE, fds.as_mut_ptr() as u64, 0, 0))
}

pub fn dup2(old_fd: i32, new_fd: i32) -> i64 {
    flatten(raw(SYS_DUP2, old_fd as u64, new_fd as u64, 0))
}

pub fn pipe_try_read(fd: i32, buf: &mut [u8]) -> i64 {
    raw(SYS_PIPE_TRY_READ, fd as u64, buf.as_mut_ptr() as u64, buf.len() as u64)
}

pub fn pipe_try_write(fd: i32, buf: &[u8]) -> i64 {
    raw(SYS_PIPE_TRY_WRITE, fd as u64, buf.as_ptr() as u64, buf.len() as u64)
}

/// Write the whole buffer, blocking as needed. -1 if the peer vanishes.
pub fn write_full(fd: i32, buf: &[u8]) -> i64 {
    let mut done = 0usize;
    while done < buf.len() {
        let n = write(fd, &buf[done..]);
        if n <= 0 {
            return -1;
        }
        done += n as usize;
    }
    done as i64
}

pub fn mkdir(path: &[u8]) -> i64 {
    let mut buf = [0u8; 128];
    let n = path.len().min(127);
    buf[..n].copy_from_slice(&path[..n]);
    flatten(raw(SYS_MKDIR, buf.as_ptr() as u64, 0, 0))
}

pub fn unlink(path: &[u8]) -> i64 {
    let mut buf = [0u8; 128];
    let n = path.len().min(127);
    buf[..n].copy_from_slice(&path[..n]);
    flatten(raw(SYS_UNLINK, buf.as_ptr() as u64, 0, 0))
}

pub fn stat(path: &[u8], out: &mut Stat) -> i64 {
    let mut buf = [0u8; 128];
    let n = path.len().min(127);
    buf[..n].copy_from_slice(&path[..n]);
    flatten(raw(SYS_STAT, buf.as_ptr() as u64, out as *mut Stat as u64, 0))
}

pub fn getdents(fd: i32, out: &mut [Dirent]) -> i64 {
    let bytes = core::mem::size_of_val(out);
    flatten(raw(SYS_GETDENTS, fd as u64, out.as_mut_ptr() as u64, bytes as u64))
}

pub fn chdir(path: &[u8]) -> i64 {
    let mut buf = [0u8; 128];
    let n = path.len().min(127);
    buf[..n].copy_from_slice(&path[..n]);
    flatten(raw(SYS_CHDIR, buf.as_ptr() as u64, 0, 0))
}

pub fn ioctl(fd: i32, req: u32, arg: u64) -> i64 {
    flatten(raw(SYS_IOCTL, fd as u64, req as u64, arg))
}
