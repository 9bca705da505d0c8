//! Named IPC, futex, and poll syscalls.

use yula_abi::poll::{POLL_MAX_FDS, PollFd};
use yula_abi::{ERRNO_EBADF, ERRNO_EEXIST, ERRNO_EFAULT, ERRNO_EINVAL, ERRNO_ENOENT};
use yula_fs::named_ipc;
use yula_fs::vfs::{NodePayload, node_payload, node_unref};
use yula_fs::{fd_close, fd_node, fileio};
use yula_lib::FixedName;
use yula_mm::user_copy::{user_cstr, user_read, user_write};

use crate::sched::futex;
use crate::sched::task::current_task_id;

fn copy_ipc_name(name_ptr: u64) -> Result<FixedName<32>, i64> {
    let mut raw = [0u8; 32];
    let len = user_cstr(name_ptr, &mut raw, 31).map_err(|_| ERRNO_EFAULT)?;
    FixedName::<32>::new(&raw[..len]).ok_or(ERRNO_EINVAL)
}

pub fn sys_ipc_listen(name_ptr: u64) -> i64 {
    let name = match copy_ipc_name(name_ptr) {
        Ok(n) => n,
        Err(e) => return e,
    };
    let Some(node) = named_ipc::listen(&name) else {
        return ERRNO_EEXIST;
    };
    match fileio::fd_install(current_task_id(), node, 0) {
        Some(fd) => fd as i64,
        None => {
            node_unref(node);
            yula_abi::ERRNO_EMFILE
        }
    }
}

/// Returns 1 with `{c2s_read_fd, s2c_write_fd}` stored through
/// `fds_ptr`, or 0 when nothing (usable) is pending.
pub fn sys_ipc_accept(listen_fd: i32, fds_ptr: u64) -> i64 {
    let table = current_task_id();
    let Some(node) = fd_node(table, listen_fd) else {
        return ERRNO_EBADF;
    };
    let Some(NodePayload::IpcListen { endpoint }) = node_payload(node) else {
        return ERRNO_EINVAL;
    };

    let Some((c2s_read, s2c_write)) = named_ipc::accept(endpoint) else {
        return 0;
    };

    let Some((rfd, wfd)) = fileio::fd_install_pair(table, c2s_read, s2c_write) else {
        node_unref(c2s_read);
        node_unref(s2c_write);
        return yula_abi::ERRNO_EMFILE;
    };
    if user_write(fds_ptr, [rfd, wfd]).is_err() {
        fd_close(table, rfd);
        fd_close(table, wfd);
        return ERRNO_EFAULT;
    }
    1
}

/// Returns 0 with `{c2s_write_fd, s2c_read_fd}` stored through `fds_ptr`.
pub fn sys_ipc_connect(name_ptr: u64, fds_ptr: u64) -> i64 {
    let name = match copy_ipc_name(name_ptr) {
        Ok(n) => n,
        Err(e) => return e,
    };
    let Some((c2s_write, s2c_read, pending_key)) = named_ipc::connect(&name) else {
        return ERRNO_ENOENT;
    };

    let table = current_task_id();
    let Some((wfd, rfd)) = fileio::fd_install_pair(table, c2s_write, s2c_read) else {
        // Withdraw the queued server halves as well.
        named_ipc::connect_cancel(pending_key);
        node_unref(c2s_write);
        node_unref(s2c_read);
        return yula_abi::ERRNO_EMFILE;
    };
    if user_write(fds_ptr, [wfd, rfd]).is_err() {
        named_ipc::connect_cancel(pending_key);
        fd_close(table, wfd);
        fd_close(table, rfd);
        return ERRNO_EFAULT;
    }
    0
}

/// Resolve a futex word to its cross-address-space key: the physical
/// address for mapped user words, the virtual address for kernel words.
fn futex_key(uaddr: u64) -> Option<u64> {
    let task = crate::sched::task::current_task();
    if task.is_null() {
        return Some(uaddr);
    }
    let vm_id = unsafe { (*task).vm_id };
    if vm_id == yula_mm::process_vm::INVALID_VM_ID {
        return Some(uaddr);
    }
    let va = yula_abi::VirtAddr::try_new(uaddr)?;
    if va.is_kernel_space() {
        return Some(uaddr);
    }
    let root = yula_mm::process_vm::vm_root(vm_id)?;
    yula_mm::paging::translate(root, va).map(|pa| pa.as_u64())
}

pub fn sys_futex_wait(uaddr: u64, expected: u32) -> i64 {
    if uaddr == 0 || uaddr & 3 != 0 {
        return ERRNO_EINVAL;
    }
    let Some(key) = futex_key(uaddr) else {
        return ERRNO_EFAULT;
    };
    futex::futex_wait_keyed(key, uaddr, expected)
}

pub fn sys_futex_wake(uaddr: u64, count: u32) -> i64 {
    if uaddr == 0 || uaddr & 3 != 0 {
        return ERRNO_EINVAL;
    }
    let Some(key) = futex_key(uaddr) else {
        return ERRNO_EFAULT;
    };
    futex::futex_wake_keyed(key, count.max(1))
}

pub fn sys_poll(fds_ptr: u64, nfds: u32, timeout_ms: i32) -> i64 {
    let nfds = nfds as usize;
    if nfds == 0 || nfds > POLL_MAX_FDS {
        return ERRNO_EINVAL;
    }

    let mut fds = [PollFd::default(); POLL_MAX_FDS];
    for i in 0..nfds {
        match user_read::<PollFd>(fds_ptr + (i * core::mem::size_of::<PollFd>()) as u64) {
            Ok(pfd) => fds[i] = pfd,
            Err(_) => return ERRNO_EFAULT,
        }
    }

    let result = yula_fs::poll::poll(current_task_id(), &mut fds[..nfds], timeout_ms);

    for (i, pfd) in fds[..nfds].iter().enumerate() {
        if user_write(fds_ptr + (i * core::mem::size_of::<PollFd>()) as u64, *pfd).is_err() {
            return ERRNO_EFAULT;
        }
    }
    result
}
