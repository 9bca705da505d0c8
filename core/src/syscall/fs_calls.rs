//! File, path, and descriptor syscalls.

use yula_abi::ioctl::{TTY_GET_SESSION, TTY_SET_MODE, ioc_type};
use yula_abi::syscall::Dirent;
use yula_abi::{ERRNO_EBADF, ERRNO_EFAULT, ERRNO_EINVAL, ERRNO_ENOENT, ERRNO_ENOTDIR};
use yula_fs::ramfs;
use yula_fs::vfs::{NodeFlags, NodePayload, node_create, node_payload, node_unref};
use yula_fs::{fd_close, fd_dup2, fd_install, fd_node};
use yula_mm::user_copy::{user_cstr, user_read, user_slice, user_slice_mut, user_write};

use crate::sched::task::{current_task, current_task_id};

pub const O_CREATE: u64 = 1;

fn current_cwd() -> ramfs::InodeId {
    let task = current_task();
    if task.is_null() {
        return ramfs::ROOT_INODE;
    }
    unsafe { (*task).cwd }
}

fn copy_path(path_ptr: u64) -> Result<([u8; 128], usize), ()> {
    let mut path = [0u8; 128];
    let len = user_cstr(path_ptr, &mut path, 127).map_err(|_| ())?;
    if len == 0 { Err(()) } else { Ok((path, len)) }
}

pub fn sys_open(path_ptr: u64, flags: u64) -> i64 {
    let Ok((path, len)) = copy_path(path_ptr) else {
        return ERRNO_EFAULT;
    };
    let path = &path[..len];

    // /dev/ names route to devfs.
    if let Some(dev_name) = path.strip_prefix(b"/dev/") {
        let Some(name) = yula_lib::FixedName::<32>::new(dev_name) else {
            return ERRNO_EINVAL;
        };
        let Some(node) = yula_fs::devfs::devfs_open(&name) else {
            return ERRNO_ENOENT;
        };
        return install_or_drop(node);
    }

    let cwd = current_cwd();
    let inode = match ramfs::resolve(cwd, path) {
        Some(inode) => inode,
        None if flags & O_CREATE != 0 => match ramfs::create_file(cwd, path) {
            Ok(inode) => inode,
            Err(()) => return ERRNO_ENOENT,
        },
        None => return ERRNO_ENOENT,
    };

    let flags = if ramfs::is_directory(inode) {
        NodeFlags::DIRECTORY
    } else {
        NodeFlags::REGULAR
    };
    let Some(node) = node_create(path, flags, 0, NodePayload::Ramfs { inode }) else {
        return ERRNO_ENOENT;
    };
    install_or_drop(node)
}

fn install_or_drop(node: yula_fs::NodeId) -> i64 {
    match fd_install(current_task_id(), node, 0) {
        Some(fd) => fd as i64,
        None => {
            node_unref(node);
            yula_abi::ERRNO_EMFILE
        }
    }
}

pub fn sys_close(fd: i32) -> i64 {
    if fd_close(current_task_id(), fd) { 0 } else { ERRNO_EBADF }
}

pub fn sys_read(fd: i32, buf_ptr: u64, len: u64) -> i64 {
    let table = current_task_id();
    let Some(node) = fd_node(table, fd) else {
        return ERRNO_EBADF;
    };
    let Ok(buf) = user_slice_mut(buf_ptr, len as usize) else {
        return ERRNO_EFAULT;
    };
    let offset = yula_fs::fileio::fd_offset(table, fd);
    let n = yula_fs::vfs::node_read(node, offset, buf);
    if n > 0 {
        yula_fs::fileio::fd_advance(table, fd, n as u32);
    }
    n
}

pub fn sys_write(fd: i32, buf_ptr: u64, len: u64) -> i64 {
    let table = current_task_id();
    let Some(node) = fd_node(table, fd) else {
        return ERRNO_EBADF;
    };
    let Ok(buf) = user_slice(buf_ptr, len as usize) else {
        return ERRNO_EFAULT;
    };
    let offset = yula_fs::fileio::fd_offset(table, fd);
    let n = yula_fs::vfs::node_write(node, offset, buf);
    if n > 0 {
        yula_fs::fileio::fd_advance(table, fd, n as u32);
    }
    n
}

pub fn sys_mkdir(path_ptr: u64) -> i64 {
    let Ok((path, len)) = copy_path(path_ptr) else {
        return ERRNO_EFAULT;
    };
    match ramfs::mkdir(current_cwd(), &path[..len]) {
        Ok(_) => 0,
        Err(()) => ERRNO_EINVAL,
    }
}

pub fn sys_unlink(path_ptr: u64) -> i64 {
    let Ok((path, len)) = copy_path(path_ptr) else {
        return ERRNO_EFAULT;
    };
    match ramfs::unlink(current_cwd(), &path[..len]) {
        Ok(()) => 0,
        Err(()) => ERRNO_ENOENT,
    }
}

pub fn sys_stat(path_ptr: u64, stat_ptr: u64) -> i64 {
    let Ok((path, len)) = copy_path(path_ptr) else {
        return ERRNO_EFAULT;
    };
    let Some(inode) = ramfs::resolve(current_cwd(), &path[..len]) else {
        return ERRNO_ENOENT;
    };
    let Some(stat) = ramfs::stat(inode) else {
        return ERRNO_ENOENT;
    };
    if user_write(stat_ptr, stat).is_err() {
        return ERRNO_EFAULT;
    }
    0
}

/// `fstatat(dirfd, name, buf)`: stat relative to an open directory fd.
pub fn sys_fstatat(dirfd: i32, name_ptr: u64, stat_ptr: u64) -> i64 {
    let Some(node) = fd_node(current_task_id(), dirfd) else {
        return ERRNO_EBADF;
    };
    let Some(NodePayload::Ramfs { inode: dir }) = node_payload(node) else {
        return ERRNO_ENOTDIR;
    };
    if !ramfs::is_directory(dir) {
        return ERRNO_ENOTDIR;
    }
    let Ok((name, len)) = copy_path(name_ptr) else {
        return ERRNO_EFAULT;
    };
    let Some(inode) = ramfs::resolve(dir, &name[..len]) else {
        return ERRNO_ENOENT;
    };
    let Some(stat) = ramfs::stat(inode) else {
        return ERRNO_ENOENT;
    };
    if user_write(stat_ptr, stat).is_err() {
        return ERRNO_EFAULT;
    }
    0
}

/// Directory reads: packs `Dirent` records, advancing the fd offset by
/// entries consumed.
pub fn sys_getdents(fd: i32, buf_ptr: u64, buf_len: u64) -> i64 {
    let table = current_task_id();
    let Some(node) = fd_node(table, fd) else {
        return ERRNO_EBADF;
    };
    let Some(NodePayload::Ramfs { inode }) = node_payload(node) else {
        return ERRNO_ENOTDIR;
    };

    let entry_size = core::mem::size_of::<Dirent>();
    let max_entries = (buf_len as usize / entry_size).min(32);
    if max_entries == 0 {
        return ERRNO_EINVAL;
    }
    let Ok(out) = user_slice_mut(buf_ptr, max_entries * entry_size) else {
        return ERRNO_EFAULT;
    };

    let mut entries = [Dirent::default(); 32];
    let index = yula_fs::fileio::fd_offset(table, fd) as usize;
    let produced = ramfs::readdir(inode, index, &mut entries[..max_entries]);

    for (i, entry) in entries[..produced].iter().enumerate() {
        // SAFETY: `out` spans max_entries records.
        unsafe {
            core::ptr::write_unaligned(out.as_mut_ptr().add(i * entry_size) as *mut Dirent, *entry);
        }
    }
    yula_fs::fileio::fd_advance(table, fd, produced as u32);
    (produced * entry_size) as i64
}

pub fn sys_pipe(fds_ptr: u64) -> i64 {
    let Some((read_node, write_node)) = yula_fs::named_ipc::vfs_create_pipe() else {
        return yula_abi::ERRNO_ENOMEM;
    };
    let table = current_task_id();
    let Some((rfd, wfd)) = yula_fs::fileio::fd_install_pair(table, read_node, write_node) else {
        node_unref(read_node);
        node_unref(write_node);
        return yula_abi::ERRNO_EMFILE;
    };
    let pair = [rfd, wfd];
    if user_write(fds_ptr, pair).is_err() {
        fd_close(table, rfd);
        fd_close(table, wfd);
        return ERRNO_EFAULT;
    }
    0
}

pub fn sys_dup2(old_fd: i32, new_fd: i32) -> i64 {
    fd_dup2(current_task_id(), old_fd, new_fd)
}

fn pipe_of(fd: i32) -> Option<(yula_fs::pipe::PipeId, yula_fs::pipe::PipeEnd)> {
    let node = fd_node(current_task_id(), fd)?;
    match node_payload(node)? {
        NodePayload::Pipe { pipe, end } => Some((pipe, end)),
        _ => None,
    }
}

pub fn sys_pipe_try_read(fd: i32, buf_ptr: u64, len: u64) -> i64 {
    let Some((pipe, yula_fs::pipe::PipeEnd::Read)) = pipe_of(fd) else {
        return ERRNO_EBADF;
    };
    let Ok(buf) = user_slice_mut(buf_ptr, len as usize) else {
        return ERRNO_EFAULT;
    };
    yula_fs::pipe::pipe_try_read(pipe, buf)
}

pub fn sys_pipe_try_write(fd: i32, buf_ptr: u64, len: u64) -> i64 {
    let Some((pipe, yula_fs::pipe::PipeEnd::Write)) = pipe_of(fd) else {
        return ERRNO_EBADF;
    };
    let Ok(buf) = user_slice(buf_ptr, len as usize) else {
        return ERRNO_EFAULT;
    };
    yula_fs::pipe::pipe_try_write(pipe, buf)
}

pub fn sys_chdir(path_ptr: u64) -> i64 {
    let Ok((path, len)) = copy_path(path_ptr) else {
        return ERRNO_EFAULT;
    };
    let Some(inode) = ramfs::resolve(current_cwd(), &path[..len]) else {
        return ERRNO_ENOENT;
    };
    if !ramfs::is_directory(inode) {
        return ERRNO_ENOTDIR;
    }
    let task = current_task();
    if task.is_null() {
        return ERRNO_EINVAL;
    }
    unsafe {
        (*task).cwd = inode;
    }
    0
}

/// Best-effort cwd path reconstruction (single component names).
pub fn sys_getcwd(buf_ptr: u64, len: u64) -> i64 {
    let Ok(out) = user_slice_mut(buf_ptr, len as usize) else {
        return ERRNO_EFAULT;
    };
    if out.is_empty() {
        return ERRNO_EINVAL;
    }
    let cwd = current_cwd();
    if cwd == ramfs::ROOT_INODE {
        out[0] = b'/';
        if out.len() > 1 {
            out[1] = 0;
        }
        return 1;
    }
    // Walk up to the root collecting components.
    let written = ramfs::path_of(cwd, out);
    written as i64
}

/// `ioctl` dispatch by subsystem letter. GPU and NIC letters are owned
/// by external drivers; only the TTY set is handled here.
pub fn sys_ioctl(fd: i32, req: u32, arg: u64) -> i64 {
    if fd_node(current_task_id(), fd).is_none() {
        return ERRNO_EBADF;
    }
    match ioc_type(req) {
        b'T' => match req {
            r if r == TTY_SET_MODE => {
                let Ok(mode) = user_read::<u32>(arg) else {
                    return ERRNO_EFAULT;
                };
                crate::services::tty::set_term_mode(mode)
            }
            r if r == TTY_GET_SESSION => {
                let task = current_task();
                if task.is_null() {
                    return ERRNO_EINVAL;
                }
                let session = unsafe { (*task).session };
                if user_write(arg, session).is_err() {
                    return ERRNO_EFAULT;
                }
                0
            }
            _ => ERRNO_EINVAL,
        },
        _ => ERRNO_EINVAL,
    }
}
