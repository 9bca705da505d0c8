//! Process, signal, clipboard, and introspection syscalls.

use yula_abi::task::{INVALID_TASK_ID, MAX_TASKS, ProcInfo};
use yula_abi::{ERRNO_EFAULT, ERRNO_EINVAL, ERRNO_ENOENT, ERRNO_EPERM};
use yula_mm::user_copy::{user_cstr, user_slice, user_slice_mut, user_write};

use crate::sched::lifecycle::{spawn_process, waitpid};
use crate::sched::signal;
use crate::sched::sleep::{sleep_current_ms, sleep_current_us};
use crate::sched::task::{current_task, current_task_id, for_each_task, task_by_id};
use crate::services::clipboard;

pub fn sys_getpid() -> i64 {
    current_task_id() as i64
}

pub fn sys_getppid() -> i64 {
    let task = current_task();
    if task.is_null() {
        return ERRNO_EPERM;
    }
    unsafe { (*task).parent_pid as i64 }
}

pub fn sys_sleep_ms(ms: u64) -> i64 {
    sleep_current_ms(ms);
    0
}

pub fn sys_usleep(us: u64) -> i64 {
    sleep_current_us(us);
    0
}

pub fn sys_kill(pid: u32, signum: u8) -> i64 {
    signal::kill(pid, signum)
}

pub fn sys_signal(signum: u8, handler: u64) -> i64 {
    signal::signal_register(signum, handler)
}

pub fn sys_spawn_process(path_ptr: u64, argc: u32, argv: u64) -> i64 {
    let mut path = [0u8; 128];
    let len = match user_cstr(path_ptr, &mut path, 127) {
        Ok(len) => len,
        Err(_) => return ERRNO_EFAULT,
    };
    spawn_process(&path[..len], argc, argv)
}

pub fn sys_waitpid(pid: i32, status_ptr: u64) -> i64 {
    let mut status = 0i32;
    let result = waitpid(pid, &mut status);
    if result >= 0 && status_ptr != 0 && user_write(status_ptr, status).is_err() {
        return ERRNO_EFAULT;
    }
    result
}

pub fn sys_clipboard_copy(ptr: u64, len: u64) -> i64 {
    match user_slice(ptr, len as usize) {
        Ok(src) => clipboard::copy(src),
        Err(_) => ERRNO_EFAULT,
    }
}

pub fn sys_clipboard_paste(ptr: u64, len: u64) -> i64 {
    match user_slice_mut(ptr, len as usize) {
        Ok(dst) => clipboard::paste(dst),
        Err(_) => ERRNO_EFAULT,
    }
}

/// Fill the caller's buffer with one `ProcInfo` per live task.
pub fn sys_proc_list(buf_ptr: u64, cap: u64) -> i64 {
    let cap = (cap as usize).min(MAX_TASKS);
    if cap == 0 {
        return ERRNO_EINVAL;
    }
    let bytes = cap * core::mem::size_of::<ProcInfo>();
    let Ok(out) = user_slice_mut(buf_ptr, bytes) else {
        return ERRNO_EFAULT;
    };

    let mut count = 0usize;
    for_each_task(|task| {
        if count >= cap {
            return;
        }
        let info = ProcInfo {
            pid: task.task_id,
            parent_pid: task.parent_pid,
            state: task.state.as_u8(),
            priority: task.priority as u8,
            _pad: 0,
            cpu: task.cpu,
            name: task.name,
        };
        let off = count * core::mem::size_of::<ProcInfo>();
        // SAFETY: `out` spans `cap` ProcInfo records.
        unsafe {
            core::ptr::write_unaligned(out.as_mut_ptr().add(off) as *mut ProcInfo, info);
        }
        count += 1;
    });
    count as i64
}

pub fn sys_setsid() -> i64 {
    let task = current_task();
    if task.is_null() {
        return ERRNO_EPERM;
    }
    unsafe {
        let pid = (*task).task_id;
        (*task).session = pid;
        (*task).pgid = pid;
        // A new session starts with no controlling TTY.
        (*task).ctty = 0;
        pid as i64
    }
}

pub fn sys_setpgid(pid: u32, pgid: u32) -> i64 {
    let target = if pid == 0 {
        current_task()
    } else {
        task_by_id(pid)
    };
    if target.is_null() {
        return ERRNO_ENOENT;
    }
    unsafe {
        let pgid = if pgid == 0 { (*target).task_id } else { pgid };
        if pgid == INVALID_TASK_ID {
            return ERRNO_EINVAL;
        }
        (*target).pgid = pgid;
    }
    0
}

pub fn sys_getpgrp() -> i64 {
    let task = current_task();
    if task.is_null() {
        return ERRNO_EPERM;
    }
    unsafe { (*task).pgid as i64 }
}
