//! Syscall dispatch.
//!
//! Handlers take up to three integer arguments and return `i64`:
//! non-negative on success, a negated errno on failure. Userland
//! wrappers flatten failures to -1 and keep the errno out-of-band.
//! Every return passes through the signal delivery point.

mod fs_calls;
mod ipc_calls;
mod mem_calls;
mod proc_calls;
mod ui_calls;

use yula_abi::ERRNO_ENOSYS;
use yula_abi::syscall::*;

use crate::sched::signal::deliver_pending;

pub fn dispatch(num: u64, a1: u64, a2: u64, a3: u64) -> i64 {
    let result = match num {
        SYS_YIELD => {
            crate::sched::scheduler::yield_now();
            0
        }
        SYS_EXIT => crate::sched::lifecycle::exit_current(a1 as i32),
        SYS_GETPID => proc_calls::sys_getpid(),
        SYS_GETPPID => proc_calls::sys_getppid(),
        SYS_READ => fs_calls::sys_read(a1 as i32, a2, a3),
        SYS_WRITE => fs_calls::sys_write(a1 as i32, a2, a3),
        SYS_OPEN => fs_calls::sys_open(a1, a2),
        SYS_CLOSE => fs_calls::sys_close(a1 as i32),
        SYS_SLEEP_MS => proc_calls::sys_sleep_ms(a1),
        SYS_USLEEP => proc_calls::sys_usleep(a1),
        SYS_SBRK => mem_calls::sys_sbrk(a1 as i64),
        SYS_KILL => proc_calls::sys_kill(a1 as u32, a2 as u8),
        SYS_MEM_INFO => mem_calls::sys_mem_info(a1, a2),
        SYS_MKDIR => fs_calls::sys_mkdir(a1),
        SYS_UNLINK => fs_calls::sys_unlink(a1),
        SYS_SIGNAL => proc_calls::sys_signal(a1 as u8, a2),
        SYS_SIGRETURN => crate::sched::signal::sigreturn(),
        SYS_CLIPBOARD_COPY => proc_calls::sys_clipboard_copy(a1, a2),
        SYS_CLIPBOARD_PASTE => proc_calls::sys_clipboard_paste(a1, a2),
        SYS_SET_TERM_MODE => crate::services::tty::set_term_mode(a1 as u32),
        SYS_PIPE => fs_calls::sys_pipe(a1),
        SYS_DUP2 => fs_calls::sys_dup2(a1 as i32, a2 as i32),
        SYS_MMAP => mem_calls::sys_mmap(a1 as i32, a2, a3),
        SYS_MUNMAP => mem_calls::sys_munmap(a1, a2),
        SYS_STAT => fs_calls::sys_stat(a1, a2),
        SYS_SPAWN_PROCESS => proc_calls::sys_spawn_process(a1, a2 as u32, a3),
        SYS_WAITPID => proc_calls::sys_waitpid(a1 as i32, a2),
        SYS_GETDENTS => fs_calls::sys_getdents(a1 as i32, a2, a3),
        SYS_FSTATAT => fs_calls::sys_fstatat(a1 as i32, a2, a3),
        SYS_MAP_FRAMEBUFFER => ui_calls::sys_map_framebuffer(a1),
        SYS_FB_ACQUIRE => ui_calls::sys_fb_acquire(),
        SYS_FB_RELEASE => ui_calls::sys_fb_release(),
        SYS_FB_PRESENT => ui_calls::sys_fb_present(a1),
        SYS_SHM_CREATE => mem_calls::sys_shm_create(a1),
        SYS_PIPE_TRY_READ => fs_calls::sys_pipe_try_read(a1 as i32, a2, a3),
        SYS_PIPE_TRY_WRITE => fs_calls::sys_pipe_try_write(a1 as i32, a2, a3),
        SYS_KBD_TRY_READ => crate::services::tty::kbd_try_read(),
        SYS_IPC_LISTEN => ipc_calls::sys_ipc_listen(a1),
        SYS_IPC_ACCEPT => ipc_calls::sys_ipc_accept(a1 as i32, a2),
        SYS_IPC_CONNECT => ipc_calls::sys_ipc_connect(a1, a2),
        SYS_SHM_CREATE_NAMED => mem_calls::sys_shm_create_named(a1, a2),
        SYS_SHM_OPEN_NAMED => mem_calls::sys_shm_open_named(a1),
        SYS_SHM_UNLINK_NAMED => mem_calls::sys_shm_unlink_named(a1),
        SYS_FUTEX_WAIT => ipc_calls::sys_futex_wait(a1, a2 as u32),
        SYS_FUTEX_WAKE => ipc_calls::sys_futex_wake(a1, a2 as u32),
        SYS_POLL => ipc_calls::sys_poll(a1, a2 as u32, a3 as i32),
        SYS_IOCTL => fs_calls::sys_ioctl(a1 as i32, a2 as u32, a3),
        SYS_CHDIR => fs_calls::sys_chdir(a1),
        SYS_GETCWD => fs_calls::sys_getcwd(a1, a2),
        SYS_UPTIME_MS => yula_lib::clock::uptime_ms() as i64,
        SYS_PROC_LIST => proc_calls::sys_proc_list(a1, a2),
        SYS_SETSID => proc_calls::sys_setsid(),
        SYS_SETPGID => proc_calls::sys_setpgid(a1 as u32, a2 as u32),
        SYS_GETPGRP => proc_calls::sys_getpgrp(),
        _ => ERRNO_ENOSYS,
    };

    deliver_pending();
    result
}
