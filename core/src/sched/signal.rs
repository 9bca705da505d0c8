//! Signal delivery.
//!
//! A signal sets a bit in the target's pending mask and kicks the task
//! out of interruptible waits. Pending signals are consumed at the
//! delivery points every task passes through: syscall return and wakeup
//! from an interruptible block. A caught signal runs its registered
//! handler in the task's own context; `sigreturn` marks the handler's
//! completion. SIGKILL (and uncaught fatal signals) terminate at the
//! next delivery point. SIGINT against a task parked in keyboard read
//! surfaces as `-EINTR` from the syscall.

use yula_abi::signal::{
    NSIG, SIG_DFL, SIG_IGN, SIGCHLD, SIGCONT, SIGKILL, SigSet, sig_bit, sig_valid,
};
use yula_abi::task::{BlockReason, TaskState};
use yula_abi::{ERRNO_EINVAL, ERRNO_EPERM};
use yula_lib::klog_debug;

use super::lifecycle::{cancel_all_waits, exit_current};
use super::task::{Task, current_task, for_each_task, task_by_id};

/// Register a handler. Returns the previous handler value.
pub fn signal_register(signum: u8, handler: u64) -> i64 {
    if !sig_valid(signum) || signum == SIGKILL {
        return ERRNO_EINVAL;
    }
    let task = current_task();
    if task.is_null() {
        return ERRNO_EPERM;
    }
    // SAFETY: own task.
    unsafe {
        let slot = &mut (*task).signal_handlers[(signum - 1) as usize];
        let old = *slot;
        *slot = handler;
        old as i64
    }
}

fn post_signal(task: *mut Task, signum: u8) {
    // SAFETY: pending mask edits race only with the task itself; a lost
    // re-read is recovered at the next delivery point.
    unsafe {
        (*task).pending_signals |= sig_bit(signum);
    }

    if signum == SIGKILL {
        cancel_all_waits(task);
        return;
    }

    // Interrupt interruptible waits so the signal is seen promptly.
    unsafe {
        if (*task).state == TaskState::Waiting {
            let interruptible = matches!(
                (*task).block_reason,
                BlockReason::KeyboardWait | BlockReason::Sleep | BlockReason::ChildWait
            );
            if interruptible {
                let _ = super::scheduler::unblock_task(task);
            }
        }
    }
}

/// `kill(pid, sig)`. `pid == 0` signals the caller's process group.
pub fn kill(pid: u32, signum: u8) -> i64 {
    if !sig_valid(signum) {
        return ERRNO_EINVAL;
    }

    if pid == 0 {
        let current = current_task();
        if current.is_null() {
            return ERRNO_EPERM;
        }
        let pgid = unsafe { (*current).pgid };
        // Collect ids first; for_each_task hands out shared refs.
        let mut targets = [0u32; yula_abi::task::MAX_TASKS];
        let mut n = 0;
        for_each_task(|task| {
            if task.pgid == pgid && task.state != TaskState::Zombie {
                targets[n] = task.task_id;
                n += 1;
            }
        });
        for &id in &targets[..n] {
            let task = task_by_id(id);
            if !task.is_null() {
                post_signal(task, signum);
            }
        }
        return if n > 0 { 0 } else { yula_abi::ERRNO_ENOENT };
    }

    let task = task_by_id(pid);
    if task.is_null() {
        return yula_abi::ERRNO_ENOENT;
    }
    if signum == 0 {
        return 0; // existence probe
    }
    post_signal(task, signum);
    0
}

/// True if the current task has SIGINT (or SIGKILL) pending. Used by
/// interruptible waits to turn into `-EINTR`.
pub fn current_has_interrupt() -> bool {
    let task = current_task();
    if task.is_null() {
        return false;
    }
    let pending = unsafe { (*task).pending_signals };
    pending & (sig_bit(yula_abi::signal::SIGINT) | sig_bit(SIGKILL)) != 0
}

/// Deliver one pending signal for the current task, if any. Called from
/// the syscall return path. A default-fatal signal does not return.
pub fn deliver_pending() {
    let task = current_task();
    if task.is_null() {
        return;
    }

    let (pending, handlers) = unsafe { ((*task).pending_signals, (*task).signal_handlers) };
    if pending == 0 {
        return;
    }

    for signum in 1..=NSIG as u8 {
        if pending & sig_bit(signum) == 0 {
            continue;
        }
        // Consume the bit before acting.
        unsafe {
            (*task).pending_signals &= !sig_bit(signum);
        }

        let handler = handlers[(signum - 1) as usize];
        if signum == SIGKILL {
            exit_current(128 + signum as i32);
        }
        match handler {
            SIG_DFL => match signum {
                SIGCHLD | SIGCONT => {}
                _ => {
                    klog_debug!("signal {}: default action, terminating", signum);
                    exit_current(128 + signum as i32);
                }
            },
            SIG_IGN => {}
            _ => {
                // Run the registered thunk in the task's own context.
                // SAFETY: the handler address was registered by this
                // task; the ABI is a plain extern "C" fn(u32).
                let thunk: extern "C" fn(u32) = unsafe { core::mem::transmute(handler as usize) };
                thunk(signum as u32);
            }
        }
        // One signal per delivery point.
        break;
    }
}

/// `sigreturn`: with handlers running as direct calls the kernel context
/// is already intact; this is the contractual completion marker.
pub fn sigreturn() -> i64 {
    0
}

/// Clear pending signals matching `mask` on the current task.
pub fn discard_pending(mask: SigSet) {
    let task = current_task();
    if !task.is_null() {
        unsafe {
            (*task).pending_signals &= !mask;
        }
    }
}
