//! Scheduler seam for the blocking primitives in this crate.
//!
//! `Semaphore` and `WaitQueue` need to park and wake tasks but must not
//! depend on `yula-core`. The scheduler registers this table during boot;
//! until then the fallbacks make every "block" a no-op so early-boot code
//! that tickles a semaphore cannot wedge the machine.

use core::ffi::c_void;

use crate::ServiceCell;

/// Opaque task handle owned by the scheduler.
pub type TaskHandle = *mut c_void;

pub struct TaskRuntime {
    pub current_task: fn() -> TaskHandle,
    pub current_task_id: fn() -> u32,
    /// Park the calling task. Honors a pending-wakeup flag set by
    /// `unblock_task`, so a wake that races the park is not lost.
    pub block_current_task: fn(),
    pub unblock_task: fn(task: TaskHandle) -> i32,
    pub yield_now: fn(),
    /// True while `pid` names a live (non-zombie) task. Used by IPC
    /// accept to skip connections whose client died in the queue.
    pub process_alive: fn(pid: u32) -> bool,
}

fn null_task() -> TaskHandle {
    core::ptr::null_mut()
}

fn no_task_id() -> u32 {
    yula_abi::task::INVALID_TASK_ID
}

fn nop() {}

fn nop_unblock(_task: TaskHandle) -> i32 {
    -1
}

fn nobody_alive(_pid: u32) -> bool {
    false
}

static FALLBACK: TaskRuntime = TaskRuntime {
    current_task: null_task,
    current_task_id: no_task_id,
    block_current_task: nop,
    unblock_task: nop_unblock,
    yield_now: nop,
    process_alive: nobody_alive,
};

static TASK_RUNTIME: ServiceCell<TaskRuntime> = ServiceCell::new(&FALLBACK);

pub fn register_task_runtime(table: &'static TaskRuntime) {
    TASK_RUNTIME.register(table);
}

pub fn is_task_runtime_registered() -> bool {
    TASK_RUNTIME.is_registered()
}

#[inline]
pub fn current_task() -> TaskHandle {
    (TASK_RUNTIME.get().current_task)()
}

#[inline]
pub fn current_task_id() -> u32 {
    (TASK_RUNTIME.get().current_task_id)()
}

#[inline]
pub fn block_current_task() {
    (TASK_RUNTIME.get().block_current_task)()
}

#[inline]
pub fn unblock_task(task: TaskHandle) -> i32 {
    (TASK_RUNTIME.get().unblock_task)(task)
}

#[inline]
pub fn yield_now() {
    (TASK_RUNTIME.get().yield_now)()
}

#[inline]
pub fn process_alive(pid: u32) -> bool {
    (TASK_RUNTIME.get().process_alive)(pid)
}
