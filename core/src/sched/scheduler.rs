//! The per-CPU scheduler core.
//!
//! Cooperative and preemptive entry points funnel into [`schedule`],
//! which picks the head of the highest non-empty priority class on the
//! current CPU (falling back to the idle task) and context-switches to
//! it. Blocking follows the check-register-block pattern; the
//! `pending_wakeup` flag on each task closes the window where a wake
//! lands between "decided to block" and "actually switched away".

use core::sync::atomic::{AtomicBool, Ordering};

use yula_abi::task::{BlockReason, Priority, TaskState};
use yula_lib::kernel_services::task_runtime::{TaskHandle, TaskRuntime, register_task_runtime};
use yula_lib::{clock, klog_info, preempt};

use super::runqueue::{CPU_SCHEDULERS, enqueue_task};
use super::switch::context_switch;
use super::task::{
    NO_TASK, Task, current_task, current_task_id, set_current_task_id, task_by_id, task_set_state,
};

const SCHED_DEFAULT_TIME_SLICE: u32 = 10;

static SCHEDULER_ENABLED: AtomicBool = AtomicBool::new(false);

pub fn scheduler_is_enabled() -> bool {
    SCHEDULER_ENABLED.load(Ordering::Acquire)
}

/// Pick the next runnable task for this CPU, or the idle task.
fn pick_next(cpu: usize) -> u32 {
    let mut sched = CPU_SCHEDULERS[cpu].lock();
    let id = sched.runqueue.pick();
    if id != NO_TASK { id } else { sched.idle_task }
}

/// Switch to the next runnable task. The current task must already be in
/// its post-switch state (Runnable tasks get requeued here, Waiting and
/// Zombie tasks do not).
pub fn schedule() {
    if !scheduler_is_enabled() {
        return;
    }

    let cpu = yula_lib::get_current_cpu();
    let current = current_task();

    // Requeue a still-running current at the tail of its class.
    if !current.is_null() {
        // SAFETY: `current` is this CPU's task; we own its scheduling
        // fields while it is Running.
        unsafe {
            if (*current).state == TaskState::Running {
                if task_set_state((*current).task_id, TaskState::Runnable) == 0 {
                    enqueue_task(current);
                }
            }
        }
    }

    // Skip stale queue entries whose task died since enqueue.
    let (next_id, next) = loop {
        let id = pick_next(cpu);
        if id == NO_TASK {
            // No idle task yet (early boot): nothing to switch to.
            return;
        }
        let task = task_by_id(id);
        if !task.is_null() {
            break (id, task);
        }
    };
    if next == current {
        if !current.is_null() {
            // Sole runnable task: take back the Running state.
            unsafe {
                let id = (*current).task_id;
                if (*current).state == TaskState::Runnable {
                    let mut sched = CPU_SCHEDULERS[cpu].lock();
                    sched.runqueue.remove(id);
                }
            }
            let _ = task_set_state(unsafe { (*current).task_id }, TaskState::Running);
        }
        return;
    }

    unsafe {
        let _ = task_set_state(next_id, TaskState::Running);
        (*next).cpu = cpu as u32;
        (*next).time_slice_remaining = SCHED_DEFAULT_TIME_SLICE;
        set_current_task_id(cpu, next_id);

        if current.is_null() {
            // Bootstrap: discard the boot context.
            let mut scratch = super::switch::SwitchContext::zero();
            context_switch(&mut scratch, &(*next).context);
        } else {
            context_switch(&mut (*current).context, &(*next).context);
        }
    }
    // Execution resumes here when this task is scheduled again.
}

pub fn yield_now() {
    schedule();
}

/// Park the current task. A wake that raced in since the caller decided
/// to block is honored by skipping the park entirely.
pub fn block_current_task() {
    let current = current_task();
    if current.is_null() || !scheduler_is_enabled() {
        return;
    }

    unsafe {
        if (*current).pending_wakeup.swap(false, Ordering::AcqRel) {
            return;
        }
        let id = (*current).task_id;
        if task_set_state(id, TaskState::Waiting) != 0 {
            return;
        }
        // Re-check after publishing Waiting: the waker may have seen
        // Running and set the flag instead of unblocking.
        if (*current).pending_wakeup.swap(false, Ordering::AcqRel) {
            let _ = task_set_state(id, TaskState::Runnable);
            enqueue_task(current);
        }
    }
    schedule();
}

/// Make a parked task runnable. Safe against the block race: a task not
/// yet Waiting gets its `pending_wakeup` flag set instead.
pub fn unblock_task(task: *mut Task) -> i32 {
    if task.is_null() {
        return -1;
    }
    unsafe {
        let id = (*task).task_id;
        match (*task).state {
            TaskState::Waiting => {
                if task_set_state(id, TaskState::Runnable) == 0 {
                    (*task).block_reason = BlockReason::None;
                    enqueue_task(task);
                    0
                } else {
                    -1
                }
            }
            TaskState::Running | TaskState::Runnable => {
                (*task).pending_wakeup.store(true, Ordering::Release);
                0
            }
            TaskState::Zombie | TaskState::Unused => -1,
        }
    }
}

/// Timer-interrupt hook: advances the clock, drains due sleepers, and
/// preempts the current task when its quantum runs out.
pub fn scheduler_timer_tick() {
    let now = clock::timer_tick();
    if !scheduler_is_enabled() {
        return;
    }

    super::sleep::wake_due_sleepers(now);

    if preempt::is_preemption_disabled() {
        return;
    }

    let current = current_task();
    if current.is_null() {
        return;
    }
    // SAFETY: current CPU's task.
    unsafe {
        if (*current).priority == Priority::Idle {
            // The idle task is preempted the moment anything is runnable.
            let cpu = yula_lib::get_current_cpu();
            let ready = CPU_SCHEDULERS[cpu].lock().runqueue.ready_count();
            if ready > 0 {
                schedule();
            }
            return;
        }
        if (*current).time_slice_remaining > 0 {
            (*current).time_slice_remaining -= 1;
        }
        if (*current).time_slice_remaining == 0 {
            schedule();
        }
    }
}

// --- task_runtime service glue ---

fn rt_current_task() -> TaskHandle {
    current_task() as TaskHandle
}

fn rt_current_task_id() -> u32 {
    current_task_id()
}

fn rt_block_current_task() {
    block_current_task();
}

fn rt_unblock_task(task: TaskHandle) -> i32 {
    unblock_task(task as *mut Task)
}

fn rt_yield_now() {
    yield_now();
}

fn rt_process_alive(pid: u32) -> bool {
    let task = task_by_id(pid);
    if task.is_null() {
        return false;
    }
    unsafe { (*task).state != TaskState::Zombie }
}

static TASK_RUNTIME_TABLE: TaskRuntime = TaskRuntime {
    current_task: rt_current_task,
    current_task_id: rt_current_task_id,
    block_current_task: rt_block_current_task,
    unblock_task: rt_unblock_task,
    yield_now: rt_yield_now,
    process_alive: rt_process_alive,
};

/// Wire the scheduler into the `task_runtime` seam and create the idle
/// task for the boot CPU. Call once, before `enter_scheduler`.
static SCHED_INIT: yula_lib::InitFlag = yula_lib::InitFlag::new();

pub fn scheduler_init() {
    if !SCHED_INIT.try_set() {
        return;
    }
    register_task_runtime(&TASK_RUNTIME_TABLE);
    crate::services::tty::tty_init();
    super::lifecycle::create_idle_task(0);
    super::lifecycle::reaper_init();
    SCHEDULER_ENABLED.store(true, Ordering::Release);
    klog_info!("sched: ready, time slice {} ticks", SCHED_DEFAULT_TIME_SLICE);
}

/// Hand the boot CPU over to the scheduler. Does not return.
pub fn enter_scheduler() -> ! {
    loop {
        schedule();
        // Back here only while nothing is runnable at all.
        yula_lib::cpu::halt();
    }
}
