//! The sleep queue.
//!
//! A fixed table of `(task, wake_tick)` entries drained by the timer
//! tick. Wake comparisons are wrap-safe on the free-running tick
//! counter; sleeps always round up, so a task never wakes early.

use yula_abi::task::{BlockReason, INVALID_TASK_ID, MAX_TASKS, TaskState};
use yula_lib::{IrqMutex, clock};

use super::scheduler::{block_current_task, unblock_task};
use super::task::{current_task, task_by_id};

#[derive(Clone, Copy)]
struct SleepEntry {
    task_id: u32,
    wake_tick: u64,
    active: bool,
}

impl SleepEntry {
    const fn empty() -> Self {
        Self { task_id: INVALID_TASK_ID, wake_tick: 0, active: false }
    }
}

static SLEEP_QUEUE: IrqMutex<[SleepEntry; MAX_TASKS]> =
    IrqMutex::new([const { SleepEntry::empty() }; MAX_TASKS]);

fn sleep_enqueue(task_id: u32, wake_tick: u64) -> bool {
    let mut queue = SLEEP_QUEUE.lock();
    let mut free_idx = None;
    for (idx, entry) in queue.iter_mut().enumerate() {
        if entry.active && entry.task_id == task_id {
            entry.wake_tick = wake_tick;
            return true;
        }
        if !entry.active && free_idx.is_none() {
            free_idx = Some(idx);
        }
    }
    match free_idx {
        Some(idx) => {
            queue[idx] = SleepEntry { task_id, wake_tick, active: true };
            true
        }
        None => false,
    }
}

/// Drop a task from the queue (kill while sleeping).
pub fn cancel_sleep(task_id: u32) {
    let mut queue = SLEEP_QUEUE.lock();
    for entry in queue.iter_mut() {
        if entry.active && entry.task_id == task_id {
            *entry = SleepEntry::empty();
            break;
        }
    }
}

/// Timer path: move every due sleeper back to Runnable.
pub fn wake_due_sleepers(now_tick: u64) {
    let mut due = [INVALID_TASK_ID; MAX_TASKS];
    let count = {
        let mut queue = SLEEP_QUEUE.lock();
        let mut count = 0;
        for entry in queue.iter_mut() {
            if entry.active && clock::tick_reached(now_tick, entry.wake_tick) {
                due[count] = entry.task_id;
                count += 1;
                *entry = SleepEntry::empty();
            }
        }
        count
    };

    for &task_id in &due[..count] {
        let task = task_by_id(task_id);
        if task.is_null() {
            continue;
        }
        // Only sleep-blocked tasks are woken here; anything else left
        // the sleep behind (e.g. was killed and re-used).
        let sleeping = unsafe {
            (*task).state == TaskState::Waiting && (*task).block_reason == BlockReason::Sleep
        };
        if sleeping {
            let _ = unblock_task(task);
        }
    }
}

fn sleep_current_ticks(ticks: u64) {
    let task = current_task();
    if task.is_null() {
        return;
    }
    let deadline = clock::now_ticks().wrapping_add(ticks);
    let task_id = unsafe { (*task).task_id };

    loop {
        if clock::tick_reached(clock::now_ticks(), deadline) {
            return;
        }
        if !sleep_enqueue(task_id, deadline) {
            // Queue full: busy-yield until the deadline.
            super::scheduler::yield_now();
            continue;
        }
        unsafe {
            (*task).wake_tick = deadline;
            (*task).block_reason = BlockReason::Sleep;
        }
        block_current_task();
        // A signal may have cut the sleep short; fatal ones act here.
        super::signal::deliver_pending();
        if super::signal::current_has_interrupt() {
            cancel_sleep(task_id);
            return;
        }
        // Spurious wakeups loop back and re-arm.
    }
}

/// Sleep at least `ms` milliseconds.
pub fn sleep_current_ms(ms: u64) {
    sleep_current_ticks(clock::ms_to_ticks(ms));
}

/// Sleep at least `us` microseconds (tick granularity floor).
pub fn sleep_current_us(us: u64) {
    sleep_current_ticks(clock::us_to_ticks(us));
}
