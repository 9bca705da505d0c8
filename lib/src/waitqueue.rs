//! Wait queue for blocking and waking kernel tasks.
//!
//! A fixed-capacity set of parked tasks, woken one at a time or all at
//! once. This is the building block under blocking pipe I/O, `accept`, and
//! `poll`. Tasks call [`WaitQueue::wait_event`] with a condition closure;
//! producers call [`WaitQueue::wake_one`]/[`WaitQueue::wake_all`] after
//! changing the condition.
//!
//! The condition is re-checked under the queue lock before parking and
//! again after every wakeup, so spurious wakeups are harmless and the
//! scheduler's pending-wakeup flag closes the park/wake race.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::IrqMutex;
use crate::clock;
use crate::kernel_services::task_runtime::{
    TaskHandle, block_current_task, current_task, is_task_runtime_registered, unblock_task,
};

const WAITQUEUE_CAPACITY: usize = 32;

const NULL_HANDLE: TaskHandle = core::ptr::null_mut();

struct WaitQueueInner {
    waiters: [TaskHandle; WAITQUEUE_CAPACITY],
    count: usize,
}

impl WaitQueueInner {
    const fn new() -> Self {
        Self { waiters: [NULL_HANDLE; WAITQUEUE_CAPACITY], count: 0 }
    }

    fn enqueue(&mut self, task: TaskHandle) -> bool {
        if task.is_null() {
            return false;
        }
        for slot in self.waiters.iter_mut() {
            if slot.is_null() {
                *slot = task;
                self.count += 1;
                return true;
            }
        }
        false
    }

    fn dequeue_one(&mut self) -> Option<TaskHandle> {
        for slot in self.waiters.iter_mut() {
            if !slot.is_null() {
                let task = *slot;
                *slot = NULL_HANDLE;
                self.count = self.count.saturating_sub(1);
                return Some(task);
            }
        }
        None
    }

    fn remove_task(&mut self, task: TaskHandle) -> bool {
        for slot in self.waiters.iter_mut() {
            if *slot == task {
                *slot = NULL_HANDLE;
                self.count = self.count.saturating_sub(1);
                return true;
            }
        }
        false
    }
}

// SAFETY: handles are scheduler-owned; access is under the IrqMutex.
unsafe impl Send for WaitQueueInner {}

pub struct WaitQueue {
    inner: IrqMutex<WaitQueueInner>,
    /// Bumped on every wake; diagnostic only.
    generation: AtomicU32,
}

unsafe impl Sync for WaitQueue {}
unsafe impl Send for WaitQueue {}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            inner: IrqMutex::new(WaitQueueInner::new()),
            generation: AtomicU32::new(0),
        }
    }

    /// Block until `condition()` holds. Returns false only when waiting is
    /// impossible (no runtime, queue full).
    pub fn wait_event<F: Fn() -> bool>(&self, condition: F) -> bool {
        loop {
            if condition() {
                return true;
            }

            if !is_task_runtime_registered() {
                return false;
            }

            let task = current_task();
            if task.is_null() {
                return false;
            }

            {
                let mut inner = self.inner.lock();
                if condition() {
                    return true;
                }
                if !inner.enqueue(task) {
                    return false;
                }
            }
            // A wake between here and the park is caught by the
            // scheduler's pending-wakeup flag.

            block_current_task();
        }
    }

    /// Like [`wait_event`](Self::wait_event) with a deadline. Returns false
    /// on timeout.
    pub fn wait_event_timeout<F: Fn() -> bool>(&self, condition: F, timeout_ms: u64) -> bool {
        if condition() {
            return true;
        }
        if !is_task_runtime_registered() {
            return false;
        }

        let deadline = clock::uptime_ms().saturating_add(timeout_ms);

        loop {
            if condition() {
                return true;
            }

            let task = current_task();
            if task.is_null() {
                return false;
            }

            if clock::uptime_ms() >= deadline {
                let mut inner = self.inner.lock();
                inner.remove_task(task);
                return condition();
            }

            {
                let mut inner = self.inner.lock();
                if condition() {
                    return true;
                }
                if !inner.enqueue(task) {
                    return false;
                }
            }

            block_current_task();
        }
    }

    pub fn wake_one(&self) -> bool {
        let task = {
            let mut inner = self.inner.lock();
            inner.dequeue_one()
        };

        match task {
            Some(task) => {
                self.generation.fetch_add(1, Ordering::Relaxed);
                let _ = unblock_task(task);
                true
            }
            None => false,
        }
    }

    pub fn wake_all(&self) -> usize {
        // Drain under the lock, unblock outside it.
        let mut tasks = [NULL_HANDLE; WAITQUEUE_CAPACITY];
        let count = {
            let mut inner = self.inner.lock();
            let mut n = 0;
            while let Some(task) = inner.dequeue_one() {
                tasks[n] = task;
                n += 1;
            }
            n
        };

        if count > 0 {
            self.generation.fetch_add(1, Ordering::Relaxed);
        }
        for task in &tasks[..count] {
            let _ = unblock_task(*task);
        }
        count
    }

    pub fn has_waiters(&self) -> bool {
        self.inner.lock().count != 0
    }

    /// Drop a task that exited while parked here.
    pub fn remove_task(&self, task: TaskHandle) {
        let mut inner = self.inner.lock();
        inner.remove_task(task);
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}
