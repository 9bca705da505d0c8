//! Counting semaphore with a FIFO waiter list.
//!
//! The classic signed-count formulation: `wait` decrements and a negative
//! result means "go to sleep"; `signal` increments and a non-positive
//! result means "someone is sleeping, wake the head". Waiters are stored
//! in arrival order, so wakeups are fair.
//!
//! Parking goes through the `task_runtime` service. The scheduler's
//! pending-wakeup flag covers the window between dropping the semaphore
//! lock and actually blocking, so a `signal` racing into that window is
//! not lost.

use crate::IrqMutex;
use crate::kernel_services::task_runtime::{
    TaskHandle, block_current_task, current_task, is_task_runtime_registered, unblock_task,
};

const SEM_MAX_WAITERS: usize = 32;

struct SemInner {
    count: i32,
    waiters: [TaskHandle; SEM_MAX_WAITERS],
    head: usize,
    len: usize,
}

// SAFETY: TaskHandle values are scheduler-owned pointers only ever touched
// under the IrqMutex.
unsafe impl Send for SemInner {}

impl SemInner {
    const fn new(count: i32) -> Self {
        Self {
            count,
            waiters: [core::ptr::null_mut(); SEM_MAX_WAITERS],
            head: 0,
            len: 0,
        }
    }

    fn enqueue(&mut self, task: TaskHandle) -> bool {
        if self.len >= SEM_MAX_WAITERS {
            return false;
        }
        let slot = (self.head + self.len) % SEM_MAX_WAITERS;
        self.waiters[slot] = task;
        self.len += 1;
        true
    }

    fn dequeue(&mut self) -> Option<TaskHandle> {
        if self.len == 0 {
            return None;
        }
        let task = self.waiters[self.head];
        self.waiters[self.head] = core::ptr::null_mut();
        self.head = (self.head + 1) % SEM_MAX_WAITERS;
        self.len -= 1;
        Some(task)
    }

    fn remove(&mut self, task: TaskHandle) -> bool {
        for i in 0..self.len {
            let slot = (self.head + i) % SEM_MAX_WAITERS;
            if self.waiters[slot] == task {
                // Shift the tail of the queue down one position.
                for j in i..self.len - 1 {
                    let from = (self.head + j + 1) % SEM_MAX_WAITERS;
                    let to = (self.head + j) % SEM_MAX_WAITERS;
                    self.waiters[to] = self.waiters[from];
                }
                let last = (self.head + self.len - 1) % SEM_MAX_WAITERS;
                self.waiters[last] = core::ptr::null_mut();
                self.len -= 1;
                return true;
            }
        }
        false
    }
}

pub struct Semaphore {
    inner: IrqMutex<SemInner>,
}

impl Semaphore {
    pub const fn new(count: i32) -> Self {
        Self { inner: IrqMutex::new(SemInner::new(count)) }
    }

    /// Decrement; blocks while the pre-decrement count was zero or below.
    ///
    /// Spurious wakeups are possible; callers guarding a condition must
    /// re-check it after `wait` returns. Returns false if the waiter list
    /// was full or no runtime is registered (caller treats as EAGAIN).
    pub fn wait(&self) -> bool {
        loop {
            let enqueued = {
                let mut inner = self.inner.lock();
                inner.count -= 1;
                if inner.count >= 0 {
                    return true;
                }
                if !is_task_runtime_registered() {
                    inner.count += 1;
                    return false;
                }
                let task = current_task();
                if task.is_null() || !inner.enqueue(task) {
                    inner.count += 1;
                    return false;
                }
                true
            };

            if enqueued {
                block_current_task();
                return true;
            }
        }
    }

    /// Take the semaphore only if it is currently positive.
    pub fn try_wait(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.count > 0 {
            inner.count -= 1;
            true
        } else {
            false
        }
    }

    /// Increment; wakes the longest-waiting task if any were blocked.
    pub fn signal(&self) {
        let task = {
            let mut inner = self.inner.lock();
            inner.count += 1;
            if inner.count <= 0 { inner.dequeue() } else { None }
        };

        if let Some(task) = task {
            let _ = unblock_task(task);
        }
    }

    /// Wake every blocked waiter without changing the count beyond the
    /// compensation for their aborted waits. Used when the protected
    /// object is being torn down (pipe end closed).
    pub fn wake_all(&self) {
        loop {
            let task = {
                let mut inner = self.inner.lock();
                match inner.dequeue() {
                    Some(t) => {
                        inner.count += 1;
                        Some(t)
                    }
                    None => None,
                }
            };
            match task {
                Some(t) => {
                    let _ = unblock_task(t);
                }
                None => break,
            }
        }
    }

    /// Drop a task from the waiter list (task exit while blocked).
    pub fn cancel_wait(&self, task: TaskHandle) {
        let mut inner = self.inner.lock();
        if inner.remove(task) {
            inner.count += 1;
        }
    }

    pub fn count(&self) -> i32 {
        self.inner.lock().count
    }
}
