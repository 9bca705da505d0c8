//! Per-CPU run queues.
//!
//! Five fixed priority classes, each a FIFO of task ids threaded through
//! the tasks' intrusive `next_ready` links. The scheduler always runs
//! the head of the highest non-empty class; the idle task never sits on
//! a queue, and is instead the fallback when every class is empty.

use yula_abi::task::{NUM_PRIORITY_CLASSES, Priority};
use yula_lib::{IrqMutex, MAX_CPUS};

use super::task::{NO_TASK, Task, task_slot};

#[derive(Clone, Copy)]
struct ClassQueue {
    head: u32,
    tail: u32,
    count: u32,
}

impl ClassQueue {
    const fn new() -> Self {
        Self { head: NO_TASK, tail: NO_TASK, count: 0 }
    }
}

pub struct RunQueue {
    classes: [ClassQueue; NUM_PRIORITY_CLASSES],
    total: u32,
}

impl RunQueue {
    pub const fn new() -> Self {
        Self {
            classes: [const { ClassQueue::new() }; NUM_PRIORITY_CLASSES],
            total: 0,
        }
    }

    fn link(&mut self, class: usize, id: u32) {
        let queue = &mut self.classes[class];
        let Some(task) = task_slot(id) else {
            return;
        };
        // SAFETY: runqueue lock held by the caller; next_ready is only
        // touched under it.
        unsafe {
            (*task).next_ready = NO_TASK;
        }
        if queue.head == NO_TASK {
            queue.head = id;
            queue.tail = id;
        } else if let Some(tail) = task_slot(queue.tail) {
            unsafe {
                (*tail).next_ready = id;
            }
            queue.tail = id;
        }
        queue.count += 1;
        self.total += 1;
    }

    fn contains(&self, class: usize, id: u32) -> bool {
        let mut cursor = self.classes[class].head;
        while cursor != NO_TASK {
            if cursor == id {
                return true;
            }
            cursor = match task_slot(cursor) {
                Some(t) => unsafe { (*t).next_ready },
                None => NO_TASK,
            };
        }
        false
    }

    /// Enqueue at the tail of the task's class. Re-enqueueing a queued
    /// task is a no-op.
    pub fn enqueue(&mut self, id: u32, priority: Priority) {
        let class = priority.as_usize();
        if class >= NUM_PRIORITY_CLASSES || self.contains(class, id) {
            return;
        }
        self.link(class, id);
    }

    /// Pop the head of the highest non-empty class (Idle-class tasks are
    /// only returned when nothing else is runnable).
    pub fn pick(&mut self) -> u32 {
        for class in (0..NUM_PRIORITY_CLASSES).rev() {
            let id = self.classes[class].head;
            if id == NO_TASK {
                continue;
            }
            let queue = &mut self.classes[class];
            let next = match task_slot(id) {
                Some(t) => unsafe {
                    let next = (*t).next_ready;
                    (*t).next_ready = NO_TASK;
                    next
                },
                None => NO_TASK,
            };
            queue.head = next;
            if next == NO_TASK {
                queue.tail = NO_TASK;
            }
            queue.count = queue.count.saturating_sub(1);
            self.total = self.total.saturating_sub(1);
            return id;
        }
        NO_TASK
    }

    /// Unlink a task from whichever class queue holds it.
    pub fn remove(&mut self, id: u32) -> bool {
        for class in 0..NUM_PRIORITY_CLASSES {
            let queue = &mut self.classes[class];
            let mut prev = NO_TASK;
            let mut cursor = queue.head;
            while cursor != NO_TASK {
                let next = match task_slot(cursor) {
                    Some(t) => unsafe { (*t).next_ready },
                    None => NO_TASK,
                };
                if cursor == id {
                    if prev == NO_TASK {
                        queue.head = next;
                    } else if let Some(p) = task_slot(prev) {
                        unsafe {
                            (*p).next_ready = next;
                        }
                    }
                    if queue.tail == cursor {
                        queue.tail = prev;
                    }
                    if let Some(t) = task_slot(cursor) {
                        unsafe {
                            (*t).next_ready = NO_TASK;
                        }
                    }
                    queue.count = queue.count.saturating_sub(1);
                    self.total = self.total.saturating_sub(1);
                    return true;
                }
                prev = cursor;
                cursor = next;
            }
        }
        false
    }

    pub fn ready_count(&self) -> u32 {
        self.total
    }

    pub fn class_count(&self, class: usize) -> u32 {
        if class < NUM_PRIORITY_CLASSES {
            self.classes[class].count
        } else {
            0
        }
    }
}

// SAFETY: RunQueue only stores task ids; the raw link edits happen under
// the per-CPU lock wrapping each instance.
unsafe impl Send for RunQueue {}

pub struct CpuScheduler {
    pub runqueue: RunQueue,
    pub idle_task: u32,
}

impl CpuScheduler {
    pub const fn new() -> Self {
        Self { runqueue: RunQueue::new(), idle_task: NO_TASK }
    }
}

pub static CPU_SCHEDULERS: [IrqMutex<CpuScheduler>; MAX_CPUS] =
    [const { IrqMutex::new(CpuScheduler::new()) }; MAX_CPUS];

/// Enqueue `task` on its home CPU's queue.
pub fn enqueue_task(task: *mut Task) {
    if task.is_null() {
        return;
    }
    // SAFETY: reading scheduler-owned fields; enqueue locks the CPU queue.
    let (id, priority, cpu) = unsafe { ((*task).task_id, (*task).priority, (*task).cpu as usize) };
    let cpu = cpu.min(yula_lib::MAX_CPUS - 1);
    let mut sched = CPU_SCHEDULERS[cpu].lock();
    sched.runqueue.enqueue(id, priority);
}

pub fn total_ready_tasks() -> u32 {
    let mut total = 0;
    for sched in CPU_SCHEDULERS.iter() {
        total += sched.lock().runqueue.ready_count();
    }
    total
}
