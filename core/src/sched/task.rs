//! The task table.
//!
//! A fixed array of `MAX_TASKS` slots; a task's id doubles as its pid and
//! as the index of its fd table and address-space bookkeeping. Slot
//! allocation and state transitions go through the table lock; the
//! scheduler hands out raw pointers into the array (slots are never
//! moved or freed, only recycled), which keeps the hot paths free of
//! borrow gymnastics exactly where lock-order would otherwise knot up.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use yula_abi::signal::{NSIG, SigSet};
use yula_abi::task::{
    BlockReason, INVALID_TASK_ID, MAX_TASKS, Priority, TASK_NAME_MAX_LEN, TaskState,
};
use yula_abi::PhysAddr;
use yula_lib::{IrqMutex, klog_warn};
use yula_mm::process_vm::INVALID_VM_ID;

use super::switch::SwitchContext;

/// Runqueue link sentinel.
pub const NO_TASK: u32 = INVALID_TASK_ID;

#[repr(C)]
pub struct Task {
    pub task_id: u32,
    pub parent_pid: u32,
    pub state: TaskState,
    pub priority: Priority,
    pub flags: u16,
    pub name: [u8; TASK_NAME_MAX_LEN],

    pub context: SwitchContext,
    /// Physical base of the kernel stack block (order
    /// [`super::lifecycle::KERNEL_STACK_ORDER`]).
    pub kernel_stack: PhysAddr,
    /// Address-space id, or `INVALID_VM_ID` for pure kernel threads.
    pub vm_id: u32,
    pub cwd: yula_fs::ramfs::InodeId,

    pub exit_status: i32,
    pub pending_signals: SigSet,
    pub signal_handlers: [u64; NSIG],

    pub session: u32,
    pub pgid: u32,
    /// Controlling TTY id; 0 while the task has none.
    pub ctty: u32,
    pub term_mode: u32,

    /// `waitpid` target (-1 = any child) while blocked in ChildWait.
    pub wait_for_pid: i32,
    pub wake_tick: u64,
    pub block_reason: BlockReason,
    /// Set by a wake that raced the block; consumed by the next block.
    pub pending_wakeup: AtomicBool,

    /// Intrusive runqueue link (task id, NO_TASK when unlinked).
    pub next_ready: u32,
    pub time_slice_remaining: u32,
    pub cpu: u32,
}

impl Task {
    const fn unused() -> Self {
        Self {
            task_id: INVALID_TASK_ID,
            parent_pid: INVALID_TASK_ID,
            state: TaskState::Unused,
            priority: Priority::Normal,
            flags: 0,
            name: [0; TASK_NAME_MAX_LEN],
            context: SwitchContext::zero(),
            kernel_stack: PhysAddr::NULL,
            vm_id: INVALID_VM_ID,
            cwd: yula_fs::ramfs::ROOT_INODE,
            exit_status: 0,
            pending_signals: 0,
            signal_handlers: [0; NSIG],
            session: 0,
            pgid: 0,
            ctty: 0,
            term_mode: yula_abi::task::TERM_MODE_COOKED,
            wait_for_pid: 0,
            wake_tick: 0,
            block_reason: BlockReason::None,
            pending_wakeup: AtomicBool::new(false),
            next_ready: NO_TASK,
            time_slice_remaining: 0,
            cpu: 0,
        }
    }
}

struct TaskTable {
    tasks: UnsafeCell<[Task; MAX_TASKS]>,
}

// SAFETY: slot allocation is serialized by TABLE_LOCK; field access after
// that follows the scheduler's ownership rules (a task's mutable state is
// only touched by its own CPU or under the runqueue/table locks).
unsafe impl Sync for TaskTable {}

static TASK_TABLE: TaskTable = TaskTable {
    tasks: UnsafeCell::new([const { Task::unused() }; MAX_TASKS]),
};

static TABLE_LOCK: IrqMutex<()> = IrqMutex::new(());

/// Monotonic pid source; pids are slot indices, reused only after reap.
static NEXT_SESSION: AtomicU32 = AtomicU32::new(1);

#[inline]
pub fn task_slot(id: u32) -> Option<*mut Task> {
    if id as usize >= MAX_TASKS {
        return None;
    }
    // SAFETY: in-bounds pointer into a static array.
    Some(unsafe { (TASK_TABLE.tasks.get() as *mut Task).add(id as usize) })
}

/// Pointer to a live (non-Unused) task, or null.
pub fn task_by_id(id: u32) -> *mut Task {
    match task_slot(id) {
        Some(task) => {
            if unsafe { (*task).state } == TaskState::Unused {
                core::ptr::null_mut()
            } else {
                task
            }
        }
        None => core::ptr::null_mut(),
    }
}

/// Claim a free slot and initialize it as Runnable-to-be. Returns the id.
pub fn task_allocate(name: &str, priority: Priority, flags: u16) -> Option<u32> {
    let _guard = TABLE_LOCK.lock();
    for id in 0..MAX_TASKS as u32 {
        let task = task_slot(id)?;
        // SAFETY: table lock held; slot unreferenced while Unused.
        unsafe {
            if (*task).state != TaskState::Unused {
                continue;
            }
            *task = Task::unused();
            (*task).task_id = id;
            (*task).state = TaskState::Waiting; // not yet runnable
            (*task).priority = priority;
            (*task).flags = flags;
            (*task).pgid = id;
            (*task).session = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
            yula_lib::string::copy_name_bytes(&mut (*task).name, name.as_bytes());
        }
        return Some(id);
    }
    klog_warn!("task: table full");
    None
}

/// Release a reaped slot back to Unused.
pub fn task_free(id: u32) {
    let _guard = TABLE_LOCK.lock();
    if let Some(task) = task_slot(id) {
        unsafe {
            (*task) = Task::unused();
        }
    }
}

/// Guarded state transition; rejects impossible edges.
pub fn task_set_state(id: u32, new_state: TaskState) -> i32 {
    let _guard = TABLE_LOCK.lock();
    let task = match task_slot(id) {
        Some(t) => t,
        None => return -1,
    };
    unsafe {
        let current = (*task).state;
        if current == new_state {
            return 0;
        }
        if !current.can_transition_to(new_state) {
            klog_warn!(
                "task {}: invalid transition {:?} -> {:?}",
                id,
                current,
                new_state
            );
            return -1;
        }
        (*task).state = new_state;
    }
    0
}

pub fn task_set_state_with_reason(id: u32, new_state: TaskState, reason: BlockReason) -> i32 {
    let rc = task_set_state(id, new_state);
    if rc == 0 {
        if let Some(task) = task_slot(id) {
            unsafe {
                (*task).block_reason = reason;
            }
        }
    }
    rc
}

#[inline]
pub fn task_is_live(task: *const Task) -> bool {
    !task.is_null()
        && unsafe { (*task).state != TaskState::Unused && (*task).state != TaskState::Zombie }
}

/// Walk all live tasks under the table lock.
pub fn for_each_task(mut f: impl FnMut(&Task)) {
    let _guard = TABLE_LOCK.lock();
    for id in 0..MAX_TASKS as u32 {
        if let Some(task) = task_slot(id) {
            // SAFETY: table lock held; read-only view.
            let task = unsafe { &*task };
            if task.state != TaskState::Unused {
                f(task);
            }
        }
    }
}

// --- Current task, per CPU ---

static CURRENT: [AtomicU32; yula_lib::MAX_CPUS] =
    [const { AtomicU32::new(NO_TASK) }; yula_lib::MAX_CPUS];

pub fn set_current_task_id(cpu: usize, id: u32) {
    if cpu < yula_lib::MAX_CPUS {
        CURRENT[cpu].store(id, Ordering::Release);
    }
}

#[inline]
pub fn current_task_id() -> u32 {
    let cpu = yula_lib::get_current_cpu();
    CURRENT[cpu].load(Ordering::Acquire)
}

#[inline]
pub fn current_task() -> *mut Task {
    let id = current_task_id();
    if id == NO_TASK {
        core::ptr::null_mut()
    } else {
        task_by_id(id)
    }
}
