//! Task creation, exit, wait, and reaping.
//!
//! Kernel threads get a buddy-allocated kernel stack and run entry(arg)
//! on the kernel address space. Processes additionally own an address
//! space and are resolved through the `exec` service. The ELF loader
//! proper is an external collaborator; the in-tree program registry is
//! its stand-in provider.
//!
//! Exit closes the fd table, releases the address space, marks the task
//! Zombie and wakes a waiting parent. `waitpid` harvests the status and
//! recycles the slot; orphaned zombies are collected by the reaper
//! thread.

use yula_abi::signal::{SIGCHLD, sig_bit};
use yula_abi::task::{BlockReason, INVALID_TASK_ID, Priority, TASK_FLAG_KERNEL_MODE,
    TASK_FLAG_SYSTEM, TASK_FLAG_USER_MODE, TASK_KERNEL_STACK_SIZE, TaskState};
use yula_abi::{ERRNO_ECHILD, ERRNO_ENOMEM};
use yula_lib::{WaitQueue, klog_debug, klog_info, klog_warn};
use yula_mm::hhdm::PhysAddrHhdm;
use yula_mm::page_alloc::{alloc_pages, free_pages};
use yula_mm::paging::kernel_root;
use yula_mm::process_vm::{INVALID_VM_ID, vm_create, vm_destroy, vm_root};

use super::runqueue::{CPU_SCHEDULERS, enqueue_task};
use super::scheduler::{schedule, unblock_task};
use super::switch::SwitchContext;
use super::task::{
    Task, current_task, for_each_task, task_allocate, task_by_id, task_free, task_set_state,
};

/// 32 KiB kernel stacks: order 3 blocks.
const KERNEL_STACK_ORDER: u32 = 3;

pub type TaskEntry = extern "C" fn(u64);

/// Parents parked in `waitpid` and the reaper sleep here; exits wake it.
static CHILD_WQ: WaitQueue = WaitQueue::new();

fn alloc_kernel_stack() -> Option<(yula_abi::PhysAddr, u64)> {
    let stack = alloc_pages(KERNEL_STACK_ORDER)?;
    let top = stack.to_virt_checked()?.as_u64() + TASK_KERNEL_STACK_SIZE;
    Some((stack, top))
}

fn task_install(
    name: &str,
    priority: Priority,
    flags: u16,
    entry: TaskEntry,
    arg: u64,
    vm_id: u32,
) -> Option<u32> {
    let id = task_allocate(name, priority, flags)?;
    let task = super::task::task_slot(id)?;

    let Some((stack, stack_top)) = alloc_kernel_stack() else {
        task_free(id);
        return None;
    };

    let cr3 = match vm_root(vm_id) {
        Some(root) => root.as_u64(),
        None => kernel_root().as_u64(),
    };

    // SAFETY: the slot was just allocated and is not yet visible to the
    // scheduler.
    unsafe {
        (*task).kernel_stack = stack;
        (*task).vm_id = vm_id;
        (*task).context = SwitchContext::new_for_task(entry as usize as u64, arg, stack_top, cr3);
        (*task).parent_pid = super::task::current_task_id();
    }

    if task_set_state(id, TaskState::Runnable) != 0 {
        task_free(id);
        free_pages(stack, KERNEL_STACK_ORDER);
        return None;
    }
    enqueue_task(task);
    Some(id)
}

/// Spawn a kernel thread.
pub fn spawn_kthread(name: &str, priority: Priority, entry: TaskEntry, arg: u64) -> Option<u32> {
    task_install(name, priority, TASK_FLAG_KERNEL_MODE, entry, arg, INVALID_VM_ID)
}

/// Spawn a process: resolve `path` through the exec service, give it a
/// fresh address space, and make it runnable. Returns the pid.
pub fn spawn_process(path: &[u8], _argc: u32, _argv: u64) -> i64 {
    let Some(program) = crate::services::exec::resolve(path) else {
        klog_debug!("spawn: no program for path");
        return yula_abi::ERRNO_ENOENT;
    };

    let vm_id = match vm_create() {
        Ok(id) => id,
        Err(_) => return ERRNO_ENOMEM,
    };

    match task_install(
        program.name,
        program.priority,
        TASK_FLAG_USER_MODE,
        program.entry,
        0,
        vm_id,
    ) {
        Some(pid) => {
            install_canonical_fds(pid);
            pid as i64
        }
        None => {
            vm_destroy(vm_id);
            ERRNO_ENOMEM
        }
    }
}

/// The canonical descriptor table for fresh processes: fd 0 reads the
/// keyboard.
fn install_canonical_fds(pid: u32) {
    let Some(name) = yula_lib::FixedName::<32>::new(b"kbd") else {
        return;
    };
    let Some(node) = yula_fs::devfs::devfs_open(&name) else {
        return;
    };
    if yula_fs::fileio::fd_install(pid, node, 0).is_none() {
        yula_fs::node_unref(node);
    }
}

extern "C" fn idle_loop(_arg: u64) {
    loop {
        yula_lib::cpu::halt();
    }
}

/// Create the per-CPU idle task. Never enqueued; the scheduler falls
/// back to it when every class is empty.
pub fn create_idle_task(cpu: usize) {
    let Some(id) = task_allocate("idle", Priority::Idle, TASK_FLAG_KERNEL_MODE | TASK_FLAG_SYSTEM)
    else {
        klog_warn!("sched: no slot for idle task");
        return;
    };
    let Some(task) = super::task::task_slot(id) else {
        return;
    };
    let Some((stack, stack_top)) = alloc_kernel_stack() else {
        task_free(id);
        return;
    };
    unsafe {
        (*task).kernel_stack = stack;
        (*task).cpu = cpu as u32;
        (*task).context = SwitchContext::new_for_task(
            idle_loop as *const () as usize as u64,
            0,
            stack_top,
            kernel_root().as_u64(),
        );
    }
    let _ = task_set_state(id, TaskState::Runnable);
    CPU_SCHEDULERS[cpu].lock().idle_task = id;
}

/// Terminate the calling task. Does not return.
pub fn exit_current(status: i32) -> ! {
    let task = current_task();
    if task.is_null() {
        panic!("exit_current with no current task");
    }

    // SAFETY: tearing down our own task.
    let (id, vm_id, parent) = unsafe {
        let id = (*task).task_id;
        yula_fs::fd_close_all(id);
        crate::services::fb::fb_release_if_owner(id);
        super::futex::futex_remove_task(task);
        super::sleep::cancel_sleep(id);
        (id, (*task).vm_id, (*task).parent_pid)
    };

    if vm_id != INVALID_VM_ID {
        vm_destroy(vm_id);
        unsafe {
            (*task).vm_id = INVALID_VM_ID;
        }
    }

    unsafe {
        (*task).exit_status = status;
    }
    let _ = task_set_state(id, TaskState::Zombie);
    klog_debug!("task {} exited with status {}", id, status);

    // Wake a parent blocked in waitpid (and the reaper).
    if parent != INVALID_TASK_ID {
        let parent_task = task_by_id(parent);
        if !parent_task.is_null() {
            unsafe {
                (*parent_task).pending_signals |= sig_bit(SIGCHLD);
            }
        }
    }
    CHILD_WQ.wake_all();

    schedule();
    unreachable!("zombie task rescheduled");
}

/// Free a zombie's remaining resources and recycle the slot.
fn reap(task: *mut Task) -> i32 {
    // SAFETY: only called on Zombie tasks under the wait path.
    unsafe {
        let status = (*task).exit_status;
        let id = (*task).task_id;
        if !(*task).kernel_stack.is_null() {
            free_pages((*task).kernel_stack, KERNEL_STACK_ORDER);
            (*task).kernel_stack = yula_abi::PhysAddr::NULL;
        }
        task_free(id);
        status
    }
}

fn find_zombie_child(parent: u32, pid: i32) -> Option<(u32, *mut Task, bool)> {
    let mut found_zombie = None;
    let mut has_child = false;
    for_each_task(|task| {
        if task.parent_pid != parent {
            return;
        }
        if pid >= 0 && task.task_id != pid as u32 {
            return;
        }
        has_child = true;
        if task.state == TaskState::Zombie && found_zombie.is_none() {
            found_zombie = Some(task.task_id);
        }
    });
    match found_zombie {
        Some(id) => Some((id, task_by_id(id), has_child)),
        None => {
            if has_child { None } else { Some((INVALID_TASK_ID, core::ptr::null_mut(), false)) }
        }
    }
}

/// Wait for a child to exit. `pid == -1` waits for any child. Returns
/// the reaped child's pid, or `-ECHILD` when no matching child exists.
pub fn waitpid(pid: i32, status_out: &mut i32) -> i64 {
    let parent = super::task::current_task_id();
    if parent == INVALID_TASK_ID {
        return ERRNO_ECHILD;
    }

    loop {
        match find_zombie_child(parent, pid) {
            Some((child_id, task, _)) if !task.is_null() => {
                *status_out = reap(task);
                return child_id as i64;
            }
            Some(_) => return ERRNO_ECHILD,
            None => {
                // Children exist but none are zombies yet: block.
                let current = current_task();
                if current.is_null() {
                    return ERRNO_ECHILD;
                }
                unsafe {
                    (*current).wait_for_pid = pid;
                    (*current).block_reason = BlockReason::ChildWait;
                }
                let ok = CHILD_WQ.wait_event(|| {
                    matches!(find_zombie_child(parent, pid), Some(_))
                });
                if !ok {
                    return ERRNO_ECHILD;
                }
            }
        }
    }
}

extern "C" fn reaper_loop(_arg: u64) {
    loop {
        // Collect zombies whose parent is gone (or was never waiting).
        let mut orphan = INVALID_TASK_ID;
        for_each_task(|task| {
            if task.state != TaskState::Zombie || orphan != INVALID_TASK_ID {
                return;
            }
            let parent = task_by_id(task.parent_pid);
            if parent.is_null() {
                orphan = task.task_id;
            }
        });

        if orphan != INVALID_TASK_ID {
            let task = task_by_id(orphan);
            if !task.is_null() {
                klog_debug!("reaper: collecting orphaned task {}", orphan);
                reap(task);
            }
            continue;
        }

        super::sleep::sleep_current_ms(250);
    }
}

pub fn reaper_init() {
    if spawn_kthread("reaper", Priority::Low, reaper_loop, 0).is_none() {
        klog_info!("sched: reaper not started");
    }
}

/// Drop the task from every wait structure it could be parked in, then
/// force it runnable (used by SIGKILL).
pub fn cancel_all_waits(task: *mut Task) {
    if task.is_null() {
        return;
    }
    unsafe {
        let id = (*task).task_id;
        super::sleep::cancel_sleep(id);
        super::futex::futex_remove_task(task);
        CHILD_WQ.remove_task(task as *mut core::ffi::c_void);
        if (*task).state == TaskState::Waiting {
            let _ = unblock_task(task);
        }
    }
}
