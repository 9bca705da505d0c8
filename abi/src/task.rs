//! Task ABI: states, priority classes, and limits shared between kernel
//! subsystems and the introspection syscalls.
//!
//! The kernel-internal `Task` struct (register context, stack bookkeeping,
//! scheduler linkage) lives in `yula_core::sched::task`; only the stable
//! surface is defined here.

pub const MAX_TASKS: usize = 64;
pub const TASK_KERNEL_STACK_SIZE: u64 = 0x8000; // 32 KiB
pub const TASK_NAME_MAX_LEN: usize = 32;
pub const INVALID_TASK_ID: u32 = 0xFFFF_FFFF;

/// Per-task file descriptor table capacity.
pub const MAX_FDS: usize = 16;

/// Task lifecycle states.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TaskState {
    /// Slot is free.
    #[default]
    Unused = 0,
    /// On a run queue, waiting for a CPU.
    Runnable = 1,
    /// Currently executing.
    Running = 2,
    /// Blocked on an event (I/O, sleep, wait, sem, futex).
    Waiting = 3,
    /// Exited; exit status not yet harvested by the parent.
    Zombie = 4,
}

impl TaskState {
    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Runnable,
            2 => Self::Running,
            3 => Self::Waiting,
            4 => Self::Zombie,
            _ => Self::Unused,
        }
    }

    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    #[inline]
    pub const fn can_transition_to(self, target: Self) -> bool {
        match self {
            Self::Unused => matches!(target, Self::Runnable),
            Self::Runnable => matches!(target, Self::Running | Self::Zombie),
            Self::Running => matches!(target, Self::Runnable | Self::Waiting | Self::Zombie),
            Self::Waiting => matches!(target, Self::Runnable | Self::Zombie),
            Self::Zombie => matches!(target, Self::Unused),
        }
    }
}

/// Fixed scheduling classes, weakest first. The scheduler always runs the
/// head of the highest non-empty class; `Idle` holds only the idle tasks.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    Idle = 0,
    Low = 1,
    #[default]
    Normal = 2,
    /// Interactive surface owners (compositor, WM) get to preempt batch work.
    Gui = 3,
    High = 4,
}

pub const NUM_PRIORITY_CLASSES: usize = 5;

impl Priority {
    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Low,
            3 => Self::Gui,
            4 => Self::High,
            _ => Self::Normal,
        }
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self as usize
    }
}

/// Why a `Waiting` task is blocked. Purely diagnostic plus a couple of
/// targeted wakeup paths (sleep, waitpid).
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BlockReason {
    #[default]
    None = 0,
    Sleep = 1,
    ChildWait = 2,
    PipeIo = 3,
    SemWait = 4,
    FutexWait = 5,
    KeyboardWait = 6,
    PollWait = 7,
    IpcAccept = 8,
}

// --- Task flags ---

pub const TASK_FLAG_USER_MODE: u16 = 0x01;
pub const TASK_FLAG_KERNEL_MODE: u16 = 0x02;
pub const TASK_FLAG_NO_PREEMPT: u16 = 0x04;
pub const TASK_FLAG_SYSTEM: u16 = 0x08;

/// Terminal input modes (`set_term_mode` syscall).
pub const TERM_MODE_RAW: u32 = 0;
pub const TERM_MODE_COOKED: u32 = 1;

/// One row of the `proc_list` syscall output.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcInfo {
    pub pid: u32,
    pub parent_pid: u32,
    pub state: u8,
    pub priority: u8,
    pub _pad: u16,
    pub cpu: u32,
    pub name: [u8; TASK_NAME_MAX_LEN],
}
