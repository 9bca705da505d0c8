//! Task lifecycle, scheduling, IPC syscalls, and kernel services.
//!
//! This crate owns the task table, the per-CPU scheduler, futexes,
//! signals, and the whole syscall surface. On init it registers itself
//! as the `task_runtime` service so the blocking primitives in
//! `yula-lib` can park and wake tasks without a dependency cycle.

#![no_std]
#![allow(unsafe_op_in_unsafe_fn)]

pub mod sched;
pub mod services;
pub mod syscall;
pub mod tests;

pub use sched::scheduler::{scheduler_init, scheduler_timer_tick, yield_now};
