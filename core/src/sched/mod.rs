pub mod futex;
pub mod lifecycle;
pub mod runqueue;
pub mod scheduler;
pub mod signal;
pub mod sleep;
pub mod switch;
pub mod task;

pub use lifecycle::{exit_current, reaper_init, spawn_kthread, spawn_process, waitpid};
pub use scheduler::{block_current_task, unblock_task};
pub use task::{Task, current_task_id, task_by_id};
