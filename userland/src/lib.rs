//! Userland: syscall wrappers, the compositor client library, the
//! compositor server, and the tiling window manager.
//!
//! Programs here are scheduled as tasks with private lower-half address
//! spaces and reach the kernel exclusively through the wrappers in
//! [`syscall`]; the program registry maps spawn paths onto their entry
//! points while the real ELF loader remains an external collaborator.

#![no_std]
#![allow(unsafe_op_in_unsafe_fn)]

pub mod apps;
pub mod comp;
pub mod program_registry;
pub mod syscall;
pub mod tests;
