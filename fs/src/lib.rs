//! VFS node layer, pipes, named IPC, poll, and file tables.
//!
//! Everything a file descriptor can point at funnels through the node
//! arena in [`vfs`]; the concrete behaviors (pipe ring, SHM object,
//! IPC endpoint, devfs node, ramfs inode) hang off the node as a typed
//! payload. The on-disk filesystem is an external collaborator; the
//! in-tree ramfs backs the root so path syscalls have real semantics.

#![no_std]
#![allow(unsafe_op_in_unsafe_fn)]

pub mod devfs;
pub mod fileio;
pub mod named_ipc;
pub mod pipe;
pub mod poll;
pub mod ramfs;
pub mod spk;
pub mod tests;
pub mod vfs;

pub use fileio::{FdTableId, fd_close, fd_close_all, fd_dup2, fd_install, fd_node};
pub use vfs::{NodeFlags, NodeId, NodePayload, node_ref, node_unref};
