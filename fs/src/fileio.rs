//! Open-file handles and per-task descriptor tables.
//!
//! An open file is `(node, offset, flags)` with its own refcount so that
//! `dup2`'d descriptors genuinely share one handle (and one offset). Each
//! task slot owns a fixed descriptor array mapping small fd numbers to
//! open-file indices.

use yula_abi::task::{MAX_FDS, MAX_TASKS};
use yula_lib::IrqMutex;

use crate::vfs::{INVALID_NODE, NodeId, node_ref, node_unref};

pub type FdTableId = u32;

const MAX_OPEN_FILES: usize = 96;
const NO_FILE: u16 = u16::MAX;

#[derive(Clone, Copy)]
struct OpenFile {
    node: NodeId,
    offset: u32,
    flags: u32,
    refs: u16,
    in_use: bool,
}

impl OpenFile {
    const fn empty() -> Self {
        Self { node: INVALID_NODE, offset: 0, flags: 0, refs: 0, in_use: false }
    }
}

struct FileTables {
    open_files: [OpenFile; MAX_OPEN_FILES],
    /// fd -> open-file index, per task slot.
    fd_tables: [[u16; MAX_FDS]; MAX_TASKS],
}

static TABLES: IrqMutex<FileTables> = IrqMutex::new(FileTables {
    open_files: [const { OpenFile::empty() }; MAX_OPEN_FILES],
    fd_tables: [[NO_FILE; MAX_FDS]; MAX_TASKS],
});

/// Install `node` into the lowest free fd of `table`. Takes over the
/// caller's node reference on success; on failure the caller keeps it.
pub fn fd_install(table: FdTableId, node: NodeId, flags: u32) -> Option<i32> {
    let mut tables = TABLES.lock();

    let file_idx = tables.open_files.iter().position(|f| !f.in_use)?;
    let fds = tables.fd_tables.get(table as usize)?;
    let fd = fds.iter().position(|&f| f == NO_FILE)?;

    tables.open_files[file_idx] =
        OpenFile { node, offset: 0, flags, refs: 1, in_use: true };
    tables.fd_tables[table as usize][fd] = file_idx as u16;
    Some(fd as i32)
}

pub fn fd_node(table: FdTableId, fd: i32) -> Option<NodeId> {
    if fd < 0 {
        return None;
    }
    let tables = TABLES.lock();
    let file_idx = *tables.fd_tables.get(table as usize)?.get(fd as usize)?;
    if file_idx == NO_FILE {
        return None;
    }
    let file = &tables.open_files[file_idx as usize];
    if file.in_use { Some(file.node) } else { None }
}

pub fn fd_flags(table: FdTableId, fd: i32) -> u32 {
    let tables = TABLES.lock();
    resolve(&tables, table, fd)
        .map(|idx| tables.open_files[idx].flags)
        .unwrap_or(0)
}

pub fn fd_offset(table: FdTableId, fd: i32) -> u32 {
    let tables = TABLES.lock();
    resolve(&tables, table, fd)
        .map(|idx| tables.open_files[idx].offset)
        .unwrap_or(0)
}

pub fn fd_advance(table: FdTableId, fd: i32, delta: u32) {
    let mut tables = TABLES.lock();
    if let Some(idx) = resolve(&tables, table, fd) {
        tables.open_files[idx].offset = tables.open_files[idx].offset.saturating_add(delta);
    }
}

fn resolve(tables: &FileTables, table: FdTableId, fd: i32) -> Option<usize> {
    if fd < 0 {
        return None;
    }
    let file_idx = *tables.fd_tables.get(table as usize)?.get(fd as usize)?;
    if file_idx == NO_FILE {
        return None;
    }
    let idx = file_idx as usize;
    if tables.open_files[idx].in_use { Some(idx) } else { None }
}

/// Close one descriptor. The node reference drops with the last sharer.
pub fn fd_close(table: FdTableId, fd: i32) -> bool {
    let node_to_unref = {
        let mut tables = TABLES.lock();
        let Some(idx) = resolve(&tables, table, fd) else {
            return false;
        };
        tables.fd_tables[table as usize][fd as usize] = NO_FILE;
        tables.open_files[idx].refs -= 1;
        if tables.open_files[idx].refs == 0 {
            let node = tables.open_files[idx].node;
            tables.open_files[idx] = OpenFile::empty();
            Some(node)
        } else {
            None
        }
    };

    if let Some(node) = node_to_unref {
        node_unref(node);
    }
    true
}

/// `dup2`: make `new_fd` share `old_fd`'s handle, closing `new_fd` first
/// if it was open.
pub fn fd_dup2(table: FdTableId, old_fd: i32, new_fd: i32) -> i64 {
    if old_fd == new_fd {
        return new_fd as i64;
    }
    if new_fd < 0 || new_fd as usize >= MAX_FDS {
        return yula_abi::ERRNO_EBADF;
    }

    {
        let tables = TABLES.lock();
        if resolve(&tables, table, old_fd).is_none() {
            return yula_abi::ERRNO_EBADF;
        }
    }

    // Close the target outside the re-borrow below.
    fd_close(table, new_fd);

    let mut tables = TABLES.lock();
    let Some(idx) = resolve(&tables, table, old_fd) else {
        return yula_abi::ERRNO_EBADF;
    };
    tables.open_files[idx].refs += 1;
    tables.fd_tables[table as usize][new_fd as usize] = idx as u16;
    new_fd as i64
}

/// Close every descriptor of a task (exit path).
pub fn fd_close_all(table: FdTableId) {
    for fd in 0..MAX_FDS as i32 {
        fd_close(table, fd);
    }
}

/// Install an already-referenced node pair as two fresh fds (pipe()).
pub fn fd_install_pair(table: FdTableId, a: NodeId, b: NodeId) -> Option<(i32, i32)> {
    let fd_a = fd_install(table, a, 0)?;
    match fd_install(table, b, 0) {
        Some(fd_b) => Some((fd_a, fd_b)),
        None => {
            fd_close(table, fd_a);
            None
        }
    }
}

/// Duplicate a node reference into a table (used by spawn to pass stdio).
pub fn fd_install_ref(table: FdTableId, node: NodeId, flags: u32) -> Option<i32> {
    if !node_ref(node) {
        return None;
    }
    match fd_install(table, node, flags) {
        Some(fd) => Some(fd),
        None => {
            node_unref(node);
            None
        }
    }
}
