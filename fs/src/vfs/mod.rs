//! VFS node arena.
//!
//! Nodes are refcounted records in a fixed arena, addressed by index.
//! Instead of a per-node ops table, a node carries a typed
//! [`NodePayload`]; the dispatch functions below match on it, so each
//! kind's behavior is static and the payload is never an untyped pointer.
//!
//! Lifetime rule: `node_ref` before publishing a node to another owner,
//! `node_unref` on every exit path. When the count reaches zero the
//! kind-specific teardown runs exactly once and the slot is recycled.

use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

use yula_lib::{IrqMutex, klog_warn};
use yula_mm::shm::ShmHandle;

use crate::named_ipc::{self, EndpointId};
use crate::pipe::{self, PipeEnd, PipeId};
use crate::ramfs::InodeId;

pub const MAX_NODES: usize = 128;

pub type NodeId = u32;
pub const INVALID_NODE: NodeId = u32::MAX;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct NodeFlags: u32 {
        const PIPE = 0x01;
        const SHM = 0x02;
        const IPC_LISTEN = 0x04;
        const DEVFS = 0x08;
        const DIRECTORY = 0x10;
        const REGULAR = 0x20;
    }
}

/// What a node actually is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodePayload {
    None,
    Pipe { pipe: PipeId, end: PipeEnd },
    Shm { handle: ShmHandle },
    IpcListen { endpoint: EndpointId },
    Ramfs { inode: InodeId },
    /// Device nodes dispatch through the devfs registration.
    Dev { dev: u32 },
}

pub struct VfsNode {
    pub name: [u8; 32],
    pub flags: NodeFlags,
    pub size: u32,
    pub payload: NodePayload,
    refs: AtomicU32,
    active: bool,
}

impl VfsNode {
    const fn empty() -> Self {
        Self {
            name: [0; 32],
            flags: NodeFlags::empty(),
            size: 0,
            payload: NodePayload::None,
            refs: AtomicU32::new(0),
            active: false,
        }
    }
}

static NODES: IrqMutex<[VfsNode; MAX_NODES]> =
    IrqMutex::new([const { VfsNode::empty() }; MAX_NODES]);

/// Allocate a node with one reference.
pub fn node_create(name: &[u8], flags: NodeFlags, size: u32, payload: NodePayload) -> Option<NodeId> {
    let mut nodes = NODES.lock();
    for (id, node) in nodes.iter_mut().enumerate() {
        if !node.active {
            node.active = true;
            node.flags = flags;
            node.size = size;
            node.payload = payload;
            node.refs.store(1, Ordering::Release);
            yula_lib::string::copy_name_bytes(&mut node.name, name);
            return Some(id as NodeId);
        }
    }
    klog_warn!("vfs: node arena exhausted");
    None
}

pub fn node_ref(id: NodeId) -> bool {
    let nodes = NODES.lock();
    match nodes.get(id as usize) {
        Some(node) if node.active => {
            node.refs.fetch_add(1, Ordering::AcqRel);
            true
        }
        _ => false,
    }
}

/// Drop one reference; at zero the payload teardown runs and the slot is
/// recycled.
pub fn node_unref(id: NodeId) {
    let payload = {
        let mut nodes = NODES.lock();
        let Some(node) = nodes.get_mut(id as usize) else {
            return;
        };
        if !node.active {
            return;
        }
        let prev = node.refs.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            klog_warn!("vfs: refcount underflow on node {}", id);
            node.refs.store(0, Ordering::Release);
            return;
        }
        if prev != 1 {
            return;
        }
        let payload = node.payload;
        node.active = false;
        node.payload = NodePayload::None;
        node.flags = NodeFlags::empty();
        payload
    };

    // Teardown outside the arena lock; the payload owners lock themselves.
    match payload {
        NodePayload::Pipe { pipe, end } => pipe::pipe_close_end(pipe, end),
        NodePayload::Shm { handle } => yula_mm::shm::shm_release(handle),
        NodePayload::IpcListen { endpoint } => named_ipc::endpoint_close(endpoint),
        NodePayload::Ramfs { .. } | NodePayload::Dev { .. } | NodePayload::None => {}
    }
}

pub fn node_payload(id: NodeId) -> Option<NodePayload> {
    let nodes = NODES.lock();
    nodes
        .get(id as usize)
        .filter(|n| n.active)
        .map(|n| n.payload)
}

pub fn node_flags(id: NodeId) -> NodeFlags {
    let nodes = NODES.lock();
    nodes
        .get(id as usize)
        .filter(|n| n.active)
        .map(|n| n.flags)
        .unwrap_or(NodeFlags::empty())
}

pub fn node_size(id: NodeId) -> u32 {
    let nodes = NODES.lock();
    nodes
        .get(id as usize)
        .filter(|n| n.active)
        .map(|n| n.size)
        .unwrap_or(0)
}

pub fn node_refs(id: NodeId) -> u32 {
    let nodes = NODES.lock();
    nodes
        .get(id as usize)
        .filter(|n| n.active)
        .map(|n| n.refs.load(Ordering::Acquire))
        .unwrap_or(0)
}

/// Blocking read dispatch.
pub fn node_read(id: NodeId, offset: u32, buf: &mut [u8]) -> i64 {
    match node_payload(id) {
        Some(NodePayload::Pipe { pipe, end: PipeEnd::Read }) => pipe::pipe_read(pipe, buf),
        Some(NodePayload::Pipe { .. }) => yula_abi::ERRNO_EBADF,
        Some(NodePayload::Ramfs { inode }) => crate::ramfs::read(inode, offset, buf),
        Some(NodePayload::Dev { dev }) => crate::devfs::dev_read(dev, offset, buf),
        Some(NodePayload::Shm { .. }) | Some(NodePayload::IpcListen { .. }) => {
            yula_abi::ERRNO_EINVAL
        }
        Some(NodePayload::None) | None => yula_abi::ERRNO_EBADF,
    }
}

/// Blocking write dispatch.
pub fn node_write(id: NodeId, offset: u32, buf: &[u8]) -> i64 {
    match node_payload(id) {
        Some(NodePayload::Pipe { pipe, end: PipeEnd::Write }) => pipe::pipe_write(pipe, buf),
        Some(NodePayload::Pipe { .. }) => yula_abi::ERRNO_EBADF,
        Some(NodePayload::Ramfs { inode }) => crate::ramfs::write(inode, offset, buf),
        Some(NodePayload::Dev { dev }) => crate::devfs::dev_write(dev, offset, buf),
        Some(NodePayload::Shm { .. }) | Some(NodePayload::IpcListen { .. }) => {
            yula_abi::ERRNO_EINVAL
        }
        Some(NodePayload::None) | None => yula_abi::ERRNO_EBADF,
    }
}

/// Poll readiness dispatch (non-blocking).
pub fn node_poll_ready(id: NodeId, events: u16) -> u16 {
    match node_payload(id) {
        Some(NodePayload::Pipe { pipe, end }) => pipe::pipe_poll_ready(pipe, end, events),
        Some(NodePayload::IpcListen { endpoint }) => named_ipc::endpoint_poll_ready(endpoint, events),
        Some(NodePayload::Ramfs { .. }) | Some(NodePayload::Shm { .. }) => {
            // Always ready; there is nothing to wait for.
            events & (yula_abi::poll::POLLIN | yula_abi::poll::POLLOUT)
        }
        Some(NodePayload::Dev { dev }) => crate::devfs::dev_poll_ready(dev, events),
        Some(NodePayload::None) | None => yula_abi::poll::POLLNVAL,
    }
}
