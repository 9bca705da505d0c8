//! Named IPC endpoints.
//!
//! `listen(name)` publishes an endpoint under a unique ≤31-byte name.
//! `connect(name)` builds two anonymous pipes, keeps the server-side
//! halves in a pending-connection record, and hands the client its
//! halves. `accept` dequeues in FIFO order, skipping records whose
//! client has since died, and returns the server's `(c→s read, s→c
//! write)` node pair. Closing the listen node drains the pending queue
//! and releases the name.

use yula_abi::poll::POLLIN;
use yula_lib::kernel_services::task_runtime::{current_task_id, process_alive};
use yula_lib::{FixedName, IrqMutex, WaitQueue, klog_debug};

use crate::pipe::{PipeEnd, pipe_create};
use crate::poll::poll_notify;
use crate::vfs::{INVALID_NODE, NodeFlags, NodeId, NodePayload, node_create, node_unref};

pub const MAX_ENDPOINTS: usize = 16;
const MAX_PENDING: usize = 8;

pub type EndpointId = u32;
pub const INVALID_ENDPOINT: EndpointId = u32::MAX;

#[derive(Clone, Copy)]
struct PendingConn {
    client_pid: u32,
    /// Server-side halves, each holding one node reference.
    c2s_read: NodeId,
    s2c_write: NodeId,
    active: bool,
}

impl PendingConn {
    const fn empty() -> Self {
        Self {
            client_pid: 0,
            c2s_read: INVALID_NODE,
            s2c_write: INVALID_NODE,
            active: false,
        }
    }
}

struct Endpoint {
    in_use: bool,
    closing: bool,
    name: Option<FixedName<32>>,
    listen_node: NodeId,
    pending: [PendingConn; MAX_PENDING],
    pending_head: usize,
    pending_len: usize,
}

impl Endpoint {
    const fn empty() -> Self {
        Self {
            in_use: false,
            closing: false,
            name: None,
            listen_node: INVALID_NODE,
            pending: [PendingConn::empty(); MAX_PENDING],
            pending_head: 0,
            pending_len: 0,
        }
    }

    fn enqueue(&mut self, conn: PendingConn) -> bool {
        if self.pending_len >= MAX_PENDING {
            return false;
        }
        let slot = (self.pending_head + self.pending_len) % MAX_PENDING;
        self.pending[slot] = conn;
        self.pending_len += 1;
        true
    }

    fn dequeue(&mut self) -> Option<PendingConn> {
        if self.pending_len == 0 {
            return None;
        }
        let conn = self.pending[self.pending_head];
        self.pending[self.pending_head] = PendingConn::empty();
        self.pending_head = (self.pending_head + 1) % MAX_PENDING;
        self.pending_len -= 1;
        Some(conn)
    }
}

static ENDPOINTS: IrqMutex<[Endpoint; MAX_ENDPOINTS]> =
    IrqMutex::new([const { Endpoint::empty() }; MAX_ENDPOINTS]);

/// Woken whenever a pending connection arrives, for blocking accepts and
/// pollers of listen nodes.
static ACCEPT_WQ: WaitQueue = WaitQueue::new();

fn create_pipe_nodes() -> Option<(NodeId, NodeId)> {
    let pipe = pipe_create()?;
    let read = node_create(
        b"pipe_r",
        NodeFlags::PIPE,
        0,
        NodePayload::Pipe { pipe, end: PipeEnd::Read },
    )?;
    let write = match node_create(
        b"pipe_w",
        NodeFlags::PIPE,
        0,
        NodePayload::Pipe { pipe, end: PipeEnd::Write },
    ) {
        Some(w) => w,
        None => {
            node_unref(read);
            return None;
        }
    };
    Some((read, write))
}

/// Create an anonymous pipe's node pair (also the `pipe` syscall body).
pub fn vfs_create_pipe() -> Option<(NodeId, NodeId)> {
    create_pipe_nodes()
}

/// Publish a listen endpoint. Fails on duplicate names.
pub fn listen(name: &FixedName<32>) -> Option<NodeId> {
    let mut endpoints = ENDPOINTS.lock();

    if endpoints
        .iter()
        .any(|ep| ep.in_use && ep.name.as_ref() == Some(name))
    {
        return None;
    }

    let idx = endpoints.iter().position(|ep| !ep.in_use)?;
    endpoints[idx] = Endpoint::empty();
    endpoints[idx].in_use = true;
    endpoints[idx].name = Some(*name);
    drop(endpoints);

    let node = node_create(
        name.as_bytes(),
        NodeFlags::IPC_LISTEN,
        0,
        NodePayload::IpcListen { endpoint: idx as EndpointId },
    );

    let mut endpoints = ENDPOINTS.lock();
    match node {
        Some(n) => {
            endpoints[idx].listen_node = n;
            klog_debug!("ipc: endpoint '{}' listening", name.as_str());
            Some(n)
        }
        None => {
            endpoints[idx] = Endpoint::empty();
            None
        }
    }
}

/// Connect to a named endpoint. On success returns the client's
/// `(c→s write, s→c read)` nodes and an opaque pending-record key usable
/// with [`connect_cancel`].
pub fn connect(name: &FixedName<32>) -> Option<(NodeId, NodeId, u64)> {
    let endpoint_idx = {
        let endpoints = ENDPOINTS.lock();
        endpoints.iter().position(|ep| {
            ep.in_use && !ep.closing && ep.listen_node != INVALID_NODE && ep.name.as_ref() == Some(name)
        })?
    };

    let (c2s_read, c2s_write) = create_pipe_nodes()?;
    let (s2c_read, s2c_write) = match create_pipe_nodes() {
        Some(pair) => pair,
        None => {
            node_unref(c2s_read);
            node_unref(c2s_write);
            return None;
        }
    };

    let conn = PendingConn {
        client_pid: current_task_id(),
        c2s_read,
        s2c_write,
        active: true,
    };

    {
        let mut endpoints = ENDPOINTS.lock();
        let ep = &mut endpoints[endpoint_idx];
        if !ep.in_use || ep.closing || !ep.enqueue(conn) {
            drop(endpoints);
            node_unref(c2s_read);
            node_unref(c2s_write);
            node_unref(s2c_read);
            node_unref(s2c_write);
            return None;
        }
    }

    ACCEPT_WQ.wake_all();
    poll_notify();

    let key = ((endpoint_idx as u64) << 32) | c2s_read as u64;
    Some((c2s_write, s2c_read, key))
}

/// Withdraw a still-pending connection (client-side setup failed after
/// `connect`). A record already accepted by the server is left alone.
pub fn connect_cancel(key: u64) {
    let endpoint_idx = (key >> 32) as usize;
    let c2s_read = key as u32;

    let removed = {
        let mut endpoints = ENDPOINTS.lock();
        let Some(ep) = endpoints.get_mut(endpoint_idx) else {
            return;
        };
        let mut removed = None;
        let len = ep.pending_len;
        for _ in 0..len {
            let Some(conn) = ep.dequeue() else { break };
            if conn.active && conn.c2s_read == c2s_read {
                removed = Some(conn);
            } else {
                let _ = ep.enqueue(conn);
            }
        }
        removed
    };

    if let Some(conn) = removed {
        node_unref(conn.c2s_read);
        node_unref(conn.s2c_write);
    }
}

/// Dequeue one pending connection. Dead clients are skipped and their
/// halves dropped. Returns `None` when nothing usable is pending, and the
/// caller decides whether to block.
pub fn accept(endpoint: EndpointId) -> Option<(NodeId, NodeId)> {
    loop {
        let conn = {
            let mut endpoints = ENDPOINTS.lock();
            let ep = endpoints.get_mut(endpoint as usize)?;
            if !ep.in_use {
                return None;
            }
            ep.dequeue()?
        };

        if conn.client_pid != 0 && !process_alive(conn.client_pid) {
            klog_debug!("ipc: dropping pending connection from dead pid {}", conn.client_pid);
            node_unref(conn.c2s_read);
            node_unref(conn.s2c_write);
            continue;
        }

        return Some((conn.c2s_read, conn.s2c_write));
    }
}

/// Block until a pending connection is available (or the endpoint dies).
pub fn accept_blocking(endpoint: EndpointId) -> Option<(NodeId, NodeId)> {
    loop {
        if let Some(pair) = accept(endpoint) {
            return Some(pair);
        }
        let alive = {
            let endpoints = ENDPOINTS.lock();
            endpoints
                .get(endpoint as usize)
                .map(|ep| ep.in_use && !ep.closing)
                .unwrap_or(false)
        };
        if !alive {
            return None;
        }
        let ok = ACCEPT_WQ.wait_event(|| {
            let endpoints = ENDPOINTS.lock();
            endpoints
                .get(endpoint as usize)
                .map(|ep| !ep.in_use || ep.closing || ep.pending_len > 0)
                .unwrap_or(true)
        });
        if !ok {
            return None;
        }
    }
}

/// Listen-node teardown: releases the name and drains the queue.
pub fn endpoint_close(endpoint: EndpointId) {
    let drained = {
        let mut endpoints = ENDPOINTS.lock();
        let Some(ep) = endpoints.get_mut(endpoint as usize) else {
            return;
        };
        if !ep.in_use {
            return;
        }
        ep.closing = true;
        ep.name = None;
        ep.listen_node = INVALID_NODE;

        let mut drained = [PendingConn::empty(); MAX_PENDING];
        let mut n = 0;
        while let Some(conn) = ep.dequeue() {
            drained[n] = conn;
            n += 1;
        }
        ep.in_use = false;
        ep.closing = false;
        drained
    };

    for conn in drained.iter().filter(|c| c.active) {
        node_unref(conn.c2s_read);
        node_unref(conn.s2c_write);
    }
    ACCEPT_WQ.wake_all();
    poll_notify();
}

pub fn endpoint_poll_ready(endpoint: EndpointId, events: u16) -> u16 {
    let endpoints = ENDPOINTS.lock();
    let ready = endpoints
        .get(endpoint as usize)
        .map(|ep| ep.in_use && ep.pending_len > 0)
        .unwrap_or(false);
    if ready { events & POLLIN } else { 0 }
}
