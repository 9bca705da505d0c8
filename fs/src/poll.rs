//! `poll` over file descriptors.
//!
//! Readiness is computed by the per-kind `poll_ready` dispatch; waiting
//! uses a single kernel-wide wait queue that every pollable object kicks
//! on any state change (`poll_notify`). Wakeups are therefore spuriously
//! broad, which the re-scan loop absorbs; the contract only promises
//! that a sleeping poller eventually observes readiness or its timeout.

use yula_abi::poll::{POLLNVAL, PollFd};
use yula_lib::WaitQueue;

use crate::fileio::{FdTableId, fd_node};
use crate::vfs::node_poll_ready;

static POLL_WQ: WaitQueue = WaitQueue::new();

/// Wake every sleeping poller. Called by pipes, endpoints, and devices
/// whenever their readiness may have changed.
pub fn poll_notify() {
    POLL_WQ.wake_all();
}

fn scan(table: FdTableId, fds: &mut [PollFd]) -> u32 {
    let mut ready = 0;
    for pfd in fds.iter_mut() {
        pfd.revents = 0;
        if pfd.fd < 0 {
            continue;
        }
        match fd_node(table, pfd.fd) {
            Some(node) => {
                pfd.revents = node_poll_ready(node, pfd.events);
            }
            None => {
                pfd.revents = POLLNVAL;
            }
        }
        if pfd.revents != 0 {
            ready += 1;
        }
    }
    ready
}

/// Returns the number of descriptors with non-zero `revents`; 0 on
/// timeout. `timeout_ms < 0` waits forever, `0` is a pure scan.
pub fn poll(table: FdTableId, fds: &mut [PollFd], timeout_ms: i32) -> i64 {
    let ready = scan(table, fds);
    if ready > 0 || timeout_ms == 0 {
        return ready as i64;
    }

    if timeout_ms < 0 {
        POLL_WQ.wait_event(|| scan_count_only(table, fds) > 0);
    } else {
        POLL_WQ.wait_event_timeout(|| scan_count_only(table, fds) > 0, timeout_ms as u64);
    }

    scan(table, fds) as i64
}

/// Readiness probe that must not write `revents` (runs inside the wait
/// condition, possibly concurrently with the final scan).
fn scan_count_only(table: FdTableId, fds: &[PollFd]) -> u32 {
    let mut ready = 0;
    for pfd in fds.iter() {
        if pfd.fd < 0 {
            continue;
        }
        let revents = match fd_node(table, pfd.fd) {
            Some(node) => node_poll_ready(node, pfd.events),
            None => POLLNVAL,
        };
        if revents != 0 {
            ready += 1;
        }
    }
    ready
}
