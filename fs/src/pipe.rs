//! Anonymous pipes.
//!
//! A pipe is a 4 KiB power-of-two byte ring with free-running u32
//! cursors, a semaphore per direction, and a closed flag per end.
//! Readers block while the ring is empty until the writer produces or
//! closes; writers block while it is full until the reader consumes or
//! closes. Closing either end wakes every waiter on both ends.
//!
//! EOF semantics: read on an empty pipe whose write end is closed
//! returns 0; write on a pipe whose read end is closed returns -EPIPE.

use yula_abi::poll::{POLLHUP, POLLIN, POLLOUT};
use yula_abi::{ERRNO_EAGAIN, ERRNO_EPIPE};
use yula_lib::kernel_services::task_runtime::yield_now;
use yula_lib::ring_buffer::ByteRing;
use yula_lib::{IrqMutex, Semaphore};

use crate::poll::poll_notify;

pub const PIPE_RING_SIZE: usize = 4096;

const MAX_PIPES: usize = 32;

pub type PipeId = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipeEnd {
    Read,
    Write,
}

struct PipeInner {
    ring: ByteRing<PIPE_RING_SIZE>,
    read_closed: bool,
    write_closed: bool,
    active: bool,
    /// Lifetime totals, exposed for the conservation invariant
    /// `written - read == buffered`.
    total_written: u64,
    total_read: u64,
}

impl PipeInner {
    const fn new() -> Self {
        Self {
            ring: ByteRing::new(),
            read_closed: false,
            write_closed: false,
            active: false,
            total_written: 0,
            total_read: 0,
        }
    }
}

struct PipeSlot {
    inner: IrqMutex<PipeInner>,
    /// Signaled by the writer when bytes arrive or the end closes.
    data_sem: Semaphore,
    /// Signaled by the reader when space opens up or the end closes.
    space_sem: Semaphore,
}

impl PipeSlot {
    const fn new() -> Self {
        Self {
            inner: IrqMutex::new(PipeInner::new()),
            data_sem: Semaphore::new(0),
            space_sem: Semaphore::new(0),
        }
    }
}

static PIPES: [PipeSlot; MAX_PIPES] = [const { PipeSlot::new() }; MAX_PIPES];

/// Allocate a pipe. The returned id backs one read node and one write
/// node; the slot recycles when both ends have closed.
pub fn pipe_create() -> Option<PipeId> {
    for (id, slot) in PIPES.iter().enumerate() {
        let mut inner = slot.inner.lock();
        if !inner.active {
            *inner = PipeInner::new();
            inner.active = true;
            return Some(id as PipeId);
        }
    }
    None
}

fn slot(id: PipeId) -> Option<&'static PipeSlot> {
    PIPES.get(id as usize)
}

/// Blocking read. Returns bytes read, 0 on EOF, negative errno.
pub fn pipe_read(id: PipeId, buf: &mut [u8]) -> i64 {
    let Some(pipe) = slot(id) else {
        return ERRNO_EAGAIN;
    };
    if buf.is_empty() {
        return 0;
    }

    loop {
        {
            let mut inner = pipe.inner.lock();
            if !inner.active {
                return ERRNO_EAGAIN;
            }
            let n = inner.ring.pop(buf);
            if n > 0 {
                inner.total_read += n as u64;
                drop(inner);
                pipe.space_sem.signal();
                poll_notify();
                return n as i64;
            }
            if inner.write_closed {
                return 0; // EOF
            }
        }
        if !pipe.data_sem.wait() {
            return ERRNO_EAGAIN;
        }
        // Spurious wakeups possible; loop re-checks.
    }
}

/// Blocking write of the whole buffer. Returns `buf.len()`, or -EPIPE if
/// the read end closed before everything was accepted.
pub fn pipe_write(id: PipeId, buf: &[u8]) -> i64 {
    let Some(pipe) = slot(id) else {
        return ERRNO_EAGAIN;
    };

    let mut done = 0usize;
    while done < buf.len() {
        {
            let mut inner = pipe.inner.lock();
            if !inner.active {
                return ERRNO_EAGAIN;
            }
            if inner.read_closed {
                return ERRNO_EPIPE;
            }
            let n = inner.ring.push(&buf[done..]);
            if n > 0 {
                inner.total_written += n as u64;
                done += n;
                drop(inner);
                pipe.data_sem.signal();
                poll_notify();
                continue;
            }
        }
        if !pipe.space_sem.wait() {
            return ERRNO_EAGAIN;
        }
    }
    done as i64
}

/// Non-blocking read: bytes read, 0 when nothing buffered, -1 when the
/// writer closed and the ring is drained.
pub fn pipe_try_read(id: PipeId, buf: &mut [u8]) -> i64 {
    let Some(pipe) = slot(id) else {
        return -1;
    };
    let mut inner = pipe.inner.lock();
    if !inner.active {
        return -1;
    }
    let n = inner.ring.pop(buf);
    if n > 0 {
        inner.total_read += n as u64;
        drop(inner);
        pipe.space_sem.signal();
        poll_notify();
        return n as i64;
    }
    if inner.write_closed { -1 } else { 0 }
}

/// Non-blocking write, all-or-nothing: the buffer is only admitted when
/// it fits the free space whole (a full pipe reports 0 bytes written),
/// so framed writers never leave half a frame behind. -1 when the
/// reader is gone.
pub fn pipe_try_write(id: PipeId, buf: &[u8]) -> i64 {
    let Some(pipe) = slot(id) else {
        return -1;
    };
    let mut inner = pipe.inner.lock();
    if !inner.active {
        return -1;
    }
    if inner.read_closed {
        return -1;
    }
    if (inner.ring.free() as usize) < buf.len() {
        return 0;
    }
    let n = inner.ring.push(buf);
    if n > 0 {
        inner.total_written += n as u64;
        drop(inner);
        pipe.data_sem.signal();
        poll_notify();
    }
    n as i64
}

/// All-or-nothing frame write: the frame is only admitted when it fits
/// the free space whole, so concurrent framed writers never interleave.
/// A non-essential frame that does not fit is dropped (returns 0); an
/// essential one retries with yields until delivered or the peer dies.
pub fn pipe_write_frame(id: PipeId, frame: &[u8], essential: bool) -> i64 {
    let Some(pipe) = slot(id) else {
        return -1;
    };
    if frame.len() > PIPE_RING_SIZE {
        return -1;
    }

    loop {
        {
            let mut inner = pipe.inner.lock();
            if !inner.active || inner.read_closed {
                return -1;
            }
            if inner.ring.free() as usize >= frame.len() {
                let n = inner.ring.push(frame);
                debug_assert!(n == frame.len());
                inner.total_written += n as u64;
                drop(inner);
                pipe.data_sem.signal();
                poll_notify();
                return n as i64;
            }
        }

        if !essential {
            return 0;
        }
        // Essential frames spin-block: give the reader CPU time and retry.
        if !pipe.space_sem.wait() {
            yield_now();
        }
    }
}

/// Bytes currently buffered.
pub fn pipe_buffered(id: PipeId) -> u32 {
    slot(id).map(|p| p.inner.lock().ring.len()).unwrap_or(0)
}

/// Lifetime (written, read) totals.
pub fn pipe_totals(id: PipeId) -> (u64, u64) {
    slot(id)
        .map(|p| {
            let inner = p.inner.lock();
            (inner.total_written, inner.total_read)
        })
        .unwrap_or((0, 0))
}

/// Close one end. Wakes every waiter on both ends; once both ends are
/// closed the slot recycles.
pub fn pipe_close_end(id: PipeId, end: PipeEnd) {
    let Some(pipe) = slot(id) else {
        return;
    };
    {
        let mut inner = pipe.inner.lock();
        if !inner.active {
            return;
        }
        match end {
            PipeEnd::Read => inner.read_closed = true,
            PipeEnd::Write => inner.write_closed = true,
        }
        if inner.read_closed && inner.write_closed {
            inner.active = false;
        }
    }
    pipe.data_sem.wake_all();
    pipe.space_sem.wake_all();
    poll_notify();
}

pub fn pipe_poll_ready(id: PipeId, end: PipeEnd, events: u16) -> u16 {
    let Some(pipe) = slot(id) else {
        return 0;
    };
    let inner = pipe.inner.lock();
    let mut revents = 0;
    match end {
        PipeEnd::Read => {
            if inner.ring.len() > 0 || inner.write_closed {
                revents |= POLLIN;
            }
            if inner.write_closed {
                revents |= POLLHUP;
            }
        }
        PipeEnd::Write => {
            if inner.read_closed {
                revents |= POLLHUP;
            } else if inner.ring.free() > 0 {
                revents |= POLLOUT;
            }
        }
    }
    revents & (events | POLLHUP)
}
