//! Keyboard byte queue and terminal mode.
//!
//! The PS/2 decode path is external; it feeds raw bytes in through
//! [`kbd_push_byte`] (typically from its IRQ handler). Tasks read with
//! [`kbd_read_byte`], which blocks until a byte arrives or a SIGINT
//! turns the wait into `-EINTR`. Terminal mode is a per-task flag; the
//! cooked-mode line discipline itself lives with the terminal emulator.

use yula_abi::task::{TERM_MODE_COOKED, TERM_MODE_RAW};
use yula_abi::{ERRNO_EINTR, ERRNO_EINVAL};
use yula_lib::{IrqMutex, RingBuffer, WaitQueue};

use crate::sched::signal::current_has_interrupt;
use crate::sched::task::current_task;

static KBD_QUEUE: IrqMutex<RingBuffer<u8, 256>> = IrqMutex::new(RingBuffer::new_with(0));
static KBD_WQ: WaitQueue = WaitQueue::new();

/// Feed one byte from the keyboard driver. Overwrites the oldest byte
/// when the queue is full (typing past a wedged reader must not wedge
/// the driver).
pub fn kbd_push_byte(byte: u8) {
    {
        let mut queue = KBD_QUEUE.lock();
        queue.push_overwrite(byte);
    }
    KBD_WQ.wake_one();
    yula_fs::poll::poll_notify();
}

/// Non-blocking read: the byte, or -1 when the queue is empty.
pub fn kbd_try_read() -> i64 {
    let mut queue = KBD_QUEUE.lock();
    match queue.try_pop() {
        Some(byte) => byte as i64,
        None => -1,
    }
}

/// Blocking read of one byte. Interrupted by SIGINT with `-EINTR`.
pub fn kbd_read_byte() -> i64 {
    loop {
        if let Some(byte) = KBD_QUEUE.lock().try_pop() {
            return byte as i64;
        }
        if current_has_interrupt() {
            return ERRNO_EINTR;
        }

        let task = current_task();
        if !task.is_null() {
            unsafe {
                (*task).block_reason = yula_abi::task::BlockReason::KeyboardWait;
            }
        }
        let ok = KBD_WQ.wait_event(|| {
            KBD_QUEUE.lock().len() > 0 || current_has_interrupt()
        });
        if !ok {
            return -1;
        }
    }
}

fn kbd_dev_read(_offset: u32, buf: &mut [u8]) -> i64 {
    if buf.is_empty() {
        return 0;
    }
    let byte = kbd_read_byte();
    if byte < 0 {
        return byte;
    }
    buf[0] = byte as u8;
    1
}

fn kbd_dev_write(_offset: u32, _buf: &[u8]) -> i64 {
    ERRNO_EINVAL
}

fn kbd_dev_poll(events: u16) -> u16 {
    if KBD_QUEUE.lock().len() > 0 {
        events & yula_abi::poll::POLLIN
    } else {
        0
    }
}

static KBD_DEVICE_OPS: yula_fs::devfs::DeviceOps = yula_fs::devfs::DeviceOps {
    read: kbd_dev_read,
    write: kbd_dev_write,
    poll_ready: kbd_dev_poll,
};

/// Publish `/dev/kbd`. Called once during boot.
pub fn tty_init() {
    if let Some(name) = yula_lib::FixedName::<32>::new(b"kbd") {
        let _ = yula_fs::devfs::devfs_register(&name, &KBD_DEVICE_OPS);
    }
}

/// `set_term_mode(mode)`: 0 = raw, 1 = cooked.
pub fn set_term_mode(mode: u32) -> i64 {
    if mode != TERM_MODE_RAW && mode != TERM_MODE_COOKED {
        return ERRNO_EINVAL;
    }
    let task = current_task();
    if task.is_null() {
        return ERRNO_EINVAL;
    }
    unsafe {
        (*task).term_mode = mode;
    }
    0
}

pub fn term_mode() -> u32 {
    let task = current_task();
    if task.is_null() {
        return TERM_MODE_COOKED;
    }
    unsafe { (*task).term_mode }
}
