//! Input sources for the compositor.
//!
//! Pointer and key events come straight off the platform seams; the
//! PS/2 decode path is an external collaborator feeding those queues.
//! The keyboard byte wrapper is the ordinary syscall.

use yula_abi::input::{KeyEvent, MouseState};
use yula_abi::syscall::SYS_KBD_TRY_READ;
use yula_lib::kernel_services::platform;

use super::raw;

/// Non-blocking keyboard byte; -1 when none queued.
pub fn kbd_try_read() -> i64 {
    raw(SYS_KBD_TRY_READ, 0, 0, 0)
}

/// Current pointer snapshot; false while no pointer device exists.
pub fn poll_mouse(out: &mut MouseState) -> bool {
    platform::poll_mouse_state(out)
}

/// Next decoded key transition, if any.
pub fn poll_key(out: &mut KeyEvent) -> bool {
    platform::poll_key_event(out)
}
