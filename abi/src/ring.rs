//! Shared-memory input ring layout (lock-free SPSC).
//!
//! The ring lives in a named SHM object created by the client and attached
//! via `MSG_INPUT_RING_NAME`. Producer is the compositor, consumer is the
//! client; `r` and `w` are free-running monotonic cursors so `w - r` is the
//! fill level even across wrap. The WAIT flags pair with futex sleeps on
//! the opposite cursor; the waker clears the flag before waking.
//!
//! Layout (all fields u32, little-endian, followed by `cap` event slots of
//! [`crate::comp::InputEvent::WIRE_SIZE`] bytes each):
//!
//! ```text
//! +0  magic      +4  version    +8  cap        +12 mask
//! +16 r          +20 w          +24 dropped    +28 flags
//! +32 events[cap]
//! ```

use crate::comp::InputEvent;

pub const INPUT_RING_MAGIC: u32 = 0x4952_5043; // "CPRI"
pub const INPUT_RING_VERSION: u32 = 1;

/// Default capacity. Must be a power of two.
pub const INPUT_RING_CAP: u32 = 2048;

pub const RING_FLAG_READY: u32 = 1;
pub const RING_FLAG_WAIT_W: u32 = 2;
pub const RING_FLAG_WAIT_R: u32 = 4;

pub const RING_OFF_MAGIC: usize = 0;
pub const RING_OFF_VERSION: usize = 4;
pub const RING_OFF_CAP: usize = 8;
pub const RING_OFF_MASK: usize = 12;
pub const RING_OFF_R: usize = 16;
pub const RING_OFF_W: usize = 20;
pub const RING_OFF_DROPPED: usize = 24;
pub const RING_OFF_FLAGS: usize = 28;
pub const RING_HEADER_SIZE: usize = 32;

/// Total byte size of a ring with `cap` slots.
pub const fn ring_size_bytes(cap: u32) -> usize {
    RING_HEADER_SIZE + cap as usize * InputEvent::WIRE_SIZE
}

/// Byte offset of slot `idx` (caller applies the mask).
pub const fn ring_slot_offset(idx: u32) -> usize {
    RING_HEADER_SIZE + idx as usize * InputEvent::WIRE_SIZE
}

/// A capacity is usable iff it is a nonzero power of two.
pub const fn ring_cap_valid(cap: u32) -> bool {
    cap != 0 && cap & (cap - 1) == 0
}
