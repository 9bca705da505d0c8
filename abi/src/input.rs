//! Raw input events as produced by the platform drivers (PS/2 keyboard
//! and mouse seams) and consumed by the compositor's input loop.

/// Mouse button bitmask.
pub const BUTTON_LEFT: u32 = 1;
pub const BUTTON_RIGHT: u32 = 2;
pub const BUTTON_MIDDLE: u32 = 4;

pub const KEY_STATE_UP: u32 = 0;
pub const KEY_STATE_DOWN: u32 = 1;

/// Modifier currently relevant to the WM (drag-with-modifier).
pub const MOD_SUPER: u32 = 1;

/// Snapshot of the pointer as maintained by the platform mouse source.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MouseState {
    pub x: i32,
    pub y: i32,
    pub buttons: u32,
}

/// A single keyboard transition.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeyEvent {
    pub keycode: u32,
    pub state: u32,
    pub modifiers: u32,
}
