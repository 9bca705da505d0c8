//! Platform seams: timer, framebuffer, and input sources.
//!
//! The APIC timer, display scanout, and PS/2 controllers live outside
//! this tree. Whatever provides them registers these tables at boot;
//! consumers in `core` and the syscall handlers only ever see the
//! function-pointer surface.

use yula_abi::VirtAddr;
use yula_abi::input::{KeyEvent, MouseState};

use crate::ServiceCell;

#[derive(Clone, Copy, Debug, Default)]
pub struct FramebufferInfo {
    pub base: u64,
    pub width: u32,
    pub height: u32,
    /// Pixels per scanline (may exceed `width`).
    pub pitch: u32,
    pub bytes_per_pixel: u32,
}

pub struct PlatformServices {
    /// Timer tick rate in Hz. The scheduler converts ms deadlines with it.
    pub timer_frequency: fn() -> u32,
    pub framebuffer_info: fn() -> Option<FramebufferInfo>,
    /// Kernel-mapped base of the framebuffer, if any.
    pub framebuffer_base: fn() -> VirtAddr,
    /// Pop one raw byte from the keyboard queue; -1 when empty.
    pub kbd_pop_byte: fn() -> i32,
    /// Latest decoded key transition, if one is queued.
    pub poll_key_event: fn(out: &mut KeyEvent) -> bool,
    /// Current pointer snapshot; returns false while no pointer exists.
    pub poll_mouse_state: fn(out: &mut MouseState) -> bool,
}

fn default_timer_frequency() -> u32 {
    1000
}

fn no_fb_info() -> Option<FramebufferInfo> {
    None
}

fn no_fb_base() -> VirtAddr {
    VirtAddr::NULL
}

fn no_kbd_byte() -> i32 {
    -1
}

fn no_key_event(_out: &mut KeyEvent) -> bool {
    false
}

fn no_mouse_state(_out: &mut MouseState) -> bool {
    false
}

static FALLBACK: PlatformServices = PlatformServices {
    timer_frequency: default_timer_frequency,
    framebuffer_info: no_fb_info,
    framebuffer_base: no_fb_base,
    kbd_pop_byte: no_kbd_byte,
    poll_key_event: no_key_event,
    poll_mouse_state: no_mouse_state,
};

static PLATFORM: ServiceCell<PlatformServices> = ServiceCell::new(&FALLBACK);

pub fn register_platform(table: &'static PlatformServices) {
    PLATFORM.register(table);
}

#[inline]
pub fn timer_frequency() -> u32 {
    (PLATFORM.get().timer_frequency)()
}

#[inline]
pub fn framebuffer_info() -> Option<FramebufferInfo> {
    (PLATFORM.get().framebuffer_info)()
}

#[inline]
pub fn framebuffer_base() -> VirtAddr {
    (PLATFORM.get().framebuffer_base)()
}

#[inline]
pub fn kbd_pop_byte() -> i32 {
    (PLATFORM.get().kbd_pop_byte)()
}

#[inline]
pub fn poll_key_event(out: &mut KeyEvent) -> bool {
    (PLATFORM.get().poll_key_event)(out)
}

#[inline]
pub fn poll_mouse_state(out: &mut MouseState) -> bool {
    (PLATFORM.get().poll_mouse_state)(out)
}
