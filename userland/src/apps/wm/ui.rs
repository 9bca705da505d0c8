//! The status bar.
//!
//! The WM owns one full-width, 24-pixel surface with a fixed id backed
//! by a named SHM object. One marker per workspace, the active one
//! highlighted; clicks are hit-tested in `workspace_at`. Every layout
//! pass raises the bar and pins it at (0, 0).

use yula_abi::comp::{self, CLIENT_NONE};

use super::{MAX_WORKSPACES, WmLink, WmState};
use crate::comp::Connection;
use crate::syscall::mem;

pub const BAR_HEIGHT: u32 = 24;
pub const BAR_SURFACE_ID: u32 = 1000;

const BAR_SHM_NAME: &[u8] = b"wm_bar";

const GLYPH_W: i32 = 18;
const GLYPH_H: i32 = 14;
const GLYPH_GAP: i32 = 6;
const GLYPH_X0: i32 = 8;
const GLYPH_Y0: i32 = 5;

const COLOR_BAR_BG: u32 = 0xFF18_1A20;
const COLOR_WS: u32 = 0xFF3A_4150;
const COLOR_WS_ACTIVE: u32 = 0xFF78_A8F0;

pub struct BarState {
    pub client_id: u32,
    pub surface_id: u32,
    pub width: u32,
    pub shm_fd: i32,
    pub map_base: u64,
    pub map_size: u32,
    created: bool,
}

impl BarState {
    pub const fn new() -> Self {
        Self {
            client_id: CLIENT_NONE,
            surface_id: 0,
            width: 0,
            shm_fd: -1,
            map_base: 0,
            map_size: 0,
            created: false,
        }
    }

    pub fn is_bar(&self, client_id: u32, surface_id: u32) -> bool {
        self.created && client_id == self.client_id && surface_id == self.surface_id
    }

    pub fn height(&self) -> u32 {
        if self.created { BAR_HEIGHT } else { 0 }
    }
}

impl Default for BarState {
    fn default() -> Self {
        Self::new()
    }
}

/// Screen size probe: the compositor owns the framebuffer, so the WM
/// learns the dimensions from the platform seam.
pub fn read_screen_size() -> Option<(u32, u32)> {
    yula_lib::kernel_services::platform::framebuffer_info().map(|info| (info.width, info.height))
}

/// Create, draw, and commit the bar surface.
pub fn create_bar(conn: &mut Connection, st: &mut WmState, client_id: u32) {
    if !st.have_screen {
        if let Some((w, h)) = read_screen_size() {
            st.screen_w = w;
            st.screen_h = h;
            st.have_screen = true;
        } else {
            return;
        }
    }

    let width = st.screen_w;
    let size = width * BAR_HEIGHT * 4;

    let shm_fd = mem::shm_create_named(BAR_SHM_NAME, size);
    if shm_fd < 0 {
        return;
    }
    let base = mem::mmap(shm_fd as i32, size, yula_abi::syscall::MAP_SHARED);
    if base == 0 {
        crate::syscall::fs::close(shm_fd as i32);
        mem::shm_unlink_named(BAR_SHM_NAME);
        return;
    }

    if conn
        .send_attach_shm_name_sync(BAR_SURFACE_ID, BAR_SHM_NAME, size, width, BAR_HEIGHT, width, 0)
        .is_err()
    {
        mem::munmap(base, size as u64);
        crate::syscall::fs::close(shm_fd as i32);
        mem::shm_unlink_named(BAR_SHM_NAME);
        return;
    }

    st.ui.client_id = client_id;
    st.ui.surface_id = BAR_SURFACE_ID;
    st.ui.width = width;
    st.ui.shm_fd = shm_fd as i32;
    st.ui.map_base = base;
    st.ui.map_size = size;
    st.ui.created = true;

    draw_bar(conn, st);
}

fn fill_rect(base: u64, stride: u32, x0: i32, y0: i32, w: i32, h: i32, color: u32) {
    for y in y0..y0 + h {
        if y < 0 || y >= BAR_HEIGHT as i32 {
            continue;
        }
        // SAFETY: the mapping spans stride * BAR_HEIGHT pixels; x is
        // clamped below.
        let row = unsafe { (base as *mut u32).add(y as usize * stride as usize) };
        for x in x0..x0 + w {
            if x < 0 || x as u32 >= stride {
                continue;
            }
            unsafe { row.add(x as usize).write_volatile(color) };
        }
    }
}

/// Repaint the bar pixels and commit at (0, 0), raised.
pub fn draw_bar(conn: &mut Connection, st: &mut WmState) {
    if !st.ui.created {
        return;
    }
    let base = st.ui.map_base;
    let stride = st.ui.width;

    fill_rect(base, stride, 0, 0, stride as i32, BAR_HEIGHT as i32, COLOR_BAR_BG);
    for ws in 0..MAX_WORKSPACES {
        let x = GLYPH_X0 + ws as i32 * (GLYPH_W + GLYPH_GAP);
        let color = if ws as u32 == st.active_ws { COLOR_WS_ACTIVE } else { COLOR_WS };
        fill_rect(base, stride, x, GLYPH_Y0, GLYPH_W, GLYPH_H, color);
    }

    let _ = conn.send_commit(st.ui.surface_id, 0, 0, comp::COMMIT_FLAG_RAISE);
}

/// Which workspace marker a bar-local x coordinate hits.
pub fn workspace_at(st: &WmState, local_x: i32) -> Option<u32> {
    if !st.ui.created {
        return None;
    }
    for ws in 0..MAX_WORKSPACES {
        let x = GLYPH_X0 + ws as i32 * (GLYPH_W + GLYPH_GAP);
        if local_x >= x && local_x < x + GLYPH_W {
            return Some(ws as u32);
        }
    }
    None
}

/// Keep the bar on top and pinned at the origin.
pub fn raise_and_place(link: &mut WmLink, st: &WmState) {
    if !st.ui.created {
        return;
    }
    link.raise(st.ui.client_id, st.ui.surface_id);
    link.move_to(st.ui.client_id, st.ui.surface_id, 0, 0);
}
