//! Move and resize drags.
//!
//! A drag detaches a tiled view from its tree (it becomes floating)
//! and takes a WM pointer grab so every motion event reaches the WM
//! regardless of what the pointer crosses. Move drags stream MOVE
//! commands; resize drags stream a preview outline and commit the final
//! geometry (clamped to the minimums) on release.

use yula_abi::input::BUTTON_LEFT;

use super::{MAX_VIEWS, RESIZE_HIT_PX, RESIZE_MIN_H, RESIZE_MIN_W, View, WmLink, WmState, layout};

pub const EDGE_LEFT: u32 = 1;
pub const EDGE_RIGHT: u32 = 2;
pub const EDGE_TOP: u32 = 4;
pub const EDGE_BOTTOM: u32 = 8;

pub struct DragState {
    pub active: bool,
    pub view_idx: i32,
    pub is_resize: bool,
    pub button_mask: u32,

    off_x: i32,
    off_y: i32,

    resize_edges: u32,
    start_px: i32,
    start_py: i32,
    start_x: i32,
    start_y: i32,
    start_w: u32,
    start_h: u32,
    new_x: i32,
    new_y: i32,
    new_w: u32,
    new_h: u32,
}

impl DragState {
    pub const fn new() -> Self {
        Self {
            active: false,
            view_idx: -1,
            is_resize: false,
            button_mask: 0,
            off_x: 0,
            off_y: 0,
            resize_edges: 0,
            start_px: 0,
            start_py: 0,
            start_x: 0,
            start_y: 0,
            start_w: 0,
            start_h: 0,
            new_x: 0,
            new_y: 0,
            new_w: 0,
            new_h: 0,
        }
    }

    pub fn cancel(&mut self) {
        *self = Self::new();
    }
}

impl Default for DragState {
    fn default() -> Self {
        Self::new()
    }
}

/// Edge bitmask for a pointer position within `RESIZE_HIT_PX` of the
/// view's borders; 0 when outside the view or in its interior.
pub fn resize_edges_for_point(view: &View, px: i32, py: i32) -> u32 {
    if view.w == 0 || view.h == 0 {
        return 0;
    }
    let lx = px - view.x;
    let ly = py - view.y;
    if lx < 0 || ly < 0 || lx >= view.w as i32 || ly >= view.h as i32 {
        return 0;
    }

    let mut edges = 0;
    if lx < RESIZE_HIT_PX {
        edges |= EDGE_LEFT;
    }
    if lx >= view.w as i32 - RESIZE_HIT_PX {
        edges |= EDGE_RIGHT;
    }
    if ly < RESIZE_HIT_PX {
        edges |= EDGE_TOP;
    }
    if ly >= view.h as i32 - RESIZE_HIT_PX {
        edges |= EDGE_BOTTOM;
    }
    edges
}

/// A tiled view leaves the tree and floats before any drag.
fn float_view(link: &mut WmLink, st: &mut WmState, idx: usize) {
    if !st.views[idx].floating {
        st.views[idx].floating = true;
        let ws = st.views[idx].workspace;
        layout::remove_view(st, ws, idx);
        layout::apply_layout(link, st);
    }
}

pub fn start_move(link: &mut WmLink, st: &mut WmState, idx: usize, px: i32, py: i32, button_mask: u32) {
    if idx >= MAX_VIEWS || st.views[idx].ui {
        return;
    }
    if !st.is_visible_on_active_ws(&st.views[idx]) {
        return;
    }

    float_view(link, st, idx);

    let view = st.views[idx];
    st.drag.cancel();
    st.drag.active = true;
    st.drag.view_idx = idx as i32;
    st.drag.is_resize = false;
    st.drag.button_mask = button_mask;
    st.drag.off_x = px - view.x;
    st.drag.off_y = py - view.y;
    link.pointer_grab(view.client_id, view.surface_id, true);
}

pub fn start_resize(
    link: &mut WmLink,
    st: &mut WmState,
    idx: usize,
    px: i32,
    py: i32,
    button_mask: u32,
    edges: u32,
) {
    if idx >= MAX_VIEWS || st.views[idx].ui || edges == 0 {
        return;
    }
    if !st.is_visible_on_active_ws(&st.views[idx]) {
        return;
    }

    float_view(link, st, idx);

    let view = st.views[idx];
    st.drag.cancel();
    st.drag.active = true;
    st.drag.view_idx = idx as i32;
    st.drag.is_resize = true;
    st.drag.button_mask = button_mask;
    st.drag.resize_edges = edges;
    st.drag.start_px = px;
    st.drag.start_py = py;
    st.drag.start_x = view.x;
    st.drag.start_y = view.y;
    st.drag.start_w = view.w;
    st.drag.start_h = view.h;
    st.drag.new_x = view.x;
    st.drag.new_y = view.y;
    st.drag.new_w = view.w;
    st.drag.new_h = view.h;
    link.pointer_grab(view.client_id, view.surface_id, true);
}

fn update_resize(st: &mut WmState, px: i32, py: i32) {
    let dx = px - st.drag.start_px;
    let dy = py - st.drag.start_py;

    let mut x = st.drag.start_x;
    let mut y = st.drag.start_y;
    let mut w = st.drag.start_w as i32;
    let mut h = st.drag.start_h as i32;

    if st.drag.resize_edges & EDGE_RIGHT != 0 {
        w += dx;
    }
    if st.drag.resize_edges & EDGE_BOTTOM != 0 {
        h += dy;
    }
    if st.drag.resize_edges & EDGE_LEFT != 0 {
        x += dx;
        w -= dx;
    }
    if st.drag.resize_edges & EDGE_TOP != 0 {
        y += dy;
        h -= dy;
    }

    // Clamp, keeping the fixed edge pinned.
    if w < RESIZE_MIN_W as i32 {
        if st.drag.resize_edges & EDGE_LEFT != 0 {
            x -= RESIZE_MIN_W as i32 - w;
        }
        w = RESIZE_MIN_W as i32;
    }
    if h < RESIZE_MIN_H as i32 {
        if st.drag.resize_edges & EDGE_TOP != 0 {
            y -= RESIZE_MIN_H as i32 - h;
        }
        h = RESIZE_MIN_H as i32;
    }

    st.drag.new_x = x;
    st.drag.new_y = y;
    st.drag.new_w = w as u32;
    st.drag.new_h = h as u32;
}

fn stop_drag(link: &mut WmLink, st: &mut WmState) {
    let idx = st.drag.view_idx;
    if (0..MAX_VIEWS as i32).contains(&idx) {
        let idx = idx as usize;
        let view = st.views[idx];
        if view.mapped && view.surface_id != 0 {
            if st.drag.is_resize && st.drag.new_w > 0 && st.drag.new_h > 0 {
                link.move_to(view.client_id, view.surface_id, st.drag.new_x, st.drag.new_y);
                link.resize(
                    view.client_id,
                    view.surface_id,
                    st.drag.new_w as i32,
                    st.drag.new_h as i32,
                );
                st.views[idx].x = st.drag.new_x;
                st.views[idx].y = st.drag.new_y;
                st.views[idx].w = st.drag.new_w;
                st.views[idx].h = st.drag.new_h;
                link.preview_clear();
            }
            link.pointer_grab(view.client_id, view.surface_id, false);
        }
    }
    st.drag.cancel();
}

/// Pointer motion during an active drag.
pub fn on_pointer(link: &mut WmLink, st: &mut WmState, px: i32, py: i32, buttons: u32) {
    if !st.drag.active {
        return;
    }
    let mask = if st.drag.button_mask != 0 { st.drag.button_mask } else { BUTTON_LEFT };
    if buttons & mask == 0 {
        stop_drag(link, st);
        return;
    }

    let idx = st.drag.view_idx;
    if !(0..MAX_VIEWS as i32).contains(&idx) {
        st.drag.cancel();
        return;
    }
    let idx = idx as usize;

    if st.drag.is_resize {
        update_resize(st, px, py);
        link.preview_rect(st.drag.new_x, st.drag.new_y, st.drag.new_w, st.drag.new_h);
    } else {
        let view = st.views[idx];
        let nx = px - st.drag.off_x;
        let ny = py - st.drag.off_y;
        if nx != view.x || ny != view.y {
            link.move_to(view.client_id, view.surface_id, nx, ny);
            st.views[idx].x = nx;
            st.views[idx].y = ny;
        }
    }
}
