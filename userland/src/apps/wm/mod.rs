//! The tiling window manager.
//!
//! Two connections to the compositor: the command/event channel on
//! `flux-wm` (WM_EVENT in, WM_CMD out) and an ordinary client
//! connection for the status-bar surface. Per workspace the WM keeps an
//! independent BSP layout tree; mapped non-floating views tile, floating
//! views keep their free geometry, the bar stays on top.

pub mod drag;
pub mod layout;
pub mod ui;

use yula_abi::comp::{self, CLIENT_NONE, WmCmd, WmEvent};
use yula_abi::input::{BUTTON_LEFT, KEY_STATE_DOWN, MOD_SUPER};

use crate::comp::{Connection, next_frame_from_ring};
use crate::syscall::{self, fs};

pub const MAX_WORKSPACES: usize = 4;
pub const MAX_VIEWS: usize = 64;
pub const MAX_LAYOUT_NODES: usize = 128;

pub const RESIZE_MIN_W: u32 = 120;
pub const RESIZE_MIN_H: u32 = 90;
pub const RESIZE_HIT_PX: i32 = 6;

pub const GAP_OUTER: i32 = 8;
pub const GAP_INNER: i32 = 6;

/// Off-screen parking position for hidden views.
pub const HIDE_POS: i32 = -20000;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SplitDir {
    Vertical,
    Horizontal,
}

#[derive(Clone, Copy)]
pub struct View {
    pub mapped: bool,
    pub client_id: u32,
    pub surface_id: u32,
    pub workspace: u32,
    pub floating: bool,
    pub focused: bool,
    pub hidden: bool,
    pub ui: bool,
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
    pub last_x: i32,
    pub last_y: i32,
}

impl View {
    pub const fn empty() -> Self {
        Self {
            mapped: false,
            client_id: CLIENT_NONE,
            surface_id: 0,
            workspace: 0,
            floating: false,
            focused: false,
            hidden: false,
            ui: false,
            x: 0,
            y: 0,
            w: 0,
            h: 0,
            last_x: 0,
            last_y: 0,
        }
    }
}

#[derive(Clone, Copy)]
pub struct LayoutNode {
    pub used: bool,
    pub workspace: u32,
    pub parent: i32,
    pub a: i32,
    pub b: i32,
    pub is_split: bool,
    pub split_dir: SplitDir,
    pub view_idx: i32,
}

impl LayoutNode {
    pub const fn empty() -> Self {
        Self {
            used: false,
            workspace: 0,
            parent: -1,
            a: -1,
            b: -1,
            is_split: false,
            split_dir: SplitDir::Vertical,
            view_idx: -1,
        }
    }
}

pub struct WmState {
    pub views: [View; MAX_VIEWS],
    pub layout_nodes: [LayoutNode; MAX_LAYOUT_NODES],
    pub layout_root: [i32; MAX_WORKSPACES],
    pub active_ws: u32,
    pub focused_idx: i32,
    pub screen_w: u32,
    pub screen_h: u32,
    pub have_screen: bool,
    pub drag: drag::DragState,
    pub ui: ui::BarState,
    pub super_held: bool,
}

impl WmState {
    pub const fn new() -> Self {
        Self {
            views: [View::empty(); MAX_VIEWS],
            layout_nodes: [LayoutNode::empty(); MAX_LAYOUT_NODES],
            layout_root: [-1; MAX_WORKSPACES],
            active_ws: 0,
            focused_idx: -1,
            screen_w: 0,
            screen_h: 0,
            have_screen: false,
            drag: drag::DragState::new(),
            ui: ui::BarState::new(),
            super_held: false,
        }
    }

    pub fn find_view(&self, client_id: u32, surface_id: u32) -> Option<usize> {
        if surface_id == 0 {
            return None;
        }
        self.views.iter().position(|v| {
            v.mapped && v.client_id == client_id && v.surface_id == surface_id
        })
    }

    pub fn get_or_create_view(&mut self, client_id: u32, surface_id: u32) -> Option<usize> {
        if surface_id == 0 {
            return None;
        }
        if let Some(idx) = self.find_view(client_id, surface_id) {
            return Some(idx);
        }
        let idx = self.views.iter().position(|v| !v.mapped)?;
        self.views[idx] = View::empty();
        self.views[idx].mapped = true;
        self.views[idx].client_id = client_id;
        self.views[idx].surface_id = surface_id;
        self.views[idx].workspace = self.active_ws;
        Some(idx)
    }

    pub fn drop_view(&mut self, idx: usize) {
        if idx < MAX_VIEWS {
            self.views[idx] = View::empty();
        }
        if self.focused_idx == idx as i32 {
            self.focused_idx = -1;
        }
    }

    pub fn clear_focus(&mut self) {
        for view in self.views.iter_mut() {
            view.focused = false;
        }
        self.focused_idx = -1;
    }

    pub fn is_visible_on_active_ws(&self, view: &View) -> bool {
        if !view.mapped {
            return false;
        }
        if view.ui {
            return true;
        }
        view.workspace == self.active_ws && !view.hidden
    }
}

impl Default for WmState {
    fn default() -> Self {
        Self::new()
    }
}

// --- command helpers (WM -> compositor) ---

pub struct WmLink {
    pub fd_cmd_w: i32,
    pub fd_ev_r: i32,
    seq: u32,
    rx: yula_lib::ring_buffer::ByteRing<4096>,
}

impl WmLink {
    pub fn connect() -> Option<Self> {
        let mut fds = [-1i32; 2];
        if crate::syscall::ipc::ipc_connect(b"flux-wm", &mut fds) != 0 {
            return None;
        }
        Some(Self {
            fd_cmd_w: fds[0],
            fd_ev_r: fds[1],
            seq: 1,
            rx: yula_lib::ring_buffer::ByteRing::new(),
        })
    }

    pub fn send_cmd(&mut self, cmd: &WmCmd) -> bool {
        let mut payload = [0u8; WmCmd::WIRE_SIZE];
        if cmd.encode(&mut payload).is_none() {
            return false;
        }
        let mut frame = [0u8; comp::MAX_FRAME];
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        let Some(len) = comp::encode_frame(&mut frame, comp::MSG_WM_CMD, seq, &payload) else {
            return false;
        };
        fs::write_full(self.fd_cmd_w, &frame[..len]) >= 0
    }

    pub fn next_event(&mut self) -> Option<WmEvent> {
        loop {
            if let Some(frame) = next_frame_from_ring(&mut self.rx) {
                if frame.header.msg_type == comp::MSG_WM_EVENT {
                    if let Some(ev) = WmEvent::decode(frame.payload_bytes()) {
                        return Some(ev);
                    }
                }
                continue;
            }
            let mut chunk = [0u8; 256];
            let n = fs::pipe_try_read(self.fd_ev_r, &mut chunk);
            if n <= 0 {
                return None;
            }
            self.rx.push(&chunk[..n as usize]);
        }
    }

    pub fn focus(&mut self, client_id: u32, surface_id: u32) {
        self.send_cmd(&WmCmd { kind: comp::WM_CMD_FOCUS, client_id, surface_id, ..WmCmd::default() });
    }

    pub fn raise(&mut self, client_id: u32, surface_id: u32) {
        self.send_cmd(&WmCmd { kind: comp::WM_CMD_RAISE, client_id, surface_id, ..WmCmd::default() });
    }

    pub fn move_to(&mut self, client_id: u32, surface_id: u32, x: i32, y: i32) {
        self.send_cmd(&WmCmd { kind: comp::WM_CMD_MOVE, client_id, surface_id, x, y, ..WmCmd::default() });
    }

    pub fn resize(&mut self, client_id: u32, surface_id: u32, w: i32, h: i32) {
        self.send_cmd(&WmCmd {
            kind: comp::WM_CMD_RESIZE,
            client_id,
            surface_id,
            x: w,
            y: h,
            ..WmCmd::default()
        });
    }

    pub fn close(&mut self, client_id: u32, surface_id: u32) {
        self.send_cmd(&WmCmd { kind: comp::WM_CMD_CLOSE, client_id, surface_id, ..WmCmd::default() });
    }

    pub fn pointer_grab(&mut self, client_id: u32, surface_id: u32, active: bool) {
        self.send_cmd(&WmCmd {
            kind: comp::WM_CMD_POINTER_GRAB,
            client_id,
            surface_id,
            flags: active as u32,
            ..WmCmd::default()
        });
    }

    /// Preview rect: width/height packed into flags as `(w << 16) | h`.
    pub fn preview_rect(&mut self, x: i32, y: i32, w: u32, h: u32) {
        self.send_cmd(&WmCmd {
            kind: comp::WM_CMD_PREVIEW_RECT,
            client_id: CLIENT_NONE,
            surface_id: 0,
            x,
            y,
            flags: (w.min(0xFFFF) << 16) | h.min(0xFFFF),
        });
    }

    pub fn preview_clear(&mut self) {
        self.send_cmd(&WmCmd {
            kind: comp::WM_CMD_PREVIEW_CLEAR,
            client_id: CLIENT_NONE,
            ..WmCmd::default()
        });
    }
}

// --- view-level operations ---

pub fn hide_view(link: &mut WmLink, view: &mut View) {
    if !view.mapped || view.ui || view.hidden {
        return;
    }
    view.hidden = true;
    view.last_x = view.x;
    view.last_y = view.y;
    view.x = HIDE_POS;
    view.y = HIDE_POS;
    link.move_to(view.client_id, view.surface_id, view.x, view.y);
}

pub fn show_view(link: &mut WmLink, view: &mut View) {
    if !view.mapped || view.ui || !view.hidden {
        return;
    }
    view.hidden = false;
    view.x = view.last_x;
    view.y = view.last_y;
    link.move_to(view.client_id, view.surface_id, view.x, view.y);
}

pub fn focus_view(link: &mut WmLink, st: &mut WmState, idx: usize) {
    if idx >= MAX_VIEWS {
        return;
    }
    let view = st.views[idx];
    if !st.is_visible_on_active_ws(&view) || view.ui {
        return;
    }
    st.clear_focus();
    st.views[idx].focused = true;
    st.focused_idx = idx as i32;
    link.focus(view.client_id, view.surface_id);
    link.raise(view.client_id, view.surface_id);
    ui::raise_and_place(link, st);
}

pub fn switch_workspace(link: &mut WmLink, st: &mut WmState, conn: &mut Connection, ws: u32) {
    if ws as usize >= MAX_WORKSPACES || ws == st.active_ws {
        return;
    }
    st.active_ws = ws;
    st.drag.cancel();
    layout::apply_layout(link, st);
    ui::draw_bar(conn, st);
}

// --- event handling ---

fn handle_map(link: &mut WmLink, st: &mut WmState, ev: &WmEvent) {
    let Some(idx) = st.get_or_create_view(ev.client_id, ev.surface_id) else {
        return;
    };
    {
        let view = &mut st.views[idx];
        view.x = ev.sx;
        view.y = ev.sy;
        view.w = ev.sw;
        view.h = ev.sh;
    }

    // Our own bar surface never tiles.
    if st.ui.is_bar(ev.client_id, ev.surface_id) {
        st.views[idx].ui = true;
        ui::raise_and_place(link, st);
        return;
    }

    layout::insert_view(st, idx);
    layout::apply_layout(link, st);
    focus_view(link, st, idx);
}

fn handle_unmap(link: &mut WmLink, st: &mut WmState, ev: &WmEvent) {
    let Some(idx) = st.find_view(ev.client_id, ev.surface_id) else {
        return;
    };
    let ws = st.views[idx].workspace;
    if !st.views[idx].floating && !st.views[idx].ui {
        layout::remove_view(st, ws, idx);
    }
    if st.drag.view_idx == idx as i32 {
        st.drag.cancel();
    }
    st.drop_view(idx);
    layout::apply_layout(link, st);

    // Focus falls back to any visible view on the workspace.
    if st.focused_idx < 0 {
        let next = (0..MAX_VIEWS).find(|&i| {
            let v = &st.views[i];
            v.mapped && !v.ui && st.is_visible_on_active_ws(v)
        });
        if let Some(next) = next {
            focus_view(link, st, next);
        }
    }
}

fn handle_commit(st: &mut WmState, ev: &WmEvent) {
    if let Some(idx) = st.find_view(ev.client_id, ev.surface_id) {
        let view = &mut st.views[idx];
        if !view.hidden {
            view.x = ev.sx;
            view.y = ev.sy;
        }
        view.w = ev.sw;
        view.h = ev.sh;
    }
}

fn handle_click(link: &mut WmLink, st: &mut WmState, conn: &mut Connection, ev: &WmEvent) {
    // Bar clicks switch workspaces.
    if st.ui.is_bar(ev.client_id, ev.surface_id) {
        if let Some(ws) = ui::workspace_at(st, ev.px) {
            switch_workspace(link, st, conn, ws);
        }
        return;
    }

    if ev.client_id == CLIENT_NONE || ev.flags & comp::WM_EVENT_FLAG_BACKGROUND != 0 {
        return;
    }
    let Some(idx) = st.find_view(ev.client_id, ev.surface_id) else {
        return;
    };

    focus_view(link, st, idx);

    // Edge hit starts a resize drag; super-click starts a move drag.
    let edges = drag::resize_edges_for_point(&st.views[idx], ev.px, ev.py);
    if edges != 0 {
        drag::start_resize(link, st, idx, ev.px, ev.py, BUTTON_LEFT, edges);
    } else if st.super_held {
        drag::start_move(link, st, idx, ev.px, ev.py, BUTTON_LEFT);
    }
}

fn handle_pointer(link: &mut WmLink, st: &mut WmState, ev: &WmEvent) {
    if st.drag.active {
        drag::on_pointer(link, st, ev.px, ev.py, ev.buttons);
    }
}

fn handle_key(link: &mut WmLink, st: &mut WmState, conn: &mut Connection, ev: &WmEvent) {
    // Track the modifier for drag starts.
    if ev.flags & MOD_SUPER != 0 {
        st.super_held = ev.key_state == KEY_STATE_DOWN;
    }

    // Super+1..4: workspace switch (ASCII digit keycodes).
    if st.super_held && ev.key_state == KEY_STATE_DOWN {
        if let 0x31..=0x34 = ev.keycode {
            switch_workspace(link, st, conn, ev.keycode - 0x31);
        }
        // Super+Enter: launcher. Spawn failure is fine when the binary
        // is not installed.
        if ev.keycode == KEYCODE_ENTER {
            let _ = syscall::process::spawn_process(LAUNCHER_PATH, 0, 0);
        }
    }
}

const KEYCODE_ENTER: u32 = 13;
const LAUNCHER_PATH: &[u8] = b"/bin/launcher";

const _: () = assert!(MAX_WORKSPACES >= 4);

/// WM state lives in a static: the view and layout arenas are too big
/// for a kernel stack, and only the single WM task touches them.
struct StateCell(core::cell::UnsafeCell<WmState>);

// SAFETY: only the WM task dereferences the cell.
unsafe impl Sync for StateCell {}

static WM_STATE: StateCell = StateCell(core::cell::UnsafeCell::new(WmState::new()));

/// Window manager task entry point.
pub extern "C" fn wm_main(_arg: u64) {
    let Some(mut link) = WmLink::connect() else {
        syscall::exit(1);
    };

    let Some(mut conn) = Connection::connect(comp::COMPOSITOR_ENDPOINT.as_bytes()) else {
        syscall::exit(1);
    };
    let Ok(client_id) = conn.send_hello_sync() else {
        syscall::exit(1);
    };

    // SAFETY: one WM task; nothing else reaches this cell.
    let st = unsafe { &mut *WM_STATE.0.get() };
    ui::create_bar(&mut conn, st, client_id);

    loop {
        let mut idle = true;
        while let Some(ev) = link.next_event() {
            idle = false;
            match ev.kind {
                comp::WM_EVENT_MAP => handle_map(&mut link, st, &ev),
                comp::WM_EVENT_UNMAP => handle_unmap(&mut link, st, &ev),
                comp::WM_EVENT_COMMIT => handle_commit(st, &ev),
                comp::WM_EVENT_CLICK => handle_click(&mut link, st, &mut conn, &ev),
                comp::WM_EVENT_POINTER => handle_pointer(&mut link, st, &ev),
                comp::WM_EVENT_KEY => handle_key(&mut link, st, &mut conn, &ev),
                _ => {}
            }
        }

        // Drain our client connection too (ACKs, input on the bar).
        while conn.next_event().is_some() {}

        if idle {
            syscall::usleep(2000);
        }
    }
}
