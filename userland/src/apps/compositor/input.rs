//! Pointer and keyboard routing.
//!
//! Per tick the pointer target resolves in a fixed order: an explicit WM
//! pointer grab wins, then the implicit button-held grab, then top-most
//! pick by z. De-duplication runs after that resolution, keyed on the
//! `(x, y, buttons, client, surface)` tuple, so a grab or pick switch
//! with an otherwise identical pointer state is still suppressed.
//!
//! On the press edge the picked surface becomes the implicit grab target
//! and, with a WM attached, a CLICK event hands the focus decision to
//! the WM; without one, focus transfers locally and the surface raises.
//! The release edge ends the implicit grab. Key events go to the focus
//! surface unconditionally, unless the WM holds the keyboard.

use yula_abi::comp::{self, CLIENT_NONE, InputEvent, WmEvent};
use yula_abi::input::{BUTTON_LEFT, KeyEvent, MouseState};

use super::{Compositor, MAX_CLIENTS};
use crate::syscall::input as sys_input;

/// Conventional close keycode carried by WM_CMD_CLOSE delivery.
pub const KEYCODE_CLOSE: u32 = 0xFFFF;

pub struct InputState {
    pub focus_client: i32,
    pub focus_surface_id: u32,
    pub prev_buttons: u32,

    pub grab_active: bool,
    pub grab_client: i32,
    pub grab_surface_id: u32,

    pub wm_pointer_grab_active: bool,
    pub wm_pointer_grab_client: i32,
    pub wm_pointer_grab_surface_id: u32,
    pub wm_keyboard_grab_active: bool,

    // De-dup state for the client-bound pointer stream.
    last_mx: i32,
    last_my: i32,
    last_mb: u32,
    last_client: i32,
    last_surface_id: u32,

    // De-dup state for the WM-bound pointer stream.
    wm_last_mx: i32,
    wm_last_my: i32,
    wm_last_mb: u32,
    wm_last_client: i32,
    wm_last_surface_id: u32,

    mouse: MouseState,
    have_mouse: bool,
}

impl InputState {
    pub const fn new() -> Self {
        Self {
            focus_client: -1,
            focus_surface_id: 0,
            prev_buttons: 0,
            grab_active: false,
            grab_client: -1,
            grab_surface_id: 0,
            wm_pointer_grab_active: false,
            wm_pointer_grab_client: -1,
            wm_pointer_grab_surface_id: 0,
            wm_keyboard_grab_active: false,
            last_mx: i32::MIN,
            last_my: i32::MIN,
            last_mb: u32::MAX,
            last_client: -1,
            last_surface_id: 0,
            wm_last_mx: i32::MIN,
            wm_last_my: i32::MIN,
            wm_last_mb: u32::MAX,
            wm_last_client: -1,
            wm_last_surface_id: 0,
            mouse: MouseState { x: 0, y: 0, buttons: 0 },
            have_mouse: false,
        }
    }

    pub fn have_mouse(&self) -> bool {
        self.have_mouse
    }

    pub fn mouse_pos(&self) -> (i32, i32) {
        (self.mouse.x, self.mouse.y)
    }

    pub fn set_focus(&mut self, client: i32, surface_id: u32) {
        self.focus_client = client;
        self.focus_surface_id = surface_id;
    }

    pub fn wm_grab_start(&mut self, client: i32, surface_id: u32) {
        self.wm_pointer_grab_active = true;
        self.wm_pointer_grab_client = client;
        self.wm_pointer_grab_surface_id = surface_id;
    }

    pub fn wm_grab_end(&mut self) {
        self.wm_pointer_grab_active = false;
        self.wm_pointer_grab_client = -1;
        self.wm_pointer_grab_surface_id = 0;
    }

    pub fn wm_detached(&mut self) {
        self.wm_grab_end();
        self.wm_keyboard_grab_active = false;
    }

    pub fn client_gone(&mut self, client: i32) {
        if self.focus_client == client {
            self.focus_client = -1;
            self.focus_surface_id = 0;
        }
        if self.grab_client == client {
            self.grab_active = false;
            self.grab_client = -1;
            self.grab_surface_id = 0;
        }
        if self.wm_pointer_grab_client == client {
            self.wm_grab_end();
        }
    }

    pub fn surface_gone(&mut self, client: i32, surface_id: u32) {
        if self.focus_client == client && self.focus_surface_id == surface_id {
            self.focus_client = -1;
            self.focus_surface_id = 0;
        }
        if self.grab_client == client && self.grab_surface_id == surface_id {
            self.grab_active = false;
            self.grab_client = -1;
            self.grab_surface_id = 0;
        }
        if self.wm_pointer_grab_client == client && self.wm_pointer_grab_surface_id == surface_id {
            self.wm_grab_end();
        }
    }
}

fn surface_valid(server: &Compositor, client: i32, surface_id: u32) -> bool {
    if client < 0 || client as usize >= MAX_CLIENTS || surface_id == 0 {
        return false;
    }
    let c = &server.clients[client as usize];
    c.connected && c.surface_visible(surface_id).is_some()
}

/// Drop stale grab/focus targets before routing.
fn validate_targets(server: &mut Compositor) {
    let st = &mut server.input;

    if st.grab_active && !surface_valid_raw(&server.clients, st.grab_client, st.grab_surface_id) {
        st.grab_active = false;
        st.grab_client = -1;
        st.grab_surface_id = 0;
    }
    if st.wm_pointer_grab_active
        && !surface_valid_raw(&server.clients, st.wm_pointer_grab_client, st.wm_pointer_grab_surface_id)
    {
        st.wm_pointer_grab_active = false;
        st.wm_pointer_grab_client = -1;
        st.wm_pointer_grab_surface_id = 0;
    }
    if st.focus_client >= 0
        && !surface_valid_raw(&server.clients, st.focus_client, st.focus_surface_id)
    {
        st.focus_client = -1;
        st.focus_surface_id = 0;
    }
}

fn surface_valid_raw(clients: &[super::Client], client: i32, surface_id: u32) -> bool {
    if client < 0 || client as usize >= MAX_CLIENTS || surface_id == 0 {
        return false;
    }
    let c = &clients[client as usize];
    c.connected && c.surface_visible(surface_id).is_some()
}

/// Mirror the pointer to the WM (with its own de-dup tuple).
fn send_wm_pointer(server: &mut Compositor, ms: &MouseState) {
    if !server.wm.connected {
        return;
    }

    let (ci, sid) = resolve_pointer_target(server, ms);

    let st = &mut server.input;
    if ms.x == st.wm_last_mx
        && ms.y == st.wm_last_my
        && ms.buttons == st.wm_last_mb
        && ci == st.wm_last_client
        && sid == st.wm_last_surface_id
    {
        return;
    }
    st.wm_last_mx = ms.x;
    st.wm_last_my = ms.y;
    st.wm_last_mb = ms.buttons;
    st.wm_last_client = ci;
    st.wm_last_surface_id = sid;

    let mut ev = WmEvent {
        kind: comp::WM_EVENT_POINTER,
        px: ms.x,
        py: ms.y,
        buttons: ms.buttons,
        ..WmEvent::default()
    };
    if ci < 0 || sid == 0 {
        ev.client_id = CLIENT_NONE;
        ev.flags = comp::WM_EVENT_FLAG_BACKGROUND;
    } else {
        ev.client_id = ci as u32;
        ev.surface_id = sid;
        if let Some(s) = server.clients[ci as usize].surface_visible(sid) {
            ev.sx = s.x;
            ev.sy = s.y;
            ev.sw = s.width;
            ev.sh = s.height;
        }
    }
    server.send_wm_event(&ev, false);
}

/// Grab-then-pick target resolution, shared by both pointer streams.
fn resolve_pointer_target(server: &Compositor, ms: &MouseState) -> (i32, u32) {
    let st = &server.input;
    if st.wm_pointer_grab_active
        && surface_valid(server, st.wm_pointer_grab_client, st.wm_pointer_grab_surface_id)
    {
        return (st.wm_pointer_grab_client, st.wm_pointer_grab_surface_id);
    }
    if st.grab_active && surface_valid(server, st.grab_client, st.grab_surface_id) {
        return (st.grab_client, st.grab_surface_id);
    }
    match server.pick_surface_at(ms.x, ms.y) {
        Some((ci, sid)) => (ci, sid),
        None => (-1, 0),
    }
}

/// Press-edge handling: establish the implicit grab and route the click
/// decision (to the WM when attached, locally otherwise).
fn update_focus(server: &mut Compositor, ms: &MouseState) {
    let pressed_edge = ms.buttons & BUTTON_LEFT != 0 && server.input.prev_buttons & BUTTON_LEFT == 0;
    if !pressed_edge {
        return;
    }

    let picked = server.pick_surface_at(ms.x, ms.y);
    match picked {
        Some((ci, sid)) => {
            server.input.grab_active = true;
            server.input.grab_client = ci;
            server.input.grab_surface_id = sid;

            if server.wm.connected {
                let mut ev = WmEvent {
                    kind: comp::WM_EVENT_CLICK,
                    client_id: ci as u32,
                    surface_id: sid,
                    px: ms.x,
                    py: ms.y,
                    buttons: ms.buttons,
                    ..WmEvent::default()
                };
                if let Some(s) = server.clients[ci as usize].surface_visible(sid) {
                    ev.sx = s.x;
                    ev.sy = s.y;
                    ev.sw = s.width;
                    ev.sh = s.height;
                }
                server.send_wm_event(&ev, true);
            } else {
                server.input.focus_client = ci;
                server.input.focus_surface_id = sid;
                let z = server.z_counter.wrapping_add(1);
                server.z_counter = z;
                if let Some(s) = server.clients[ci as usize].surface_mut(sid) {
                    s.z = z;
                }
            }
        }
        None => {
            server.input.grab_active = false;
            server.input.grab_client = -1;
            server.input.grab_surface_id = 0;
            if server.wm.connected {
                let ev = WmEvent {
                    kind: comp::WM_EVENT_CLICK,
                    client_id: CLIENT_NONE,
                    px: ms.x,
                    py: ms.y,
                    buttons: ms.buttons,
                    flags: comp::WM_EVENT_FLAG_BACKGROUND,
                    ..WmEvent::default()
                };
                server.send_wm_event(&ev, true);
            } else {
                server.input.focus_client = -1;
                server.input.focus_surface_id = 0;
            }
        }
    }
}

/// Client-bound pointer stream.
fn send_mouse(server: &mut Compositor, ms: &MouseState) {
    // Under a WM pointer grab the WM stream carries the motion; clients
    // only see the grab end.
    if server.input.wm_pointer_grab_active {
        let released = ms.buttons == 0 && server.input.prev_buttons != 0;
        if released {
            server.input.grab_active = false;
            server.input.grab_client = -1;
            server.input.grab_surface_id = 0;
        }
        server.input.prev_buttons = ms.buttons;
        return;
    }

    let (mut ci, mut sid) = resolve_pointer_target(server, ms);

    // Button held over nothing: a fresh pick may start a grab (e.g. the
    // press landed during the same tick the surface appeared).
    if (ci < 0 || sid == 0) && ms.buttons & BUTTON_LEFT != 0 {
        if let Some((p_ci, p_sid)) = server.pick_surface_at(ms.x, ms.y) {
            server.input.grab_active = true;
            server.input.grab_client = p_ci;
            server.input.grab_surface_id = p_sid;
            ci = p_ci;
            sid = p_sid;
        }
    }

    // De-dup after resolution, per the documented ordering.
    {
        let st = &mut server.input;
        if ms.x == st.last_mx
            && ms.y == st.last_my
            && ms.buttons == st.last_mb
            && ci == st.last_client
            && sid == st.last_surface_id
        {
            return;
        }
        st.last_mx = ms.x;
        st.last_my = ms.y;
        st.last_mb = ms.buttons;
        st.last_client = ci;
        st.last_surface_id = sid;
    }

    let released = ms.buttons & BUTTON_LEFT == 0 && server.input.prev_buttons & BUTTON_LEFT != 0;

    if ci >= 0 && sid != 0 {
        let (sx, sy) = match server.clients[ci as usize].surface_visible(sid) {
            Some(s) => (s.x, s.y),
            None => (0, 0),
        };
        let ev = InputEvent {
            surface_id: sid,
            kind: comp::INPUT_MOUSE,
            x: ms.x - sx,
            y: ms.y - sy,
            buttons: ms.buttons,
            ..InputEvent::default()
        };
        server.deliver_input(ci as usize, &ev, false);
    }

    if released {
        server.input.grab_active = false;
        server.input.grab_client = -1;
        server.input.grab_surface_id = 0;
    }
    server.input.prev_buttons = ms.buttons;
}

/// Key events go to the focus surface, unless the WM holds the keyboard.
fn send_key(server: &mut Compositor, key: &KeyEvent) {
    if server.wm.connected {
        let ev = WmEvent {
            kind: comp::WM_EVENT_KEY,
            client_id: if server.input.focus_client >= 0 {
                server.input.focus_client as u32
            } else {
                CLIENT_NONE
            },
            surface_id: server.input.focus_surface_id,
            keycode: key.keycode,
            key_state: key.state,
            flags: key.modifiers,
            ..WmEvent::default()
        };
        server.send_wm_event(&ev, false);
    }

    if server.input.wm_keyboard_grab_active {
        return;
    }
    let ci = server.input.focus_client;
    let sid = server.input.focus_surface_id;
    if ci < 0 || sid == 0 || !surface_valid(server, ci, sid) {
        return;
    }

    let ev = InputEvent {
        surface_id: sid,
        kind: comp::INPUT_KEY,
        keycode: key.keycode,
        key_state: key.state,
        ..InputEvent::default()
    };
    server.deliver_input(ci as usize, &ev, true);
}

/// One input tick. Returns true when the cursor moved (repaint).
pub fn process_input(server: &mut Compositor) -> bool {
    validate_targets(server);

    let mut repaint = false;

    let mut ms = MouseState::default();
    if sys_input::poll_mouse(&mut ms) {
        let moved = !server.input.have_mouse
            || ms.x != server.input.mouse.x
            || ms.y != server.input.mouse.y
            || ms.buttons != server.input.mouse.buttons;
        if moved {
            server.input.mouse = ms;
            server.input.have_mouse = true;
            repaint = true;

            send_wm_pointer(server, &ms);
            update_focus(server, &ms);
            send_mouse(server, &ms);
        }
    }

    let mut key = KeyEvent::default();
    while sys_input::poll_key(&mut key) {
        send_key(server, &key);
    }

    repaint
}
