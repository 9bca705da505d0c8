//! The compositor server ("flux").
//!
//! Owns the display, accepts client connections on the `flux` endpoint
//! and the window manager on `flux-wm`, runs the surface state machine
//! per (client, surface id), routes input, and composes committed
//! surfaces into the framebuffer.
//!
//! Per-connection RX assembly uses the same self-synchronizing frame
//! scanner as the client library: corrupt bytes cost one byte at a time
//! until the magic lines up again, and never a disconnect.

mod input;
mod renderer;

use yula_abi::comp::{
    self, Ack, AttachShmName, Commit, DestroySurface, ErrorReply, Hello, InputRingName, WmCmd,
    WmEvent,
};
use yula_abi::syscall::FbInfo;
use yula_lib::ring_buffer::ByteRing;

use crate::comp::ring::{RingProducer, RingView};
use crate::comp::{Frame, next_frame_from_ring};
use crate::syscall::{self, fs, ipc, mem};

pub use input::InputState;

pub const MAX_CLIENTS: usize = 8;
pub const MAX_SURFACES_PER_CLIENT: usize = 8;

const RX_RING_SIZE: usize = 4096;

#[derive(Clone, Copy, Default)]
pub struct Surface {
    pub id: u32,
    pub attached: bool,
    pub committed: bool,
    pub map_base: u64,
    pub map_size: u32,
    pub shm_fd: i32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: u32,
    pub x: i32,
    pub y: i32,
    pub z: u32,
}

pub struct Client {
    pub connected: bool,
    pub pid: u32,
    pub fd_c2s_r: i32,
    pub fd_s2c_w: i32,
    pub seq_out: u32,
    rx: ByteRing<RX_RING_SIZE>,
    pub surfaces: [Surface; MAX_SURFACES_PER_CLIENT],
    pub input_ring: Option<RingProducer>,
    ring_fd: i32,
    ring_base: u64,
    ring_size: u32,
}

impl Client {
    fn disconnected() -> Self {
        Self {
            connected: false,
            pid: 0,
            fd_c2s_r: -1,
            fd_s2c_w: -1,
            seq_out: 1,
            rx: ByteRing::new(),
            surfaces: [Surface::default(); MAX_SURFACES_PER_CLIENT],
            input_ring: None,
            ring_fd: -1,
            ring_base: 0,
            ring_size: 0,
        }
    }

    pub fn surface(&self, id: u32) -> Option<&Surface> {
        if id == 0 {
            return None;
        }
        self.surfaces.iter().find(|s| s.attached && s.id == id)
    }

    pub fn surface_mut(&mut self, id: u32) -> Option<&mut Surface> {
        if id == 0 {
            return None;
        }
        self.surfaces.iter_mut().find(|s| s.attached && s.id == id)
    }

    /// Committed surface the pointer can land on.
    pub fn surface_visible(&self, id: u32) -> Option<&Surface> {
        self.surface(id).filter(|s| s.committed)
    }
}

pub struct WmConn {
    pub connected: bool,
    pub fd_c2s_r: i32,
    pub fd_s2c_w: i32,
    seq_out: u32,
    rx: ByteRing<RX_RING_SIZE>,
}

impl WmConn {
    const fn disconnected() -> Self {
        Self { connected: false, fd_c2s_r: -1, fd_s2c_w: -1, seq_out: 1, rx: ByteRing::new() }
    }
}

pub struct Compositor {
    pub clients: [Client; MAX_CLIENTS],
    pub wm: WmConn,
    pub input: InputState,
    pub z_counter: u32,
    listen_fd: i32,
    wm_listen_fd: i32,
    fb_base: u64,
    fb_info: FbInfo,
    pub preview_rect: Option<(i32, i32, u32, u32)>,
    repaint: bool,
}

impl Compositor {
    const fn new() -> Self {
        Self {
            clients: [const {
                Client {
                    connected: false,
                    pid: 0,
                    fd_c2s_r: -1,
                    fd_s2c_w: -1,
                    seq_out: 1,
                    rx: ByteRing::new(),
                    surfaces: [Surface {
                        id: 0,
                        attached: false,
                        committed: false,
                        map_base: 0,
                        map_size: 0,
                        shm_fd: -1,
                        width: 0,
                        height: 0,
                        stride: 0,
                        format: 0,
                        x: 0,
                        y: 0,
                        z: 0,
                    }; MAX_SURFACES_PER_CLIENT],
                    input_ring: None,
                    ring_fd: -1,
                    ring_base: 0,
                    ring_size: 0,
                }
            }; MAX_CLIENTS],
            wm: WmConn::disconnected(),
            input: InputState::new(),
            z_counter: 0,
            listen_fd: -1,
            wm_listen_fd: -1,
            fb_base: 0,
            fb_info: FbInfo { width: 0, height: 0, pitch: 0, bytes_per_pixel: 0 },
            preview_rect: None,
            repaint: true,
        }
    }

    // --- outbound framing ---

    fn send_to_client(client: &mut Client, msg_type: u16, payload: &[u8], essential: bool) -> bool {
        let mut frame = [0u8; comp::MAX_FRAME];
        let seq = client.seq_out;
        client.seq_out = client.seq_out.wrapping_add(1);
        let Some(len) = comp::encode_frame(&mut frame, msg_type, seq, payload) else {
            return false;
        };
        let result = if essential {
            fs::write_full(client.fd_s2c_w, &frame[..len])
        } else {
            fs::pipe_try_write(client.fd_s2c_w, &frame[..len])
        };
        result >= 0
    }

    fn send_ack(client: &mut Client, req_type: u16, surface_id: u32) {
        let ack = Ack { req_type, surface_id, flags: 0 };
        let mut payload = [0u8; Ack::WIRE_SIZE];
        if ack.encode(&mut payload).is_some() {
            Self::send_to_client(client, comp::MSG_ACK, &payload, true);
        }
    }

    fn send_error(client: &mut Client, req_type: u16, surface_id: u32, code: u16) {
        let err = ErrorReply { req_type, code, surface_id, detail: 0 };
        let mut payload = [0u8; ErrorReply::WIRE_SIZE];
        if err.encode(&mut payload).is_some() {
            Self::send_to_client(client, comp::MSG_ERROR, &payload, true);
        }
    }

    pub fn send_wm_event(&mut self, ev: &WmEvent, essential: bool) {
        if !self.wm.connected {
            return;
        }
        let mut payload = [0u8; WmEvent::WIRE_SIZE];
        if ev.encode(&mut payload).is_none() {
            return;
        }
        let mut frame = [0u8; comp::MAX_FRAME];
        let seq = self.wm.seq_out;
        self.wm.seq_out = self.wm.seq_out.wrapping_add(1);
        let Some(len) = comp::encode_frame(&mut frame, comp::MSG_WM_EVENT, seq, &payload) else {
            return;
        };
        let result = if essential {
            fs::write_full(self.wm.fd_s2c_w, &frame[..len])
        } else {
            fs::pipe_try_write(self.wm.fd_s2c_w, &frame[..len])
        };
        if result < 0 {
            self.disconnect_wm();
        }
    }

    fn disconnect_wm(&mut self) {
        if self.wm.connected {
            fs::close(self.wm.fd_c2s_r);
            fs::close(self.wm.fd_s2c_w);
        }
        self.wm = WmConn::disconnected();
        self.input.wm_detached();
    }

    // --- connection management ---

    fn accept_clients(&mut self) {
        loop {
            let mut fds = [-1i32; 2];
            if ipc::ipc_accept(self.listen_fd, &mut fds) != 1 {
                break;
            }
            let Some(slot) = self.clients.iter().position(|c| !c.connected) else {
                fs::close(fds[0]);
                fs::close(fds[1]);
                continue;
            };
            let mut client = Client::disconnected();
            client.connected = true;
            client.fd_c2s_r = fds[0];
            client.fd_s2c_w = fds[1];
            self.clients[slot] = client;
        }

        loop {
            let mut fds = [-1i32; 2];
            if ipc::ipc_accept(self.wm_listen_fd, &mut fds) != 1 {
                break;
            }
            if self.wm.connected {
                fs::close(fds[0]);
                fs::close(fds[1]);
                continue;
            }
            self.wm.connected = true;
            self.wm.fd_c2s_r = fds[0];
            self.wm.fd_s2c_w = fds[1];
        }
    }

    fn drop_client(&mut self, ci: usize) {
        let client = &mut self.clients[ci];
        if !client.connected {
            return;
        }
        for si in 0..MAX_SURFACES_PER_CLIENT {
            let surface = client.surfaces[si];
            if surface.attached {
                release_surface_backing(&surface);
                client.surfaces[si] = Surface::default();
            }
        }
        if client.ring_base != 0 {
            mem::munmap(client.ring_base, client.ring_size as u64);
        }
        if client.ring_fd >= 0 {
            fs::close(client.ring_fd);
        }
        fs::close(client.fd_c2s_r);
        fs::close(client.fd_s2c_w);
        self.clients[ci] = Client::disconnected();
        self.input.client_gone(ci as i32);
        self.repaint = true;
    }

    // --- inbound frames ---

    fn pump_client(&mut self, ci: usize) {
        loop {
            let client = &mut self.clients[ci];
            if !client.connected {
                return;
            }
            let mut chunk = [0u8; 256];
            let n = fs::pipe_try_read(client.fd_c2s_r, &mut chunk);
            if n < 0 {
                self.drop_client(ci);
                return;
            }
            if n == 0 {
                break;
            }
            client.rx.push(&chunk[..n as usize]);
        }

        while let Some(frame) = next_frame_from_ring(&mut self.clients[ci].rx) {
            self.handle_client_frame(ci, &frame);
        }
    }

    fn handle_client_frame(&mut self, ci: usize, frame: &Frame) {
        match frame.header.msg_type {
            comp::MSG_HELLO => {
                if let Some(hello) = Hello::decode(frame.payload_bytes()) {
                    self.clients[ci].pid = hello.client_pid;
                }
                // The ACK's flags field carries the assigned client id;
                // the WM needs it to recognize its own surfaces.
                let ack = Ack { req_type: comp::MSG_HELLO, surface_id: 0, flags: ci as u32 };
                let mut payload = [0u8; Ack::WIRE_SIZE];
                if ack.encode(&mut payload).is_some() {
                    Self::send_to_client(&mut self.clients[ci], comp::MSG_ACK, &payload, true);
                }
            }
            comp::MSG_ATTACH_SHM => {
                // Legacy fd-passing attach predates per-process tables;
                // named attach is the supported path.
                let surface_id = frame.payload_bytes().get(..4).map(|b| {
                    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
                }).unwrap_or(0);
                Self::send_error(
                    &mut self.clients[ci],
                    comp::MSG_ATTACH_SHM,
                    surface_id,
                    comp::ERR_INVALID,
                );
            }
            comp::MSG_ATTACH_SHM_NAME => self.handle_attach_shm_name(ci, frame),
            comp::MSG_COMMIT => self.handle_commit(ci, frame),
            comp::MSG_DESTROY_SURFACE => self.handle_destroy(ci, frame),
            comp::MSG_INPUT_RING_NAME => self.handle_input_ring(ci, frame),
            _ => {
                // Unknown but well-framed: ignore, the stream stays in
                // sync.
            }
        }
    }

    /// ATTACH_SHM_NAME: always synchronously acknowledged or errored.
    fn handle_attach_shm_name(&mut self, ci: usize, frame: &Frame) {
        let Some(msg) = AttachShmName::decode(frame.payload_bytes()) else {
            Self::send_error(&mut self.clients[ci], comp::MSG_ATTACH_SHM_NAME, 0, comp::ERR_INVALID);
            return;
        };
        if msg.surface_id == 0 || msg.width == 0 || msg.height == 0 {
            Self::send_error(
                &mut self.clients[ci],
                comp::MSG_ATTACH_SHM_NAME,
                msg.surface_id,
                comp::ERR_INVALID,
            );
            return;
        }

        let name_len = yula_abi::wire::name_len(&msg.shm_name);
        let shm_fd = mem::shm_open_named(&msg.shm_name[..name_len]);
        if shm_fd < 0 {
            Self::send_error(
                &mut self.clients[ci],
                comp::MSG_ATTACH_SHM_NAME,
                msg.surface_id,
                comp::ERR_SHM_OPEN,
            );
            return;
        }

        let base = mem::mmap(shm_fd as i32, msg.size_bytes, yula_abi::syscall::MAP_SHARED);
        if base == 0 {
            fs::close(shm_fd as i32);
            Self::send_error(
                &mut self.clients[ci],
                comp::MSG_ATTACH_SHM_NAME,
                msg.surface_id,
                comp::ERR_SHM_MAP,
            );
            return;
        }

        let needed = msg.stride as u64 * msg.height as u64 * 4;
        if needed > msg.size_bytes as u64 {
            mem::munmap(base, msg.size_bytes as u64);
            fs::close(shm_fd as i32);
            Self::send_error(
                &mut self.clients[ci],
                comp::MSG_ATTACH_SHM_NAME,
                msg.surface_id,
                comp::ERR_SHM_MAP,
            );
            return;
        }

        let z = self.bump_z();
        let client = &mut self.clients[ci];

        // Re-attach swaps the backing; first attach claims a free slot.
        let slot = client
            .surfaces
            .iter()
            .position(|s| s.attached && s.id == msg.surface_id)
            .or_else(|| client.surfaces.iter().position(|s| !s.attached));
        let Some(slot) = slot else {
            mem::munmap(base, msg.size_bytes as u64);
            fs::close(shm_fd as i32);
            Self::send_error(client, comp::MSG_ATTACH_SHM_NAME, msg.surface_id, comp::ERR_INVALID);
            return;
        };

        let was = client.surfaces[slot];
        if was.attached {
            release_surface_backing(&was);
        }

        client.surfaces[slot] = Surface {
            id: msg.surface_id,
            attached: true,
            committed: was.committed && was.id == msg.surface_id,
            map_base: base,
            map_size: msg.size_bytes,
            shm_fd: shm_fd as i32,
            width: msg.width,
            height: msg.height,
            stride: msg.stride,
            format: msg.format,
            x: was.x,
            y: was.y,
            z: if was.attached { was.z } else { z },
        };

        Self::send_ack(client, comp::MSG_ATTACH_SHM_NAME, msg.surface_id);
        self.repaint = true;
    }

    fn handle_commit(&mut self, ci: usize, frame: &Frame) {
        let Some(msg) = Commit::decode(frame.payload_bytes()) else {
            Self::send_error(&mut self.clients[ci], comp::MSG_COMMIT, 0, comp::ERR_INVALID);
            return;
        };
        let wants_ack = msg.flags & comp::COMMIT_FLAG_ACK != 0;
        let raise_z = if msg.flags & comp::COMMIT_FLAG_RAISE != 0 {
            Some(self.bump_z_raw())
        } else {
            None
        };

        enum Outcome {
            NoSurface,
            BadBacking,
            Committed { first: bool, geom: (i32, i32, u32, u32) },
        }

        let outcome = match self.clients[ci].surface_mut(msg.surface_id) {
            None => Outcome::NoSurface,
            Some(s) => {
                let needed = s.stride as u64 * s.height as u64 * 4;
                if needed > s.map_size as u64 {
                    Outcome::BadBacking
                } else {
                    let first = !s.committed;
                    s.committed = true;
                    s.x = msg.x;
                    s.y = msg.y;
                    if let Some(z) = raise_z {
                        s.z = z;
                    }
                    Outcome::Committed { first, geom: (s.x, s.y, s.width, s.height) }
                }
            }
        };

        let (first_commit, geom) = match outcome {
            Outcome::NoSurface => {
                Self::send_error(
                    &mut self.clients[ci],
                    comp::MSG_COMMIT,
                    msg.surface_id,
                    comp::ERR_NO_SURFACE,
                );
                return;
            }
            Outcome::BadBacking => {
                Self::send_error(
                    &mut self.clients[ci],
                    comp::MSG_COMMIT,
                    msg.surface_id,
                    comp::ERR_SHM_MAP,
                );
                return;
            }
            Outcome::Committed { first, geom } => (first, geom),
        };

        if wants_ack {
            Self::send_ack(&mut self.clients[ci], comp::MSG_COMMIT, msg.surface_id);
        }

        let ev = WmEvent {
            kind: if first_commit { comp::WM_EVENT_MAP } else { comp::WM_EVENT_COMMIT },
            client_id: ci as u32,
            surface_id: msg.surface_id,
            sx: geom.0,
            sy: geom.1,
            sw: geom.2,
            sh: geom.3,
            ..WmEvent::default()
        };
        self.send_wm_event(&ev, first_commit);
        self.repaint = true;
    }

    fn handle_destroy(&mut self, ci: usize, frame: &Frame) {
        let Some(msg) = DestroySurface::decode(frame.payload_bytes()) else {
            return;
        };
        let wants_ack = msg.flags & comp::COMMIT_FLAG_ACK != 0;

        let found = {
            let client = &mut self.clients[ci];
            match client.surfaces.iter().position(|s| s.attached && s.id == msg.surface_id) {
                Some(slot) => {
                    let surface = client.surfaces[slot];
                    release_surface_backing(&surface);
                    client.surfaces[slot] = Surface::default();
                    true
                }
                None => false,
            }
        };

        if !found {
            Self::send_error(
                &mut self.clients[ci],
                comp::MSG_DESTROY_SURFACE,
                msg.surface_id,
                comp::ERR_NO_SURFACE,
            );
            return;
        }

        if wants_ack {
            Self::send_ack(&mut self.clients[ci], comp::MSG_DESTROY_SURFACE, msg.surface_id);
        }

        let ev = WmEvent {
            kind: comp::WM_EVENT_UNMAP,
            client_id: ci as u32,
            surface_id: msg.surface_id,
            ..WmEvent::default()
        };
        self.send_wm_event(&ev, true);
        self.input.surface_gone(ci as i32, msg.surface_id);
        self.repaint = true;
    }

    fn handle_input_ring(&mut self, ci: usize, frame: &Frame) {
        let Some(msg) = InputRingName::decode(frame.payload_bytes()) else {
            return;
        };
        let name_len = yula_abi::wire::name_len(&msg.shm_name);
        let shm_fd = mem::shm_open_named(&msg.shm_name[..name_len]);
        if shm_fd < 0 {
            Self::send_error(
                &mut self.clients[ci],
                comp::MSG_INPUT_RING_NAME,
                0,
                comp::ERR_SHM_OPEN,
            );
            return;
        }
        let base = mem::mmap(shm_fd as i32, msg.size_bytes, yula_abi::syscall::MAP_SHARED);
        if base == 0 {
            fs::close(shm_fd as i32);
            Self::send_error(
                &mut self.clients[ci],
                comp::MSG_INPUT_RING_NAME,
                0,
                comp::ERR_SHM_MAP,
            );
            return;
        }
        let Some(view) = RingView::open(base, msg.size_bytes) else {
            mem::munmap(base, msg.size_bytes as u64);
            fs::close(shm_fd as i32);
            Self::send_error(
                &mut self.clients[ci],
                comp::MSG_INPUT_RING_NAME,
                0,
                comp::ERR_INVALID,
            );
            return;
        };

        let client = &mut self.clients[ci];
        client.input_ring = Some(RingProducer::new(view));
        client.ring_fd = shm_fd as i32;
        client.ring_base = base;
        client.ring_size = msg.size_bytes;

        let ack = Ack { req_type: comp::MSG_INPUT_RING_NAME, surface_id: 0, flags: 0 };
        let mut payload = [0u8; Ack::WIRE_SIZE];
        if ack.encode(&mut payload).is_some() {
            Self::send_to_client(client, comp::MSG_INPUT_RING_ACK, &payload, true);
        }
    }

    // --- WM command stream ---

    fn pump_wm(&mut self) {
        if !self.wm.connected {
            return;
        }
        loop {
            let mut chunk = [0u8; 256];
            let n = fs::pipe_try_read(self.wm.fd_c2s_r, &mut chunk);
            if n < 0 {
                self.disconnect_wm();
                return;
            }
            if n == 0 {
                break;
            }
            self.wm.rx.push(&chunk[..n as usize]);
        }

        while let Some(frame) = next_frame_from_ring(&mut self.wm.rx) {
            if frame.header.msg_type == comp::MSG_WM_CMD {
                if let Some(cmd) = WmCmd::decode(frame.payload_bytes()) {
                    self.handle_wm_cmd(&cmd);
                }
            }
        }
    }

    fn handle_wm_cmd(&mut self, cmd: &WmCmd) {
        let ci = cmd.client_id as usize;
        match cmd.kind {
            comp::WM_CMD_FOCUS => {
                if ci < MAX_CLIENTS && self.clients[ci].surface_visible(cmd.surface_id).is_some() {
                    self.input.set_focus(ci as i32, cmd.surface_id);
                }
            }
            comp::WM_CMD_RAISE => {
                let z = self.bump_z_raw();
                if ci < MAX_CLIENTS {
                    if let Some(surface) = self.clients[ci].surface_mut(cmd.surface_id) {
                        surface.z = z;
                        self.repaint = true;
                    }
                }
            }
            comp::WM_CMD_MOVE => {
                if ci < MAX_CLIENTS {
                    if let Some(surface) = self.clients[ci].surface_mut(cmd.surface_id) {
                        surface.x = cmd.x;
                        surface.y = cmd.y;
                        self.repaint = true;
                    }
                }
            }
            comp::WM_CMD_RESIZE => {
                // A resize is an intent: the client hears about the new
                // box as an essential event and re-attaches a matching
                // buffer at its own pace.
                if ci < MAX_CLIENTS && self.clients[ci].surface(cmd.surface_id).is_some() {
                    let ev = comp::InputEvent {
                        surface_id: cmd.surface_id,
                        kind: comp::INPUT_RESIZE,
                        x: cmd.x,
                        y: cmd.y,
                        ..comp::InputEvent::default()
                    };
                    self.deliver_input(ci, &ev, true);
                    self.repaint = true;
                }
            }
            comp::WM_CMD_CLOSE => {
                if ci < MAX_CLIENTS && self.clients[ci].connected {
                    // Close request travels as an essential key event
                    // with the conventional close keycode.
                    let ev = comp::InputEvent {
                        surface_id: cmd.surface_id,
                        kind: comp::INPUT_KEY,
                        keycode: input::KEYCODE_CLOSE,
                        key_state: 1,
                        ..comp::InputEvent::default()
                    };
                    self.deliver_input(ci, &ev, true);
                }
            }
            comp::WM_CMD_POINTER_GRAB => {
                if cmd.flags != 0 {
                    self.input.wm_grab_start(ci as i32, cmd.surface_id);
                } else {
                    self.input.wm_grab_end();
                }
            }
            comp::WM_CMD_PREVIEW_RECT => {
                self.preview_rect = Some((cmd.x, cmd.y, cmd.flags >> 16, cmd.flags & 0xFFFF));
                self.repaint = true;
            }
            comp::WM_CMD_PREVIEW_CLEAR => {
                self.preview_rect = None;
                self.repaint = true;
            }
            comp::WM_CMD_EXIT => {
                self.disconnect_wm();
            }
            _ => {}
        }
    }

    // --- input delivery ---

    /// Push one event to a client: through its ring when installed and
    /// READY, framed otherwise.
    pub fn deliver_input(&mut self, ci: usize, ev: &comp::InputEvent, essential: bool) {
        let client = &mut self.clients[ci];
        if !client.connected {
            return;
        }
        if let Some(producer) = client.input_ring.as_mut() {
            if producer.view().is_ready() {
                producer.send(ev, essential);
                return;
            }
        }
        let mut payload = [0u8; comp::InputEvent::WIRE_SIZE];
        if ev.encode(&mut payload).is_some() {
            Self::send_to_client(client, comp::MSG_INPUT, &payload, essential);
        }
    }

    pub fn fb_base(&self) -> u64 {
        self.fb_base
    }

    pub fn fb_width(&self) -> u32 {
        self.fb_info.width
    }

    pub fn fb_height(&self) -> u32 {
        self.fb_info.height
    }

    pub fn fb_pitch(&self) -> u32 {
        self.fb_info.pitch
    }

    fn bump_z(&mut self) -> u32 {
        self.bump_z_raw()
    }

    fn bump_z_raw(&mut self) -> u32 {
        self.z_counter = self.z_counter.wrapping_add(1);
        self.z_counter
    }

    /// Top-most committed surface containing `(x, y)`, by descending z.
    pub fn pick_surface_at(&self, x: i32, y: i32) -> Option<(i32, u32)> {
        let mut best: Option<(i32, u32, u32)> = None;
        for (ci, client) in self.clients.iter().enumerate() {
            if !client.connected {
                continue;
            }
            for surface in client.surfaces.iter() {
                if !surface.attached || !surface.committed {
                    continue;
                }
                let inside = x >= surface.x
                    && y >= surface.y
                    && x < surface.x + surface.width as i32
                    && y < surface.y + surface.height as i32;
                if !inside {
                    continue;
                }
                match best {
                    Some((_, _, z)) if surface.z <= z => {}
                    _ => best = Some((ci as i32, surface.id, surface.z)),
                }
            }
        }
        best.map(|(ci, sid, _)| (ci, sid))
    }

    // --- main loop ---

    fn frame(&mut self) {
        self.accept_clients();

        for ci in 0..MAX_CLIENTS {
            if self.clients[ci].connected {
                self.pump_client(ci);
            }
        }
        self.pump_wm();

        if input::process_input(self) {
            self.repaint = true;
        }

        if self.repaint && self.fb_base != 0 {
            renderer::compose(self);
            self.repaint = false;
        }
    }
}

fn release_surface_backing(surface: &Surface) {
    if surface.map_base != 0 {
        mem::munmap(surface.map_base, surface.map_size as u64);
    }
    if surface.shm_fd >= 0 {
        fs::close(surface.shm_fd);
    }
}

/// Server state lives in a static: it is far too large for a kernel
/// stack, and exactly one compositor task ever touches it.
struct ServerCell(core::cell::UnsafeCell<Compositor>);

// SAFETY: only the single compositor task dereferences the cell.
unsafe impl Sync for ServerCell {}

static SERVER: ServerCell = ServerCell(core::cell::UnsafeCell::new(Compositor::new()));

/// Compositor task entry point.
pub extern "C" fn compositor_main(_arg: u64) {
    // SAFETY: one compositor task; nothing else reaches this cell.
    let server = unsafe { &mut *SERVER.0.get() };

    let listen_fd = ipc::ipc_listen(comp::COMPOSITOR_ENDPOINT.as_bytes());
    let wm_listen_fd = ipc::ipc_listen(b"flux-wm");
    if listen_fd < 0 || wm_listen_fd < 0 {
        syscall::exit(1);
    }
    server.listen_fd = listen_fd as i32;
    server.wm_listen_fd = wm_listen_fd as i32;

    if mem::fb_acquire() == 0 {
        let mut info = FbInfo::default();
        let base = mem::map_framebuffer(&mut info);
        server.fb_base = base;
        server.fb_info = info;
    }
    // Without a framebuffer the server still runs protocol and input.

    loop {
        server.frame();
        syscall::usleep(4000);
    }
}
