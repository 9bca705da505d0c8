//! Compositor client library.
//!
//! Owns a connection's two pipe fds, the RX assembly ring, and the
//! synchronous request helpers. Frame assembly is self-synchronizing:
//! on any header the decoder rejects, exactly one byte is dropped and
//! scanning resumes, so garbage on the pipe delays but never corrupts
//! the stream.
//!
//! Synchronous helpers (`*_sync`) send with `FLAG_ACK` and wait for the
//! matching ACK/ERROR by request type and surface id, with a wall-clock
//! timeout. Unrelated frames arriving during the wait are parked in an
//! overflow ring and replayed to the normal event path.

pub mod ring;

use yula_abi::comp::{
    self, Ack, AttachShmName, Commit, DestroySurface, ErrorReply, FrameHeader, HEADER_SIZE,
    Hello, HeaderError, InputRingName, MAX_FRAME, MAX_PAYLOAD, WmCmd,
};
use yula_abi::wire::pack_name;
use yula_lib::ring_buffer::ByteRing;

use crate::syscall::{self, fs, ipc};

const RX_RING_SIZE: usize = 4096;
const SYNC_TIMEOUT_MS: u64 = 2000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompError {
    NotConnected,
    PipeClosed,
    Timeout,
    /// Server-side failure, code from `ERR_*`.
    Remote(u16),
    Protocol,
}

/// A decoded inbound frame.
pub struct Frame {
    pub header: FrameHeader,
    pub payload: [u8; MAX_PAYLOAD],
}

impl Frame {
    pub fn payload_bytes(&self) -> &[u8] {
        &self.payload[..self.header.len as usize]
    }
}

pub struct Connection {
    pub fd_c2s_w: i32,
    pub fd_s2c_r: i32,
    seq: u32,
    rx: ByteRing<RX_RING_SIZE>,
    /// Frames received while a sync helper was waiting for its ACK.
    oob: ByteRing<RX_RING_SIZE>,
    connected: bool,
}

impl Connection {
    /// Connect to a compositor endpoint (normally
    /// [`comp::COMPOSITOR_ENDPOINT`]).
    pub fn connect(endpoint: &[u8]) -> Option<Self> {
        let mut fds = [-1i32; 2];
        if ipc::ipc_connect(endpoint, &mut fds) != 0 {
            return None;
        }
        Some(Self {
            fd_c2s_w: fds[0],
            fd_s2c_r: fds[1],
            seq: 1,
            rx: ByteRing::new(),
            oob: ByteRing::new(),
            connected: true,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn disconnect(&mut self) {
        if self.connected {
            fs::close(self.fd_c2s_w);
            fs::close(self.fd_s2c_r);
            self.connected = false;
        }
    }

    fn next_seq(&mut self) -> u32 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        seq
    }

    /// Send one framed message, blocking until fully written.
    pub fn send(&mut self, msg_type: u16, payload: &[u8]) -> Result<u32, CompError> {
        if !self.connected {
            return Err(CompError::NotConnected);
        }
        let seq = self.next_seq();
        let mut frame = [0u8; MAX_FRAME];
        let len = comp::encode_frame(&mut frame, msg_type, seq, payload)
            .ok_or(CompError::Protocol)?;
        if fs::write_full(self.fd_c2s_w, &frame[..len]) < 0 {
            self.connected = false;
            return Err(CompError::PipeClosed);
        }
        Ok(seq)
    }

    /// Drain whatever the server has written into the RX ring.
    /// Returns false once the server side is gone.
    pub fn pump(&mut self) -> bool {
        if !self.connected {
            return false;
        }
        loop {
            let mut chunk = [0u8; 256];
            let n = fs::pipe_try_read(self.fd_s2c_r, &mut chunk);
            if n < 0 {
                self.connected = false;
                return false;
            }
            if n == 0 {
                return true;
            }
            self.rx.push(&chunk[..n as usize]);
        }
    }

    /// Extract the next complete frame from the RX ring, resynchronizing
    /// byte-by-byte on garbage.
    fn next_rx_frame(&mut self) -> Option<Frame> {
        next_frame_from_ring(&mut self.rx)
    }

    /// Next inbound frame for the normal event path: overflow frames
    /// first, then fresh ones.
    pub fn next_event(&mut self) -> Option<Frame> {
        if let Some(frame) = next_frame_from_ring(&mut self.oob) {
            return Some(frame);
        }
        self.pump();
        self.next_rx_frame()
    }

    fn stash_oob(&mut self, frame: &Frame) {
        let mut bytes = [0u8; MAX_FRAME];
        let total = HEADER_SIZE + frame.header.len as usize;
        let mut hdr = [0u8; HEADER_SIZE];
        frame.header.encode(&mut hdr);
        bytes[..HEADER_SIZE].copy_from_slice(&hdr);
        bytes[HEADER_SIZE..total].copy_from_slice(frame.payload_bytes());
        if self.oob.free() as usize >= total {
            self.oob.push(&bytes[..total]);
        }
        // A full overflow ring silently drops the frame; the protocol
        // tolerates lost non-essential events.
    }

    /// Wait for an ACK/ERROR matching `req_type`/`surface_id`.
    fn wait_reply(&mut self, req_type: u16, surface_id: u32) -> Result<Ack, CompError> {
        let deadline = syscall::uptime_ms().saturating_add(SYNC_TIMEOUT_MS);
        loop {
            if !self.pump() {
                return Err(CompError::PipeClosed);
            }
            while let Some(frame) = self.next_rx_frame() {
                match frame.header.msg_type {
                    comp::MSG_ACK => {
                        if let Some(ack) = Ack::decode(frame.payload_bytes()) {
                            if ack.req_type == req_type && ack.surface_id == surface_id {
                                return Ok(ack);
                            }
                        }
                        self.stash_oob(&frame);
                    }
                    comp::MSG_ERROR => {
                        if let Some(err) = ErrorReply::decode(frame.payload_bytes()) {
                            if err.req_type == req_type && err.surface_id == surface_id {
                                return Err(CompError::Remote(err.code));
                            }
                        }
                        self.stash_oob(&frame);
                    }
                    _ => self.stash_oob(&frame),
                }
            }
            if syscall::uptime_ms() >= deadline {
                return Err(CompError::Timeout);
            }
            syscall::usleep(500);
        }
    }

    /// Handshake; returns the client id the server assigned us.
    pub fn send_hello_sync(&mut self) -> Result<u32, CompError> {
        let hello = Hello { client_pid: syscall::getpid() };
        let mut payload = [0u8; Hello::WIRE_SIZE];
        hello.encode(&mut payload).ok_or(CompError::Protocol)?;
        self.send(comp::MSG_HELLO, &payload)?;
        self.wait_reply(comp::MSG_HELLO, 0).map(|ack| ack.flags)
    }

    /// Bind a named SHM object to `surface_id`. Always synchronous.
    #[allow(clippy::too_many_arguments)]
    pub fn send_attach_shm_name_sync(
        &mut self,
        surface_id: u32,
        shm_name: &[u8],
        size_bytes: u32,
        width: u32,
        height: u32,
        stride: u32,
        format: u32,
    ) -> Result<(), CompError> {
        let msg = AttachShmName {
            surface_id,
            width,
            height,
            stride,
            format,
            size_bytes,
            shm_name: pack_name(shm_name),
        };
        let mut payload = [0u8; AttachShmName::WIRE_SIZE];
        msg.encode(&mut payload).ok_or(CompError::Protocol)?;
        self.send(comp::MSG_ATTACH_SHM_NAME, &payload)?;
        self.wait_reply(comp::MSG_ATTACH_SHM_NAME, surface_id).map(|_| ())
    }

    /// Publish the surface's current pixels at `(x, y)`.
    pub fn send_commit(&mut self, surface_id: u32, x: i32, y: i32, flags: u32) -> Result<(), CompError> {
        let msg = Commit { surface_id, x, y, flags };
        let mut payload = [0u8; Commit::WIRE_SIZE];
        msg.encode(&mut payload).ok_or(CompError::Protocol)?;
        self.send(comp::MSG_COMMIT, &payload)?;
        Ok(())
    }

    pub fn send_commit_sync(&mut self, surface_id: u32, x: i32, y: i32, flags: u32) -> Result<(), CompError> {
        self.send_commit(surface_id, x, y, flags | comp::COMMIT_FLAG_ACK)?;
        self.wait_reply(comp::MSG_COMMIT, surface_id).map(|_| ())
    }

    pub fn send_destroy_surface_sync(&mut self, surface_id: u32) -> Result<(), CompError> {
        let msg = DestroySurface { surface_id, flags: comp::COMMIT_FLAG_ACK };
        let mut payload = [0u8; DestroySurface::WIRE_SIZE];
        msg.encode(&mut payload).ok_or(CompError::Protocol)?;
        self.send(comp::MSG_DESTROY_SURFACE, &payload)?;
        self.wait_reply(comp::MSG_DESTROY_SURFACE, surface_id).map(|_| ())
    }

    /// Opt in to zero-copy input via a named ring.
    pub fn send_input_ring_name(&mut self, shm_name: &[u8], size_bytes: u32, cap: u32) -> Result<(), CompError> {
        let msg = InputRingName { size_bytes, cap, shm_name: pack_name(shm_name) };
        let mut payload = [0u8; InputRingName::WIRE_SIZE];
        msg.encode(&mut payload).ok_or(CompError::Protocol)?;
        self.send(comp::MSG_INPUT_RING_NAME, &payload)?;
        Ok(())
    }

    /// WM side: issue a window-management command.
    pub fn send_wm_cmd(&mut self, cmd: &WmCmd) -> Result<(), CompError> {
        let mut payload = [0u8; WmCmd::WIRE_SIZE];
        cmd.encode(&mut payload).ok_or(CompError::Protocol)?;
        self.send(comp::MSG_WM_CMD, &payload)?;
        Ok(())
    }
}

/// Shared frame extraction: scan for a valid header, dropping one byte
/// per rejection, and only consume once the whole frame has arrived.
pub fn next_frame_from_ring<const N: usize>(ring: &mut ByteRing<N>) -> Option<Frame> {
    loop {
        if (ring.len() as usize) < HEADER_SIZE {
            return None;
        }
        let mut hdr_bytes = [0u8; HEADER_SIZE];
        if !ring.peek_at(0, &mut hdr_bytes) {
            return None;
        }
        let header = match FrameHeader::decode(&hdr_bytes) {
            Ok(h) => h,
            Err(HeaderError::Truncated) => return None,
            Err(_) => {
                ring.drop_front(1);
                continue;
            }
        };

        let total = HEADER_SIZE + header.len as usize;
        if (ring.len() as usize) < total {
            return None;
        }

        ring.drop_front(HEADER_SIZE as u32);
        let mut frame = Frame { header, payload: [0u8; MAX_PAYLOAD] };
        if header.len > 0 {
            let mut payload = [0u8; MAX_PAYLOAD];
            let n = ring.pop(&mut payload[..header.len as usize]);
            debug_assert!(n == header.len as usize);
            frame.payload = payload;
        }
        return Some(frame);
    }
}
