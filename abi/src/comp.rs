//! Compositor wire protocol.
//!
//! Every message on a compositor pipe is a 16-byte [`FrameHeader`] followed
//! by exactly `len` payload bytes, `len <= MAX_PAYLOAD`. The bounded payload
//! keeps frame assembly in a fixed stack buffer on both sides. The stream is
//! self-synchronizing: a receiver that loses framing drops one byte at a
//! time until the magic lines up again.
//!
//! All integers are little-endian; name fields are 32 bytes, zero-padded.

use crate::wire::{WireReader, WireWriter};

pub const COMP_MAGIC: u32 = 0x4349_5043; // "CPIC"
pub const COMP_VERSION: u16 = 1;
pub const MAX_PAYLOAD: usize = 512;
pub const HEADER_SIZE: usize = 16;
pub const MAX_FRAME: usize = HEADER_SIZE + MAX_PAYLOAD;

/// Name of the compositor's IPC listen endpoint.
pub const COMPOSITOR_ENDPOINT: &str = "flux";

// --- Message types ---

pub const MSG_HELLO: u16 = 1;
pub const MSG_ATTACH_SHM: u16 = 2;
pub const MSG_COMMIT: u16 = 3;
pub const MSG_INPUT: u16 = 4;
pub const MSG_ATTACH_SHM_NAME: u16 = 5;
pub const MSG_DESTROY_SURFACE: u16 = 6;
pub const MSG_ACK: u16 = 7;
pub const MSG_ERROR: u16 = 8;
pub const MSG_WM_EVENT: u16 = 9;
pub const MSG_WM_CMD: u16 = 10;
pub const MSG_INPUT_RING_NAME: u16 = 11;
pub const MSG_INPUT_RING_ACK: u16 = 12;

// --- Commit flags ---

pub const COMMIT_FLAG_RAISE: u32 = 1;
pub const COMMIT_FLAG_ACK: u32 = 2;

// --- Error codes carried by MSG_ERROR ---

pub const ERR_INVALID: u16 = 1;
pub const ERR_NO_SURFACE: u16 = 2;
pub const ERR_SHM_OPEN: u16 = 3;
pub const ERR_SHM_MAP: u16 = 4;

// --- Input event kinds ---

pub const INPUT_MOUSE: u32 = 1;
pub const INPUT_KEY: u32 = 2;
pub const INPUT_RESIZE: u32 = 3;

// --- WM event stream (server -> window manager) ---

pub const WM_EVENT_MAP: u32 = 1;
pub const WM_EVENT_UNMAP: u32 = 2;
pub const WM_EVENT_CLICK: u32 = 3;
pub const WM_EVENT_COMMIT: u32 = 4;
pub const WM_EVENT_KEY: u32 = 5;
pub const WM_EVENT_POINTER: u32 = 6;

pub const WM_EVENT_FLAG_REPLAY: u32 = 0x0000_0001;
pub const WM_EVENT_FLAG_BACKGROUND: u32 = 0x0000_0002;

/// "No client" sentinel in WM events.
pub const CLIENT_NONE: u32 = 0xFFFF_FFFF;

// --- WM command stream (window manager -> server) ---

pub const WM_CMD_FOCUS: u32 = 1;
pub const WM_CMD_RAISE: u32 = 2;
pub const WM_CMD_MOVE: u32 = 3;
pub const WM_CMD_CLOSE: u32 = 4;
pub const WM_CMD_POINTER_GRAB: u32 = 5;
pub const WM_CMD_RESIZE: u32 = 6;
pub const WM_CMD_PREVIEW_RECT: u32 = 7;
pub const WM_CMD_PREVIEW_CLEAR: u32 = 8;
pub const WM_CMD_EXIT: u32 = 9;

/// Frame header preceding every payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub msg_type: u16,
    pub len: u32,
    pub seq: u32,
}

/// Why a header failed to parse. `BadMagic` means "not at a frame boundary";
/// the others mean "at a boundary but the frame is unusable"; either way
/// the receiver skips one byte and rescans.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderError {
    Truncated,
    BadMagic,
    BadVersion,
    BadLength,
}

impl FrameHeader {
    pub fn new(msg_type: u16, len: u32, seq: u32) -> Self {
        Self { msg_type, len, seq }
    }

    pub fn encode(&self, out: &mut [u8; HEADER_SIZE]) {
        let mut w = WireWriter::new(out);
        w.u32(COMP_MAGIC);
        w.u16(COMP_VERSION);
        w.u16(self.msg_type);
        w.u32(self.len);
        w.u32(self.seq);
        debug_assert!(w.ok());
    }

    pub fn decode(buf: &[u8]) -> Result<Self, HeaderError> {
        if buf.len() < HEADER_SIZE {
            return Err(HeaderError::Truncated);
        }
        let mut r = WireReader::new(buf);
        let magic = r.u32().ok_or(HeaderError::Truncated)?;
        if magic != COMP_MAGIC {
            return Err(HeaderError::BadMagic);
        }
        let version = r.u16().ok_or(HeaderError::Truncated)?;
        if version != COMP_VERSION {
            return Err(HeaderError::BadVersion);
        }
        let msg_type = r.u16().ok_or(HeaderError::Truncated)?;
        let len = r.u32().ok_or(HeaderError::Truncated)?;
        if len as usize > MAX_PAYLOAD {
            return Err(HeaderError::BadLength);
        }
        let seq = r.u32().ok_or(HeaderError::Truncated)?;
        Ok(Self { msg_type, len, seq })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Hello {
    pub client_pid: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AttachShm {
    pub surface_id: u32,
    pub shm_fd: u32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachShmName {
    pub surface_id: u32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: u32,
    pub size_bytes: u32,
    pub shm_name: [u8; 32],
}

impl Default for AttachShmName {
    fn default() -> Self {
        Self {
            surface_id: 0,
            width: 0,
            height: 0,
            stride: 0,
            format: 0,
            size_bytes: 0,
            shm_name: [0; 32],
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Commit {
    pub surface_id: u32,
    pub x: i32,
    pub y: i32,
    pub flags: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DestroySurface {
    pub surface_id: u32,
    pub flags: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ack {
    pub req_type: u16,
    pub surface_id: u32,
    pub flags: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ErrorReply {
    pub req_type: u16,
    pub code: u16,
    pub surface_id: u32,
    pub detail: u32,
}

/// Pointer/key/resize event delivered to a client, framed or via the
/// input ring. `x`/`y` are surface-local for pointer events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InputEvent {
    pub surface_id: u32,
    pub kind: u32,
    pub x: i32,
    pub y: i32,
    pub buttons: u32,
    pub keycode: u32,
    pub key_state: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WmEvent {
    pub kind: u32,
    pub client_id: u32,
    pub surface_id: u32,
    pub sx: i32,
    pub sy: i32,
    pub sw: u32,
    pub sh: u32,
    pub px: i32,
    pub py: i32,
    pub buttons: u32,
    pub keycode: u32,
    pub key_state: u32,
    pub flags: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WmCmd {
    pub kind: u32,
    pub client_id: u32,
    pub surface_id: u32,
    pub x: i32,
    pub y: i32,
    pub flags: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputRingName {
    pub size_bytes: u32,
    pub cap: u32,
    pub shm_name: [u8; 32],
}

impl Default for InputRingName {
    fn default() -> Self {
        Self { size_bytes: 0, cap: 0, shm_name: [0; 32] }
    }
}

macro_rules! payload_codec {
    ($ty:ty, $size:expr, |$w:ident, $self_:ident| $enc:block, |$r:ident| $dec:block) => {
        impl $ty {
            pub const WIRE_SIZE: usize = $size;

            pub fn encode(&self, out: &mut [u8]) -> Option<usize> {
                let $self_ = self;
                let mut $w = WireWriter::new(out);
                $enc
                if $w.ok() { Some($w.len()) } else { None }
            }

            pub fn decode(buf: &[u8]) -> Option<Self> {
                if buf.len() != Self::WIRE_SIZE {
                    return None;
                }
                let mut $r = WireReader::new(buf);
                $dec
            }
        }
    };
}

payload_codec!(Hello, 8, |w, m| {
    w.u32(m.client_pid);
    w.u32(0);
}, |r| {
    let client_pid = r.u32()?;
    let _reserved = r.u32()?;
    Some(Self { client_pid })
});

payload_codec!(AttachShm, 24, |w, m| {
    w.u32(m.surface_id);
    w.u32(m.shm_fd);
    w.u32(m.width);
    w.u32(m.height);
    w.u32(m.stride);
    w.u32(m.format);
}, |r| {
    Some(Self {
        surface_id: r.u32()?,
        shm_fd: r.u32()?,
        width: r.u32()?,
        height: r.u32()?,
        stride: r.u32()?,
        format: r.u32()?,
    })
});

payload_codec!(AttachShmName, 56, |w, m| {
    w.u32(m.surface_id);
    w.u32(m.width);
    w.u32(m.height);
    w.u32(m.stride);
    w.u32(m.format);
    w.u32(m.size_bytes);
    w.name(&m.shm_name);
}, |r| {
    Some(Self {
        surface_id: r.u32()?,
        width: r.u32()?,
        height: r.u32()?,
        stride: r.u32()?,
        format: r.u32()?,
        size_bytes: r.u32()?,
        shm_name: r.name()?,
    })
});

payload_codec!(Commit, 16, |w, m| {
    w.u32(m.surface_id);
    w.i32(m.x);
    w.i32(m.y);
    w.u32(m.flags);
}, |r| {
    Some(Self {
        surface_id: r.u32()?,
        x: r.i32()?,
        y: r.i32()?,
        flags: r.u32()?,
    })
});

payload_codec!(DestroySurface, 8, |w, m| {
    w.u32(m.surface_id);
    w.u32(m.flags);
}, |r| {
    Some(Self { surface_id: r.u32()?, flags: r.u32()? })
});

payload_codec!(Ack, 12, |w, m| {
    w.u16(m.req_type);
    w.u16(0);
    w.u32(m.surface_id);
    w.u32(m.flags);
}, |r| {
    let req_type = r.u16()?;
    let _reserved = r.u16()?;
    Some(Self { req_type, surface_id: r.u32()?, flags: r.u32()? })
});

payload_codec!(ErrorReply, 12, |w, m| {
    w.u16(m.req_type);
    w.u16(m.code);
    w.u32(m.surface_id);
    w.u32(m.detail);
}, |r| {
    Some(Self {
        req_type: r.u16()?,
        code: r.u16()?,
        surface_id: r.u32()?,
        detail: r.u32()?,
    })
});

payload_codec!(InputEvent, 28, |w, m| {
    w.u32(m.surface_id);
    w.u32(m.kind);
    w.i32(m.x);
    w.i32(m.y);
    w.u32(m.buttons);
    w.u32(m.keycode);
    w.u32(m.key_state);
}, |r| {
    Some(Self {
        surface_id: r.u32()?,
        kind: r.u32()?,
        x: r.i32()?,
        y: r.i32()?,
        buttons: r.u32()?,
        keycode: r.u32()?,
        key_state: r.u32()?,
    })
});

payload_codec!(WmEvent, 52, |w, m| {
    w.u32(m.kind);
    w.u32(m.client_id);
    w.u32(m.surface_id);
    w.i32(m.sx);
    w.i32(m.sy);
    w.u32(m.sw);
    w.u32(m.sh);
    w.i32(m.px);
    w.i32(m.py);
    w.u32(m.buttons);
    w.u32(m.keycode);
    w.u32(m.key_state);
    w.u32(m.flags);
}, |r| {
    Some(Self {
        kind: r.u32()?,
        client_id: r.u32()?,
        surface_id: r.u32()?,
        sx: r.i32()?,
        sy: r.i32()?,
        sw: r.u32()?,
        sh: r.u32()?,
        px: r.i32()?,
        py: r.i32()?,
        buttons: r.u32()?,
        keycode: r.u32()?,
        key_state: r.u32()?,
        flags: r.u32()?,
    })
});

payload_codec!(WmCmd, 24, |w, m| {
    w.u32(m.kind);
    w.u32(m.client_id);
    w.u32(m.surface_id);
    w.i32(m.x);
    w.i32(m.y);
    w.u32(m.flags);
}, |r| {
    Some(Self {
        kind: r.u32()?,
        client_id: r.u32()?,
        surface_id: r.u32()?,
        x: r.i32()?,
        y: r.i32()?,
        flags: r.u32()?,
    })
});

payload_codec!(InputRingName, 44, |w, m| {
    w.u32(m.size_bytes);
    w.u32(m.cap);
    w.u32(0);
    w.name(&m.shm_name);
}, |r| {
    let size_bytes = r.u32()?;
    let cap = r.u32()?;
    let _reserved = r.u32()?;
    Some(Self { size_bytes, cap, shm_name: r.name()? })
});

/// Encode a complete frame (header + payload bytes) into `out`.
/// Returns the frame length, or `None` if `out` is too small or the
/// payload exceeds [`MAX_PAYLOAD`].
pub fn encode_frame(
    out: &mut [u8],
    msg_type: u16,
    seq: u32,
    payload: &[u8],
) -> Option<usize> {
    if payload.len() > MAX_PAYLOAD || out.len() < HEADER_SIZE + payload.len() {
        return None;
    }
    let hdr = FrameHeader::new(msg_type, payload.len() as u32, seq);
    let mut hdr_bytes = [0u8; HEADER_SIZE];
    hdr.encode(&mut hdr_bytes);
    out[..HEADER_SIZE].copy_from_slice(&hdr_bytes);
    out[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);
    Some(HEADER_SIZE + payload.len())
}
