//! Little-endian wire codec helpers.
//!
//! Every multi-byte integer crossing a pipe or shared page in YulaOS is
//! little-endian. These two cursors keep the per-message encode/decode
//! impls in `comp.rs` free of index arithmetic.

/// Sequential little-endian reader over a byte slice.
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    #[inline]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn u8(&mut self) -> Option<u8> {
        let b = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    pub fn u16(&mut self) -> Option<u16> {
        let bytes = self.buf.get(self.pos..self.pos + 2)?;
        self.pos += 2;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn u32(&mut self) -> Option<u32> {
        let bytes = self.buf.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn i32(&mut self) -> Option<i32> {
        self.u32().map(|v| v as i32)
    }

    /// Read a fixed-length zero-padded name field.
    pub fn name<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.buf.get(self.pos..self.pos + N)?;
        self.pos += N;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Some(out)
    }
}

/// Sequential little-endian writer into a byte slice. Writes past the end
/// are refused; the caller checks [`WireWriter::ok`] (or the final length)
/// once at the end instead of after every field.
pub struct WireWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
    overflow: bool,
}

impl<'a> WireWriter<'a> {
    #[inline]
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0, overflow: false }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    #[inline]
    pub fn ok(&self) -> bool {
        !self.overflow
    }

    fn put(&mut self, bytes: &[u8]) {
        if self.overflow || self.pos + bytes.len() > self.buf.len() {
            self.overflow = true;
            return;
        }
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    pub fn u8(&mut self, v: u8) {
        self.put(&[v]);
    }

    pub fn u16(&mut self, v: u16) {
        self.put(&v.to_le_bytes());
    }

    pub fn u32(&mut self, v: u32) {
        self.put(&v.to_le_bytes());
    }

    pub fn i32(&mut self, v: i32) {
        self.put(&v.to_le_bytes());
    }

    pub fn name<const N: usize>(&mut self, v: &[u8; N]) {
        self.put(v);
    }
}

/// Copy a `&str`/byte name into a fixed zero-padded field, truncating at
/// `N - 1` so the result always carries a terminating NUL.
pub fn pack_name<const N: usize>(src: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    let n = src.len().min(N - 1);
    out[..n].copy_from_slice(&src[..n]);
    out
}

/// Length of a zero-padded name field up to the first NUL (or `N`).
pub fn name_len<const N: usize>(field: &[u8; N]) -> usize {
    field.iter().position(|&b| b == 0).unwrap_or(N)
}
