//! Whole-system clipboard: one shared buffer, last writer wins.
//!
//! Task context only, never interrupt context, so a plain spin mutex
//! suffices.

use spin::Mutex;

const CLIPBOARD_CAP: usize = 4096;

struct Clipboard {
    data: [u8; CLIPBOARD_CAP],
    len: usize,
}

static CLIPBOARD: Mutex<Clipboard> =
    Mutex::new(Clipboard { data: [0; CLIPBOARD_CAP], len: 0 });

/// Replace the clipboard contents (truncating to capacity).
pub fn copy(src: &[u8]) -> i64 {
    let mut clip = CLIPBOARD.lock();
    let n = src.len().min(CLIPBOARD_CAP);
    clip.data[..n].copy_from_slice(&src[..n]);
    clip.len = n;
    n as i64
}

/// Read the clipboard into `dst`; returns the number of bytes copied.
pub fn paste(dst: &mut [u8]) -> i64 {
    let clip = CLIPBOARD.lock();
    let n = clip.len.min(dst.len());
    dst[..n].copy_from_slice(&clip.data[..n]);
    n as i64
}
