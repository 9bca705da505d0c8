//! Ioctl request encoding.
//!
//! A 32-bit request packs `(dir:2 | size:14 | type:8 | nr:8)` from the top
//! bit down. `size` is the byte size of the argument payload; `type` is an
//! ASCII subsystem letter ('T' tty, 'G' gpu, 'N' network interface).

pub const IOC_NRBITS: u32 = 8;
pub const IOC_TYPEBITS: u32 = 8;
pub const IOC_SIZEBITS: u32 = 14;
pub const IOC_DIRBITS: u32 = 2;

pub const IOC_NRSHIFT: u32 = 0;
pub const IOC_TYPESHIFT: u32 = IOC_NRSHIFT + IOC_NRBITS;
pub const IOC_SIZESHIFT: u32 = IOC_TYPESHIFT + IOC_TYPEBITS;
pub const IOC_DIRSHIFT: u32 = IOC_SIZESHIFT + IOC_SIZEBITS;

pub const IOC_NONE: u32 = 0;
pub const IOC_WRITE: u32 = 1;
pub const IOC_READ: u32 = 2;

#[inline]
pub const fn ioc(dir: u32, ty: u8, nr: u8, size: u32) -> u32 {
    (dir << IOC_DIRSHIFT)
        | ((size & ((1 << IOC_SIZEBITS) - 1)) << IOC_SIZESHIFT)
        | ((ty as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)
}

#[inline]
pub const fn io(ty: u8, nr: u8) -> u32 {
    ioc(IOC_NONE, ty, nr, 0)
}

#[inline]
pub const fn ior(ty: u8, nr: u8, size: u32) -> u32 {
    ioc(IOC_READ, ty, nr, size)
}

#[inline]
pub const fn iow(ty: u8, nr: u8, size: u32) -> u32 {
    ioc(IOC_WRITE, ty, nr, size)
}

#[inline]
pub const fn iowr(ty: u8, nr: u8, size: u32) -> u32 {
    ioc(IOC_READ | IOC_WRITE, ty, nr, size)
}

#[inline]
pub const fn ioc_dir(req: u32) -> u32 {
    (req >> IOC_DIRSHIFT) & ((1 << IOC_DIRBITS) - 1)
}

#[inline]
pub const fn ioc_type(req: u32) -> u8 {
    ((req >> IOC_TYPESHIFT) & ((1 << IOC_TYPEBITS) - 1)) as u8
}

#[inline]
pub const fn ioc_nr(req: u32) -> u8 {
    ((req >> IOC_NRSHIFT) & ((1 << IOC_NRBITS) - 1)) as u8
}

#[inline]
pub const fn ioc_size(req: u32) -> u32 {
    (req >> IOC_SIZESHIFT) & ((1 << IOC_SIZEBITS) - 1)
}

// --- TTY ('T') requests ---

pub const TTY_GET_WINSIZE: u32 = ior(b'T', 1, 8);
pub const TTY_SET_MODE: u32 = iow(b'T', 2, 4);
pub const TTY_SCROLL: u32 = iow(b'T', 3, 4);
pub const TTY_GET_SESSION: u32 = ior(b'T', 4, 4);

// --- GPU ('G') and network ('N') requests are owned by external drivers;
// only the type letters are reserved here.

pub const IOCTL_TYPE_TTY: u8 = b'T';
pub const IOCTL_TYPE_GPU: u8 = b'G';
pub const IOCTL_TYPE_NET: u8 = b'N';
