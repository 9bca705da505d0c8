//! Devfs: a fixed table of named device nodes under `/dev/`.
//!
//! Devices register a small ops struct (read/write/poll); lookups by name
//! produce VFS nodes whose payload is the device index. The concrete
//! drivers behind the ops live outside this tree.

use yula_lib::{FixedName, IrqRwLock};

use crate::vfs::{NodeFlags, NodeId, NodePayload, node_create};

pub const MAX_DEVICES: usize = 16;

pub struct DeviceOps {
    pub read: fn(offset: u32, buf: &mut [u8]) -> i64,
    pub write: fn(offset: u32, buf: &[u8]) -> i64,
    pub poll_ready: fn(events: u16) -> u16,
}

fn default_read(_offset: u32, _buf: &mut [u8]) -> i64 {
    0
}

fn default_write(_offset: u32, buf: &[u8]) -> i64 {
    buf.len() as i64
}

fn default_poll(events: u16) -> u16 {
    events & (yula_abi::poll::POLLIN | yula_abi::poll::POLLOUT)
}

pub static NULL_DEVICE_OPS: DeviceOps = DeviceOps {
    read: default_read,
    write: default_write,
    poll_ready: default_poll,
};

struct DeviceEntry {
    name: Option<FixedName<32>>,
    ops: &'static DeviceOps,
}

static DEVICES: IrqRwLock<[DeviceEntry; MAX_DEVICES]> = IrqRwLock::new(
    [const { DeviceEntry { name: None, ops: &NULL_DEVICE_OPS } }; MAX_DEVICES],
);

/// Register a device. Duplicate names are rejected.
pub fn devfs_register(name: &FixedName<32>, ops: &'static DeviceOps) -> bool {
    let mut devices = DEVICES.write();
    if devices.iter().any(|d| d.name.as_ref() == Some(name)) {
        return false;
    }
    for entry in devices.iter_mut() {
        if entry.name.is_none() {
            entry.name = Some(*name);
            entry.ops = ops;
            return true;
        }
    }
    false
}

/// Open `/dev/<name>`: returns a fresh node referencing the device.
pub fn devfs_open(name: &FixedName<32>) -> Option<NodeId> {
    let dev = {
        let devices = DEVICES.read();
        devices.iter().position(|d| d.name.as_ref() == Some(name))? as u32
    };
    node_create(name.as_bytes(), NodeFlags::DEVFS, 0, NodePayload::Dev { dev })
}

pub fn dev_read(dev: u32, offset: u32, buf: &mut [u8]) -> i64 {
    let devices = DEVICES.read();
    match devices.get(dev as usize) {
        Some(entry) if entry.name.is_some() => (entry.ops.read)(offset, buf),
        _ => yula_abi::ERRNO_EBADF,
    }
}

pub fn dev_write(dev: u32, offset: u32, buf: &[u8]) -> i64 {
    let devices = DEVICES.read();
    match devices.get(dev as usize) {
        Some(entry) if entry.name.is_some() => (entry.ops.write)(offset, buf),
        _ => yula_abi::ERRNO_EBADF,
    }
}

pub fn dev_poll_ready(dev: u32, events: u16) -> u16 {
    let devices = DEVICES.read();
    match devices.get(dev as usize) {
        Some(entry) if entry.name.is_some() => (entry.ops.poll_ready)(events),
        _ => yula_abi::poll::POLLNVAL,
    }
}
