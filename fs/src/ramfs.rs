//! Minimal RAM-backed root filesystem.
//!
//! The real block-device filesystem is an external collaborator; ramfs
//! backs `/` so the path syscalls (`mkdir`, `unlink`, `stat`, `getdents`,
//! `chdir`) have genuine semantics and tests. Directories form a flat
//! inode table with parent links; file data lives in buddy pages, up to
//! 16 per file.

use yula_abi::syscall::{DIRENT_KIND_DIR, DIRENT_KIND_FILE, Dirent};
use yula_abi::PhysAddr;
use yula_lib::string::copy_name_bytes;
use yula_lib::{IrqMutex, klog_warn};
use yula_mm::hhdm::PhysAddrHhdm;
use yula_mm::mm_constants::PAGE_SIZE_4KB;
use yula_mm::page_alloc::{alloc_block, free_block};

pub type InodeId = u32;
pub const ROOT_INODE: InodeId = 0;
pub const INVALID_INODE: InodeId = u32::MAX;

const MAX_INODES: usize = 128;
const MAX_FILE_PAGES: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
    Free,
    Directory,
    File,
}

struct Inode {
    kind: InodeKind,
    name: [u8; 32],
    parent: InodeId,
    size: u32,
    pages: [PhysAddr; MAX_FILE_PAGES],
}

impl Inode {
    const fn free() -> Self {
        Self {
            kind: InodeKind::Free,
            name: [0; 32],
            parent: INVALID_INODE,
            size: 0,
            pages: [PhysAddr::NULL; MAX_FILE_PAGES],
        }
    }
}

struct Ramfs {
    inodes: [Inode; MAX_INODES],
    initialized: bool,
}

static RAMFS: IrqMutex<Ramfs> = IrqMutex::new(Ramfs {
    inodes: [const { Inode::free() }; MAX_INODES],
    initialized: false,
});

fn ensure_root(fs: &mut Ramfs) {
    if !fs.initialized {
        fs.inodes[ROOT_INODE as usize] = Inode::free();
        fs.inodes[ROOT_INODE as usize].kind = InodeKind::Directory;
        fs.inodes[ROOT_INODE as usize].parent = ROOT_INODE;
        copy_name_bytes(&mut fs.inodes[ROOT_INODE as usize].name, b"/");
        fs.initialized = true;
    }
}

fn name_matches(inode: &Inode, component: &[u8]) -> bool {
    let len = inode.name.iter().position(|&b| b == 0).unwrap_or(32);
    &inode.name[..len] == component
}

fn lookup_child(fs: &Ramfs, dir: InodeId, component: &[u8]) -> Option<InodeId> {
    for (id, inode) in fs.inodes.iter().enumerate() {
        if inode.kind != InodeKind::Free
            && inode.parent == dir
            && id as InodeId != ROOT_INODE
            && name_matches(inode, component)
        {
            return Some(id as InodeId);
        }
    }
    None
}

/// Walk `path` starting from `cwd` (absolute paths restart at `/`).
/// Returns the inode, or `None` for a missing component.
pub fn resolve(cwd: InodeId, path: &[u8]) -> Option<InodeId> {
    let mut fs = RAMFS.lock();
    ensure_root(&mut fs);

    let mut current = if path.first() == Some(&b'/') { ROOT_INODE } else { cwd };
    for component in path.split(|&b| b == b'/') {
        if component.is_empty() || component == b"." {
            continue;
        }
        if component == b".." {
            current = fs.inodes.get(current as usize)?.parent;
            continue;
        }
        if fs.inodes.get(current as usize)?.kind != InodeKind::Directory {
            return None;
        }
        current = lookup_child(&fs, current, component)?;
    }
    Some(current)
}

/// Split a path into (parent inode, final component range).
fn resolve_parent(cwd: InodeId, path: &[u8]) -> Option<(InodeId, usize, usize)> {
    let trimmed_end = path.iter().rposition(|&b| b != b'/')? + 1;
    let start = path[..trimmed_end]
        .iter()
        .rposition(|&b| b == b'/')
        .map(|i| i + 1)
        .unwrap_or(0);
    if start >= trimmed_end {
        return None;
    }
    let parent = if start == 0 {
        if path.first() == Some(&b'/') { ROOT_INODE } else { cwd }
    } else {
        resolve(cwd, &path[..start])?
    };
    Some((parent, start, trimmed_end))
}

fn alloc_inode(fs: &mut Ramfs, kind: InodeKind, parent: InodeId, name: &[u8]) -> Option<InodeId> {
    if name.is_empty() || name.len() > 31 {
        return None;
    }
    for (id, inode) in fs.inodes.iter_mut().enumerate() {
        if inode.kind == InodeKind::Free && id as InodeId != ROOT_INODE {
            *inode = Inode::free();
            inode.kind = kind;
            inode.parent = parent;
            copy_name_bytes(&mut inode.name, name);
            return Some(id as InodeId);
        }
    }
    klog_warn!("ramfs: inode table full");
    None
}

pub fn mkdir(cwd: InodeId, path: &[u8]) -> Result<InodeId, ()> {
    let mut fs = RAMFS.lock();
    ensure_root(&mut fs);
    drop(fs);

    let (parent, start, end) = resolve_parent(cwd, path).ok_or(())?;
    let component = &path[start..end];

    let mut fs = RAMFS.lock();
    if fs.inodes.get(parent as usize).map(|i| i.kind) != Some(InodeKind::Directory) {
        return Err(());
    }
    if lookup_child(&fs, parent, component).is_some() {
        return Err(());
    }
    alloc_inode(&mut fs, InodeKind::Directory, parent, component).ok_or(())
}

pub fn create_file(cwd: InodeId, path: &[u8]) -> Result<InodeId, ()> {
    let (parent, start, end) = resolve_parent(cwd, path).ok_or(())?;
    let component = &path[start..end];

    let mut fs = RAMFS.lock();
    ensure_root(&mut fs);
    if fs.inodes.get(parent as usize).map(|i| i.kind) != Some(InodeKind::Directory) {
        return Err(());
    }
    if let Some(existing) = lookup_child(&fs, parent, component) {
        return Ok(existing);
    }
    alloc_inode(&mut fs, InodeKind::File, parent, component).ok_or(())
}

pub fn unlink(cwd: InodeId, path: &[u8]) -> Result<(), ()> {
    let inode_id = resolve(cwd, path).ok_or(())?;
    if inode_id == ROOT_INODE {
        return Err(());
    }

    let pages = {
        let mut fs = RAMFS.lock();
        // Directories must be empty.
        let is_dir = fs.inodes[inode_id as usize].kind == InodeKind::Directory;
        if is_dir && lookup_child_any(&fs, inode_id) {
            return Err(());
        }
        let pages = fs.inodes[inode_id as usize].pages;
        fs.inodes[inode_id as usize] = Inode::free();
        pages
    };

    for page in pages.iter().filter(|p| !p.is_null()) {
        free_block(*page);
    }
    Ok(())
}

fn lookup_child_any(fs: &Ramfs, dir: InodeId) -> bool {
    fs.inodes
        .iter()
        .enumerate()
        .any(|(id, i)| i.kind != InodeKind::Free && i.parent == dir && id as InodeId != ROOT_INODE)
}

pub fn stat(inode_id: InodeId) -> Option<yula_abi::syscall::Stat> {
    let fs = RAMFS.lock();
    let inode = fs.inodes.get(inode_id as usize)?;
    match inode.kind {
        InodeKind::Free => None,
        InodeKind::Directory => Some(yula_abi::syscall::Stat {
            inode: inode_id,
            kind: DIRENT_KIND_DIR,
            _pad: [0; 3],
            size: 0,
        }),
        InodeKind::File => Some(yula_abi::syscall::Stat {
            inode: inode_id,
            kind: DIRENT_KIND_FILE,
            _pad: [0; 3],
            size: inode.size as u64,
        }),
    }
}

pub fn is_directory(inode_id: InodeId) -> bool {
    let fs = RAMFS.lock();
    fs.inodes
        .get(inode_id as usize)
        .map(|i| i.kind == InodeKind::Directory)
        .unwrap_or(false)
}

/// Fill `out` with the `index`-th and following children of `dir`.
/// Returns the number of entries produced.
pub fn readdir(dir: InodeId, index: usize, out: &mut [Dirent]) -> usize {
    let fs = RAMFS.lock();
    if fs.inodes.get(dir as usize).map(|i| i.kind) != Some(InodeKind::Directory) {
        return 0;
    }

    let mut seen = 0usize;
    let mut produced = 0usize;
    for (id, inode) in fs.inodes.iter().enumerate() {
        if inode.kind == InodeKind::Free || inode.parent != dir || id as InodeId == ROOT_INODE {
            continue;
        }
        if seen < index {
            seen += 1;
            continue;
        }
        if produced >= out.len() {
            break;
        }
        let mut entry = Dirent {
            inode: id as u32,
            kind: if inode.kind == InodeKind::Directory { DIRENT_KIND_DIR } else { DIRENT_KIND_FILE },
            _pad: [0; 3],
            size: inode.size,
            name: [0; 32],
        };
        entry.name.copy_from_slice(&inode.name);
        out[produced] = entry;
        produced += 1;
        seen += 1;
    }
    produced
}

/// Reconstruct the absolute path of `inode_id` into `out` (NUL padded).
/// Returns the number of path bytes written, 0 on failure.
pub fn path_of(inode_id: InodeId, out: &mut [u8]) -> usize {
    let fs = RAMFS.lock();

    // Collect the component chain bottom-up.
    let mut chain = [INVALID_INODE; 16];
    let mut depth = 0usize;
    let mut cursor = inode_id;
    while cursor != ROOT_INODE && depth < chain.len() {
        let Some(inode) = fs.inodes.get(cursor as usize) else {
            return 0;
        };
        if inode.kind == InodeKind::Free {
            return 0;
        }
        chain[depth] = cursor;
        depth += 1;
        cursor = inode.parent;
    }

    let mut written = 0usize;
    for &id in chain[..depth].iter().rev() {
        let inode = &fs.inodes[id as usize];
        let name_len = inode.name.iter().position(|&b| b == 0).unwrap_or(32);
        if written + 1 + name_len >= out.len() {
            break;
        }
        out[written] = b'/';
        written += 1;
        out[written..written + name_len].copy_from_slice(&inode.name[..name_len]);
        written += name_len;
    }
    if written == 0 && !out.is_empty() {
        out[0] = b'/';
        written = 1;
    }
    if written < out.len() {
        out[written] = 0;
    }
    written
}

pub fn read(inode_id: InodeId, offset: u32, buf: &mut [u8]) -> i64 {
    let fs = RAMFS.lock();
    let Some(inode) = fs.inodes.get(inode_id as usize) else {
        return yula_abi::ERRNO_EBADF;
    };
    if inode.kind != InodeKind::File {
        return yula_abi::ERRNO_EINVAL;
    }
    if offset >= inode.size {
        return 0;
    }

    let mut done = 0usize;
    let want = buf.len().min((inode.size - offset) as usize);
    while done < want {
        let pos = offset as usize + done;
        let page_idx = pos / PAGE_SIZE_4KB as usize;
        let page_off = pos % PAGE_SIZE_4KB as usize;
        let page = inode.pages[page_idx];
        if page.is_null() {
            break;
        }
        let chunk = (PAGE_SIZE_4KB as usize - page_off).min(want - done);
        let Some(virt) = page.to_virt_checked() else {
            break;
        };
        let src = unsafe { core::slice::from_raw_parts(virt.as_ptr::<u8>().add(page_off), chunk) };
        buf[done..done + chunk].copy_from_slice(src);
        done += chunk;
    }
    done as i64
}

pub fn write(inode_id: InodeId, offset: u32, buf: &[u8]) -> i64 {
    let mut fs = RAMFS.lock();
    let Some(inode) = fs.inodes.get_mut(inode_id as usize) else {
        return yula_abi::ERRNO_EBADF;
    };
    if inode.kind != InodeKind::File {
        return yula_abi::ERRNO_EINVAL;
    }

    let end = offset as usize + buf.len();
    if end > MAX_FILE_PAGES * PAGE_SIZE_4KB as usize {
        return yula_abi::ERRNO_ENOSPC;
    }

    let mut done = 0usize;
    while done < buf.len() {
        let pos = offset as usize + done;
        let page_idx = pos / PAGE_SIZE_4KB as usize;
        let page_off = pos % PAGE_SIZE_4KB as usize;
        if inode.pages[page_idx].is_null() {
            match alloc_block() {
                Some(page) if yula_mm::hhdm::zero_physical_page(page).is_ok() => {
                    inode.pages[page_idx] = page;
                }
                Some(page) => {
                    free_block(page);
                    return yula_abi::ERRNO_ENOMEM;
                }
                None => return yula_abi::ERRNO_ENOMEM,
            }
        }
        let chunk = (PAGE_SIZE_4KB as usize - page_off).min(buf.len() - done);
        let Some(virt) = inode.pages[page_idx].to_virt_checked() else {
            return yula_abi::ERRNO_EIO;
        };
        let dst =
            unsafe { core::slice::from_raw_parts_mut(virt.as_mut_ptr::<u8>().add(page_off), chunk) };
        dst.copy_from_slice(&buf[done..done + chunk]);
        done += chunk;
    }

    inode.size = inode.size.max(end as u32);
    done as i64
}
