//! Shared-memory objects.
//!
//! An object is a list of independently allocated, zero-filled page
//! frames plus an atomic refcount; the page list itself lives in a small
//! buddy block so object creation never needs a kernel heap. A global
//! name registry maps 31-byte names to objects with insert-unique
//! semantics: `unlink` removes only the name, the object survives until
//! its last holder drops it.
//!
//! Page lifetime is per-page refcounted: mapping an object into an
//! address space takes a reference on every page, so pixels stay valid
//! for mapped clients even after the object and its name are gone.

use core::sync::atomic::{AtomicU32, Ordering};

use yula_abi::PhysAddr;
use yula_lib::{FixedName, IrqMutex, klog_debug, klog_warn};

use crate::hhdm::{PhysAddrHhdm, zero_physical_page};
use crate::mm_constants::PAGE_SIZE_4KB;
use crate::page_alloc::{alloc_block, alloc_pages, free_pages, page_dec_ref_and_maybe_free, page_inc_ref};

/// Largest object: 2048 pages = 8 MiB, enough for a 1080p ARGB surface.
pub const SHM_MAX_PAGES: u32 = 2048;

const SHM_MAX_OBJECTS: usize = 64;
const SHM_NAMED_MAX: usize = 64;

/// Order of the buddy block holding the page list (2048 * 8 bytes).
const PAGE_LIST_ORDER: u32 = 2;

pub type ShmHandle = u32;
pub const INVALID_SHM_HANDLE: ShmHandle = u32::MAX;

struct ShmObject {
    active: bool,
    size: u32,
    page_count: u32,
    /// Buddy block of `PAGE_LIST_ORDER` holding `page_count` PhysAddr
    /// entries.
    page_list: PhysAddr,
    refcount: AtomicU32,
}

impl ShmObject {
    const fn empty() -> Self {
        Self {
            active: false,
            size: 0,
            page_count: 0,
            page_list: PhysAddr::NULL,
            refcount: AtomicU32::new(0),
        }
    }

    fn pages(&self) -> &'static [PhysAddr] {
        if self.page_list.is_null() || self.page_count == 0 {
            return &[];
        }
        let virt = self
            .page_list
            .to_virt_checked()
            .expect("shm: page list unreachable");
        // SAFETY: the list block stores exactly page_count entries and
        // lives until the object slot is recycled.
        unsafe { core::slice::from_raw_parts(virt.as_ptr::<PhysAddr>(), self.page_count as usize) }
    }
}

static OBJECTS: IrqMutex<[ShmObject; SHM_MAX_OBJECTS]> =
    IrqMutex::new([const { ShmObject::empty() }; SHM_MAX_OBJECTS]);

#[derive(Clone, Copy)]
struct NamedEntry {
    in_use: bool,
    name: FixedName<32>,
    handle: ShmHandle,
}

static NAMED: IrqMutex<[Option<NamedEntry>; SHM_NAMED_MAX]> =
    IrqMutex::new([None; SHM_NAMED_MAX]);

fn object_release_pages(obj: &mut ShmObject) {
    let page_list = obj.page_list;
    let page_count = obj.page_count;
    obj.page_list = PhysAddr::NULL;
    obj.page_count = 0;
    obj.active = false;
    obj.size = 0;

    if page_list.is_null() {
        return;
    }
    let virt = match page_list.to_virt_checked() {
        Some(v) => v,
        None => return,
    };
    let pages =
        unsafe { core::slice::from_raw_parts(virt.as_ptr::<PhysAddr>(), page_count as usize) };
    for &page in pages {
        if !page.is_null() {
            page_dec_ref_and_maybe_free(page);
        }
    }
    free_pages(page_list, PAGE_LIST_ORDER);
}

/// Create an anonymous object of at least `size` bytes, zero-filled.
/// The returned handle carries one reference.
pub fn shm_create(size: u32) -> Option<ShmHandle> {
    if size == 0 {
        return None;
    }
    let page_count = size.div_ceil(PAGE_SIZE_4KB as u32);
    if page_count > SHM_MAX_PAGES {
        klog_warn!("shm: refusing {}-page object", page_count);
        return None;
    }

    let page_list = alloc_pages(PAGE_LIST_ORDER)?;
    let list_virt = page_list.to_virt_checked()?;
    let list =
        unsafe { core::slice::from_raw_parts_mut(list_virt.as_mut_ptr::<PhysAddr>(), page_count as usize) };

    for i in 0..page_count as usize {
        match alloc_block() {
            Some(page) if zero_physical_page(page).is_ok() => list[i] = page,
            maybe_page => {
                if let Some(page) = maybe_page {
                    crate::page_alloc::free_block(page);
                }
                for &allocated in &list[..i] {
                    crate::page_alloc::free_block(allocated);
                }
                free_pages(page_list, PAGE_LIST_ORDER);
                return None;
            }
        }
    }

    let mut objects = OBJECTS.lock();
    for (idx, obj) in objects.iter_mut().enumerate() {
        if !obj.active {
            obj.active = true;
            obj.size = size;
            obj.page_count = page_count;
            obj.page_list = page_list;
            obj.refcount.store(1, Ordering::Release);
            klog_debug!("shm: object {} created, {} pages", idx, page_count);
            return Some(idx as ShmHandle);
        }
    }
    drop(objects);

    // Table full: hand the pages back.
    for &page in unsafe {
        core::slice::from_raw_parts(list_virt.as_ptr::<PhysAddr>(), page_count as usize)
    } {
        crate::page_alloc::free_block(page);
    }
    free_pages(page_list, PAGE_LIST_ORDER);
    None
}

/// Take an additional reference.
pub fn shm_retain(handle: ShmHandle) -> bool {
    let objects = OBJECTS.lock();
    match objects.get(handle as usize) {
        Some(obj) if obj.active => {
            obj.refcount.fetch_add(1, Ordering::AcqRel);
            true
        }
        _ => false,
    }
}

/// Drop one reference; the last one releases the pages.
pub fn shm_release(handle: ShmHandle) {
    let mut objects = OBJECTS.lock();
    let Some(obj) = objects.get_mut(handle as usize) else {
        return;
    };
    if !obj.active {
        return;
    }
    let prev = obj.refcount.fetch_sub(1, Ordering::AcqRel);
    if prev == 0 {
        klog_warn!("shm: refcount underflow on object {}", handle);
        obj.refcount.store(0, Ordering::Release);
        return;
    }
    if prev == 1 {
        object_release_pages(obj);
    }
}

pub fn shm_size(handle: ShmHandle) -> u32 {
    let objects = OBJECTS.lock();
    objects
        .get(handle as usize)
        .filter(|o| o.active)
        .map(|o| o.size)
        .unwrap_or(0)
}

/// Copy the page list into `out`; returns the page count, or 0 if the
/// handle is dead or `out` is too small.
pub fn shm_pages(handle: ShmHandle, out: &mut [PhysAddr]) -> u32 {
    let objects = OBJECTS.lock();
    let Some(obj) = objects.get(handle as usize) else {
        return 0;
    };
    if !obj.active || out.len() < obj.page_count as usize {
        return 0;
    }
    out[..obj.page_count as usize].copy_from_slice(obj.pages());
    obj.page_count
}

/// Take one reference on every page of the object, for a mapping about to
/// be installed. Undone page-by-page at unmap time.
pub fn shm_retain_pages(handle: ShmHandle) -> bool {
    let objects = OBJECTS.lock();
    let Some(obj) = objects.get(handle as usize) else {
        return false;
    };
    if !obj.active {
        return false;
    }
    for &page in obj.pages() {
        if page_inc_ref(page).is_err() {
            klog_warn!("shm: page ref on non-allocated frame");
            return false;
        }
    }
    true
}

fn named_find(name: &FixedName<32>) -> Option<(usize, ShmHandle)> {
    let entries = NAMED.lock();
    for (idx, entry) in entries.iter().enumerate() {
        if let Some(e) = entry {
            if e.in_use && e.name == *name {
                return Some((idx, e.handle));
            }
        }
    }
    None
}

/// Create an object and bind a unique name to it. The registry holds its
/// own reference in addition to the returned one.
pub fn shm_create_named(name: &FixedName<32>, size: u32) -> Option<ShmHandle> {
    if named_find(name).is_some() {
        return None;
    }

    let handle = shm_create(size)?;

    let mut entries = NAMED.lock();
    // Re-check under the lock: a racing creator may have won.
    for entry in entries.iter() {
        if let Some(e) = entry {
            if e.in_use && e.name == *name {
                drop(entries);
                shm_release(handle);
                return None;
            }
        }
    }

    let mut slot = entries.iter().position(|e| e.is_none());
    if slot.is_none() {
        // Scavenge entries whose object has no holders besides the
        // registry itself.
        let objects = OBJECTS.lock();
        for entry in entries.iter_mut() {
            if let Some(e) = entry {
                let stale = objects
                    .get(e.handle as usize)
                    .map(|o| o.active && o.refcount.load(Ordering::Acquire) == 1)
                    .unwrap_or(true);
                if stale {
                    let dead = e.handle;
                    *entry = None;
                    drop(objects);
                    shm_release(dead);
                    break;
                }
            }
        }
        slot = entries.iter().position(|e| e.is_none());
    }

    match slot {
        Some(idx) => {
            entries[idx] = Some(NamedEntry { in_use: true, name: *name, handle });
            drop(entries);
            shm_retain(handle);
            Some(handle)
        }
        None => {
            drop(entries);
            shm_release(handle);
            None
        }
    }
}

/// Open an existing named object; returns a retained handle.
pub fn shm_open_named(name: &FixedName<32>) -> Option<ShmHandle> {
    let (_, handle) = named_find(name)?;
    if shm_retain(handle) { Some(handle) } else { None }
}

/// Remove the name. The object lives on until its holders drop it.
pub fn shm_unlink_named(name: &FixedName<32>) -> bool {
    let handle = {
        let mut entries = NAMED.lock();
        let mut found = None;
        for entry in entries.iter_mut() {
            if let Some(e) = entry {
                if e.in_use && e.name == *name {
                    found = Some(e.handle);
                    *entry = None;
                    break;
                }
            }
        }
        found
    };

    match handle {
        Some(h) => {
            shm_release(h);
            true
        }
        None => false,
    }
}
