//! Per-process address spaces.
//!
//! Each task owns one `AddressSpace`: a private lower half (heap window,
//! shared-memory window, framebuffer staging window) over a shared kernel
//! upper half. Address spaces are kept in a fixed table and referenced by
//! index from the task structs, which keeps the scheduler free of any
//! paging types.
//!
//! The shared-memory window is managed with a first-fit free list over a
//! bump cursor, so `munmap` makes the address range reusable.

use yula_abi::task::MAX_TASKS;
use yula_abi::{PhysAddr, VirtAddr};
use yula_lib::{IrqMutex, klog_warn};

use crate::mm_constants::{PAGE_SIZE_4KB, USER_FB_BASE, USER_HEAP_BASE, USER_SHM_BASE};
use crate::page_alloc::{alloc_block, free_block, page_dec_ref_and_maybe_free};
use crate::paging::{
    MapError, PTE_NO_EXEC, PTE_USER, PTE_WRITABLE, create_address_space_root,
    destroy_address_space_root, map_page_4kb, unmap_page,
};

pub const INVALID_VM_ID: u32 = u32::MAX;

const MAX_ADDRESS_SPACES: usize = MAX_TASKS;
const MAX_VM_AREAS: usize = 32;

/// One reusable hole or live mapping in the SHM window.
#[derive(Clone, Copy, Default)]
struct VmArea {
    base: u64,
    size: u64,
    mapped: bool,
    /// Mapped pages are refcounted SHM pages, dropped on unmap.
    owns_pages: bool,
    active: bool,
}

struct AddressSpace {
    root: PhysAddr,
    brk: u64,
    shm_cursor: u64,
    fb_cursor: u64,
    areas: [VmArea; MAX_VM_AREAS],
    active: bool,
}

impl AddressSpace {
    const fn empty() -> Self {
        Self {
            root: PhysAddr::NULL,
            brk: USER_HEAP_BASE,
            shm_cursor: USER_SHM_BASE,
            fb_cursor: USER_FB_BASE,
            areas: [VmArea {
                base: 0,
                size: 0,
                mapped: false,
                owns_pages: false,
                active: false,
            }; MAX_VM_AREAS],
            active: false,
        }
    }

    fn alloc_window(&mut self, size: u64) -> Option<u64> {
        // First fit over released holes.
        for area in self.areas.iter_mut() {
            if area.active && !area.mapped && area.size >= size {
                area.mapped = true;
                return Some(area.base);
            }
        }
        let base = self.shm_cursor;
        self.shm_cursor += size.next_multiple_of(PAGE_SIZE_4KB);
        for area in self.areas.iter_mut() {
            if !area.active {
                *area = VmArea { base, size, mapped: true, owns_pages: false, active: true };
                return Some(base);
            }
        }
        None
    }

    fn find_area(&mut self, base: u64) -> Option<&mut VmArea> {
        self.areas.iter_mut().find(|a| a.active && a.mapped && a.base == base)
    }
}

static ADDRESS_SPACES: IrqMutex<[AddressSpace; MAX_ADDRESS_SPACES]> =
    IrqMutex::new([const { AddressSpace::empty() }; MAX_ADDRESS_SPACES]);

/// Create a new address space; returns its id.
pub fn vm_create() -> Result<u32, MapError> {
    let root = create_address_space_root()?;
    let mut table = ADDRESS_SPACES.lock();
    for (id, slot) in table.iter_mut().enumerate() {
        if !slot.active {
            *slot = AddressSpace::empty();
            slot.root = root;
            slot.active = true;
            return Ok(id as u32);
        }
    }
    drop(table);
    destroy_address_space_root(root);
    Err(MapError::NoMemory)
}

/// Tear down an address space: release heap pages, drop SHM page refs,
/// free the table hierarchy.
pub fn vm_destroy(id: u32) {
    let mut table = ADDRESS_SPACES.lock();
    let Some(space) = table.get_mut(id as usize) else {
        return;
    };
    if !space.active {
        return;
    }

    let root = space.root;

    // Heap pages are exclusively owned.
    let mut va = USER_HEAP_BASE;
    while va < space.brk {
        if let Ok(phys) = unmap_page(root, VirtAddr::new(va)) {
            free_block(phys);
        }
        va += PAGE_SIZE_4KB;
    }

    // SHM windows hold references on shared pages.
    for area in space.areas.iter_mut() {
        if !area.active || !area.mapped {
            continue;
        }
        let pages = area.size.div_ceil(PAGE_SIZE_4KB);
        for i in 0..pages {
            if let Ok(phys) = unmap_page(root, VirtAddr::new(area.base + i * PAGE_SIZE_4KB)) {
                if area.owns_pages {
                    page_dec_ref_and_maybe_free(phys);
                }
            }
        }
        area.active = false;
    }

    space.active = false;
    drop(table);

    destroy_address_space_root(root);
}

pub fn vm_root(id: u32) -> Option<PhysAddr> {
    let table = ADDRESS_SPACES.lock();
    let space = table.get(id as usize)?;
    if space.active { Some(space.root) } else { None }
}

/// Grow or shrink the heap; returns the previous break.
pub fn vm_sbrk(id: u32, incr: i64) -> Result<VirtAddr, MapError> {
    let mut table = ADDRESS_SPACES.lock();
    let space = table.get_mut(id as usize).ok_or(MapError::BadAddress)?;
    if !space.active {
        return Err(MapError::BadAddress);
    }

    let old_brk = space.brk;
    if incr == 0 {
        return Ok(VirtAddr::new(old_brk));
    }

    if incr > 0 {
        let new_brk = old_brk
            .checked_add(incr as u64)
            .ok_or(MapError::BadAddress)?;
        let mut va = old_brk.next_multiple_of(PAGE_SIZE_4KB);
        // old_brk lands mid-page when the previous grow wasn't page-sized;
        // that page is already mapped.
        if old_brk % PAGE_SIZE_4KB == 0 {
            va = old_brk;
        }
        while va < new_brk {
            let page = alloc_block().ok_or(MapError::NoMemory)?;
            if crate::hhdm::zero_physical_page(page).is_err() {
                free_block(page);
                return Err(MapError::BadAddress);
            }
            map_page_4kb(
                space.root,
                VirtAddr::new(va),
                page,
                PTE_WRITABLE | PTE_USER | PTE_NO_EXEC,
            )?;
            va += PAGE_SIZE_4KB;
        }
        space.brk = new_brk;
    } else {
        let shrink = (-incr) as u64;
        let new_brk = old_brk.saturating_sub(shrink).max(USER_HEAP_BASE);
        let mut va = new_brk.next_multiple_of(PAGE_SIZE_4KB);
        while va < old_brk {
            if let Ok(phys) = unmap_page(space.root, VirtAddr::new(va)) {
                free_block(phys);
            }
            va += PAGE_SIZE_4KB;
        }
        space.brk = new_brk;
    }

    Ok(VirtAddr::new(old_brk))
}

/// Map a shared-memory page list contiguously into the SHM window.
/// Each page's refcount must already account for this mapping.
pub fn vm_map_shm_pages(id: u32, pages: &[PhysAddr], size: u64) -> Result<VirtAddr, MapError> {
    let mut table = ADDRESS_SPACES.lock();
    let space = table.get_mut(id as usize).ok_or(MapError::BadAddress)?;
    if !space.active || pages.is_empty() {
        return Err(MapError::BadAddress);
    }

    let span = (pages.len() as u64) * PAGE_SIZE_4KB;
    let base = space.alloc_window(span).ok_or(MapError::NoMemory)?;

    for (i, &page) in pages.iter().enumerate() {
        let va = VirtAddr::new(base + i as u64 * PAGE_SIZE_4KB);
        if let Err(err) = map_page_4kb(space.root, va, page, PTE_WRITABLE | PTE_USER | PTE_NO_EXEC) {
            for j in 0..i {
                let _ = unmap_page(space.root, VirtAddr::new(base + j as u64 * PAGE_SIZE_4KB));
            }
            if let Some(area) = space.find_area(base) {
                area.mapped = false;
            }
            return Err(err);
        }
    }

    if let Some(area) = space.find_area(base) {
        area.size = size.max(span);
        area.owns_pages = true;
    }
    Ok(VirtAddr::new(base))
}

/// Map the framebuffer (physically contiguous) into the staging window.
pub fn vm_map_framebuffer(id: u32, fb_phys: PhysAddr, size: u64) -> Result<VirtAddr, MapError> {
    let mut table = ADDRESS_SPACES.lock();
    let space = table.get_mut(id as usize).ok_or(MapError::BadAddress)?;
    if !space.active {
        return Err(MapError::BadAddress);
    }

    let base = space.fb_cursor;
    let pages = size.div_ceil(PAGE_SIZE_4KB);
    space.fb_cursor += (pages + 1) * PAGE_SIZE_4KB;

    for i in 0..pages {
        let va = VirtAddr::new(base + i * PAGE_SIZE_4KB);
        let pa = fb_phys.offset(i * PAGE_SIZE_4KB);
        map_page_4kb(space.root, va, pa, PTE_WRITABLE | PTE_USER | PTE_NO_EXEC)?;
    }
    Ok(VirtAddr::new(base))
}

/// Unmap a window previously produced by [`vm_map_shm_pages`]. Drops the
/// page references; the address range becomes reusable.
pub fn vm_unmap(id: u32, base: VirtAddr, len: u64) -> Result<(), MapError> {
    let mut table = ADDRESS_SPACES.lock();
    let space = table.get_mut(id as usize).ok_or(MapError::BadAddress)?;
    if !space.active {
        return Err(MapError::BadAddress);
    }

    let Some(area) = space.find_area(base.as_u64()) else {
        klog_warn!("vm: munmap of unknown window {:#x}", base.as_u64());
        return Err(MapError::NotMapped);
    };
    let span = area.size.max(len).div_ceil(PAGE_SIZE_4KB);
    let owns_pages = area.owns_pages;
    area.mapped = false;
    area.owns_pages = false;

    for i in 0..span {
        if let Ok(phys) = unmap_page(space.root, VirtAddr::new(base.as_u64() + i * PAGE_SIZE_4KB)) {
            if owns_pages {
                page_dec_ref_and_maybe_free(phys);
            }
        }
    }
    Ok(())
}
